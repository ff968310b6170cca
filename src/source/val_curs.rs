use serde::Deserialize;

/// One `<Valute>` record of the CBR daily feed.
#[derive(Debug, Deserialize, PartialEq)]
pub struct Valute {
    #[serde(rename = "CharCode")]
    pub char_code: String,
    /// Roubles per single unit, with a comma decimal separator.
    #[serde(rename = "VunitRate")]
    pub vunit_rate: String,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct ValCurs {
    #[serde(rename = "@Date", default)]
    pub date: Option<String>,
    #[serde(rename = "Valute", default)]
    pub valute: Vec<Valute>,
}
