use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use anyhow::{Context, Result};
use log::info;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use valut_rates::api::{self, AppState};
use valut_rates::cache::RateCache;
use valut_rates::config::Config;
use valut_rates::scheduler::RefreshScheduler;
use valut_rates::service::RateService;
use valut_rates::source::{CbrSource, OpenExchangeRatesSource, RateSource, SourceKind};
use valut_rates::store::PgRateStore;

#[actix_web::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;

    let store = PgRateStore::connect(&config.database_url, config.db_max_connections).await?;
    store.migrate().await?;

    let client = Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let source: Arc<dyn RateSource> = match config.rates_source {
        SourceKind::OpenExchangeRates => Arc::new(OpenExchangeRatesSource::new(
            client,
            config.rates_url.clone(),
            config.rates_api_key.clone(),
        )),
        SourceKind::Cbr => Arc::new(CbrSource::new(client, config.rates_url.clone())),
    };

    let cache = Arc::new(RateCache::new());
    cache.invalidate_all();

    let service = Arc::new(
        RateService::new(Arc::new(store), source, cache.clone()).with_cache_ttl(config.cache_ttl),
    );

    let shutdown = CancellationToken::new();
    let scheduler =
        RefreshScheduler::new(service.clone(), config.refresh_interval).spawn(shutdown.clone());

    let state = web::Data::new(AppState {
        service,
        shutdown: shutdown.clone(),
    });

    info!("Listening on {}", config.bind_address);
    HttpServer::new(move || App::new().app_data(state.clone()).configure(api::configure))
        .bind(&config.bind_address)
        .with_context(|| format!("Can't bind {}", config.bind_address))?
        .run()
        .await?;

    shutdown.cancel();
    scheduler.await.context("Refresh scheduler task failed")?;
    cache.invalidate_all();
    info!("Shut down");

    Ok(())
}
