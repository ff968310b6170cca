//! HTTP surface over [`RateService`].

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError, web};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::RateError;
use crate::exchange_rate::ExchangeRate;
use crate::service::RateService;

pub struct AppState {
    pub service: Arc<RateService>,
    /// Cancelled at shutdown; every request runs under a child of it.
    pub shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub currency: String,
    pub value: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct ConvertQuery {
    pub from: String,
    pub to: String,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct RateBody {
    currency: String,
    value: Decimal,
    observed_at: DateTime<Utc>,
}

impl From<ExchangeRate> for RateBody {
    fn from(rate: ExchangeRate) -> Self {
        Self {
            currency: rate.currency.to_string(),
            value: rate.rate,
            observed_at: rate.observed_at,
        }
    }
}

impl ResponseError for RateError {
    fn status_code(&self) -> StatusCode {
        match self {
            RateError::Validation(_) => StatusCode::BAD_REQUEST,
            RateError::NotFound(_) => StatusCode::NOT_FOUND,
            RateError::UpstreamFetchFailed(_) => StatusCode::BAD_GATEWAY,
            RateError::PersistenceFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RateError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({ "message": self.to_string() }))
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/rates", web::post().to(assign))
            .route("/rates/refresh", web::post().to(refresh))
            .route("/rates/{code}", web::get().to(current))
            .route("/rates/{code}", web::delete().to(delete))
            .route("/rates/{code}/history", web::get().to(history))
            .route("/convert", web::get().to(convert)),
    );
}

async fn assign(
    state: web::Data<AppState>,
    body: web::Json<AssignRequest>,
) -> Result<HttpResponse, RateError> {
    let cancel = state.shutdown.child_token();
    let rate = state
        .service
        .assign_currency(&body.currency, body.value, &cancel)
        .await?;

    Ok(HttpResponse::Ok().json(RateBody::from(rate)))
}

async fn current(
    state: web::Data<AppState>,
    code: web::Path<String>,
) -> Result<HttpResponse, RateError> {
    let cancel = state.shutdown.child_token();
    let rate = state.service.get_currency(&code, &cancel).await?;

    Ok(HttpResponse::Ok().json(RateBody::from(rate)))
}

async fn delete(
    state: web::Data<AppState>,
    code: web::Path<String>,
) -> Result<HttpResponse, RateError> {
    let cancel = state.shutdown.child_token();
    state.service.delete_currency(&code, &cancel).await?;

    Ok(HttpResponse::NoContent().finish())
}

async fn history(
    state: web::Data<AppState>,
    code: web::Path<String>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, RateError> {
    let cancel = state.shutdown.child_token();
    let rates = state
        .service
        .get_historical(&code, query.from, query.to, &cancel)
        .await?;

    let body: Vec<RateBody> = rates.into_iter().map(RateBody::from).collect();
    Ok(HttpResponse::Ok().json(body))
}

async fn convert(
    state: web::Data<AppState>,
    query: web::Query<ConvertQuery>,
) -> Result<HttpResponse, RateError> {
    let cancel = state.shutdown.child_token();
    let result = state
        .service
        .calculate(&query.from, &query.to, query.amount, &cancel)
        .await?;

    Ok(HttpResponse::Ok().json(result))
}

async fn refresh(state: web::Data<AppState>) -> Result<HttpResponse, RateError> {
    let cancel = state.shutdown.child_token();
    let report = state.service.fetch_and_save_rates(&cancel).await?;

    Ok(HttpResponse::Ok().json(report))
}
