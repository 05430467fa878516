//! Serve registry lookups over HTTP.
//!
//! | Route | Query | Response |
//! |-------|-------|----------|
//! | `GET /current-block` | | `{"current_block": <int>}` |
//! | `GET /accounts-by-prefix` | `prefix=<two words>` | array of accounts |
//! | `GET /account-by-address` | `address=<address>` | account |
//! | `GET /account-by-shorthash` | `shorthash=<words>` | account |
//! | `GET /metrics` | | Prometheus text format |
//!
//! Accounts are returned as `{"prefix", "suffix", "shorthash", "address"}` with words separated
//! by single spaces and the address in checksummed form. Errors are returned as
//! `{"error": <message>}` with status 400 for missing or malformed parameters and 404 when no
//! account exists.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus_client::{encoding::text::encode, registry::Registry as PrometheusRegistry};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shorthash_registry::{storage::Storage, Account, Registry};
use shorthash_words::{Address, Prefix, DISPLAY_WORDS};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// An [Account] as returned by the API.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct AccountResponse {
    pub prefix: String,
    pub suffix: String,
    pub shorthash: String,
    pub address: String,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            prefix: account.display_prefix().to_string(),
            suffix: account.display_suffix().to_string(),
            shorthash: account.shorthash().to_string(),
            address: account.address().checksummed(),
        }
    }
}

/// Errors returned to API clients.
#[derive(Debug)]
pub enum ApiError {
    Missing(&'static str),
    Invalid(&'static str, String),
    NotFound,
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Missing(param) => (
                StatusCode::BAD_REQUEST,
                format!("missing parameter: {}", param),
            ),
            ApiError::Invalid(param, reason) => (
                StatusCode::BAD_REQUEST,
                format!("invalid {}: {}", param, reason),
            ),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "account not found".to_string()),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            ),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

struct AppState<S: Storage> {
    registry: Registry<S>,
    metrics: Arc<Mutex<PrometheusRegistry>>,
}

impl<S: Storage> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

#[derive(Deserialize)]
struct PrefixQuery {
    prefix: Option<String>,
}

#[derive(Deserialize)]
struct AddressQuery {
    address: Option<String>,
}

#[derive(Deserialize)]
struct ShorthashQuery {
    shorthash: Option<String>,
}

fn required<'a>(value: &'a Option<String>, param: &'static str) -> Result<&'a str, ApiError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ApiError::Missing(param))
}

async fn current_block<S: Storage>(State(state): State<AppState<S>>) -> Json<serde_json::Value> {
    let cursor = state.registry.current_block_cursor().await;
    Json(json!({ "current_block": cursor }))
}

async fn accounts_by_prefix<S: Storage>(
    State(state): State<AppState<S>>,
    Query(query): Query<PrefixQuery>,
) -> Result<Json<Vec<AccountResponse>>, ApiError> {
    let prefix: Prefix = required(&query.prefix, "prefix")?
        .parse()
        .map_err(|err: shorthash_words::Error| ApiError::Invalid("prefix", err.to_string()))?;
    if prefix.len() != DISPLAY_WORDS {
        return Err(ApiError::Invalid(
            "prefix",
            format!("expected {} words, found {}", DISPLAY_WORDS, prefix.len()),
        ));
    }
    let accounts = state.registry.lookup_by_display_prefix(&prefix).await;
    debug!(%prefix, found = accounts.len(), "accounts by prefix");
    Ok(Json(accounts.iter().map(AccountResponse::from).collect()))
}

async fn account_by_address<S: Storage>(
    State(state): State<AppState<S>>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<AccountResponse>, ApiError> {
    let address: Address = required(&query.address, "address")?
        .parse()
        .map_err(|err: shorthash_words::Error| ApiError::Invalid("address", err.to_string()))?;
    let account = state
        .registry
        .lookup_by_address(&address)
        .await
        .ok_or(ApiError::NotFound)?;
    Ok(Json(AccountResponse::from(&account)))
}

async fn account_by_shorthash<S: Storage>(
    State(state): State<AppState<S>>,
    Query(query): Query<ShorthashQuery>,
) -> Result<Json<AccountResponse>, ApiError> {
    let shorthash: Prefix = required(&query.shorthash, "shorthash")?
        .parse()
        .map_err(|err: shorthash_words::Error| ApiError::Invalid("shorthash", err.to_string()))?;
    let account = state
        .registry
        .lookup_by_shorthash(&shorthash)
        .await
        .ok_or(ApiError::NotFound)?;
    Ok(Json(AccountResponse::from(&account)))
}

async fn encode_metrics<S: Storage>(State(state): State<AppState<S>>) -> Result<Response, ApiError> {
    let mut buffer = String::new();
    {
        let metrics = state.metrics.lock().map_err(|_| ApiError::Internal)?;
        encode(&mut buffer, &metrics).map_err(|err| {
            error!(?err, "failed to encode metrics");
            ApiError::Internal
        })?;
    }
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response())
}

/// Build the API router over `registry`, exposing `metrics` at `/metrics`.
pub fn router<S: Storage>(
    registry: Registry<S>,
    metrics: Arc<Mutex<PrometheusRegistry>>,
) -> Router {
    Router::new()
        .route("/current-block", get(current_block::<S>))
        .route("/accounts-by-prefix", get(accounts_by_prefix::<S>))
        .route("/account-by-address", get(account_by_address::<S>))
        .route("/account-by-shorthash", get(account_by_shorthash::<S>))
        .route("/metrics", get(encode_metrics::<S>))
        .with_state(AppState { registry, metrics })
}

/// Serve `router` on `listener` until the server fails.
pub async fn serve(listener: TcpListener, router: Router) -> Result<(), std::io::Error> {
    info!(address = ?listener.local_addr()?, "serving api");
    axum::serve(listener, router).await
}
