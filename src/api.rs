//! HTTP API over the contract ledger.
//!
//! Every route sits under the configured prefix and requires
//! `Authorization: Bearer <token>`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use love_ledger_sdk::{Error, LedgerService, RecordStore, ServiceError};

use crate::wire::{
    ContractActionBody, ContractEnvelope, CreateContractBody, ErrorBody, PairBody, StatsEnvelope,
    VerifyEnvelope, WalletContractEnvelope,
};

pub struct ApiState<S: RecordStore> {
    ledger: LedgerService<S>,
}

impl<S: RecordStore> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
        }
    }
}

/// Build the application router. `prefix` is a normalized mount path
/// (`""` for the root).
pub fn router<S: RecordStore>(
    ledger: LedgerService<S>,
    prefix: &str,
    api_token: Option<String>,
) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/contracts/create", post(create_contract::<S>))
        .route("/contracts/pair", post(pair_contract::<S>))
        .route("/contracts/verify", post(verify_contract::<S>))
        .route("/contracts/unpair", post(unpair_contract::<S>))
        .route("/contracts/wallet/:wallet", get(contract_by_wallet::<S>))
        .route("/contracts/:id", get(contract_by_id::<S>))
        .route("/stats", get(stats::<S>))
        .route_layer(middleware::from_fn_with_state(
            api_token.map(Arc::<str>::from),
            require_bearer,
        ))
        .with_state(ApiState { ledger });

    let app = if prefix.is_empty() {
        api
    } else {
        Router::new().nest(prefix, api)
    };

    app.fallback(not_found)
        .layer(middleware::from_fn(log_requests))
        .layer(cors())
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .expose_headers([CONTENT_LENGTH])
        .max_age(Duration::from_secs(600))
}

// ============================================================================
// Middleware
// ============================================================================

async fn require_bearer(
    State(token): State<Option<Arc<str>>>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let authorized = match (presented, token.as_deref()) {
        (None, _) => false,
        (Some(presented), Some(expected)) => presented == expected,
        (Some(_), None) => true,
    };
    if !authorized {
        log::debug!("api: rejected credentials for {}", request.uri().path());
        return ApiError::new(StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    next.run(request).await
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis();
    if status.is_server_error() {
        log::warn!("api: {method} {path} -> {} ({elapsed_ms} ms)", status.as_u16());
    } else {
        log::info!("api: {method} {path} -> {} ({elapsed_ms} ms)", status.as_u16());
    }
    response
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: error.into(),
                details: None,
            },
        }
    }

    /// Expected ledger conditions carry their own message; anything else is
    /// reported as "Failed to `action`" with the cause as details.
    pub(crate) fn from_service(err: ServiceError, action: &str) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            log::error!("api: failed to {action}: {err}");
            return Self {
                status,
                body: ErrorBody {
                    error: format!("Failed to {action}"),
                    details: Some(err.to_string()),
                },
            };
        }
        if !err.is_expected() {
            log::warn!("api: {action} did not complete: {err}");
        }
        Self::new(status, err.to_string())
    }

    pub(crate) fn into_parts(self) -> (StatusCode, ErrorBody) {
        (self.status, self.body)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

/// HTTP status for a ledger failure.
pub fn status_for(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::Ledger(e) => match e {
            Error::Validation(_) | Error::InvalidState { .. } => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Store(_) | Error::CorruptRecord { .. } | Error::Chain(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        },
        ServiceError::MutexPoisoned | ServiceError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn require_field(value: &str, name: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("Missing required fields: {name}"),
        ));
    }
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "Not found")
}

async fn create_contract<S: RecordStore>(
    State(state): State<ApiState<S>>,
    body: Result<Json<CreateContractBody>, JsonRejection>,
) -> Result<Json<ContractEnvelope>, ApiError> {
    let Json(body) = body?;
    let request = body
        .into_request()
        .map_err(|e| ApiError::from_service(e.into(), "create contract"))?;
    let contract = state
        .ledger
        .create_contract(request)
        .await
        .map_err(|e| ApiError::from_service(e, "create contract"))?;
    Ok(Json(ContractEnvelope {
        success: true,
        contract,
    }))
}

async fn pair_contract<S: RecordStore>(
    State(state): State<ApiState<S>>,
    body: Result<Json<PairBody>, JsonRejection>,
) -> Result<Json<ContractEnvelope>, ApiError> {
    let Json(body) = body?;
    require_field(&body.contract_id, "contractId")?;
    require_field(&body.partner_wallet, "partnerWallet")?;
    let contract = state
        .ledger
        .pair(&body.contract_id, &body.partner_wallet)
        .await
        .map_err(|e| ApiError::from_service(e, "pair wallet"))?;
    Ok(Json(ContractEnvelope {
        success: true,
        contract,
    }))
}

async fn verify_contract<S: RecordStore>(
    State(state): State<ApiState<S>>,
    body: Result<Json<ContractActionBody>, JsonRejection>,
) -> Result<Json<VerifyEnvelope>, ApiError> {
    let Json(body) = body?;
    require_field(&body.contract_id, "contractId")?;
    require_field(&body.wallet, "wallet")?;
    let outcome = state
        .ledger
        .verify(&body.contract_id, &body.wallet)
        .await
        .map_err(|e| ApiError::from_service(e, "verify"))?;
    Ok(Json(VerifyEnvelope {
        success: true,
        contract: outcome.contract,
        both_verified: outcome.both_verified,
    }))
}

async fn unpair_contract<S: RecordStore>(
    State(state): State<ApiState<S>>,
    body: Result<Json<ContractActionBody>, JsonRejection>,
) -> Result<Json<ContractEnvelope>, ApiError> {
    let Json(body) = body?;
    require_field(&body.contract_id, "contractId")?;
    require_field(&body.wallet, "wallet")?;
    let contract = state
        .ledger
        .unpair(&body.contract_id, &body.wallet)
        .await
        .map_err(|e| ApiError::from_service(e, "unpair"))?;
    Ok(Json(ContractEnvelope {
        success: true,
        contract,
    }))
}

async fn contract_by_id<S: RecordStore>(
    State(state): State<ApiState<S>>,
    Path(id): Path<String>,
) -> Result<Json<ContractEnvelope>, ApiError> {
    let contract = state
        .ledger
        .get_contract(&id)
        .await
        .map_err(|e| ApiError::from_service(e, "fetch contract"))?;
    Ok(Json(ContractEnvelope {
        success: true,
        contract,
    }))
}

async fn contract_by_wallet<S: RecordStore>(
    State(state): State<ApiState<S>>,
    Path(wallet): Path<String>,
) -> Result<Json<WalletContractEnvelope>, ApiError> {
    let contract = state
        .ledger
        .get_contract_by_wallet(&wallet)
        .await
        .map_err(|e| ApiError::from_service(e, "fetch contract"))?;
    Ok(Json(WalletContractEnvelope {
        success: true,
        contract,
    }))
}

async fn stats<S: RecordStore>(
    State(state): State<ApiState<S>>,
) -> Result<Json<StatsEnvelope>, ApiError> {
    let stats = state
        .ledger
        .stats()
        .await
        .map_err(|e| ApiError::from_service(e, "fetch stats"))?;
    Ok(Json(StatsEnvelope {
        success: true,
        stats,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (Error::Validation("x".into()), StatusCode::BAD_REQUEST),
            (
                Error::InvalidState {
                    status: love_ledger_sdk::ContractStatus::Terminated,
                    operation: "verify",
                },
                StatusCode::BAD_REQUEST,
            ),
            (Error::Unauthorized("x".into()), StatusCode::FORBIDDEN),
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (Error::Conflict("x".into()), StatusCode::CONFLICT),
            (Error::Store("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(&ServiceError::Ledger(err)), status);
        }
        assert_eq!(
            status_for(&ServiceError::MutexPoisoned),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_failures_hide_behind_action() {
        let err = ApiError::from_service(Error::Store("disk full".into()).into(), "pair wallet");
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body.error, "Failed to pair wallet");
        assert_eq!(
            err.body.details.as_deref(),
            Some("record store error: disk full")
        );

        let err = ApiError::from_service(Error::NotFound("c1".into()).into(), "pair wallet");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.body.error, "contract not found: c1");
        assert!(err.body.details.is_none());
    }
}
