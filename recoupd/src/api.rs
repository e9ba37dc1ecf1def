//! HTTP API for the Recoup daemon.
//!
//! Provides REST endpoints for:
//! - Health check
//! - Operator-triggered balance refresh

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use recoup_collect::{BalanceError, BalanceRefresher, RefreshOptions};
use recoup_domain::{AdvanceId, BankAccountId};
use recoup_store::Store;

/// Caller tag recorded on audit entries for operator-triggered refreshes.
const OPERATOR_CALLER: &str = "operator-refresh";

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState {
    pub store: Arc<dyn Store>,
    pub refresher: Arc<BalanceRefresher>,
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Request to refresh a bank account balance.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshBalanceRequest {
    /// Accept a fresh-enough cached snapshot instead of forcing an
    /// upstream call.
    #[serde(default)]
    pub use_cache: bool,
}

/// Successful refresh envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshBalanceResponse {
    pub ok: bool,
    pub completed: bool,
    /// Warning flag: this snapshot was served from the freshness cache.
    pub cached: bool,
    pub balances: Balances,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balances {
    pub available: Decimal,
    pub current: Decimal,
    pub as_of: DateTime<Utc>,
}

/// Failure envelope. `reason` is omitted for the generic fallback.
#[derive(Debug, Serialize, Deserialize)]
pub struct FailureResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl FailureResponse {
    fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }

    fn generic() -> Self {
        Self {
            ok: false,
            reason: None,
        }
    }
}

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/advance/:advance_id/bank-account/:bank_account_id/refresh-balance",
            post(refresh_balance_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Refresh the balance behind an advance's bank account, synchronously.
///
/// The refresh runs under the same single-flight lock as scheduled
/// collection, so an operator clicking refresh during a collection run
/// joins the in-flight fetch instead of racing it. The body is optional;
/// omitting it forces a live upstream fetch.
async fn refresh_balance_handler(
    State(state): State<Arc<ApiState>>,
    Path((advance_id, bank_account_id)): Path<(AdvanceId, BankAccountId)>,
    body: Option<Json<RefreshBalanceRequest>>,
) -> Result<Json<RefreshBalanceResponse>, (StatusCode, Json<FailureResponse>)> {
    let Json(req) = body.unwrap_or_default();

    let advance = state
        .store
        .advances()
        .find_by_id(advance_id)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(FailureResponse::with_reason(e.to_string())),
            )
        })?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(FailureResponse::with_reason(format!(
                    "Advance not found: {}",
                    advance_id
                ))),
            )
        })?;

    if advance.bank_account.id != bank_account_id {
        return Err((
            StatusCode::NOT_FOUND,
            Json(FailureResponse::with_reason(format!(
                "Bank account {} not linked to advance {}",
                bank_account_id, advance_id
            ))),
        ));
    }

    let refresh = state
        .refresher
        .refresh_with_lock(
            advance_id,
            &advance.bank_account,
            OPERATOR_CALLER,
            RefreshOptions {
                timeout: None,
                use_cache: req.use_cache,
            },
        )
        .await
        .map_err(to_balance_error_response)?;

    Ok(Json(RefreshBalanceResponse {
        ok: true,
        completed: refresh.completed,
        cached: refresh.cached,
        balances: Balances {
            available: refresh.snapshot.available,
            current: refresh.snapshot.current,
            as_of: refresh.snapshot.as_of,
        },
    }))
}

// =============================================================================
// Helpers
// =============================================================================

fn to_balance_error_response(error: BalanceError) -> (StatusCode, Json<FailureResponse>) {
    match &error {
        // The institution not answering is a gateway problem, not ours.
        BalanceError::Timeout(_) | BalanceError::InstitutionUnavailable(_) => (
            StatusCode::BAD_GATEWAY,
            Json(FailureResponse::with_reason(error.to_string())),
        ),
        BalanceError::Internal(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(FailureResponse::with_reason(error.to_string())),
        ),
        // Upstream detail stays out of the response body.
        BalanceError::Upstream(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(FailureResponse::generic()),
        ),
    }
}

// =============================================================================
// Tests
// =============================================================================
