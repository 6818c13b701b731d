//! # API Request Handlers
//!
//! This module contains the handler functions for each API endpoint.
//! Each handler:
//! 1. Extracts request data
//! 2. Runs the operation's validation rule table
//! 3. Calls the appropriate service
//! 4. Returns a formatted response
//!
//! ## Error Handling
//!
//! All errors are caught and returned as JSON:
//!
//! ```json
//! {
//!     "success": false,
//!     "error": {
//!         "code": "INSUFFICIENT_FUNDS",
//!         "message": "insufficient funds: available 500, requested 1000"
//!     }
//! }
//! ```
//!
//! Error codes map onto HTTP statuses: not-found errors are 404,
//! conflicts (duplicate keys, late cancellation) are 409, storage
//! faults are 500, everything else the caller got wrong is 400.

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::models::validation::{self, INITIATE_TRANSFER_RULES};
use crate::models::{
    ApiResponse, AutoBridgeCheckResponse, BridgeEstimateResponse, EstimateBridgeQuery,
    HealthResponse, HistoryQuery, InitiateTransferRequest, TransferListResponse,
    TransferResponse, WalletBalanceResponse,
};
use crate::services::{TransferError, TransferRequest};
use crate::utils::format_usd;
use crate::AppState;

use crate::db::models::LedgerKind;

/// Map a transfer error onto an HTTP response.
fn error_response(e: &TransferError) -> HttpResponse {
    let status = match e {
        TransferError::WalletNotFound(_) | TransferError::TransferNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        TransferError::DuplicateTransfer
        | TransferError::Cancelled(_)
        | TransferError::NotCancellable { .. } => StatusCode::CONFLICT,
        TransferError::TransactionFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };

    HttpResponse::build(status).json(ApiResponse::<()>::error(e.code(), &e.to_string()))
}

fn validation_error(message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(ApiResponse::<()>::error("VALIDATION_ERROR", message))
}

/// API information endpoint (root).
///
/// Returns information about available API endpoints.
///
/// ## Endpoint
///
/// `GET /`
pub async fn api_info() -> HttpResponse {
    let info = json!({
        "name": "Wallet Ledger API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Dual-ledger transfer and limit-enforcement engine",
        "endpoints": {
            "health": {
                "method": "GET",
                "path": "/health",
                "description": "Health check endpoint"
            },
            "transfers": {
                "initiate": {
                    "method": "POST",
                    "path": "/transfers",
                    "description": "Initiate a P2P or bridge transfer"
                },
                "status": {
                    "method": "GET",
                    "path": "/transfers/{id}",
                    "description": "Get transfer status"
                },
                "cancel": {
                    "method": "POST",
                    "path": "/transfers/{id}/cancel",
                    "description": "Cancel a pending transfer"
                }
            },
            "wallets": {
                "balance": {
                    "method": "GET",
                    "path": "/wallets/{id}/balance",
                    "description": "Combined balances across both ledgers"
                },
                "history": {
                    "method": "GET",
                    "path": "/wallets/{id}/transfers",
                    "description": "Transfer history, newest first"
                },
                "autoBridge": {
                    "method": "POST",
                    "path": "/wallets/{id}/auto-bridge/check",
                    "description": "Evaluate the auto-bridge threshold now"
                }
            },
            "bridge": {
                "estimate": {
                    "method": "GET",
                    "path": "/bridge/estimate",
                    "description": "Preview fee and settlement time for a bridge"
                }
            }
        }
    });

    HttpResponse::Ok().json(ApiResponse::success(info))
}

/// Health check endpoint.
///
/// ## Endpoint
///
/// `GET /health`
///
/// ## Example
///
/// ```bash
/// curl http://127.0.0.1:8080/health
/// ```
pub async fn health_check(state: web::Data<Arc<AppState>>) -> HttpResponse {
    let store_healthy = state.store.ping().await;

    let response = HealthResponse {
        status: if store_healthy { "healthy" } else { "unhealthy" }.to_string(),
        store: store_healthy,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    };

    let status_code = if store_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    HttpResponse::build(status_code).json(ApiResponse::success(response))
}

/// Initiate a transfer.
///
/// ## Endpoint
///
/// `POST /transfers`
///
/// ## Example (P2P)
///
/// ```bash
/// curl -X POST http://127.0.0.1:8080/transfers \
///   -H "Content-Type: application/json" \
///   -d '{
///     "sourceWalletId": "550e8400-e29b-41d4-a716-446655440000",
///     "kind": "p2p",
///     "destWalletId": "660e8400-e29b-41d4-a716-446655440000",
///     "amount": "100.50",
///     "idempotencyKey": "req-001"
///   }'
/// ```
///
/// ## Example (Bridge)
///
/// ```bash
/// curl -X POST http://127.0.0.1:8080/transfers \
///   -H "Content-Type: application/json" \
///   -d '{
///     "sourceWalletId": "550e8400-e29b-41d4-a716-446655440000",
///     "kind": "bridge",
///     "direction": "primary_to_custodial",
///     "amount": "250.00"
///   }'
/// ```
pub async fn initiate_transfer(
    state: web::Data<Arc<AppState>>,
    body: web::Json<serde_json::Value>,
) -> HttpResponse {
    let payload = body.into_inner();

    // The rule table runs on the raw payload so field-level problems
    // come back as precise messages instead of serde noise.
    if let Err(message) = validation::validate(INITIATE_TRANSFER_RULES, &payload) {
        return validation_error(&message);
    }

    let request: InitiateTransferRequest = match serde_json::from_value(payload) {
        Ok(request) => request,
        Err(e) => return validation_error(&e.to_string()),
    };

    let amount = match validation::decimal_to_cents(request.amount) {
        Ok(amount) => amount,
        Err(message) => return validation_error(&format!("amount: {}", message)),
    };

    info!(
        "Transfer request: {} from wallet {}",
        format_usd(amount),
        request.source_wallet_id
    );

    let result = state
        .orchestrator
        .initiate_transfer(TransferRequest {
            source_wallet_id: request.source_wallet_id,
            kind: request.kind,
            amount,
            idempotency_key: request.idempotency_key,
            note: request.note,
        })
        .await;

    match result {
        Ok(record) => HttpResponse::Ok().json(ApiResponse::success(TransferResponse::from(record))),
        Err(e) => {
            error!("Transfer failed: {}", e);
            error_response(&e)
        }
    }
}

/// Get transfer status.
///
/// ## Endpoint
///
/// `GET /transfers/{id}`
pub async fn get_transfer(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    let transfer_id = path.into_inner();

    match state.orchestrator.get_transfer(transfer_id).await {
        Ok(record) => HttpResponse::Ok().json(ApiResponse::success(TransferResponse::from(record))),
        Err(e) => error_response(&e),
    }
}

/// Cancel a pending transfer.
///
/// Only transfers still in `pending` can be cancelled; anything
/// already processing is past the point of no return and returns 409.
///
/// ## Endpoint
///
/// `POST /transfers/{id}/cancel`
pub async fn cancel_transfer(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    let transfer_id = path.into_inner();
    info!("Cancel request for transfer {}", transfer_id);

    match state.orchestrator.cancel_transfer(transfer_id).await {
        Ok(record) => HttpResponse::Ok().json(ApiResponse::success(TransferResponse::from(record))),
        Err(e) => {
            error!("Cancel failed for {}: {}", transfer_id, e);
            error_response(&e)
        }
    }
}

/// Get combined balances for a wallet.
///
/// ## Endpoint
///
/// `GET /wallets/{id}/balance`
pub async fn get_balance(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    let wallet_id = path.into_inner();

    let wallet = match state.store.get_wallet(wallet_id).await {
        Ok(Some(wallet)) => wallet,
        Ok(None) => return error_response(&TransferError::WalletNotFound(wallet_id)),
        Err(e) => return error_response(&TransferError::from(e)),
    };

    let accounts = match state.store.ledger_accounts(wallet_id).await {
        Ok(accounts) => accounts,
        Err(e) => return error_response(&TransferError::from(e)),
    };

    // A wallet without an account on a ledger reads as zero there.
    let mut primary = 0;
    let mut custodial = 0;
    for account in &accounts {
        match account.ledger_kind {
            LedgerKind::Primary => primary = account.balance,
            LedgerKind::Custodial => custodial = account.balance,
        }
    }

    let combined = primary + custodial;
    HttpResponse::Ok().json(ApiResponse::success(WalletBalanceResponse {
        wallet_id,
        currency: wallet.currency,
        primary_balance: primary,
        custodial_balance: custodial,
        combined_balance: combined,
        formatted_combined: format_usd(combined),
    }))
}

/// Get transfer history for a wallet.
///
/// ## Endpoint
///
/// `GET /wallets/{id}/transfers?limit=20`
pub async fn get_history(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    query: web::Query<HistoryQuery>,
) -> HttpResponse {
    let wallet_id = path.into_inner();
    let limit = query.limit.clamp(1, state.config.history_page_limit);

    match state.orchestrator.transfer_history(wallet_id, limit).await {
        Ok(records) => {
            let transfers: Vec<TransferResponse> =
                records.into_iter().map(TransferResponse::from).collect();
            HttpResponse::Ok().json(ApiResponse::success(TransferListResponse {
                wallet_id,
                count: transfers.len(),
                transfers,
            }))
        }
        Err(e) => error_response(&e),
    }
}

/// Estimate a bridge transfer.
///
/// Pure preview: reads balances and the fee schedule, mutates nothing.
///
/// ## Endpoint
///
/// `GET /bridge/estimate?walletId=...&amount=100.00&direction=primary_to_custodial`
pub async fn estimate_bridge(
    state: web::Data<Arc<AppState>>,
    query: web::Query<EstimateBridgeQuery>,
) -> HttpResponse {
    let query = query.into_inner();

    let amount = match validation::decimal_to_cents(query.amount) {
        Ok(amount) => amount,
        Err(message) => return validation_error(&format!("amount: {}", message)),
    };

    match state
        .estimator
        .estimate(query.wallet_id, amount, query.direction)
        .await
    {
        Ok(estimate) => HttpResponse::Ok().json(ApiResponse::success(
            BridgeEstimateResponse::new(query.direction, amount, estimate),
        )),
        Err(e) => error_response(&e),
    }
}

/// Evaluate the auto-bridge threshold for a wallet right now.
///
/// The scheduled monitor does this on its own cadence; this endpoint
/// lets collaborators ask for an immediate evaluation (e.g. right
/// after an external deposit lands).
///
/// ## Endpoint
///
/// `POST /wallets/{id}/auto-bridge/check`
pub async fn check_auto_bridge(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    let wallet_id = path.into_inner();

    match state.monitor.check_wallet(wallet_id).await {
        Ok(outcome) => {
            HttpResponse::Ok().json(ApiResponse::success(AutoBridgeCheckResponse::from(outcome)))
        }
        Err(e) => {
            error!("Auto-bridge check failed for {}: {}", wallet_id, e);
            error_response(&e)
        }
    }
}
