//! # API Response Models
//!
//! Structures for outgoing API response bodies.
//! All responses are wrapped in a standard format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::{LedgerKind, TransferRecord, TransferStatus, TransferType};
use crate::services::{AutoBridgeOutcome, BridgeDirection, BridgeEstimate};
use crate::utils::format_usd;

/// Standard API response wrapper.
///
/// All API responses follow this format:
///
/// ## Success Response
///
/// ```json
/// {
///     "success": true,
///     "data": { ... },
///     "error": null
/// }
/// ```
///
/// ## Error Response
///
/// ```json
/// {
///     "success": false,
///     "data": null,
///     "error": {
///         "code": "INSUFFICIENT_FUNDS",
///         "message": "insufficient funds: available 500, requested 1000"
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    /// Whether the request was successful.
    pub success: bool,

    /// Response data (null on error).
    pub data: Option<T>,

    /// Error information (null on success).
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response with data.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(code: &str, message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

/// API error information.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Error code (e.g., "INSUFFICIENT_FUNDS").
    pub code: String,

    /// Human-readable error message.
    pub message: String,
}

/// One transfer, as returned by the API.
///
/// ## Example Response
///
/// ```json
/// {
///     "id": "550e8400-e29b-41d4-a716-446655440000",
///     "sourceWalletId": "...",
///     "destWalletId": "...",
///     "sourceLedger": "primary",
///     "destLedger": "primary",
///     "transferType": "p2p",
///     "amount": 10050,
///     "formattedAmount": "100.50 USD",
///     "fee": 0,
///     "status": "completed",
///     "createdAt": "2025-01-14T12:00:00Z",
///     "completedAt": "2025-01-14T12:00:01Z"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub id: Uuid,
    pub source_wallet_id: Uuid,
    pub dest_wallet_id: Uuid,
    pub source_ledger: LedgerKind,
    pub dest_ledger: LedgerKind,
    pub transfer_type: TransferType,

    /// Amount in cents.
    pub amount: i64,

    /// Human-readable amount (e.g., "100.50 USD").
    pub formatted_amount: String,

    /// Fee in cents.
    pub fee: i64,

    pub status: TransferStatus,
    pub idempotency_key: Option<String>,
    pub note: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<TransferRecord> for TransferResponse {
    fn from(record: TransferRecord) -> Self {
        Self {
            id: record.id,
            source_wallet_id: record.source_wallet_id,
            dest_wallet_id: record.dest_wallet_id,
            source_ledger: record.source_ledger,
            dest_ledger: record.dest_ledger,
            transfer_type: record.transfer_type,
            amount: record.amount,
            formatted_amount: format_usd(record.amount),
            fee: record.fee,
            status: record.status,
            idempotency_key: record.idempotency_key,
            note: record.note,
            failure_reason: record.failure_reason,
            created_at: record.created_at,
            completed_at: record.completed_at,
        }
    }
}

/// Transfer history response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferListResponse {
    pub wallet_id: Uuid,
    pub count: usize,
    pub transfers: Vec<TransferResponse>,
}

/// Combined per-ledger balances for one wallet.
///
/// Returned by `GET /wallets/{id}/balance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBalanceResponse {
    pub wallet_id: Uuid,
    pub currency: String,

    /// Balance on the primary ledger, in cents. 0 when the wallet has
    /// no account there.
    pub primary_balance: i64,

    /// Balance on the custodial ledger, in cents.
    pub custodial_balance: i64,

    /// Sum across both ledgers.
    pub combined_balance: i64,

    /// Human-readable combined balance.
    pub formatted_combined: String,
}

/// Bridge estimate response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeEstimateResponse {
    pub direction: BridgeDirection,

    /// Requested amount in cents.
    pub amount: i64,

    /// Fee in cents.
    pub fee: i64,

    /// Estimated settlement time in seconds.
    pub time_seconds: u64,

    pub instant: bool,

    /// Current source-ledger balance in cents.
    pub source_balance: i64,

    pub sufficient_balance: bool,
}

impl BridgeEstimateResponse {
    pub fn new(direction: BridgeDirection, amount: i64, estimate: BridgeEstimate) -> Self {
        Self {
            direction,
            amount,
            fee: estimate.fee,
            time_seconds: estimate.time_seconds,
            instant: estimate.instant,
            source_balance: estimate.source_balance,
            sufficient_balance: estimate.sufficient_balance,
        }
    }
}

/// Result of an on-demand auto-bridge check.
///
/// Always a 200 for evaluable wallets: "nothing to do" is a normal
/// outcome, not an error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoBridgeCheckResponse {
    pub triggered: bool,

    /// Set when a rebalance was executed.
    pub transfer_id: Option<Uuid>,

    /// Rebalanced amount in cents.
    pub amount: Option<i64>,

    pub direction: Option<BridgeDirection>,

    /// "triggered", "disabled", "below_threshold", or "already_running".
    pub status: String,
}

impl From<AutoBridgeOutcome> for AutoBridgeCheckResponse {
    fn from(outcome: AutoBridgeOutcome) -> Self {
        match outcome {
            AutoBridgeOutcome::Triggered {
                transfer_id,
                amount,
                direction,
            } => Self {
                triggered: true,
                transfer_id: Some(transfer_id),
                amount: Some(amount),
                direction: Some(direction),
                status: "triggered".to_string(),
            },
            AutoBridgeOutcome::Disabled => Self {
                triggered: false,
                transfer_id: None,
                amount: None,
                direction: None,
                status: "disabled".to_string(),
            },
            AutoBridgeOutcome::BelowThreshold => Self {
                triggered: false,
                transfer_id: None,
                amount: None,
                direction: None,
                status: "below_threshold".to_string(),
            },
            AutoBridgeOutcome::AlreadyRunning => Self {
                triggered: false,
                transfer_id: None,
                amount: None,
                direction: None,
                status: "already_running".to_string(),
            },
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub store: bool,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}
