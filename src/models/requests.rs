//! # API Request Models
//!
//! Structures for incoming API request bodies.
//! Each struct represents the expected JSON body for an endpoint.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::{BridgeDirection, TransferKind};

/// Request to initiate a transfer.
///
/// The `kind` tag selects the variant: `"p2p"` needs `destWalletId`,
/// `"bridge"` needs `direction`. Amounts are decimal strings to keep
/// floats out of the money path.
///
/// ## Example JSON (P2P)
///
/// ```json
/// {
///     "sourceWalletId": "550e8400-e29b-41d4-a716-446655440000",
///     "kind": "p2p",
///     "destWalletId": "660e8400-e29b-41d4-a716-446655440000",
///     "amount": "100.50",
///     "idempotencyKey": "req-20250114-001",
///     "note": "rent"
/// }
/// ```
///
/// ## Example JSON (Bridge)
///
/// ```json
/// {
///     "sourceWalletId": "550e8400-e29b-41d4-a716-446655440000",
///     "kind": "bridge",
///     "direction": "primary_to_custodial",
///     "amount": "250.00"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateTransferRequest {
    /// Wallet the funds leave.
    pub source_wallet_id: Uuid,

    /// Which instrument: P2P or bridge.
    #[serde(flatten)]
    pub kind: TransferKind,

    /// Decimal amount, e.g. "100.50". At most 2 decimal places.
    pub amount: Decimal,

    /// Optional caller token; retrying with the same key never
    /// double-applies.
    pub idempotency_key: Option<String>,

    /// Optional free-text note.
    pub note: Option<String>,
}

/// Query parameters for transfer history.
///
/// ## Example URL
///
/// ```text
/// GET /wallets/550e8400-.../transfers?limit=20
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    /// Maximum number of transfers to return.
    /// Default: 20, capped by server configuration.
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

/// Query parameters for a bridge estimate.
///
/// ## Example URL
///
/// ```text
/// GET /bridge/estimate?walletId=550e8400-...&amount=100.00&direction=primary_to_custodial
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateBridgeQuery {
    pub wallet_id: Uuid,

    /// Decimal amount, e.g. "100.00".
    pub amount: Decimal,

    pub direction: BridgeDirection,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p2p_request_deserializes() {
        let json = r#"{
            "sourceWalletId": "550e8400-e29b-41d4-a716-446655440000",
            "kind": "p2p",
            "destWalletId": "660e8400-e29b-41d4-a716-446655440000",
            "amount": "100.50"
        }"#;
        let request: InitiateTransferRequest = serde_json::from_str(json).unwrap();
        assert!(matches!(request.kind, TransferKind::P2p { .. }));
        assert_eq!(request.amount.to_string(), "100.50");
        assert!(request.idempotency_key.is_none());
    }

    #[test]
    fn test_bridge_request_deserializes() {
        let json = r#"{
            "sourceWalletId": "550e8400-e29b-41d4-a716-446655440000",
            "kind": "bridge",
            "direction": "custodial_to_primary",
            "amount": "42.00"
        }"#;
        let request: InitiateTransferRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            request.kind,
            TransferKind::Bridge {
                direction: BridgeDirection::CustodialToPrimary
            }
        );
    }

    #[test]
    fn test_p2p_without_dest_wallet_fails() {
        let json = r#"{
            "sourceWalletId": "550e8400-e29b-41d4-a716-446655440000",
            "kind": "p2p",
            "amount": "100.50"
        }"#;
        assert!(serde_json::from_str::<InitiateTransferRequest>(json).is_err());
    }
}
