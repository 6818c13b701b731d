//! # Bridge Estimator Service
//!
//! Pure, side-effect-free estimation of a prospective cross-ledger
//! bridge transfer: fee, settlement time, and whether the source
//! balance covers the amount. Used for UI previews and as a pre-check
//! before invoking the transfer orchestrator; it performs no mutation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::LedgerKind;
use crate::store::LedgerStore;

use super::transfer_orchestrator::TransferError;

/// Fee for moving value between the two internal ledgers. Both ledgers
/// settle in-house, so the bridge is free.
pub const BRIDGE_FEE: i64 = 0;

/// Expected settlement time for an internal bridge, in seconds.
pub const BRIDGE_TIME_SECONDS: u64 = 2;

/// Which way a bridge transfer moves value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeDirection {
    PrimaryToCustodial,
    CustodialToPrimary,
}

impl BridgeDirection {
    /// The ledger debited.
    pub fn source(&self) -> LedgerKind {
        match self {
            BridgeDirection::PrimaryToCustodial => LedgerKind::Primary,
            BridgeDirection::CustodialToPrimary => LedgerKind::Custodial,
        }
    }

    /// The ledger credited.
    pub fn dest(&self) -> LedgerKind {
        self.source().other()
    }

    /// The direction that moves value onto `dest`.
    pub fn toward(dest: LedgerKind) -> Self {
        match dest {
            LedgerKind::Primary => BridgeDirection::CustodialToPrimary,
            LedgerKind::Custodial => BridgeDirection::PrimaryToCustodial,
        }
    }
}

/// What a prospective bridge transfer would look like.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeEstimate {
    /// Fee in cents. Always 0 for the internal bridge.
    pub fee: i64,

    /// Estimated settlement time in seconds.
    pub time_seconds: u64,

    /// Whether settlement is effectively immediate.
    pub instant: bool,

    /// Current balance on the ledger that would be debited, in cents.
    pub source_balance: i64,

    /// Whether `source_balance` covers the requested amount.
    pub sufficient_balance: bool,
}

/// The bridge estimation service.
pub struct BridgeEstimator {
    store: Arc<dyn LedgerStore>,
}

impl BridgeEstimator {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Estimate a bridge of `amount` cents for `wallet_id`.
    ///
    /// Reads current balances and the static fee schedule; never
    /// mutates anything. A wallet without an account on the source
    /// ledger estimates with a balance of 0.
    pub async fn estimate(
        &self,
        wallet_id: Uuid,
        amount: i64,
        direction: BridgeDirection,
    ) -> Result<BridgeEstimate, TransferError> {
        if amount <= 0 {
            return Err(TransferError::Validation(
                "amount must be positive".to_string(),
            ));
        }

        self.store
            .get_wallet(wallet_id)
            .await?
            .ok_or(TransferError::WalletNotFound(wallet_id))?;

        let source_balance = self
            .store
            .get_balance(wallet_id, direction.source())
            .await?
            .unwrap_or(0);

        Ok(BridgeEstimate {
            fee: BRIDGE_FEE,
            time_seconds: BRIDGE_TIME_SECONDS,
            instant: true,
            source_balance,
            sufficient_balance: source_balance >= amount + BRIDGE_FEE,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{WalletRecord, WalletStatus};
    use crate::store::memory::MemoryLedgerStore;
    use chrono::Utc;

    async fn seeded_store() -> (Arc<MemoryLedgerStore>, Uuid) {
        let store = Arc::new(MemoryLedgerStore::new());
        let wallet_id = Uuid::new_v4();
        store
            .insert_wallet(WalletRecord {
                id: wallet_id,
                user_id: Uuid::new_v4(),
                currency: "USD".to_string(),
                tier: "standard".to_string(),
                status: WalletStatus::Active,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await;
        store.open_account(wallet_id, LedgerKind::Primary, 50_000).await;
        (store, wallet_id)
    }

    #[tokio::test]
    async fn test_estimate_sufficient_balance() {
        let (store, wallet_id) = seeded_store().await;
        let estimator = BridgeEstimator::new(store);

        // $100.00 out of a $500.00 primary balance.
        let estimate = estimator
            .estimate(wallet_id, 10_000, BridgeDirection::PrimaryToCustodial)
            .await
            .unwrap();

        assert_eq!(estimate.fee, 0);
        assert_eq!(estimate.time_seconds, 2);
        assert!(estimate.instant);
        assert_eq!(estimate.source_balance, 50_000);
        assert!(estimate.sufficient_balance);
    }

    #[tokio::test]
    async fn test_estimate_insufficient_balance() {
        let (store, wallet_id) = seeded_store().await;
        let estimator = BridgeEstimator::new(store);

        let estimate = estimator
            .estimate(wallet_id, 60_000, BridgeDirection::PrimaryToCustodial)
            .await
            .unwrap();
        assert!(!estimate.sufficient_balance);
    }

    #[tokio::test]
    async fn test_estimate_missing_source_account_reads_zero() {
        let (store, wallet_id) = seeded_store().await;
        let estimator = BridgeEstimator::new(store);

        // No custodial account was opened for this wallet.
        let estimate = estimator
            .estimate(wallet_id, 1_000, BridgeDirection::CustodialToPrimary)
            .await
            .unwrap();
        assert_eq!(estimate.source_balance, 0);
        assert!(!estimate.sufficient_balance);
    }

    #[tokio::test]
    async fn test_estimate_unknown_wallet() {
        let (store, _) = seeded_store().await;
        let estimator = BridgeEstimator::new(store);

        let err = estimator
            .estimate(Uuid::new_v4(), 1_000, BridgeDirection::PrimaryToCustodial)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::WalletNotFound(_)));
    }

    #[test]
    fn test_direction_endpoints() {
        assert_eq!(
            BridgeDirection::PrimaryToCustodial.source(),
            LedgerKind::Primary
        );
        assert_eq!(
            BridgeDirection::PrimaryToCustodial.dest(),
            LedgerKind::Custodial
        );
        assert_eq!(
            BridgeDirection::toward(LedgerKind::Custodial),
            BridgeDirection::PrimaryToCustodial
        );
    }
}
