//! # In-Memory Ledger Store
//!
//! A [`LedgerStore`] backed by process memory. Used by the test suite
//! and by local development (`STORE_BACKEND=memory`), where running a
//! PostgreSQL instance is overkill.
//!
//! ## Atomicity Model
//!
//! The whole state sits behind one async mutex. A unit of work takes
//! the lock for its lifetime and stages its mutations against a working
//! copy; `commit` writes the staged values back, `rollback` (or drop)
//! discards them. Holding the lock across the scope gives the same
//! serialization the SQL backend gets from row locks, at in-memory
//! scale.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::db::models::{
    LedgerAccountRecord, LedgerKind, LimitPolicyRecord, TransferRecord, TransferStatus,
    TransferType, WalletLinkRecord, WalletRecord, WalletStatus,
};

use super::{LedgerStore, LedgerUnitOfWork, StoreError};

#[derive(Default)]
struct MemoryState {
    wallets: HashMap<Uuid, WalletRecord>,
    accounts: HashMap<(Uuid, LedgerKind), i64>,
    transfers: HashMap<Uuid, TransferRecord>,
    tier_policies: HashMap<String, LimitPolicyRecord>,
    wallet_policies: HashMap<Uuid, LimitPolicyRecord>,
    links: HashMap<Uuid, WalletLinkRecord>,
}

/// In-memory [`LedgerStore`] implementation.
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-seeded with the same default tier policies the SQL
    /// migration installs.
    pub async fn with_default_policies() -> Self {
        let store = Self::new();
        store
            .set_tier_policy(
                "standard",
                LimitPolicyRecord {
                    per_transaction_limit: 500_000,
                    daily_spending_limit: 1_000_000,
                    daily_p2p_limit: 250_000,
                    monthly_spending_limit: 10_000_000,
                    monthly_p2p_limit: 5_000_000,
                },
            )
            .await;
        store
            .set_tier_policy(
                "premium",
                LimitPolicyRecord {
                    per_transaction_limit: 2_500_000,
                    daily_spending_limit: 5_000_000,
                    daily_p2p_limit: 1_000_000,
                    monthly_spending_limit: 50_000_000,
                    monthly_p2p_limit: 25_000_000,
                },
            )
            .await;
        store
    }

    // ==========================================
    // SEEDING
    // ==========================================
    // Wallet onboarding and preference management belong to external
    // collaborators; these writers exist so tests and the memory
    // backend can stand up state.

    pub async fn insert_wallet(&self, wallet: WalletRecord) {
        self.state.lock().await.wallets.insert(wallet.id, wallet);
    }

    pub async fn open_account(&self, wallet_id: Uuid, ledger: LedgerKind, balance: i64) {
        self.state
            .lock()
            .await
            .accounts
            .insert((wallet_id, ledger), balance);
    }

    pub async fn set_tier_policy(&self, tier: &str, policy: LimitPolicyRecord) {
        self.state
            .lock()
            .await
            .tier_policies
            .insert(tier.to_string(), policy);
    }

    pub async fn set_wallet_policy(&self, wallet_id: Uuid, policy: LimitPolicyRecord) {
        self.state
            .lock()
            .await
            .wallet_policies
            .insert(wallet_id, policy);
    }

    pub async fn set_wallet_link(&self, link: WalletLinkRecord) {
        self.state.lock().await.links.insert(link.user_id, link);
    }

    /// Total balance across every ledger account. Test helper for
    /// conservation checks.
    pub async fn total_balance(&self) -> i64 {
        self.state.lock().await.accounts.values().sum()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn ping(&self) -> bool {
        true
    }

    async fn get_wallet(&self, wallet_id: Uuid) -> Result<Option<WalletRecord>, StoreError> {
        Ok(self.state.lock().await.wallets.get(&wallet_id).cloned())
    }

    async fn get_balance(
        &self,
        wallet_id: Uuid,
        ledger: LedgerKind,
    ) -> Result<Option<i64>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .accounts
            .get(&(wallet_id, ledger))
            .copied())
    }

    async fn ledger_accounts(
        &self,
        wallet_id: Uuid,
    ) -> Result<Vec<LedgerAccountRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut accounts: Vec<LedgerAccountRecord> = state
            .accounts
            .iter()
            .filter(|((wallet, _), _)| *wallet == wallet_id)
            .map(|((wallet, kind), balance)| LedgerAccountRecord {
                wallet_id: *wallet,
                ledger_kind: *kind,
                balance: *balance,
            })
            .collect();
        accounts.sort_by_key(|account| account.ledger_kind);
        Ok(accounts)
    }

    async fn get_limit_policy(
        &self,
        wallet_id: Uuid,
        tier: &str,
    ) -> Result<LimitPolicyRecord, StoreError> {
        let state = self.state.lock().await;
        if let Some(policy) = state.wallet_policies.get(&wallet_id) {
            return Ok(policy.clone());
        }
        state
            .tier_policies
            .get(tier)
            .cloned()
            .ok_or_else(|| StoreError::PolicyNotFound(tier.to_string()))
    }

    async fn completed_outflow_since(
        &self,
        wallet_id: Uuid,
        since: DateTime<Utc>,
        transfer_type: Option<TransferType>,
    ) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        let total = state
            .transfers
            .values()
            .filter(|t| t.source_wallet_id == wallet_id)
            .filter(|t| t.status == TransferStatus::Completed)
            .filter(|t| t.completed_at.map(|at| at >= since).unwrap_or(false))
            .filter(|t| transfer_type.map(|k| t.transfer_type == k).unwrap_or(true))
            .map(|t| t.amount + t.fee)
            .sum();
        Ok(total)
    }

    async fn get_transfer(&self, transfer_id: Uuid) -> Result<Option<TransferRecord>, StoreError> {
        Ok(self.state.lock().await.transfers.get(&transfer_id).cloned())
    }

    async fn get_transfer_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<TransferRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .transfers
            .values()
            .find(|t| t.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn insert_transfer(&self, record: &TransferRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        // Mirror the partial unique index on idempotency_key.
        if let Some(key) = &record.idempotency_key {
            if state
                .transfers
                .values()
                .any(|t| t.idempotency_key.as_deref() == Some(key.as_str()))
            {
                return Err(StoreError::Storage(format!(
                    "duplicate idempotency key: {}",
                    key
                )));
            }
        }
        state.transfers.insert(record.id, record.clone());
        Ok(())
    }

    async fn transition_transfer(
        &self,
        transfer_id: Uuid,
        from: TransferStatus,
        to: TransferStatus,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.transfers.get_mut(&transfer_id) {
            Some(record) if record.status == from => {
                record.status = to;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }

    async fn record_transfer_failure(
        &self,
        transfer_id: Uuid,
        reason: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        match state.transfers.get_mut(&transfer_id) {
            Some(record)
                if matches!(
                    record.status,
                    TransferStatus::Pending | TransferStatus::Processing
                ) =>
            {
                record.status = TransferStatus::Failed;
                record.failure_reason = Some(reason.to_string());
                Ok(())
            }
            Some(record) => Err(StoreError::Storage(format!(
                "transfer {} already terminal: {}",
                transfer_id,
                record.status.as_str()
            ))),
            None => Err(StoreError::Storage(format!(
                "transfer not found: {}",
                transfer_id
            ))),
        }
    }

    async fn transfer_history(
        &self,
        wallet_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TransferRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut transfers: Vec<TransferRecord> = state
            .transfers
            .values()
            .filter(|t| t.source_wallet_id == wallet_id || t.dest_wallet_id == wallet_id)
            .cloned()
            .collect();
        transfers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        transfers.truncate(limit.max(0) as usize);
        Ok(transfers)
    }

    async fn get_wallet_link(
        &self,
        user_id: Uuid,
    ) -> Result<Option<WalletLinkRecord>, StoreError> {
        Ok(self.state.lock().await.links.get(&user_id).cloned())
    }

    async fn linked_wallet_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .wallets
            .values()
            .filter(|w| w.status == WalletStatus::Active)
            .filter(|w| {
                state
                    .links
                    .get(&w.user_id)
                    .map(|l| l.auto_bridge_enabled)
                    .unwrap_or(false)
            })
            .map(|w| w.id)
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn LedgerUnitOfWork>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            staged_balances: HashMap::new(),
            staged_completions: Vec::new(),
        }))
    }
}

/// Unit of work over the in-memory state.
///
/// Holds the state lock for its whole lifetime; mutations are staged
/// and only written back on commit.
struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    staged_balances: HashMap<(Uuid, LedgerKind), i64>,
    staged_completions: Vec<(Uuid, DateTime<Utc>)>,
}

#[async_trait]
impl LedgerUnitOfWork for MemoryUnitOfWork {
    async fn apply_delta(
        &mut self,
        wallet_id: Uuid,
        ledger: LedgerKind,
        delta: i64,
    ) -> Result<i64, StoreError> {
        let wallet = self
            .guard
            .wallets
            .get(&wallet_id)
            .ok_or(StoreError::WalletNotFound(wallet_id))?;
        if wallet.status != WalletStatus::Active {
            return Err(StoreError::WalletFrozen(wallet_id));
        }

        let key = (wallet_id, ledger);
        let current = self
            .staged_balances
            .get(&key)
            .copied()
            .or_else(|| self.guard.accounts.get(&key).copied())
            .ok_or(StoreError::WalletNotFound(wallet_id))?;

        let updated = current + delta;
        if delta < 0 && updated < 0 {
            return Err(StoreError::InsufficientFunds {
                available: current,
                requested: -delta,
            });
        }

        self.staged_balances.insert(key, updated);
        Ok(updated)
    }

    async fn mark_completed(
        &mut self,
        transfer_id: Uuid,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if !self.guard.transfers.contains_key(&transfer_id) {
            return Err(StoreError::Storage(format!(
                "transfer not found: {}",
                transfer_id
            )));
        }
        self.staged_completions.push((transfer_id, completed_at));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryUnitOfWork {
            mut guard,
            staged_balances,
            staged_completions,
        } = *self;

        for (key, balance) in staged_balances {
            guard.accounts.insert(key, balance);
        }
        for (transfer_id, completed_at) in staged_completions {
            if let Some(record) = guard.transfers.get_mut(&transfer_id) {
                record.status = TransferStatus::Completed;
                record.completed_at = Some(completed_at);
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        // Staged values die with the scope; the guard releases on drop.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(status: WalletStatus) -> WalletRecord {
        WalletRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            currency: "USD".to_string(),
            tier: "standard".to_string(),
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_apply_delta_and_commit() {
        let store = MemoryLedgerStore::new();
        let w = wallet(WalletStatus::Active);
        let id = w.id;
        store.insert_wallet(w).await;
        store.open_account(id, LedgerKind::Primary, 1_000).await;

        let mut uow = store.begin().await.unwrap();
        let new_balance = uow.apply_delta(id, LedgerKind::Primary, -400).await.unwrap();
        assert_eq!(new_balance, 600);
        uow.commit().await.unwrap();

        assert_eq!(
            store.get_balance(id, LedgerKind::Primary).await.unwrap(),
            Some(600)
        );
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_deltas() {
        let store = MemoryLedgerStore::new();
        let w = wallet(WalletStatus::Active);
        let id = w.id;
        store.insert_wallet(w).await;
        store.open_account(id, LedgerKind::Primary, 1_000).await;

        let mut uow = store.begin().await.unwrap();
        uow.apply_delta(id, LedgerKind::Primary, -400).await.unwrap();
        uow.rollback().await.unwrap();

        assert_eq!(
            store.get_balance(id, LedgerKind::Primary).await.unwrap(),
            Some(1_000)
        );
    }

    #[tokio::test]
    async fn test_debit_below_zero_is_rejected() {
        let store = MemoryLedgerStore::new();
        let w = wallet(WalletStatus::Active);
        let id = w.id;
        store.insert_wallet(w).await;
        store.open_account(id, LedgerKind::Primary, 500).await;

        let mut uow = store.begin().await.unwrap();
        let err = uow
            .apply_delta(id, LedgerKind::Primary, -1_000)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientFunds {
                available: 500,
                requested: 1_000
            }
        ));
    }

    #[tokio::test]
    async fn test_frozen_wallet_rejects_deltas() {
        let store = MemoryLedgerStore::new();
        let w = wallet(WalletStatus::Frozen);
        let id = w.id;
        store.insert_wallet(w).await;
        store.open_account(id, LedgerKind::Primary, 500).await;

        let mut uow = store.begin().await.unwrap();
        let err = uow
            .apply_delta(id, LedgerKind::Primary, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::WalletFrozen(_)));
    }

    #[tokio::test]
    async fn test_missing_ledger_account_is_not_found() {
        let store = MemoryLedgerStore::new();
        let w = wallet(WalletStatus::Active);
        let id = w.id;
        store.insert_wallet(w).await;
        // No custodial account opened.

        let mut uow = store.begin().await.unwrap();
        let err = uow
            .apply_delta(id, LedgerKind::Custodial, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::WalletNotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_idempotency_key_rejected() {
        let store = MemoryLedgerStore::new();
        let record = TransferRecord {
            id: Uuid::new_v4(),
            source_wallet_id: Uuid::new_v4(),
            dest_wallet_id: Uuid::new_v4(),
            source_ledger: LedgerKind::Primary,
            dest_ledger: LedgerKind::Primary,
            transfer_type: TransferType::P2p,
            amount: 100,
            fee: 0,
            status: TransferStatus::Pending,
            idempotency_key: Some("key-1".to_string()),
            note: None,
            failure_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        store.insert_transfer(&record).await.unwrap();

        let mut second = record.clone();
        second.id = Uuid::new_v4();
        assert!(store.insert_transfer(&second).await.is_err());
    }
}
