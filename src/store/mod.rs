//! # Ledger Store
//!
//! The only layer allowed to mutate balances. Everything above it (the
//! transfer orchestrator, the limit enforcer, the auto-bridge monitor)
//! talks to storage exclusively through the [`LedgerStore`] trait, so
//! backends are swappable and the engine is testable without a database.
//!
//! ## Implementations
//!
//! | Backend | Module | Used for |
//! |---------|--------|----------|
//! | PostgreSQL | `postgres` | Production |
//! | In-memory | `memory` | Tests, local development |
//!
//! ## Atomic Scopes
//!
//! Balance mutations happen inside a [`LedgerUnitOfWork`]: an explicit
//! begin/commit/rollback scope handed out by [`LedgerStore::begin`].
//! The debit, the credit and the completion mark of a transfer commit
//! or roll back as one unit; no caller ever observes a half-applied
//! transfer. The store itself performs no retries.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::db::models::{
    LedgerAccountRecord, LedgerKind, LimitPolicyRecord, TransferRecord, TransferStatus,
    TransferType, WalletLinkRecord, WalletRecord,
};

/// Errors surfaced by the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The wallet, or its account on the requested ledger, does not exist.
    #[error("wallet or ledger account not found: {0}")]
    WalletNotFound(Uuid),

    /// The wallet exists but is not active.
    #[error("wallet is not active: {0}")]
    WalletFrozen(Uuid),

    /// A debit would take the balance below zero.
    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: i64, requested: i64 },

    /// No limit policy row exists for the wallet's tier.
    #[error("no limit policy for tier: {0}")]
    PolicyNotFound(String),

    /// Underlying storage fault (connection, query, commit).
    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable, versioned wallet balance storage.
///
/// Read methods are safe to call concurrently from any task. Mutations
/// of balances go through [`LedgerStore::begin`]; the only direct
/// writes are transfer bookkeeping (insert, status CAS, failure mark),
/// which each commit on their own.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Liveness probe for health checks.
    async fn ping(&self) -> bool;

    async fn get_wallet(&self, wallet_id: Uuid) -> Result<Option<WalletRecord>, StoreError>;

    /// Balance of one (wallet, ledger) pair; `None` when the wallet has
    /// no account on that ledger.
    async fn get_balance(
        &self,
        wallet_id: Uuid,
        ledger: LedgerKind,
    ) -> Result<Option<i64>, StoreError>;

    /// Every ledger account a wallet holds (zero, one, or both kinds).
    async fn ledger_accounts(
        &self,
        wallet_id: Uuid,
    ) -> Result<Vec<LedgerAccountRecord>, StoreError>;

    /// Resolve the limit policy for a wallet: per-wallet override row
    /// first, then the tier row.
    async fn get_limit_policy(
        &self,
        wallet_id: Uuid,
        tier: &str,
    ) -> Result<LimitPolicyRecord, StoreError>;

    /// Sum of completed outflow (amount + fee) leaving a wallet since
    /// the given instant, attributed by completion timestamp.
    /// `transfer_type` restricts the sum to one transfer kind.
    async fn completed_outflow_since(
        &self,
        wallet_id: Uuid,
        since: DateTime<Utc>,
        transfer_type: Option<TransferType>,
    ) -> Result<i64, StoreError>;

    async fn get_transfer(&self, transfer_id: Uuid) -> Result<Option<TransferRecord>, StoreError>;

    async fn get_transfer_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<TransferRecord>, StoreError>;

    /// Insert a freshly created transfer record (normally `Pending`).
    async fn insert_transfer(&self, record: &TransferRecord) -> Result<(), StoreError>;

    /// Compare-and-set a transfer's status. Returns `false` when the
    /// transfer was no longer in `from`.
    async fn transition_transfer(
        &self,
        transfer_id: Uuid,
        from: TransferStatus,
        to: TransferStatus,
    ) -> Result<bool, StoreError>;

    /// Mark a transfer failed with a reason, in its own always-committed
    /// write (survives the rollback of the execution scope).
    async fn record_transfer_failure(
        &self,
        transfer_id: Uuid,
        reason: &str,
    ) -> Result<(), StoreError>;

    /// Transfers involving a wallet, newest first.
    async fn transfer_history(
        &self,
        wallet_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TransferRecord>, StoreError>;

    async fn get_wallet_link(&self, user_id: Uuid)
        -> Result<Option<WalletLinkRecord>, StoreError>;

    /// Active wallets whose user has auto-bridge enabled.
    async fn linked_wallet_ids(&self) -> Result<Vec<Uuid>, StoreError>;

    /// Open an atomic scope for balance mutations.
    async fn begin(&self) -> Result<Box<dyn LedgerUnitOfWork>, StoreError>;
}

/// One atomic scope over the ledger.
///
/// All mutations staged through a unit of work become visible together
/// at [`commit`](LedgerUnitOfWork::commit), or not at all at
/// [`rollback`](LedgerUnitOfWork::rollback). Dropping an unfinished
/// scope is equivalent to rolling it back.
#[async_trait]
pub trait LedgerUnitOfWork: Send {
    /// Apply a signed delta to one (wallet, ledger) balance and return
    /// the new balance.
    ///
    /// Fails with:
    /// - [`StoreError::WalletNotFound`] when the pair doesn't exist
    /// - [`StoreError::WalletFrozen`] when the wallet is not active
    /// - [`StoreError::InsufficientFunds`] when a negative delta would
    ///   take the balance below zero
    async fn apply_delta(
        &mut self,
        wallet_id: Uuid,
        ledger: LedgerKind,
        delta: i64,
    ) -> Result<i64, StoreError>;

    /// Mark the transfer completed inside this scope.
    async fn mark_completed(
        &mut self,
        transfer_id: Uuid,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Commit every staged mutation.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discard every staged mutation.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
