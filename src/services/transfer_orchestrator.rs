//! # Transfer Orchestrator Service
//!
//! The core state machine. Validates, authorizes, reserves and executes
//! every transfer — peer-to-peer on one ledger or bridging between the
//! two — and owns the audit trail record from `pending` to a terminal
//! status.
//!
//! ## Flow Example: P2P Transfer
//!
//! ```text
//! 1. Validate amount / endpoints / idempotency key
//!                ↓
//! 2. Limit enforcer authorizes the spend
//!                ↓
//! 3. TransferRecord created with status `pending`
//!                ↓
//! 4. CAS pending -> processing (cancellation closes here)
//!                ↓
//! 5. Account locks taken in global order
//!                ↓
//! 6. One atomic scope: debit, credit, mark completed
//!                ↓
//! 7. Completed event published
//! ```
//!
//! ## Failure Handling
//!
//! Any failure inside the atomic scope rolls the whole scope back and
//! marks the record `failed` in a separate, always-committed write, so
//! the ledger never holds a half-applied transfer but the audit trail
//! still shows the attempt. Transient faults (lock or commit timeout,
//! storage errors) are retried exactly once; validation, limit and
//! balance failures never are.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::models::{
    LedgerKind, TransferRecord, TransferStatus, TransferType, WalletRecord, WalletStatus,
};
use crate::store::{LedgerStore, LedgerUnitOfWork, StoreError};
use crate::utils::format_usd;

use super::bridge_estimator::BridgeDirection;
use super::events::{EventSender, TransferEvent};
use super::limit_enforcer::{LimitEnforcer, LimitViolation};
use super::lock_manager::{LockKey, LockManager};

/// The ledger P2P transfers settle on. Peer wallets exchange value on
/// the primary ledger; custodial balances move only via bridges.
const P2P_LEDGER: LedgerKind = LedgerKind::Primary;

/// Errors that can occur while orchestrating a transfer.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Malformed request: non-positive amount, self-transfer, reused
    /// idempotency key with different parameters. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Balance insufficient at execution time.
    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: i64, requested: i64 },

    /// A spending policy rule was violated. Carries the specific limit.
    #[error("limit exceeded: {0}")]
    LimitExceeded(LimitViolation),

    /// Wallet (or its ledger account) does not exist.
    #[error("wallet not found: {0}")]
    WalletNotFound(Uuid),

    /// Wallet exists but is frozen or closed.
    #[error("wallet is not active: {0}")]
    WalletFrozen(Uuid),

    /// No transfer with that ID.
    #[error("transfer not found: {0}")]
    TransferNotFound(Uuid),

    /// The idempotency key belongs to a transfer that is still in
    /// flight (or ended without completing).
    #[error("a transfer with this idempotency key already exists")]
    DuplicateTransfer,

    /// The transfer was cancelled before execution started.
    #[error("transfer {0} was cancelled")]
    Cancelled(Uuid),

    /// Cancellation requested after the transfer left `pending`.
    #[error("transfer {id} cannot be cancelled in status {status:?}")]
    NotCancellable { id: Uuid, status: TransferStatus },

    /// Storage or lock-layer fault. Retried once, then surfaced.
    #[error("transaction failure: {0}")]
    TransactionFailure(String),
}

impl TransferError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::Validation(_) => "VALIDATION_ERROR",
            TransferError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            TransferError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            TransferError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            TransferError::WalletFrozen(_) => "WALLET_FROZEN",
            TransferError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            TransferError::DuplicateTransfer => "DUPLICATE_TRANSFER",
            TransferError::Cancelled(_) => "TRANSFER_CANCELLED",
            TransferError::NotCancellable { .. } => "NOT_CANCELLABLE",
            TransferError::TransactionFailure(_) => "TRANSACTION_FAILURE",
        }
    }

    /// Whether one automatic retry is worth attempting.
    fn is_transient(&self) -> bool {
        matches!(self, TransferError::TransactionFailure(_))
    }
}

impl From<StoreError> for TransferError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::WalletNotFound(id) => TransferError::WalletNotFound(id),
            StoreError::WalletFrozen(id) => TransferError::WalletFrozen(id),
            StoreError::InsufficientFunds {
                available,
                requested,
            } => TransferError::InsufficientFunds {
                available,
                requested,
            },
            StoreError::PolicyNotFound(tier) => {
                TransferError::TransactionFailure(format!("no limit policy for tier: {}", tier))
            }
            StoreError::Storage(msg) => TransferError::TransactionFailure(msg),
        }
    }
}

/// The two shapes a transfer request can take.
///
/// A tagged union: callers say explicitly which instrument they are
/// using instead of the orchestrator sniffing optional fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferKind {
    /// Move value to another user's wallet on the primary ledger.
    #[serde(rename_all = "camelCase")]
    P2p { dest_wallet_id: Uuid },

    /// Move value between this wallet's two ledgers.
    Bridge { direction: BridgeDirection },
}

/// A validated transfer request, amounts already in cents.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub source_wallet_id: Uuid,
    pub kind: TransferKind,

    /// Amount in cents. Must be positive.
    pub amount: i64,

    /// Caller token making retries safe.
    pub idempotency_key: Option<String>,

    pub note: Option<String>,
}

/// The main service for moving value between accounts.
///
/// ## Usage
///
/// ```rust,ignore
/// let orchestrator = TransferOrchestrator::new(store, locks, events, timeout);
///
/// let record = orchestrator
///     .initiate_transfer(TransferRequest {
///         source_wallet_id: alice,
///         kind: TransferKind::P2p { dest_wallet_id: bob },
///         amount: 10_000, // $100.00
///         idempotency_key: Some("req-1".to_string()),
///         note: None,
///     })
///     .await?;
/// ```
pub struct TransferOrchestrator {
    /// Balance storage. The orchestrator never touches SQL directly.
    store: Arc<dyn LedgerStore>,

    /// Spending policy evaluation.
    limits: LimitEnforcer,

    /// Per-account mutual exclusion.
    locks: Arc<LockManager>,

    /// Completed-transfer announcements.
    events: EventSender,

    /// Deadline for lock acquisition and for the atomic scope.
    exec_timeout: Duration,
}

impl TransferOrchestrator {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        locks: Arc<LockManager>,
        events: EventSender,
        exec_timeout: Duration,
    ) -> Self {
        let limits = LimitEnforcer::new(store.clone());
        Self {
            store,
            limits,
            locks,
            events,
            exec_timeout,
        }
    }

    // ==========================================
    // TRANSFER LIFECYCLE
    // ==========================================

    /// Initiate a transfer and drive it to a terminal status.
    ///
    /// Returns the completed record, or an error after the record (if
    /// one was created) has been marked `failed`. Limit rejections
    /// happen before the record exists and leave no audit trail entry.
    pub async fn initiate_transfer(
        &self,
        request: TransferRequest,
    ) -> Result<TransferRecord, TransferError> {
        let (dest_wallet_id, source_ledger, dest_ledger, transfer_type) =
            resolve_legs(request.source_wallet_id, request.kind);

        info!(
            "Initiating {} transfer of {} from wallet {}",
            transfer_type.as_str(),
            format_usd(request.amount),
            request.source_wallet_id
        );

        // Step 1: validate.
        if request.amount <= 0 {
            return Err(TransferError::Validation(
                "transfer amount must be positive".to_string(),
            ));
        }
        if transfer_type == TransferType::P2p && dest_wallet_id == request.source_wallet_id {
            return Err(TransferError::Validation(
                "source and destination wallets must differ".to_string(),
            ));
        }

        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = self.store.get_transfer_by_idempotency_key(key).await? {
                return self.replay_idempotent(existing, &request);
            }
        }

        // Step 2: authorize. Wallet checks come first so a frozen or
        // unknown wallet surfaces before limit math runs.
        let source = self.active_wallet(request.source_wallet_id).await?;
        if dest_wallet_id != request.source_wallet_id {
            self.active_wallet(dest_wallet_id).await?;
        }

        let decision = self
            .limits
            .check(&source, request.amount, transfer_type)
            .await?;
        if let Some(violation) = decision.violation {
            info!(
                "Transfer rejected by limit policy for wallet {}: {}",
                source.id, violation
            );
            return Err(TransferError::LimitExceeded(violation));
        }

        // Step 3: reserve the audit trail record.
        let mut record = TransferRecord {
            id: Uuid::new_v4(),
            source_wallet_id: request.source_wallet_id,
            dest_wallet_id,
            source_ledger,
            dest_ledger,
            transfer_type,
            amount: request.amount,
            // Instant P2P transfers and internal bridges are both free.
            fee: 0,
            status: TransferStatus::Pending,
            idempotency_key: request.idempotency_key.clone(),
            note: request.note.clone(),
            failure_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.store.insert_transfer(&record).await?;

        // Step 4: execute.
        let completed_at = self.execute(&record).await?;
        record.status = TransferStatus::Completed;
        record.completed_at = Some(completed_at);

        info!(
            "✅ Transfer {} completed: {} {} from {} to {}",
            record.id,
            format_usd(record.amount),
            record.transfer_type.as_str(),
            record.source_wallet_id,
            record.dest_wallet_id
        );

        // Subscribers (auto-bridge monitor, notification relay) are
        // optional; a send with no receivers is not an error.
        let _ = self.events.send(TransferEvent {
            transfer_id: record.id,
            source_wallet_id: record.source_wallet_id,
            dest_wallet_id: record.dest_wallet_id,
            source_ledger: record.source_ledger,
            dest_ledger: record.dest_ledger,
            transfer_type: record.transfer_type,
            amount: record.amount,
            completed_at,
        });

        Ok(record)
    }

    /// Get a transfer by ID.
    pub async fn get_transfer(&self, transfer_id: Uuid) -> Result<TransferRecord, TransferError> {
        self.store
            .get_transfer(transfer_id)
            .await?
            .ok_or(TransferError::TransferNotFound(transfer_id))
    }

    /// Cancel a transfer.
    ///
    /// Only `pending` transfers can be cancelled; once processing has
    /// started the request is rejected.
    pub async fn cancel_transfer(
        &self,
        transfer_id: Uuid,
    ) -> Result<TransferRecord, TransferError> {
        let record = self.get_transfer(transfer_id).await?;

        let cancelled = self
            .store
            .transition_transfer(
                transfer_id,
                TransferStatus::Pending,
                TransferStatus::Cancelled,
            )
            .await?;

        if cancelled {
            info!("Transfer {} cancelled", transfer_id);
            let mut record = record;
            record.status = TransferStatus::Cancelled;
            Ok(record)
        } else {
            let current = self.get_transfer(transfer_id).await?;
            Err(TransferError::NotCancellable {
                id: transfer_id,
                status: current.status,
            })
        }
    }

    /// Transfers involving a wallet, newest first.
    pub async fn transfer_history(
        &self,
        wallet_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        self.store
            .get_wallet(wallet_id)
            .await?
            .ok_or(TransferError::WalletNotFound(wallet_id))?;
        Ok(self.store.transfer_history(wallet_id, limit).await?)
    }

    // ==========================================
    // INTERNALS
    // ==========================================

    /// Resolve an idempotency-key hit.
    ///
    /// A completed original with matching parameters is the caller's
    /// result; anything else means the key cannot produce a second
    /// debit.
    fn replay_idempotent(
        &self,
        existing: TransferRecord,
        request: &TransferRequest,
    ) -> Result<TransferRecord, TransferError> {
        if existing.status == TransferStatus::Completed {
            if existing.amount != request.amount
                || existing.source_wallet_id != request.source_wallet_id
            {
                return Err(TransferError::Validation(
                    "idempotency key reused with different parameters".to_string(),
                ));
            }
            info!(
                "Returning original result for idempotency key replay (transfer {})",
                existing.id
            );
            return Ok(existing);
        }
        Err(TransferError::DuplicateTransfer)
    }

    /// Load a wallet and require it to be active.
    async fn active_wallet(&self, wallet_id: Uuid) -> Result<WalletRecord, TransferError> {
        let wallet = self
            .store
            .get_wallet(wallet_id)
            .await?
            .ok_or(TransferError::WalletNotFound(wallet_id))?;
        if wallet.status != WalletStatus::Active {
            return Err(TransferError::WalletFrozen(wallet_id));
        }
        Ok(wallet)
    }

    /// Drive a pending record to `completed`, or mark it `failed`.
    async fn execute(&self, record: &TransferRecord) -> Result<DateTime<Utc>, TransferError> {
        // Cancellation closes here: once the record is processing,
        // cancel requests lose the CAS race and are rejected.
        let processing = self
            .store
            .transition_transfer(
                record.id,
                TransferStatus::Pending,
                TransferStatus::Processing,
            )
            .await?;
        if !processing {
            return Err(TransferError::Cancelled(record.id));
        }

        let mut attempts = 0;
        let err = loop {
            attempts += 1;
            match self.try_execute(record).await {
                Ok(completed_at) => return Ok(completed_at),
                Err(e) if e.is_transient() && attempts < 2 => {
                    warn!(
                        "Transient failure executing transfer {} (attempt {}): {}",
                        record.id, attempts, e
                    );
                    continue;
                }
                Err(e) => break e,
            }
        };

        // The execution scope rolled back; the failure mark commits on
        // its own so the audit trail survives.
        let reason = err.to_string();
        if let Err(mark_err) = self.store.record_transfer_failure(record.id, &reason).await {
            error!(
                "Failed to record failure for transfer {}: {}",
                record.id, mark_err
            );
        }

        Err(err)
    }

    /// One execution attempt: locks, then a single atomic scope.
    async fn try_execute(&self, record: &TransferRecord) -> Result<DateTime<Utc>, TransferError> {
        let keys: [LockKey; 2] = [
            (record.source_ledger, record.source_wallet_id),
            (record.dest_ledger, record.dest_wallet_id),
        ];

        let _locks = self
            .locks
            .acquire(&keys, self.exec_timeout)
            .await
            .map_err(|_| {
                TransferError::TransactionFailure("timed out acquiring wallet locks".to_string())
            })?;

        match tokio::time::timeout(self.exec_timeout, self.run_atomic(record)).await {
            Ok(result) => result,
            Err(_) => Err(TransferError::TransactionFailure(
                "storage commit timed out".to_string(),
            )),
        }
    }

    /// Debit + credit + completion mark, committed or rolled back as
    /// one unit.
    async fn run_atomic(&self, record: &TransferRecord) -> Result<DateTime<Utc>, TransferError> {
        let mut scope = self.store.begin().await?;
        match apply_legs(&mut scope, record).await {
            Ok(completed_at) => {
                scope.commit().await?;
                Ok(completed_at)
            }
            Err(e) => {
                if let Err(rollback_err) = scope.rollback().await {
                    error!(
                        "Rollback failed for transfer {}: {}",
                        record.id, rollback_err
                    );
                }
                Err(e)
            }
        }
    }
}

/// Map a request kind onto concrete legs.
fn resolve_legs(
    source_wallet_id: Uuid,
    kind: TransferKind,
) -> (Uuid, LedgerKind, LedgerKind, TransferType) {
    match kind {
        TransferKind::P2p { dest_wallet_id } => {
            (dest_wallet_id, P2P_LEDGER, P2P_LEDGER, TransferType::P2p)
        }
        TransferKind::Bridge { direction } => (
            source_wallet_id,
            direction.source(),
            direction.dest(),
            TransferType::Bridge,
        ),
    }
}

async fn apply_legs(
    scope: &mut Box<dyn LedgerUnitOfWork>,
    record: &TransferRecord,
) -> Result<DateTime<Utc>, TransferError> {
    // The source pays amount + fee; the destination receives amount.
    let total = record.amount + record.fee;
    scope
        .apply_delta(record.source_wallet_id, record.source_ledger, -total)
        .await?;
    scope
        .apply_delta(record.dest_wallet_id, record.dest_ledger, record.amount)
        .await?;
    let completed_at = Utc::now();
    scope.mark_completed(record.id, completed_at).await?;
    Ok(completed_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::LimitPolicyRecord;
    use crate::services::events;
    use crate::store::memory::MemoryLedgerStore;

    const GENEROUS: LimitPolicyRecord = LimitPolicyRecord {
        per_transaction_limit: i64::MAX,
        daily_spending_limit: i64::MAX,
        daily_p2p_limit: i64::MAX,
        monthly_spending_limit: i64::MAX,
        monthly_p2p_limit: i64::MAX,
    };

    fn wallet_record(status: WalletStatus) -> WalletRecord {
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

    async fn seeded_wallet(store: &MemoryLedgerStore, primary_balance: i64) -> Uuid {
        let wallet = wallet_record(WalletStatus::Active);
        let id = wallet.id;
        store.insert_wallet(wallet).await;
        store.open_account(id, LedgerKind::Primary, primary_balance).await;
        id
    }

    fn orchestrator(store: Arc<MemoryLedgerStore>) -> TransferOrchestrator {
        let (events, _rx) = events::channel();
        TransferOrchestrator::new(
            store,
            Arc::new(LockManager::new()),
            events,
            Duration::from_secs(1),
        )
    }

    fn p2p(source: Uuid, dest: Uuid, amount: i64) -> TransferRequest {
        TransferRequest {
            source_wallet_id: source,
            kind: TransferKind::P2p {
                dest_wallet_id: dest,
            },
            amount,
            idempotency_key: None,
            note: None,
        }
    }

    #[tokio::test]
    async fn test_successful_p2p_transfer() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.set_tier_policy("standard", GENEROUS).await;
        let alice = seeded_wallet(&store, 1_000).await;
        let bob = seeded_wallet(&store, 0).await;

        let orch = orchestrator(store.clone());
        let record = orch.initiate_transfer(p2p(alice, bob, 100)).await.unwrap();

        assert_eq!(record.status, TransferStatus::Completed);
        assert!(record.completed_at.is_some());
        assert_eq!(
            store.get_balance(alice, LedgerKind::Primary).await.unwrap(),
            Some(900)
        );
        assert_eq!(
            store.get_balance(bob, LedgerKind::Primary).await.unwrap(),
            Some(100)
        );
    }

    #[tokio::test]
    async fn test_insufficient_funds_leaves_balance_untouched() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.set_tier_policy("standard", GENEROUS).await;
        let alice = seeded_wallet(&store, 500).await;
        let bob = seeded_wallet(&store, 0).await;

        let orch = orchestrator(store.clone());
        let err = orch
            .initiate_transfer(p2p(alice, bob, 1_000))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::InsufficientFunds {
                available: 500,
                requested: 1_000
            }
        ));
        assert_eq!(
            store.get_balance(alice, LedgerKind::Primary).await.unwrap(),
            Some(500)
        );

        // The attempt is on the audit trail as failed, never completed.
        let history = store.transfer_history(alice, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TransferStatus::Failed);
        assert!(history[0].failure_reason.is_some());
    }

    #[tokio::test]
    async fn test_limit_breach_creates_no_record() {
        let store = Arc::new(MemoryLedgerStore::new());
        store
            .set_tier_policy(
                "standard",
                LimitPolicyRecord {
                    per_transaction_limit: 2_500,
                    daily_spending_limit: 2_500,
                    daily_p2p_limit: 2_500,
                    monthly_spending_limit: i64::MAX,
                    monthly_p2p_limit: i64::MAX,
                },
            )
            .await;
        let alice = seeded_wallet(&store, 100_000).await;
        let bob = seeded_wallet(&store, 0).await;

        let orch = orchestrator(store.clone());
        let err = orch
            .initiate_transfer(p2p(alice, bob, 10_000))
            .await
            .unwrap_err();

        match err {
            TransferError::LimitExceeded(v) => {
                assert_eq!(v.limit_name(), "per_transaction_limit")
            }
            other => panic!("expected LimitExceeded, got {other:?}"),
        }

        // Policy rejections are not audit noise.
        assert!(store.transfer_history(alice, 10).await.unwrap().is_empty());
        assert_eq!(
            store.get_balance(alice, LedgerKind::Primary).await.unwrap(),
            Some(100_000)
        );
    }

    #[tokio::test]
    async fn test_zero_and_negative_amounts_are_validation_errors() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.set_tier_policy("standard", GENEROUS).await;
        let alice = seeded_wallet(&store, 0).await;
        let bob = seeded_wallet(&store, 0).await;

        let orch = orchestrator(store.clone());

        // Even with an empty balance this must never surface as
        // insufficient funds or a silent no-op.
        for amount in [0, -100] {
            let err = orch
                .initiate_transfer(p2p(alice, bob, amount))
                .await
                .unwrap_err();
            assert!(matches!(err, TransferError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn test_self_transfer_rejected() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.set_tier_policy("standard", GENEROUS).await;
        let alice = seeded_wallet(&store, 1_000).await;

        let orch = orchestrator(store.clone());
        let err = orch
            .initiate_transfer(p2p(alice, alice, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Validation(_)));
    }

    #[tokio::test]
    async fn test_idempotent_replay_returns_original() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.set_tier_policy("standard", GENEROUS).await;
        let alice = seeded_wallet(&store, 1_000).await;
        let bob = seeded_wallet(&store, 0).await;

        let orch = orchestrator(store.clone());
        let mut request = p2p(alice, bob, 100);
        request.idempotency_key = Some("retry-me".to_string());

        let first = orch.initiate_transfer(request.clone()).await.unwrap();
        let second = orch.initiate_transfer(request).await.unwrap();

        // Exactly one debit and one credit.
        assert_eq!(first.id, second.id);
        assert_eq!(
            store.get_balance(alice, LedgerKind::Primary).await.unwrap(),
            Some(900)
        );
        assert_eq!(
            store.get_balance(bob, LedgerKind::Primary).await.unwrap(),
            Some(100)
        );
    }

    #[tokio::test]
    async fn test_idempotency_key_with_different_amount_rejected() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.set_tier_policy("standard", GENEROUS).await;
        let alice = seeded_wallet(&store, 1_000).await;
        let bob = seeded_wallet(&store, 0).await;

        let orch = orchestrator(store.clone());
        let mut request = p2p(alice, bob, 100);
        request.idempotency_key = Some("key-a".to_string());
        orch.initiate_transfer(request.clone()).await.unwrap();

        request.amount = 200;
        let err = orch.initiate_transfer(request).await.unwrap_err();
        assert!(matches!(err, TransferError::Validation(_)));
    }

    #[tokio::test]
    async fn test_in_flight_idempotency_key_conflicts() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.set_tier_policy("standard", GENEROUS).await;
        let alice = seeded_wallet(&store, 1_000).await;
        let bob = seeded_wallet(&store, 0).await;

        // A pending record already owns the key.
        store
            .insert_transfer(&TransferRecord {
                id: Uuid::new_v4(),
                source_wallet_id: alice,
                dest_wallet_id: bob,
                source_ledger: LedgerKind::Primary,
                dest_ledger: LedgerKind::Primary,
                transfer_type: TransferType::P2p,
                amount: 100,
                fee: 0,
                status: TransferStatus::Pending,
                idempotency_key: Some("in-flight".to_string()),
                note: None,
                failure_reason: None,
                created_at: Utc::now(),
                completed_at: None,
            })
            .await
            .unwrap();

        let orch = orchestrator(store.clone());
        let mut request = p2p(alice, bob, 100);
        request.idempotency_key = Some("in-flight".to_string());

        let err = orch.initiate_transfer(request).await.unwrap_err();
        assert!(matches!(err, TransferError::DuplicateTransfer));
    }

    #[tokio::test]
    async fn test_frozen_wallet_rejected_before_any_record() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.set_tier_policy("standard", GENEROUS).await;
        let frozen = wallet_record(WalletStatus::Frozen);
        let frozen_id = frozen.id;
        store.insert_wallet(frozen).await;
        store.open_account(frozen_id, LedgerKind::Primary, 1_000).await;
        let bob = seeded_wallet(&store, 0).await;

        let orch = orchestrator(store.clone());
        let err = orch
            .initiate_transfer(p2p(frozen_id, bob, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::WalletFrozen(_)));
        assert!(store
            .transfer_history(frozen_id, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_unknown_wallet_rejected() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.set_tier_policy("standard", GENEROUS).await;
        let bob = seeded_wallet(&store, 0).await;

        let orch = orchestrator(store.clone());
        let err = orch
            .initiate_transfer(p2p(Uuid::new_v4(), bob, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::WalletNotFound(_)));
    }

    #[tokio::test]
    async fn test_bridge_transfer_moves_between_ledgers() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.set_tier_policy("standard", GENEROUS).await;
        let alice = seeded_wallet(&store, 25_000).await;
        store.open_account(alice, LedgerKind::Custodial, 5_000).await;

        let orch = orchestrator(store.clone());
        let record = orch
            .initiate_transfer(TransferRequest {
                source_wallet_id: alice,
                kind: TransferKind::Bridge {
                    direction: BridgeDirection::PrimaryToCustodial,
                },
                amount: 20_000,
                idempotency_key: None,
                note: None,
            })
            .await
            .unwrap();

        assert_eq!(record.status, TransferStatus::Completed);
        assert_eq!(record.fee, 0);
        assert_eq!(record.transfer_type, TransferType::Bridge);
        assert_eq!(
            store.get_balance(alice, LedgerKind::Primary).await.unwrap(),
            Some(5_000)
        );
        assert_eq!(
            store
                .get_balance(alice, LedgerKind::Custodial)
                .await
                .unwrap(),
            Some(25_000)
        );
    }

    #[tokio::test]
    async fn test_rollback_when_credit_leg_fails() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.set_tier_policy("standard", GENEROUS).await;
        let alice = seeded_wallet(&store, 10_000).await;
        // No custodial account: the credit leg will fail after the
        // debit leg has already been staged.

        let orch = orchestrator(store.clone());
        let err = orch
            .initiate_transfer(TransferRequest {
                source_wallet_id: alice,
                kind: TransferKind::Bridge {
                    direction: BridgeDirection::PrimaryToCustodial,
                },
                amount: 1_000,
                idempotency_key: None,
                note: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::WalletNotFound(_)));

        // Source restored, record failed, never completed.
        assert_eq!(
            store.get_balance(alice, LedgerKind::Primary).await.unwrap(),
            Some(10_000)
        );
        let history = store.transfer_history(alice, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TransferStatus::Failed);
    }

    #[tokio::test]
    async fn test_conservation_across_transfer_sequence() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.set_tier_policy("standard", GENEROUS).await;
        let alice = seeded_wallet(&store, 100_000).await;
        let bob = seeded_wallet(&store, 50_000).await;
        store.open_account(alice, LedgerKind::Custodial, 0).await;

        let before = store.total_balance().await;
        let orch = orchestrator(store.clone());

        orch.initiate_transfer(p2p(alice, bob, 12_345)).await.unwrap();
        orch.initiate_transfer(p2p(bob, alice, 7_000)).await.unwrap();
        orch.initiate_transfer(TransferRequest {
            source_wallet_id: alice,
            kind: TransferKind::Bridge {
                direction: BridgeDirection::PrimaryToCustodial,
            },
            amount: 30_000,
            idempotency_key: None,
            note: None,
        })
        .await
        .unwrap();

        // Fees are zero, so the books must balance exactly.
        assert_eq!(store.total_balance().await, before);
    }

    #[tokio::test]
    async fn test_cancel_pending_transfer() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.set_tier_policy("standard", GENEROUS).await;
        let alice = seeded_wallet(&store, 1_000).await;
        let bob = seeded_wallet(&store, 0).await;

        let pending_id = Uuid::new_v4();
        store
            .insert_transfer(&TransferRecord {
                id: pending_id,
                source_wallet_id: alice,
                dest_wallet_id: bob,
                source_ledger: LedgerKind::Primary,
                dest_ledger: LedgerKind::Primary,
                transfer_type: TransferType::P2p,
                amount: 100,
                fee: 0,
                status: TransferStatus::Pending,
                idempotency_key: None,
                note: None,
                failure_reason: None,
                created_at: Utc::now(),
                completed_at: None,
            })
            .await
            .unwrap();

        let orch = orchestrator(store.clone());
        let record = orch.cancel_transfer(pending_id).await.unwrap();
        assert_eq!(record.status, TransferStatus::Cancelled);

        // A second cancel is rejected: cancelled is terminal.
        let err = orch.cancel_transfer(pending_id).await.unwrap_err();
        assert!(matches!(err, TransferError::NotCancellable { .. }));
    }

    #[tokio::test]
    async fn test_cancel_completed_transfer_rejected() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.set_tier_policy("standard", GENEROUS).await;
        let alice = seeded_wallet(&store, 1_000).await;
        let bob = seeded_wallet(&store, 0).await;

        let orch = orchestrator(store.clone());
        let record = orch.initiate_transfer(p2p(alice, bob, 100)).await.unwrap();

        let err = orch.cancel_transfer(record.id).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::NotCancellable {
                status: TransferStatus::Completed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_completed_event_published() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.set_tier_policy("standard", GENEROUS).await;
        let alice = seeded_wallet(&store, 1_000).await;
        let bob = seeded_wallet(&store, 0).await;

        let (events, mut rx) = events::channel();
        let orch = TransferOrchestrator::new(
            store.clone(),
            Arc::new(LockManager::new()),
            events,
            Duration::from_secs(1),
        );

        let record = orch.initiate_transfer(p2p(alice, bob, 100)).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.transfer_id, record.id);
        assert_eq!(event.amount, 100);
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.set_tier_policy("standard", GENEROUS).await;
        let alice = seeded_wallet(&store, 10_000).await;
        let bob = seeded_wallet(&store, 0).await;

        let orch = orchestrator(store.clone());
        let first = orch.initiate_transfer(p2p(alice, bob, 100)).await.unwrap();
        let second = orch.initiate_transfer(p2p(alice, bob, 200)).await.unwrap();

        let history = orch.transfer_history(alice, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].created_at >= history[1].created_at);
        let _ = (first, second);
    }

    #[tokio::test]
    async fn test_concurrent_transfers_cannot_overdraw() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.set_tier_policy("standard", GENEROUS).await;
        let alice = seeded_wallet(&store, 1_000).await;
        let bob = seeded_wallet(&store, 0).await;
        let carol = seeded_wallet(&store, 0).await;

        let orch = Arc::new(orchestrator(store.clone()));

        // Two 700-cent transfers out of a 1000-cent balance: exactly
        // one can succeed, whatever the interleaving.
        let o1 = orch.clone();
        let o2 = orch.clone();
        let a = tokio::spawn(async move { o1.initiate_transfer(p2p(alice, bob, 700)).await });
        let b = tokio::spawn(async move { o2.initiate_transfer(p2p(alice, carol, 700)).await });

        let results = [a.await.unwrap(), b.await.unwrap()];
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);

        let remaining = store
            .get_balance(alice, LedgerKind::Primary)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(remaining, 300);
    }
}
