//! # PostgreSQL Ledger Store
//!
//! The production [`LedgerStore`]. Reads go through [`crate::db::queries`];
//! the atomic scope is a real database transaction pinned to one pooled
//! connection, with `SELECT ... FOR UPDATE` row locks serializing all
//! mutations of a (wallet, ledger) pair.
//!
//! ## Bounded Blocking
//!
//! Every transaction sets `lock_timeout` and `statement_timeout` via
//! `SET LOCAL`, so a contended row lock or a stuck commit fails inside
//! the database instead of blocking a worker indefinitely. The caller
//! sees a storage error and decides whether to retry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Object;
use tracing::warn;
use uuid::Uuid;

use crate::db::models::{
    LedgerAccountRecord, LedgerKind, LimitPolicyRecord, TransferRecord, TransferStatus,
    TransferType, WalletLinkRecord, WalletRecord,
};
use crate::db::{queries, Database, DatabaseError};

use super::{LedgerStore, LedgerUnitOfWork, StoreError};

impl From<DatabaseError> for StoreError {
    fn from(e: DatabaseError) -> Self {
        StoreError::Storage(e.to_string())
    }
}

fn storage(e: tokio_postgres::Error) -> StoreError {
    StoreError::Storage(e.to_string())
}

/// PostgreSQL-backed [`LedgerStore`].
#[derive(Clone)]
pub struct PostgresLedgerStore {
    db: Database,

    /// Database-side lock/statement timeout for transaction scopes.
    tx_timeout_ms: u64,
}

impl PostgresLedgerStore {
    pub fn new(db: Database, tx_timeout_ms: u64) -> Self {
        Self { db, tx_timeout_ms }
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn ping(&self) -> bool {
        match self.db.pool().get().await {
            Ok(client) => client.query("SELECT 1", &[]).await.is_ok(),
            Err(_) => false,
        }
    }

    async fn get_wallet(&self, wallet_id: Uuid) -> Result<Option<WalletRecord>, StoreError> {
        Ok(queries::get_wallet(self.db.pool(), wallet_id).await?)
    }

    async fn get_balance(
        &self,
        wallet_id: Uuid,
        ledger: LedgerKind,
    ) -> Result<Option<i64>, StoreError> {
        Ok(queries::get_ledger_balance(self.db.pool(), wallet_id, ledger).await?)
    }

    async fn ledger_accounts(
        &self,
        wallet_id: Uuid,
    ) -> Result<Vec<LedgerAccountRecord>, StoreError> {
        Ok(queries::get_ledger_accounts(self.db.pool(), wallet_id).await?)
    }

    async fn get_limit_policy(
        &self,
        wallet_id: Uuid,
        tier: &str,
    ) -> Result<LimitPolicyRecord, StoreError> {
        queries::get_limit_policy(self.db.pool(), wallet_id, tier)
            .await?
            .ok_or_else(|| StoreError::PolicyNotFound(tier.to_string()))
    }

    async fn completed_outflow_since(
        &self,
        wallet_id: Uuid,
        since: DateTime<Utc>,
        transfer_type: Option<TransferType>,
    ) -> Result<i64, StoreError> {
        Ok(queries::sum_completed_outflow(self.db.pool(), wallet_id, since, transfer_type).await?)
    }

    async fn get_transfer(&self, transfer_id: Uuid) -> Result<Option<TransferRecord>, StoreError> {
        Ok(queries::get_transfer(self.db.pool(), transfer_id).await?)
    }

    async fn get_transfer_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<TransferRecord>, StoreError> {
        Ok(queries::get_transfer_by_idempotency_key(self.db.pool(), key).await?)
    }

    async fn insert_transfer(&self, record: &TransferRecord) -> Result<(), StoreError> {
        queries::insert_transfer(self.db.pool(), record).await?;
        Ok(())
    }

    async fn transition_transfer(
        &self,
        transfer_id: Uuid,
        from: TransferStatus,
        to: TransferStatus,
    ) -> Result<bool, StoreError> {
        Ok(queries::transition_transfer_status(self.db.pool(), transfer_id, from, to).await?)
    }

    async fn record_transfer_failure(
        &self,
        transfer_id: Uuid,
        reason: &str,
    ) -> Result<(), StoreError> {
        queries::record_transfer_failure(self.db.pool(), transfer_id, reason).await?;
        Ok(())
    }

    async fn transfer_history(
        &self,
        wallet_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TransferRecord>, StoreError> {
        Ok(queries::get_transfer_history(self.db.pool(), wallet_id, limit).await?)
    }

    async fn get_wallet_link(
        &self,
        user_id: Uuid,
    ) -> Result<Option<WalletLinkRecord>, StoreError> {
        Ok(queries::get_wallet_link(self.db.pool(), user_id).await?)
    }

    async fn linked_wallet_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(queries::linked_wallet_ids(self.db.pool()).await?)
    }

    async fn begin(&self) -> Result<Box<dyn LedgerUnitOfWork>, StoreError> {
        let client = self
            .db
            .pool()
            .get()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        // SET LOCAL scopes the timeouts to this transaction only.
        client
            .batch_execute(&format!(
                "BEGIN; SET LOCAL lock_timeout = '{0}ms'; SET LOCAL statement_timeout = '{0}ms';",
                self.tx_timeout_ms
            ))
            .await
            .map_err(storage)?;

        Ok(Box::new(PgUnitOfWork {
            client: Some(client),
        }))
    }
}

/// One open database transaction.
///
/// The pooled connection is pinned until commit or rollback. If the
/// scope is dropped mid-flight (task cancelled), the connection is
/// detached from the pool instead of being recycled with an open
/// transaction on it.
struct PgUnitOfWork {
    client: Option<Object>,
}

impl PgUnitOfWork {
    fn client(&self) -> Result<&Object, StoreError> {
        self.client
            .as_ref()
            .ok_or_else(|| StoreError::Storage("transaction already finished".to_string()))
    }
}

#[async_trait]
impl LedgerUnitOfWork for PgUnitOfWork {
    async fn apply_delta(
        &mut self,
        wallet_id: Uuid,
        ledger: LedgerKind,
        delta: i64,
    ) -> Result<i64, StoreError> {
        let client = self.client()?;
        let ledger_str = ledger.as_str();

        // Row lock on the account serializes concurrent transfers
        // touching the same (wallet, ledger) pair.
        let rows = client
            .query(
                r#"
                SELECT w.status, a.balance
                FROM ledger_accounts a
                JOIN wallets w ON w.id = a.wallet_id
                WHERE a.wallet_id = $1 AND a.ledger_kind = $2
                FOR UPDATE OF a
                "#,
                &[&wallet_id, &ledger_str],
            )
            .await
            .map_err(storage)?;

        let row = rows.first().ok_or(StoreError::WalletNotFound(wallet_id))?;

        let status: String = row.get("status");
        if status != "active" {
            return Err(StoreError::WalletFrozen(wallet_id));
        }

        let balance: i64 = row.get("balance");
        let updated = balance + delta;
        if delta < 0 && updated < 0 {
            return Err(StoreError::InsufficientFunds {
                available: balance,
                requested: -delta,
            });
        }

        client
            .execute(
                r#"
                UPDATE ledger_accounts
                SET balance = $3, updated_at = NOW()
                WHERE wallet_id = $1 AND ledger_kind = $2
                "#,
                &[&wallet_id, &ledger_str, &updated],
            )
            .await
            .map_err(storage)?;

        Ok(updated)
    }

    async fn mark_completed(
        &mut self,
        transfer_id: Uuid,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let client = self.client()?;

        let rows_affected = client
            .execute(
                r#"
                UPDATE transfers
                SET status = 'completed', completed_at = $2
                WHERE id = $1 AND status = 'processing'
                "#,
                &[&transfer_id, &completed_at],
            )
            .await
            .map_err(storage)?;

        if rows_affected == 0 {
            return Err(StoreError::Storage(format!(
                "transfer not in processing state: {}",
                transfer_id
            )));
        }

        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let client = self
            .client
            .take()
            .ok_or_else(|| StoreError::Storage("transaction already finished".to_string()))?;
        client.batch_execute("COMMIT").await.map_err(storage)?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        let client = self
            .client
            .take()
            .ok_or_else(|| StoreError::Storage("transaction already finished".to_string()))?;
        client.batch_execute("ROLLBACK").await.map_err(storage)?;
        Ok(())
    }
}

impl Drop for PgUnitOfWork {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            // The transaction never finished; the connection must not go
            // back into the pool carrying it.
            warn!("ledger transaction dropped without commit/rollback; discarding connection");
            drop(Object::take(client));
        }
    }
}
