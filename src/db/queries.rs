//! # Database Queries
//!
//! This module contains all the SQL queries for interacting with the
//! database. Each function performs a specific database operation.
//!
//! ## Query Organization
//!
//! Queries are grouped by the table they operate on:
//! - `wallet_*` / `get_wallet*` - Wallet and ledger account operations
//! - `*_transfer*` - Transfer table operations
//! - `*_limit_*` - Limit policy lookups
//! - `*_link*` - Wallet link lookups
//!
//! ## Error Handling
//!
//! All queries return `Result<T, DatabaseError>`. Enum-typed columns
//! (status, ledger kind) are stored as TEXT and parsed on read; a value
//! the application doesn't know maps to `DatabaseError::InvalidRow`.

use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use tracing::debug;
use uuid::Uuid;

use super::models::*;
use super::DatabaseError;

// ============================================
// HELPER FUNCTIONS
// ============================================

/// Helper to convert a database row to WalletRecord
pub(crate) fn row_to_wallet(row: &Row) -> Result<WalletRecord, DatabaseError> {
    let status: String = row.get("status");
    Ok(WalletRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        currency: row.get("currency"),
        tier: row.get("tier"),
        status: WalletStatus::parse(&status)
            .ok_or_else(|| DatabaseError::InvalidRow(format!("wallet status: {}", status)))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Helper to convert a database row to TransferRecord
pub(crate) fn row_to_transfer(row: &Row) -> Result<TransferRecord, DatabaseError> {
    let source_ledger: String = row.get("source_ledger");
    let dest_ledger: String = row.get("dest_ledger");
    let transfer_type: String = row.get("transfer_type");
    let status: String = row.get("status");
    Ok(TransferRecord {
        id: row.get("id"),
        source_wallet_id: row.get("source_wallet_id"),
        dest_wallet_id: row.get("dest_wallet_id"),
        source_ledger: LedgerKind::parse(&source_ledger)
            .ok_or_else(|| DatabaseError::InvalidRow(format!("source ledger: {}", source_ledger)))?,
        dest_ledger: LedgerKind::parse(&dest_ledger)
            .ok_or_else(|| DatabaseError::InvalidRow(format!("dest ledger: {}", dest_ledger)))?,
        transfer_type: TransferType::parse(&transfer_type)
            .ok_or_else(|| DatabaseError::InvalidRow(format!("transfer type: {}", transfer_type)))?,
        amount: row.get("amount"),
        fee: row.get("fee"),
        status: TransferStatus::parse(&status)
            .ok_or_else(|| DatabaseError::InvalidRow(format!("transfer status: {}", status)))?,
        idempotency_key: row.get("idempotency_key"),
        note: row.get("note"),
        failure_reason: row.get("failure_reason"),
        created_at: row.get("created_at"),
        completed_at: row.get("completed_at"),
    })
}

fn row_to_policy(row: &Row) -> LimitPolicyRecord {
    LimitPolicyRecord {
        per_transaction_limit: row.get("per_transaction_limit"),
        daily_spending_limit: row.get("daily_spending_limit"),
        daily_p2p_limit: row.get("daily_p2p_limit"),
        monthly_spending_limit: row.get("monthly_spending_limit"),
        monthly_p2p_limit: row.get("monthly_p2p_limit"),
    }
}

fn row_to_link(row: &Row) -> Result<WalletLinkRecord, DatabaseError> {
    let preferred: String = row.get("preferred_ledger");
    Ok(WalletLinkRecord {
        user_id: row.get("user_id"),
        auto_bridge_enabled: row.get("auto_bridge_enabled"),
        preferred_ledger: LedgerKind::parse(&preferred)
            .ok_or_else(|| DatabaseError::InvalidRow(format!("preferred ledger: {}", preferred)))?,
        bridge_threshold: row.get("bridge_threshold"),
        min_bridge_amount: row.get("min_bridge_amount"),
        max_bridge_amount: row.get("max_bridge_amount"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

async fn client(pool: &Pool) -> Result<deadpool_postgres::Object, DatabaseError> {
    pool.get()
        .await
        .map_err(|e| DatabaseError::ConnectionError(e.to_string()))
}

// ============================================
// WALLET QUERIES
// ============================================

/// Get a wallet by ID.
pub async fn get_wallet(pool: &Pool, wallet_id: Uuid) -> Result<Option<WalletRecord>, DatabaseError> {
    debug!("Fetching wallet: {}", wallet_id);

    let client = client(pool).await?;

    let rows = client
        .query(
            r#"
            SELECT id, user_id, currency, tier, status, created_at, updated_at
            FROM wallets
            WHERE id = $1
            "#,
            &[&wallet_id],
        )
        .await?;

    match rows.first() {
        Some(row) => Ok(Some(row_to_wallet(row)?)),
        None => Ok(None),
    }
}

/// Get the balance of one (wallet, ledger) pair.
///
/// Returns `None` when the wallet has no account on that ledger.
pub async fn get_ledger_balance(
    pool: &Pool,
    wallet_id: Uuid,
    ledger: LedgerKind,
) -> Result<Option<i64>, DatabaseError> {
    let client = client(pool).await?;

    let ledger_str = ledger.as_str();
    let rows = client
        .query(
            r#"
            SELECT balance
            FROM ledger_accounts
            WHERE wallet_id = $1 AND ledger_kind = $2
            "#,
            &[&wallet_id, &ledger_str],
        )
        .await?;

    Ok(rows.first().map(|row| row.get("balance")))
}

/// Get every ledger account a wallet holds.
pub async fn get_ledger_accounts(
    pool: &Pool,
    wallet_id: Uuid,
) -> Result<Vec<LedgerAccountRecord>, DatabaseError> {
    let client = client(pool).await?;

    let rows = client
        .query(
            r#"
            SELECT wallet_id, ledger_kind, balance
            FROM ledger_accounts
            WHERE wallet_id = $1
            ORDER BY ledger_kind
            "#,
            &[&wallet_id],
        )
        .await?;

    let mut accounts = Vec::new();
    for row in rows {
        let kind: String = row.get("ledger_kind");
        accounts.push(LedgerAccountRecord {
            wallet_id: row.get("wallet_id"),
            ledger_kind: LedgerKind::parse(&kind)
                .ok_or_else(|| DatabaseError::InvalidRow(format!("ledger kind: {}", kind)))?,
            balance: row.get("balance"),
        });
    }

    Ok(accounts)
}

// ============================================
// TRANSFER QUERIES
// ============================================

/// Record a new transfer.
pub async fn insert_transfer(pool: &Pool, tx: &TransferRecord) -> Result<Uuid, DatabaseError> {
    debug!(
        "Creating {} transfer {} for wallet {}",
        tx.transfer_type.as_str(),
        tx.id,
        tx.source_wallet_id
    );

    let client = client(pool).await?;

    let source_ledger = tx.source_ledger.as_str();
    let dest_ledger = tx.dest_ledger.as_str();
    let transfer_type = tx.transfer_type.as_str();
    let status = tx.status.as_str();

    client
        .execute(
            r#"
            INSERT INTO transfers (
                id, source_wallet_id, dest_wallet_id,
                source_ledger, dest_ledger, transfer_type,
                amount, fee, status,
                idempotency_key, note, failure_reason,
                created_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
            &[
                &tx.id,
                &tx.source_wallet_id,
                &tx.dest_wallet_id,
                &source_ledger,
                &dest_ledger,
                &transfer_type,
                &tx.amount,
                &tx.fee,
                &status,
                &tx.idempotency_key,
                &tx.note,
                &tx.failure_reason,
                &tx.created_at,
                &tx.completed_at,
            ],
        )
        .await?;

    Ok(tx.id)
}

/// Get a transfer by ID.
pub async fn get_transfer(
    pool: &Pool,
    transfer_id: Uuid,
) -> Result<Option<TransferRecord>, DatabaseError> {
    let client = client(pool).await?;

    let rows = client
        .query(
            r#"
            SELECT id, source_wallet_id, dest_wallet_id,
                   source_ledger, dest_ledger, transfer_type,
                   amount, fee, status,
                   idempotency_key, note, failure_reason,
                   created_at, completed_at
            FROM transfers
            WHERE id = $1
            "#,
            &[&transfer_id],
        )
        .await?;

    match rows.first() {
        Some(row) => Ok(Some(row_to_transfer(row)?)),
        None => Ok(None),
    }
}

/// Get a transfer by its idempotency key.
pub async fn get_transfer_by_idempotency_key(
    pool: &Pool,
    key: &str,
) -> Result<Option<TransferRecord>, DatabaseError> {
    let client = client(pool).await?;

    let rows = client
        .query(
            r#"
            SELECT id, source_wallet_id, dest_wallet_id,
                   source_ledger, dest_ledger, transfer_type,
                   amount, fee, status,
                   idempotency_key, note, failure_reason,
                   created_at, completed_at
            FROM transfers
            WHERE idempotency_key = $1
            "#,
            &[&key],
        )
        .await?;

    match rows.first() {
        Some(row) => Ok(Some(row_to_transfer(row)?)),
        None => Ok(None),
    }
}

/// Compare-and-set a transfer's status.
///
/// Returns `true` when the transfer was in `from` and is now `to`;
/// `false` when some other status won the race.
pub async fn transition_transfer_status(
    pool: &Pool,
    transfer_id: Uuid,
    from: TransferStatus,
    to: TransferStatus,
) -> Result<bool, DatabaseError> {
    debug!(
        "Transitioning transfer {} from {} to {}",
        transfer_id,
        from.as_str(),
        to.as_str()
    );

    let client = client(pool).await?;

    let from_str = from.as_str();
    let to_str = to.as_str();
    let rows_affected = client
        .execute(
            r#"
            UPDATE transfers
            SET status = $3
            WHERE id = $1 AND status = $2
            "#,
            &[&transfer_id, &from_str, &to_str],
        )
        .await?;

    Ok(rows_affected > 0)
}

/// Mark a transfer failed with a reason.
///
/// This write always commits on its own, outside any transfer
/// transaction scope, so a rolled-back execution still leaves its
/// audit trail.
pub async fn record_transfer_failure(
    pool: &Pool,
    transfer_id: Uuid,
    reason: &str,
) -> Result<(), DatabaseError> {
    let client = client(pool).await?;

    let rows_affected = client
        .execute(
            r#"
            UPDATE transfers
            SET status = 'failed', failure_reason = $2
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
            &[&transfer_id, &reason],
        )
        .await?;

    if rows_affected == 0 {
        return Err(DatabaseError::NotFound(format!(
            "Transfer not found or already terminal: {}",
            transfer_id
        )));
    }

    Ok(())
}

/// Get transfers involving a wallet, newest first.
pub async fn get_transfer_history(
    pool: &Pool,
    wallet_id: Uuid,
    limit: i64,
) -> Result<Vec<TransferRecord>, DatabaseError> {
    debug!("Fetching transfer history for wallet: {}", wallet_id);

    let client = client(pool).await?;

    let rows = client
        .query(
            r#"
            SELECT id, source_wallet_id, dest_wallet_id,
                   source_ledger, dest_ledger, transfer_type,
                   amount, fee, status,
                   idempotency_key, note, failure_reason,
                   created_at, completed_at
            FROM transfers
            WHERE source_wallet_id = $1 OR dest_wallet_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
            &[&wallet_id, &limit],
        )
        .await?;

    let mut transfers = Vec::new();
    for row in rows {
        transfers.push(row_to_transfer(&row)?);
    }

    Ok(transfers)
}

/// Sum completed outflow (amount + fee) from a wallet since an instant.
///
/// Transfers are attributed to the window containing their completion
/// timestamp. `transfer_type` restricts the sum to one kind (used for
/// the P2P-specific limits).
pub async fn sum_completed_outflow(
    pool: &Pool,
    wallet_id: Uuid,
    since: DateTime<Utc>,
    transfer_type: Option<TransferType>,
) -> Result<i64, DatabaseError> {
    let client = client(pool).await?;

    let row = match transfer_type {
        Some(t) => {
            let t_str = t.as_str();
            client
                .query_one(
                    r#"
                    SELECT COALESCE(SUM(amount + fee), 0)::BIGINT AS total
                    FROM transfers
                    WHERE source_wallet_id = $1
                      AND status = 'completed'
                      AND completed_at >= $2
                      AND transfer_type = $3
                    "#,
                    &[&wallet_id, &since, &t_str],
                )
                .await?
        }
        None => {
            client
                .query_one(
                    r#"
                    SELECT COALESCE(SUM(amount + fee), 0)::BIGINT AS total
                    FROM transfers
                    WHERE source_wallet_id = $1
                      AND status = 'completed'
                      AND completed_at >= $2
                    "#,
                    &[&wallet_id, &since],
                )
                .await?
        }
    };

    Ok(row.get("total"))
}

// ============================================
// LIMIT POLICY QUERIES
// ============================================

/// Get the limit policy for a wallet.
///
/// A per-wallet override row wins; otherwise the wallet's tier row
/// applies. Returns `None` when neither exists.
pub async fn get_limit_policy(
    pool: &Pool,
    wallet_id: Uuid,
    tier: &str,
) -> Result<Option<LimitPolicyRecord>, DatabaseError> {
    let client = client(pool).await?;

    let rows = client
        .query(
            r#"
            SELECT per_transaction_limit, daily_spending_limit, daily_p2p_limit,
                   monthly_spending_limit, monthly_p2p_limit
            FROM limit_policies
            WHERE wallet_id = $1
            "#,
            &[&wallet_id],
        )
        .await?;

    if let Some(row) = rows.first() {
        return Ok(Some(row_to_policy(row)));
    }

    let rows = client
        .query(
            r#"
            SELECT per_transaction_limit, daily_spending_limit, daily_p2p_limit,
                   monthly_spending_limit, monthly_p2p_limit
            FROM limit_policies
            WHERE tier = $1 AND wallet_id IS NULL
            "#,
            &[&tier],
        )
        .await?;

    Ok(rows.first().map(row_to_policy))
}

// ============================================
// WALLET LINK QUERIES
// ============================================

/// Get a user's cross-ledger link preference.
pub async fn get_wallet_link(
    pool: &Pool,
    user_id: Uuid,
) -> Result<Option<WalletLinkRecord>, DatabaseError> {
    let client = client(pool).await?;

    let rows = client
        .query(
            r#"
            SELECT user_id, auto_bridge_enabled, preferred_ledger,
                   bridge_threshold, min_bridge_amount, max_bridge_amount,
                   created_at, updated_at
            FROM wallet_links
            WHERE user_id = $1
            "#,
            &[&user_id],
        )
        .await?;

    match rows.first() {
        Some(row) => Ok(Some(row_to_link(row)?)),
        None => Ok(None),
    }
}

/// Get the IDs of all active wallets whose user has auto-bridge on.
///
/// This is the sweep set for the auto-bridge monitor.
pub async fn linked_wallet_ids(pool: &Pool) -> Result<Vec<Uuid>, DatabaseError> {
    let client = client(pool).await?;

    let rows = client
        .query(
            r#"
            SELECT w.id
            FROM wallets w
            JOIN wallet_links l ON l.user_id = w.user_id
            WHERE l.auto_bridge_enabled AND w.status = 'active'
            "#,
            &[],
        )
        .await?;

    Ok(rows.iter().map(|row| row.get("id")).collect())
}
