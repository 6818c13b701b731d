//! # Database Models
//!
//! This module defines the data structures that map to database tables.
//! Each struct represents a row in a table.
//!
//! ## Table Overview
//!
//! | Table | Description |
//! |-------|-------------|
//! | `wallets` | Wallet identity, tier and status |
//! | `ledger_accounts` | Per-(wallet, ledger) balances |
//! | `transfers` | Append-only transfer audit trail |
//! | `limit_policies` | Spending limits per tier (or wallet override) |
//! | `wallet_links` | Cross-ledger linking preferences |
//!
//! ## Relationship Diagram
//!
//! ```text
//! ┌─────────────┐       ┌──────────────────┐
//! │   wallets   │──────<│ ledger_accounts  │
//! │             │       │                  │
//! │ id (PK)     │       │ wallet_id (FK)   │
//! │ tier        │       │ ledger_kind      │
//! │ status      │       │ balance          │
//! └─────────────┘       └──────────────────┘
//!        │
//!        │
//!        ▼
//! ┌──────────────────┐
//! │    transfers     │
//! │                  │
//! │ source_wallet_id │
//! │ dest_wallet_id   │
//! │ amount / status  │
//! └──────────────────┘
//! ```
//!
//! ## Note on Types
//!
//! All monetary values are `i64` minor units (cents). PostgreSQL has no
//! unsigned integers, and cents avoid floating-point drift entirely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which of the two balance-of-record systems an account lives on.
///
/// The derived ordering (`Primary < Custodial`) is the global lock order
/// for cross-ledger transfers: locks are always acquired primary-first,
/// regardless of transfer direction, so two opposite-direction bridge
/// requests cannot deadlock.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    /// The internal wallet ledger.
    Primary,
    /// The external stablecoin custodian ledger.
    Custodial,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::Primary => "primary",
            LedgerKind::Custodial => "custodial",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary" => Some(LedgerKind::Primary),
            "custodial" => Some(LedgerKind::Custodial),
            _ => None,
        }
    }

    /// The opposite ledger.
    pub fn other(&self) -> Self {
        match self {
            LedgerKind::Primary => LedgerKind::Custodial,
            LedgerKind::Custodial => LedgerKind::Primary,
        }
    }
}

/// Wallet lifecycle status.
///
/// Only `Active` wallets may send or receive funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    Active,
    Frozen,
    Closed,
}

impl WalletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Active => "active",
            WalletStatus::Frozen => "frozen",
            WalletStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(WalletStatus::Active),
            "frozen" => Some(WalletStatus::Frozen),
            "closed" => Some(WalletStatus::Closed),
            _ => None,
        }
    }
}

/// Transfer lifecycle status.
///
/// Valid transitions:
///
/// ```text
/// pending ──> processing ──> completed
///    │             └───────> failed
///    └─────> cancelled
/// ```
///
/// `Cancelled` is only reachable from `Pending`; records are immutable
/// once they reach `Completed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Processing => "processing",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransferStatus::Pending),
            "processing" => Some(TransferStatus::Processing),
            "completed" => Some(TransferStatus::Completed),
            "failed" => Some(TransferStatus::Failed),
            "cancelled" => Some(TransferStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether the record may never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }
}

/// What kind of movement a transfer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    /// Between two different users' wallets on the same ledger.
    P2p,
    /// Between the two ledgers of a single wallet.
    Bridge,
}

impl TransferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferType::P2p => "p2p",
            TransferType::Bridge => "bridge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "p2p" => Some(TransferType::P2p),
            "bridge" => Some(TransferType::Bridge),
            _ => None,
        }
    }
}

/// Represents a wallet row.
///
/// Balances do NOT live here: they are held per ledger in
/// [`LedgerAccountRecord`] and mutated only through the ledger store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    /// Unique wallet ID.
    pub id: Uuid,

    /// Owning user.
    pub user_id: Uuid,

    /// ISO currency code. Always "USD" today.
    pub currency: String,

    /// Tier name, selects the applicable limit policy.
    pub tier: String,

    /// Lifecycle status.
    pub status: WalletStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One (wallet, ledger) balance pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerAccountRecord {
    pub wallet_id: Uuid,
    pub ledger_kind: LedgerKind,

    /// Balance in cents. Never negative.
    pub balance: i64,
}

/// Represents a transfer row.
///
/// Every transfer (P2P or bridge) creates exactly one record at request
/// time. The record is the audit trail: once `status` is terminal the row
/// is never rewritten.
///
/// ## Example
///
/// A completed $100 P2P transfer:
/// ```text
/// TransferRecord {
///     id: "550e8400-e29b-41d4-a716-446655440000",
///     transfer_type: P2p,
///     amount: 10_000,   // $100.00 in cents
///     fee: 0,
///     status: Completed,
///     ...
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Unique transfer ID (UUID v4).
    pub id: Uuid,

    /// Wallet the funds leave.
    pub source_wallet_id: Uuid,

    /// Wallet the funds arrive at. Equal to `source_wallet_id` for
    /// bridge transfers.
    pub dest_wallet_id: Uuid,

    /// Ledger debited.
    pub source_ledger: LedgerKind,

    /// Ledger credited.
    pub dest_ledger: LedgerKind,

    pub transfer_type: TransferType,

    /// Amount credited to the destination, in cents. Always positive.
    pub amount: i64,

    /// Fee charged on top of `amount`, in cents. 0 for internal bridges
    /// and instant P2P transfers.
    pub fee: i64,

    pub status: TransferStatus,

    /// Caller-supplied token making retries safe. Unique across the
    /// table when present.
    pub idempotency_key: Option<String>,

    /// Optional free-text note from the sender.
    pub note: Option<String>,

    /// Why the transfer failed, when `status` is `Failed`.
    pub failure_reason: Option<String>,

    /// When the transfer was requested.
    pub created_at: DateTime<Utc>,

    /// When the transfer completed. Limit windows attribute a transfer
    /// to the UTC day/month containing this timestamp.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Spending limits for a tier or a single wallet.
///
/// Consumption against these limits is computed from completed transfer
/// rows inside the current UTC day/month window; it is never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitPolicyRecord {
    /// Cap on a single transfer, in cents.
    pub per_transaction_limit: i64,

    /// Cap on all outflow completed in the current UTC day.
    pub daily_spending_limit: i64,

    /// Cap on P2P outflow completed in the current UTC day.
    pub daily_p2p_limit: i64,

    /// Cap on all outflow completed in the current UTC month.
    pub monthly_spending_limit: i64,

    /// Cap on P2P outflow completed in the current UTC month.
    pub monthly_p2p_limit: i64,
}

/// Cross-ledger linking preference for one user.
///
/// Created when a user opts into linking. Read by the auto-bridge
/// monitor each evaluation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletLinkRecord {
    pub user_id: Uuid,

    /// Whether automatic rebalancing runs for this user.
    pub auto_bridge_enabled: bool,

    /// The ledger the user wants funds consolidated onto.
    pub preferred_ledger: LedgerKind,

    /// Balance on the non-preferred ledger above which a rebalance
    /// triggers, in cents.
    pub bridge_threshold: i64,

    /// Smallest rebalance worth executing, in cents.
    pub min_bridge_amount: i64,

    /// Largest single rebalance, in cents.
    pub max_bridge_amount: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_kind_round_trip() {
        assert_eq!(LedgerKind::parse("primary"), Some(LedgerKind::Primary));
        assert_eq!(LedgerKind::parse("custodial"), Some(LedgerKind::Custodial));
        assert_eq!(LedgerKind::parse("unknown"), None);
        assert_eq!(LedgerKind::Primary.as_str(), "primary");
        assert_eq!(LedgerKind::Primary.other(), LedgerKind::Custodial);
    }

    #[test]
    fn test_lock_order_is_primary_first() {
        assert!(LedgerKind::Primary < LedgerKind::Custodial);
    }

    #[test]
    fn test_transfer_status_terminal() {
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
        assert!(TransferStatus::Cancelled.is_terminal());
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(!TransferStatus::Processing.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            TransferStatus::Pending,
            TransferStatus::Processing,
            TransferStatus::Completed,
            TransferStatus::Failed,
            TransferStatus::Cancelled,
        ] {
            assert_eq!(TransferStatus::parse(s.as_str()), Some(s));
        }
    }
}
