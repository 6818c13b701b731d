//! # Limit Enforcer Service
//!
//! Evaluates a proposed transfer against the wallet's spending policy
//! before any money moves.
//!
//! ## Responsibilities
//!
//! - Resolve the applicable limit policy (wallet override, else tier)
//! - Compute rolling-window aggregates from completed transfers
//! - Report the first violated rule, most specific first
//!
//! ## Windows
//!
//! Aggregates cover the current UTC day and UTC month. A transfer
//! belongs to the window containing its completion timestamp, so the
//! counters reset exactly at UTC midnight / the first of the month.
//!
//! ## Check Order
//!
//! ```text
//! 1. per-transaction limit      (most specific error first)
//! 2. daily spending limit
//! 3. daily P2P limit            (P2P transfers only)
//! 4. monthly spending limit
//! 5. monthly P2P limit          (P2P transfers only)
//! ```
//!
//! The enforcer never mutates state; callers may use it speculatively
//! (e.g. for UI previews) without side effects.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::db::models::{TransferType, WalletRecord};
use crate::store::{LedgerStore, StoreError};
use crate::utils::format_usd;

/// Start of the current UTC day.
pub(crate) fn utc_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Start of the current UTC month.
pub(crate) fn utc_month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    let first = NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap_or(today);
    first.and_time(NaiveTime::MIN).and_utc()
}

/// One violated spending rule. Carries enough detail for a caller to
/// show which limit was hit and by how much.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LimitViolation {
    PerTransaction { limit: i64, amount: i64 },
    DailySpending { limit: i64, used: i64, amount: i64 },
    DailyP2p { limit: i64, used: i64, amount: i64 },
    MonthlySpending { limit: i64, used: i64, amount: i64 },
    MonthlyP2p { limit: i64, used: i64, amount: i64 },
}

impl LimitViolation {
    /// Stable name of the violated limit, for API error payloads.
    pub fn limit_name(&self) -> &'static str {
        match self {
            LimitViolation::PerTransaction { .. } => "per_transaction_limit",
            LimitViolation::DailySpending { .. } => "daily_spending_limit",
            LimitViolation::DailyP2p { .. } => "daily_p2p_limit",
            LimitViolation::MonthlySpending { .. } => "monthly_spending_limit",
            LimitViolation::MonthlyP2p { .. } => "monthly_p2p_limit",
        }
    }
}

impl fmt::Display for LimitViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitViolation::PerTransaction { limit, amount } => write!(
                f,
                "per-transaction limit of {} exceeded by a {} transfer",
                format_usd(*limit),
                format_usd(*amount)
            ),
            LimitViolation::DailySpending { limit, used, amount } => write!(
                f,
                "daily spending limit of {} exceeded ({} used, {} requested)",
                format_usd(*limit),
                format_usd(*used),
                format_usd(*amount)
            ),
            LimitViolation::DailyP2p { limit, used, amount } => write!(
                f,
                "daily P2P limit of {} exceeded ({} used, {} requested)",
                format_usd(*limit),
                format_usd(*used),
                format_usd(*amount)
            ),
            LimitViolation::MonthlySpending { limit, used, amount } => write!(
                f,
                "monthly spending limit of {} exceeded ({} used, {} requested)",
                format_usd(*limit),
                format_usd(*used),
                format_usd(*amount)
            ),
            LimitViolation::MonthlyP2p { limit, used, amount } => write!(
                f,
                "monthly P2P limit of {} exceeded ({} used, {} requested)",
                format_usd(*limit),
                format_usd(*used),
                format_usd(*amount)
            ),
        }
    }
}

/// Result of a limit check.
#[derive(Debug, Clone)]
pub struct LimitDecision {
    pub allowed: bool,
    pub violation: Option<LimitViolation>,
}

impl LimitDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            violation: None,
        }
    }

    fn deny(violation: LimitViolation) -> Self {
        Self {
            allowed: false,
            violation: Some(violation),
        }
    }
}

/// The limit enforcement service.
///
/// ## Usage
///
/// ```rust,ignore
/// let enforcer = LimitEnforcer::new(store);
/// let decision = enforcer.check(&wallet, 10_000, TransferType::P2p).await?;
/// if let Some(violation) = decision.violation {
///     return Err(TransferError::LimitExceeded(violation));
/// }
/// ```
pub struct LimitEnforcer {
    store: Arc<dyn LedgerStore>,
}

impl LimitEnforcer {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Check a proposed transfer of `amount` cents out of `wallet`.
    ///
    /// Aggregates are summed lazily: the per-transaction check needs no
    /// storage round trip at all, and the P2P sums only run for P2P
    /// transfers.
    pub async fn check(
        &self,
        wallet: &WalletRecord,
        amount: i64,
        transfer_type: TransferType,
    ) -> Result<LimitDecision, StoreError> {
        let policy = self
            .store
            .get_limit_policy(wallet.id, &wallet.tier)
            .await?;

        if amount > policy.per_transaction_limit {
            return Ok(LimitDecision::deny(LimitViolation::PerTransaction {
                limit: policy.per_transaction_limit,
                amount,
            }));
        }

        let now = Utc::now();
        let day_start = utc_day_start(now);
        let month_start = utc_month_start(now);

        let daily_used = self
            .store
            .completed_outflow_since(wallet.id, day_start, None)
            .await?;
        if daily_used + amount > policy.daily_spending_limit {
            return Ok(LimitDecision::deny(LimitViolation::DailySpending {
                limit: policy.daily_spending_limit,
                used: daily_used,
                amount,
            }));
        }

        if transfer_type == TransferType::P2p {
            let daily_p2p = self
                .store
                .completed_outflow_since(wallet.id, day_start, Some(TransferType::P2p))
                .await?;
            if daily_p2p + amount > policy.daily_p2p_limit {
                return Ok(LimitDecision::deny(LimitViolation::DailyP2p {
                    limit: policy.daily_p2p_limit,
                    used: daily_p2p,
                    amount,
                }));
            }
        }

        let monthly_used = self
            .store
            .completed_outflow_since(wallet.id, month_start, None)
            .await?;
        if monthly_used + amount > policy.monthly_spending_limit {
            return Ok(LimitDecision::deny(LimitViolation::MonthlySpending {
                limit: policy.monthly_spending_limit,
                used: monthly_used,
                amount,
            }));
        }

        if transfer_type == TransferType::P2p {
            let monthly_p2p = self
                .store
                .completed_outflow_since(wallet.id, month_start, Some(TransferType::P2p))
                .await?;
            if monthly_p2p + amount > policy.monthly_p2p_limit {
                return Ok(LimitDecision::deny(LimitViolation::MonthlyP2p {
                    limit: policy.monthly_p2p_limit,
                    used: monthly_p2p,
                    amount,
                }));
            }
        }

        debug!(
            "Limit check passed for wallet {}: {} {}",
            wallet.id,
            format_usd(amount),
            transfer_type.as_str()
        );

        Ok(LimitDecision::allow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{
        LedgerKind, LimitPolicyRecord, TransferRecord, TransferStatus, WalletStatus,
    };
    use crate::store::memory::MemoryLedgerStore;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn test_wallet() -> WalletRecord {
        WalletRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            currency: "USD".to_string(),
            tier: "standard".to_string(),
            status: WalletStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn policy() -> LimitPolicyRecord {
        LimitPolicyRecord {
            per_transaction_limit: 500_000,
            daily_spending_limit: 1_000_000,
            daily_p2p_limit: 250_000,
            monthly_spending_limit: 10_000_000,
            monthly_p2p_limit: 5_000_000,
        }
    }

    fn completed_transfer(
        source: Uuid,
        amount: i64,
        transfer_type: TransferType,
        completed_at: DateTime<Utc>,
    ) -> TransferRecord {
        TransferRecord {
            id: Uuid::new_v4(),
            source_wallet_id: source,
            dest_wallet_id: Uuid::new_v4(),
            source_ledger: LedgerKind::Primary,
            dest_ledger: LedgerKind::Primary,
            transfer_type,
            amount,
            fee: 0,
            status: TransferStatus::Completed,
            idempotency_key: None,
            note: None,
            failure_reason: None,
            created_at: completed_at,
            completed_at: Some(completed_at),
        }
    }

    #[test]
    fn test_window_boundaries() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 13, 45, 12).unwrap();
        assert_eq!(
            utc_day_start(now),
            Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap()
        );
        assert_eq!(
            utc_month_start(now),
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_per_transaction_limit_checked_first() {
        let store = Arc::new(MemoryLedgerStore::new());
        let wallet = test_wallet();
        store.insert_wallet(wallet.clone()).await;
        store.set_tier_policy("standard", policy()).await;

        let enforcer = LimitEnforcer::new(store);
        // 10_000_00 cents exceeds both the per-transaction and daily
        // P2P limits; the per-transaction violation must win.
        let decision = enforcer
            .check(&wallet, 1_000_000, TransferType::P2p)
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert_eq!(
            decision.violation.unwrap().limit_name(),
            "per_transaction_limit"
        );
    }

    #[tokio::test]
    async fn test_daily_window_aggregation() {
        let store = Arc::new(MemoryLedgerStore::new());
        let wallet = test_wallet();
        store.insert_wallet(wallet.clone()).await;
        store.set_tier_policy("standard", policy()).await;

        // 9,000.00 already spent today (bridge, so P2P caps don't apply).
        store
            .insert_transfer(&completed_transfer(
                wallet.id,
                900_000,
                TransferType::Bridge,
                Utc::now(),
            ))
            .await
            .unwrap();

        let enforcer = LimitEnforcer::new(store);

        // 500.00 more still fits under the 10,000.00 daily cap.
        let ok = enforcer
            .check(&wallet, 50_000, TransferType::Bridge)
            .await
            .unwrap();
        assert!(ok.allowed);

        // 2,000.00 more does not.
        let denied = enforcer
            .check(&wallet, 200_000, TransferType::Bridge)
            .await
            .unwrap();
        assert_eq!(
            denied.violation.unwrap().limit_name(),
            "daily_spending_limit"
        );
    }

    #[tokio::test]
    async fn test_p2p_specific_limit() {
        let store = Arc::new(MemoryLedgerStore::new());
        let wallet = test_wallet();
        store.insert_wallet(wallet.clone()).await;
        store.set_tier_policy("standard", policy()).await;

        // 2,000.00 of P2P already completed today.
        store
            .insert_transfer(&completed_transfer(
                wallet.id,
                200_000,
                TransferType::P2p,
                Utc::now(),
            ))
            .await
            .unwrap();

        let enforcer = LimitEnforcer::new(store);

        // Another 1,000.00 P2P blows the 2,500.00 daily P2P cap...
        let denied = enforcer
            .check(&wallet, 100_000, TransferType::P2p)
            .await
            .unwrap();
        assert_eq!(denied.violation.unwrap().limit_name(), "daily_p2p_limit");

        // ...but the same amount as a bridge is fine.
        let ok = enforcer
            .check(&wallet, 100_000, TransferType::Bridge)
            .await
            .unwrap();
        assert!(ok.allowed);
    }

    #[tokio::test]
    async fn test_yesterday_does_not_count_toward_today() {
        let store = Arc::new(MemoryLedgerStore::new());
        let wallet = test_wallet();
        store.insert_wallet(wallet.clone()).await;
        store.set_tier_policy("standard", policy()).await;

        let yesterday = Utc::now() - Duration::days(1);
        store
            .insert_transfer(&completed_transfer(
                wallet.id,
                900_000,
                TransferType::Bridge,
                yesterday,
            ))
            .await
            .unwrap();

        let enforcer = LimitEnforcer::new(store);
        let decision = enforcer
            .check(&wallet, 500_000, TransferType::Bridge)
            .await
            .unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_wallet_override_beats_tier_policy() {
        let store = Arc::new(MemoryLedgerStore::new());
        let wallet = test_wallet();
        store.insert_wallet(wallet.clone()).await;
        store.set_tier_policy("standard", policy()).await;
        store
            .set_wallet_policy(
                wallet.id,
                LimitPolicyRecord {
                    per_transaction_limit: 1_000,
                    ..policy()
                },
            )
            .await;

        let enforcer = LimitEnforcer::new(store);
        let denied = enforcer
            .check(&wallet, 2_000, TransferType::P2p)
            .await
            .unwrap();
        assert_eq!(
            denied.violation.unwrap().limit_name(),
            "per_transaction_limit"
        );
    }
}
