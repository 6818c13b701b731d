//! # Wallet Lock Manager
//!
//! Serializes balance mutations per (ledger, wallet) pair. Two
//! concurrent transfers out of the same account must never both pass a
//! sufficient-funds check against a stale balance, so the orchestrator
//! takes these locks before entering the atomic scope.
//!
//! ## Lock Ordering
//!
//! Keys are always acquired in sorted order: primary ledger before
//! custodial, then by wallet ID. Two simultaneous opposite-direction
//! bridge requests therefore take their locks in the same order and
//! cannot deadlock.
//!
//! ## Timeouts
//!
//! Acquisition is bounded by a deadline; a transfer that cannot get its
//! locks in time fails instead of queueing forever.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{timeout, Instant};
use uuid::Uuid;

use crate::db::models::LedgerKind;

/// A lockable account: one (ledger, wallet) pair.
///
/// Ledger comes first so the derived tuple ordering is the global lock
/// order.
pub type LockKey = (LedgerKind, Uuid);

/// Acquisition ran past its deadline.
#[derive(Debug, Error)]
#[error("timed out acquiring wallet locks")]
pub struct LockTimeout;

/// Registry of per-account async mutexes.
///
/// Entries are created lazily on first use and kept for the process
/// lifetime; the map only ever grows by one small Arc per account.
#[derive(Default)]
pub struct LockManager {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire every key, in global order, within `deadline`.
    ///
    /// The returned guard set holds all locks until dropped. Duplicate
    /// keys are collapsed so a self-referencing request cannot deadlock
    /// on itself.
    pub async fn acquire(
        &self,
        keys: &[LockKey],
        deadline: Duration,
    ) -> Result<LockSet, LockTimeout> {
        let mut ordered: Vec<LockKey> = keys.to_vec();
        ordered.sort();
        ordered.dedup();

        let expires = Instant::now() + deadline;
        let mut guards = Vec::with_capacity(ordered.len());

        for key in ordered {
            // Clone the Arc out before awaiting so the map shard is not
            // held across the suspension point.
            let lock = {
                let entry = self.locks.entry(key).or_default();
                entry.value().clone()
            };

            let remaining = expires.saturating_duration_since(Instant::now());
            let guard = timeout(remaining, lock.lock_owned())
                .await
                .map_err(|_| LockTimeout)?;
            guards.push(guard);
        }

        Ok(LockSet { _guards: guards })
    }
}

/// Holds a set of account locks until dropped.
pub struct LockSet {
    _guards: Vec<OwnedMutexGuard<()>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let manager = LockManager::new();
        let key = (LedgerKind::Primary, Uuid::new_v4());

        let set = manager
            .acquire(&[key], Duration::from_millis(100))
            .await
            .unwrap();
        drop(set);

        // Re-acquisition after release succeeds.
        manager
            .acquire(&[key], Duration::from_millis(100))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_contended_lock_times_out() {
        let manager = LockManager::new();
        let key = (LedgerKind::Primary, Uuid::new_v4());

        let _held = manager
            .acquire(&[key], Duration::from_millis(100))
            .await
            .unwrap();

        let result = manager.acquire(&[key], Duration::from_millis(50)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_keys_do_not_self_deadlock() {
        let manager = LockManager::new();
        let key = (LedgerKind::Primary, Uuid::new_v4());

        manager
            .acquire(&[key, key], Duration::from_millis(100))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_opposite_direction_orderings_converge() {
        let manager = Arc::new(LockManager::new());
        let wallet = Uuid::new_v4();
        let forward = [(LedgerKind::Primary, wallet), (LedgerKind::Custodial, wallet)];
        let reverse = [(LedgerKind::Custodial, wallet), (LedgerKind::Primary, wallet)];

        // Both orderings sort to the same sequence, so interleaved
        // acquisition completes instead of deadlocking.
        let m1 = manager.clone();
        let m2 = manager.clone();
        let a = tokio::spawn(async move {
            m1.acquire(&forward, Duration::from_secs(1)).await.is_ok()
        });
        let b = tokio::spawn(async move {
            m2.acquire(&reverse, Duration::from_secs(1)).await.is_ok()
        });

        assert!(a.await.unwrap());
        assert!(b.await.unwrap());
    }
}
