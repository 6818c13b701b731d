//! # Auto-Bridge Monitor Service
//!
//! Watches linked wallets and rebalances value between the two ledgers
//! when a user's threshold is crossed, so funds end up on the ledger
//! they prefer without per-instance action.
//!
//! ## Monitoring Flow
//!
//! ```text
//! AutoBridgeMonitor (background task)
//!              │
//!              ├── Every N seconds: sweep all linked wallets
//!              │
//!              └── On every completed transfer: re-check the
//!                  affected wallets
//! ```
//!
//! ## Evaluation
//!
//! For one wallet:
//! 1. Load the user's link preference; disabled → informational no-op
//! 2. Read the balance on the non-preferred ledger
//! 3. Above `bridge_threshold`? Rebalance `balance - threshold/2`
//!    (half the threshold stays behind as working balance), capped at
//!    `max_bridge_amount`
//! 4. Execute through the transfer orchestrator when the amount
//!    reaches `min_bridge_amount`
//!
//! Only the non-preferred → preferred direction is ever evaluated;
//! excess sitting on the preferred ledger stays put.
//!
//! ## Exclusivity
//!
//! Evaluation is single-flight per wallet: a run that finds the wallet
//! already being evaluated is skipped, not queued. Two simultaneous
//! rebalances could both pass the threshold check and race past it.
//!
//! Failures are logged and picked up again on the next cycle; there is
//! no interactive caller to surface them to.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::LedgerStore;
use crate::utils::format_usd;

use super::bridge_estimator::BridgeDirection;
use super::events::EventReceiver;
use super::transfer_orchestrator::{
    TransferError, TransferKind, TransferOrchestrator, TransferRequest,
};

/// What one evaluation concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoBridgeOutcome {
    /// No link preference, or auto-bridge switched off. Informational,
    /// not an error.
    Disabled,

    /// Another evaluation of this wallet is in flight; this one was
    /// skipped.
    AlreadyRunning,

    /// The non-preferred balance is under the threshold, or the excess
    /// is below the minimum worth bridging.
    BelowThreshold,

    /// A rebalancing bridge transfer was executed.
    Triggered {
        transfer_id: Uuid,
        amount: i64,
        direction: BridgeDirection,
    },
}

/// The auto-bridge monitor.
///
/// ## Usage
///
/// ```rust,ignore
/// let monitor = Arc::new(AutoBridgeMonitor::new(store, orchestrator, interval));
///
/// // Background loop (ticks + transfer events)
/// tokio::spawn(monitor.clone().start(events.subscribe()));
///
/// // Or evaluate one wallet on demand
/// let outcome = monitor.check_wallet(wallet_id).await?;
/// ```
pub struct AutoBridgeMonitor {
    store: Arc<dyn LedgerStore>,

    /// Rebalances execute through the ordinary transfer path: same
    /// limits, same locks, same audit trail.
    orchestrator: Arc<TransferOrchestrator>,

    /// Wallets currently being evaluated (single-flight set).
    in_flight: DashMap<Uuid, ()>,

    check_interval: Duration,
}

impl AutoBridgeMonitor {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        orchestrator: Arc<TransferOrchestrator>,
        check_interval: Duration,
    ) -> Self {
        Self {
            store,
            orchestrator,
            in_flight: DashMap::new(),
            check_interval,
        }
    }

    /// Run the monitor loop forever.
    ///
    /// Wakes on the sweep interval and on every completed transfer.
    /// Spawn this as a background task.
    pub async fn start(self: Arc<Self>, mut events: EventReceiver) {
        info!(
            "Starting auto-bridge monitor (sweep interval: {}s)",
            self.check_interval.as_secs()
        );

        let mut ticker = interval(self.check_interval);
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }

                event = events.recv(), if events_open => match event {
                    Ok(event) => {
                        for wallet_id in event.wallets() {
                            match self.check_wallet(wallet_id).await {
                                Ok(outcome) => debug!(
                                    "Post-transfer auto-bridge check for {}: {:?}",
                                    wallet_id, outcome
                                ),
                                Err(e) => warn!(
                                    "Auto-bridge check failed for {}: {}. Will retry next sweep.",
                                    wallet_id, e
                                ),
                            }
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        // Dropped events are only hints; the next sweep
                        // re-reads every linked wallet anyway.
                        warn!("Auto-bridge monitor lagged {} transfer events", missed);
                    }
                    Err(RecvError::Closed) => {
                        warn!("Transfer event channel closed; sweeps continue on the interval");
                        events_open = false;
                    }
                },
            }
        }
    }

    /// Evaluate every linked wallet once.
    pub async fn sweep(&self) {
        let wallets = match self.store.linked_wallet_ids().await {
            Ok(wallets) => wallets,
            Err(e) => {
                warn!("Auto-bridge sweep could not list linked wallets: {}", e);
                return;
            }
        };

        debug!("Auto-bridge sweep over {} linked wallets", wallets.len());

        let mut triggered = 0;
        for wallet_id in wallets {
            match self.check_wallet(wallet_id).await {
                Ok(AutoBridgeOutcome::Triggered { .. }) => triggered += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        "Auto-bridge evaluation failed for {}: {}. Will retry next sweep.",
                        wallet_id, e
                    );
                }
            }
        }

        if triggered > 0 {
            info!("Auto-bridge sweep triggered {} rebalance(s)", triggered);
        }
    }

    /// Evaluate one wallet and rebalance if its threshold is crossed.
    pub async fn check_wallet(
        &self,
        wallet_id: Uuid,
    ) -> Result<AutoBridgeOutcome, TransferError> {
        // Single-flight: overlapping evaluations of the same wallet
        // could both pass the threshold check.
        if self.in_flight.insert(wallet_id, ()).is_some() {
            debug!("Auto-bridge already evaluating wallet {}", wallet_id);
            return Ok(AutoBridgeOutcome::AlreadyRunning);
        }
        let _guard = InFlightGuard {
            set: &self.in_flight,
            wallet_id,
        };

        let wallet = self
            .store
            .get_wallet(wallet_id)
            .await?
            .ok_or(TransferError::WalletNotFound(wallet_id))?;

        let link = match self.store.get_wallet_link(wallet.user_id).await? {
            Some(link) if link.auto_bridge_enabled => link,
            _ => return Ok(AutoBridgeOutcome::Disabled),
        };

        // Excess accumulates on the ledger the user does NOT prefer.
        let source_ledger = link.preferred_ledger.other();
        let source_balance = self
            .store
            .get_balance(wallet_id, source_ledger)
            .await?
            .unwrap_or(0);

        if source_balance <= link.bridge_threshold {
            return Ok(AutoBridgeOutcome::BelowThreshold);
        }

        // Leave half the threshold behind as working balance.
        let excess = source_balance - link.bridge_threshold / 2;
        let amount = excess.min(link.max_bridge_amount);
        if amount < link.min_bridge_amount {
            debug!(
                "Auto-bridge excess {} for wallet {} is below the {} minimum",
                format_usd(excess),
                wallet_id,
                format_usd(link.min_bridge_amount)
            );
            return Ok(AutoBridgeOutcome::BelowThreshold);
        }

        let direction = BridgeDirection::toward(link.preferred_ledger);
        info!(
            "Auto-bridge triggered for wallet {}: {} {:?} (balance {}, threshold {})",
            wallet_id,
            format_usd(amount),
            direction,
            format_usd(source_balance),
            format_usd(link.bridge_threshold)
        );

        let record = self
            .orchestrator
            .initiate_transfer(TransferRequest {
                source_wallet_id: wallet_id,
                kind: TransferKind::Bridge { direction },
                amount,
                idempotency_key: None,
                note: Some("Automatic rebalance".to_string()),
            })
            .await?;

        Ok(AutoBridgeOutcome::Triggered {
            transfer_id: record.id,
            amount,
            direction,
        })
    }
}

/// Removes the wallet from the single-flight set on every exit path.
struct InFlightGuard<'a> {
    set: &'a DashMap<Uuid, ()>,
    wallet_id: Uuid,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.wallet_id);
    }
}
