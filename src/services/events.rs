//! # Transfer Events
//!
//! Completed transfers are announced on a broadcast channel instead of
//! through in-process callbacks, so the orchestrator holds no
//! references to subscriber state. Current subscribers:
//!
//! - The auto-bridge monitor, which re-evaluates the affected wallets
//! - The notification relay in `main`, which hands completions to the
//!   external notification collaborator
//!
//! Subscribers that fall behind see a `Lagged` error from the channel
//! and miss events; that is acceptable for both consumers, which treat
//! events as hints and re-read storage for truth.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::models::{LedgerKind, TransferType};

/// Buffered events per subscriber before lagging kicks in.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Announcement of one completed transfer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEvent {
    pub transfer_id: Uuid,
    pub source_wallet_id: Uuid,
    pub dest_wallet_id: Uuid,
    pub source_ledger: LedgerKind,
    pub dest_ledger: LedgerKind,
    pub transfer_type: TransferType,

    /// Amount credited, in cents.
    pub amount: i64,

    pub completed_at: DateTime<Utc>,
}

impl TransferEvent {
    /// The wallets whose balances this event changed, deduplicated.
    pub fn wallets(&self) -> Vec<Uuid> {
        if self.source_wallet_id == self.dest_wallet_id {
            vec![self.source_wallet_id]
        } else {
            vec![self.source_wallet_id, self.dest_wallet_id]
        }
    }
}

pub type EventSender = broadcast::Sender<TransferEvent>;
pub type EventReceiver = broadcast::Receiver<TransferEvent>;

/// Create the transfer event channel.
pub fn channel() -> (EventSender, EventReceiver) {
    broadcast::channel(EVENT_CHANNEL_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_event_lists_wallet_once() {
        let wallet = Uuid::new_v4();
        let event = TransferEvent {
            transfer_id: Uuid::new_v4(),
            source_wallet_id: wallet,
            dest_wallet_id: wallet,
            source_ledger: LedgerKind::Primary,
            dest_ledger: LedgerKind::Custodial,
            transfer_type: TransferType::Bridge,
            amount: 100,
            completed_at: Utc::now(),
        };
        assert_eq!(event.wallets(), vec![wallet]);
    }
}
