//! # Services Module
//!
//! This module contains the core business logic services for the
//! wallet ledger backend. Each service handles a specific domain.
//!
//! ## Services Overview
//!
//! | Service | Responsibility |
//! |---------|---------------|
//! | `TransferOrchestrator` | Transfer state machine, P2P and bridge execution |
//! | `LimitEnforcer` | Spending policy evaluation over rolling windows |
//! | `BridgeEstimator` | Side-effect-free bridge previews |
//! | `AutoBridgeMonitor` | Threshold-triggered automatic rebalancing |
//! | `LockManager` | Per-account mutual exclusion |
//!
//! ## Service Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        SERVICES LAYER                            │
//! │                                                                  │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │                  TransferOrchestrator                     │   │
//! │  │  • initiate_transfer()  • cancel_transfer()               │   │
//! │  │  • get_transfer()       • transfer_history()              │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! │            │                 │                  │                │
//! │            ▼                 ▼                  ▼                │
//! │  ┌──────────────┐   ┌──────────────┐   ┌───────────────┐        │
//! │  │LimitEnforcer │   │ LockManager  │   │ Event channel │        │
//! │  └──────────────┘   └──────────────┘   └───────┬───────┘        │
//! │                                                │                │
//! │  ┌──────────────┐   ┌─────────────────────────┴────────┐        │
//! │  │BridgeEstimat.│   │        AutoBridgeMonitor         │        │
//! │  └──────────────┘   └──────────────────────────────────┘        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod auto_bridge;
pub mod bridge_estimator;
pub mod events;
pub mod limit_enforcer;
pub mod lock_manager;
pub mod transfer_orchestrator;

pub use auto_bridge::{AutoBridgeMonitor, AutoBridgeOutcome};
pub use bridge_estimator::{BridgeDirection, BridgeEstimate, BridgeEstimator};
pub use events::{EventReceiver, EventSender, TransferEvent};
pub use limit_enforcer::{LimitDecision, LimitEnforcer, LimitViolation};
pub use lock_manager::LockManager;
pub use transfer_orchestrator::{
    TransferError, TransferKind, TransferOrchestrator, TransferRequest,
};
