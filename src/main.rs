//! # Wallet Ledger Backend Service
//!
//! This is the main entry point for the backend service that runs the
//! dual-ledger transfer engine. It provides:
//!
//! - REST API for transfers, bridge estimates and balances
//! - Background auto-bridge monitor for threshold rebalancing
//! - Spending-limit enforcement per wallet tier
//! - Append-only transfer audit trail
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        BACKEND SERVICE                           │
//! │                                                                  │
//! │  ┌─────────────┐                 ┌─────────────────────────┐    │
//! │  │  REST API   │                 │   Background Services   │    │
//! │  │  (Actix)    │                 │  • Auto-Bridge Monitor  │    │
//! │  │             │                 │  • Notification Relay   │    │
//! │  │  /transfers │                 │                         │    │
//! │  │  /wallets   │                 │                         │    │
//! │  │  /bridge    │                 │                         │    │
//! │  └─────────────┘                 └─────────────────────────┘    │
//! │         │                                     │                  │
//! │         └──────────────────┬──────────────────┘                  │
//! │                            │                                     │
//! │  ┌─────────────────────────┴─────────────────────────────────┐  │
//! │  │                    SERVICE LAYER                           │  │
//! │  │  ┌──────────────────┐ ┌─────────────┐ ┌───────────────┐   │  │
//! │  │  │TransferOrchestr. │ │LimitEnforcer│ │BridgeEstimator│   │  │
//! │  │  └──────────────────┘ └─────────────┘ └───────────────┘   │  │
//! │  └─────────────────────────┬─────────────────────────────────┘  │
//! │                            │                                     │
//! │                 ┌──────────┴──────────┐                          │
//! │                 │    Ledger Store     │                          │
//! │                 │ (PostgreSQL/memory) │                          │
//! │                 └─────────────────────┘                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! 1. Set up PostgreSQL and create the database
//! 2. Export `DATABASE_URL` (or run with `STORE_BACKEND=memory`)
//! 3. Start the server: `cargo run`

use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod api;
mod config;
mod db;
mod models;
mod services;
mod store;
mod utils;

use config::{AppConfig, StoreBackend};
use db::Database;
use services::{
    events, AutoBridgeMonitor, BridgeEstimator, LockManager, TransferOrchestrator,
};
use store::memory::MemoryLedgerStore;
use store::postgres::PostgresLedgerStore;
use store::LedgerStore;
use utils::format_usd;

/// Application state shared across all handlers.
///
/// `Arc` lets every worker thread and background task share the same
/// service instances safely.
pub struct AppState {
    /// Ledger storage, behind the store trait so the backend stays
    /// swappable.
    pub store: Arc<dyn LedgerStore>,

    /// The transfer state machine.
    pub orchestrator: Arc<TransferOrchestrator>,

    /// Side-effect-free bridge previews.
    pub estimator: BridgeEstimator,

    /// Threshold rebalancing, also reachable on demand via the API.
    pub monitor: Arc<AutoBridgeMonitor>,

    /// Application configuration.
    pub config: AppConfig,
}

/// Main entry point for the backend service.
///
/// This function:
/// 1. Initializes logging
/// 2. Loads configuration from environment
/// 3. Connects the ledger store (PostgreSQL or memory)
/// 4. Wires the service layer and event channel
/// 5. Starts background services
/// 6. Launches the HTTP server
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // =========================================
    // STEP 1: Initialize Logging
    // =========================================
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("🚀 Starting Wallet Ledger Backend Service");

    // =========================================
    // STEP 2: Load Configuration
    // =========================================
    dotenvy::dotenv().ok(); // It's okay if .env doesn't exist

    let config = AppConfig::from_env().expect("Failed to load configuration");

    info!("📋 Configuration loaded");
    info!("   Store backend: {:?}", config.store_backend);
    info!(
        "   Auto-bridge sweep interval: {}s",
        config.auto_bridge_interval
    );

    // =========================================
    // STEP 3: Connect the Ledger Store
    // =========================================
    let ledger_store: Arc<dyn LedgerStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .expect("DATABASE_URL is required for the postgres backend");

            let database = Database::connect(database_url)
                .await
                .expect("Failed to connect to database");

            info!("🗄️  Database connected");

            database
                .run_migrations()
                .await
                .expect("Failed to run migrations");

            info!("📦 Database migrations complete");

            Arc::new(PostgresLedgerStore::new(
                database,
                config.transaction_timeout_ms,
            ))
        }
        StoreBackend::Memory => {
            warn!("Running on the in-memory store; state dies with the process");
            Arc::new(MemoryLedgerStore::with_default_policies().await)
        }
    };

    // =========================================
    // STEP 4: Wire Services
    // =========================================
    let (event_sender, monitor_events) = events::channel();

    let orchestrator = Arc::new(TransferOrchestrator::new(
        ledger_store.clone(),
        Arc::new(LockManager::new()),
        event_sender.clone(),
        Duration::from_millis(config.transaction_timeout_ms),
    ));

    let estimator = BridgeEstimator::new(ledger_store.clone());

    let monitor = Arc::new(AutoBridgeMonitor::new(
        ledger_store.clone(),
        orchestrator.clone(),
        Duration::from_secs(config.auto_bridge_interval),
    ));

    info!("🔧 Services initialized");

    // =========================================
    // STEP 5: Start Background Services
    // =========================================
    // Auto-bridge monitor: interval sweeps plus event-driven re-checks.
    tokio::spawn(monitor.clone().start(monitor_events));
    info!("👁️  Auto-bridge monitor started");

    // Notification relay: hands completed transfers to the external
    // notification collaborator (logged here; delivery is not ours).
    let mut notification_events = event_sender.subscribe();
    tokio::spawn(async move {
        loop {
            match notification_events.recv().await {
                Ok(event) => {
                    info!(
                        "📣 Notify: transfer {} completed ({} {})",
                        event.transfer_id,
                        format_usd(event.amount),
                        event.transfer_type.as_str()
                    );
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Notification relay lagged {} events", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
    info!("📣 Notification relay started");

    // =========================================
    // STEP 6: Create Application State
    // =========================================
    let app_state = Arc::new(AppState {
        store: ledger_store,
        orchestrator,
        estimator,
        monitor,
        config: config.clone(),
    });

    // =========================================
    // STEP 7: Start HTTP Server
    // =========================================
    let server_host = config.server_host.clone();
    let server_port = config.server_port;

    info!("🌐 Starting HTTP server on {}:{}", server_host, server_port);

    HttpServer::new(move || {
        App::new()
            // Attach shared application state
            .app_data(web::Data::new(app_state.clone()))
            // Browser clients (dashboards) call this API directly
            .wrap(Cors::permissive())
            // Add logging middleware
            .wrap(middleware::Logger::default())
            // Configure API routes
            .configure(api::configure_routes)
    })
    .bind(format!("{}:{}", server_host, server_port))?
    .run()
    .await
}
