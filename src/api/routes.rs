//! # API Route Configuration
//!
//! This module sets up all the HTTP routes for the API.

use actix_web::web;

use super::handlers;

/// Configure all API routes.
///
/// This function is called from main.rs to set up
/// all the endpoint routes.
///
/// ## Route Structure
///
/// ```text
/// /
/// ├── /health                          GET  - Health check
/// ├── /transfers                       POST - Initiate transfer
/// │   └── /{id}                        GET  - Transfer status
/// │       └── /cancel                  POST - Cancel pending transfer
/// ├── /wallets/{id}
/// │   ├── /balance                     GET  - Combined balances
/// │   ├── /transfers                   GET  - Transfer history
/// │   └── /auto-bridge/check           POST - Evaluate auto-bridge now
/// └── /bridge
///     └── /estimate                    GET  - Fee/time preview
/// ```
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Root endpoint - API information
        .route("/", web::get().to(handlers::api_info))
        // Health check endpoint
        .route("/health", web::get().to(handlers::health_check))
        // Transfer endpoints
        .service(
            web::scope("/transfers")
                // Initiate a P2P or bridge transfer
                .route("", web::post().to(handlers::initiate_transfer))
                // Transfer status
                .route("/{transfer_id}", web::get().to(handlers::get_transfer))
                // Cancel a pending transfer
                .route(
                    "/{transfer_id}/cancel",
                    web::post().to(handlers::cancel_transfer),
                ),
        )
        // Wallet endpoints
        .service(
            web::scope("/wallets")
                // Combined per-ledger balances
                .route("/{wallet_id}/balance", web::get().to(handlers::get_balance))
                // Transfer history, newest first
                .route(
                    "/{wallet_id}/transfers",
                    web::get().to(handlers::get_history),
                )
                // On-demand auto-bridge evaluation
                .route(
                    "/{wallet_id}/auto-bridge/check",
                    web::post().to(handlers::check_auto_bridge),
                ),
        )
        // Bridge endpoints
        .service(
            web::scope("/bridge")
                // Fee / settlement-time preview
                .route("/estimate", web::get().to(handlers::estimate_bridge)),
        );
}
