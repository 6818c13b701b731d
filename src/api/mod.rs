//! # REST API Module
//!
//! This module defines all HTTP endpoints for the wallet ledger API.
//!
//! ## Endpoint Overview
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/transfers` | Initiate a P2P or bridge transfer |
//! | GET | `/transfers/:id` | Transfer status |
//! | POST | `/transfers/:id/cancel` | Cancel a pending transfer |
//! | GET | `/wallets/:id/balance` | Combined per-ledger balances |
//! | GET | `/wallets/:id/transfers` | Transfer history |
//! | POST | `/wallets/:id/auto-bridge/check` | On-demand auto-bridge evaluation |
//! | GET | `/bridge/estimate` | Bridge fee/time preview |
//! | GET | `/health` | Health check |
//!
//! ## Request/Response Format
//!
//! All requests and responses use JSON:
//!
//! ```json
//! // Success response
//! {
//!     "success": true,
//!     "data": { ... }
//! }
//!
//! // Error response
//! {
//!     "success": false,
//!     "error": {
//!         "code": "ERROR_CODE",
//!         "message": "Human readable message"
//!     }
//! }
//! ```

pub mod handlers;
pub mod routes;

pub use routes::configure_routes;
