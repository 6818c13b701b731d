//! # API Models
//!
//! This module defines the request and response structures for the REST
//! API. These are separate from database models to allow API-specific
//! formatting.
//!
//! ## Organization
//!
//! - `requests.rs` - Incoming request bodies
//! - `responses.rs` - Outgoing response bodies
//! - `validation.rs` - Declarative per-operation validation rule tables
//!
//! ## Serialization
//!
//! All models use Serde for JSON serialization/deserialization.
//! Field names are converted to camelCase for JavaScript clients.
//! Monetary amounts arrive as decimal strings and leave as integer
//! cents plus a formatted string.

pub mod requests;
pub mod responses;
pub mod validation;

pub use requests::*;
pub use responses::*;
