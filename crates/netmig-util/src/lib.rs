//! Shared utilities for netmig.
//!
//! This crate provides common utilities used across the netmig workspace:
//! - Logging setup with tracing
//! - ULID-based identifier generation
//! - Data, config and log directory resolution
//! - Redaction wrapper for credentials
//! - RAII-based timing for device operations

pub mod id;
pub mod log;
pub mod path;
pub mod secret;
pub mod timing;

pub use id::Identifier;
pub use secret::Secret;
pub use timing::TimingGuard;
