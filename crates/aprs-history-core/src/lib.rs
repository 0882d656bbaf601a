//! aprs-history-core library.
//!
//! Validation, deduplication and retention of decoded APRS position
//! reports, persisted to a SQLite history table.
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` for startup and CLI plumbing; typed
//!   [`store::StoreError`] on the per-report path, which never aborts.
//! - **Logging**: `tracing` macros with a `code` field carrying an
//!   [`error::ErrorCode`] on every failure event.

pub mod clock;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod retention;
pub mod store;
pub mod validate;
