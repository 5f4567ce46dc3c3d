//! regsync-core - Core library for regsync
//!
//! This crate contains the device registry model, the SQLite-backed store, the
//! three-way reconciliation engine, and the report and notification layers
//! used by the `regsync` batch job.

pub mod db;
pub mod decode;
pub mod error;
pub mod models;
pub mod notify;
pub mod reconcile;
pub mod report;
pub mod services;
pub mod util;

pub use error::{Error, Result};
pub use models::{Device, IncomingBatch, IncomingEntry, SyncConflict, SyncRun};
