//! Database layer for regsync

mod connection;
mod migrations;
mod registry_repository;
mod run_repository;

pub use connection::{Database, StoreConfig};
pub use registry_repository::{RegistryStore, SqliteRegistryRepository};
pub use run_repository::{RunRepository, SqliteRunRepository};
