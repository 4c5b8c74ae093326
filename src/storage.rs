//! History storage subsystem
//!
//! Reconciles parsed snapshots against previously persisted history and
//! answers the read-only queries used by browse mode.
//!
//! Components:
//! - `storage_trait`: the `HistoryStore` trait both backends implement.
//! - `types`: identity and fact records owned by the store.
//! - `database_storage`: SQLite backend built on SeaORM.
//! - `db_entities`: SeaORM entity models for the database backend.
//! - `file_storage`: flat-file backend, one CSV file per connection.

pub mod database_storage;
pub mod db_entities;
pub mod file_storage;
pub mod storage_trait;
pub mod types;

use log::info;

use crate::configuration::config::{StorageBackend, StorageSettings};
use crate::error_handling::types::StorageError;

pub use database_storage::DatabaseStore;
pub use file_storage::FlatFileStore;
pub use storage_trait::HistoryStore;

/// Opens the backend selected in `settings`.
///
/// Returns `Ok(None)` when history is disabled.
pub fn open_store(settings: &StorageSettings) -> Result<Option<Box<dyn HistoryStore>>, StorageError> {
    match settings.backend {
        StorageBackend::Sqlite => {
            info!("Using SQLite history at {}", settings.database_path.display());
            Ok(Some(Box::new(DatabaseStore::open(&settings.database_path)?)))
        }
        StorageBackend::FlatFile => {
            info!("Using flat-file history under {}", settings.stats_dir.display());
            Ok(Some(Box::new(FlatFileStore::open(&settings.stats_dir)?)))
        }
        StorageBackend::Disabled => {
            info!("History storage disabled");
            Ok(None)
        }
    }
}
