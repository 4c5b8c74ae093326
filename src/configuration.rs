pub mod config;

pub use config::{Config, Mode, StorageBackend, StorageSettings};
