//! History Store Trait
//!
//! This module defines the `HistoryStore` trait, the contract shared by the
//! relational and flat-file backends.
//!
//! Implementors of this trait are responsible for:
//! - Reconciling a snapshot with find-or-create semantics on identities
//! - Keeping the latest global aggregate
//! - Answering the browse queries (users, facts per user)
//!
//! All methods return a `Result` to handle potential storage errors.

use crate::error_handling::types::StorageError;
use crate::status_parser::types::{GlobalAggregate, StatusSnapshot};
use crate::storage::types::{StatsFact, UserIdentity};

/// The `HistoryStore` trait defines the interface for snapshot history backends.
///
/// Reconciliation is idempotent: feeding the same snapshot twice leaves exactly
/// one fact per (user, virtual assignment, real connection) triple.
pub trait HistoryStore: Send + Sync {
    /// Reconciles `snapshot` with the stored history and returns the durable
    /// facts for every client that carries a virtual address.
    ///
    /// Clients without a virtual address are skipped.
    fn reconcile(&self, snapshot: &StatusSnapshot) -> Result<Vec<StatsFact>, StorageError>;

    /// Replaces the stored global aggregate.
    fn save_global(&self, aggregate: &GlobalAggregate) -> Result<(), StorageError>;

    /// Latest stored global aggregate, if any run has written one.
    fn load_global(&self) -> Result<Option<GlobalAggregate>, StorageError>;

    /// Every known user.
    fn list_users(&self) -> Result<Vec<UserIdentity>, StorageError>;

    /// Stored facts for `user`, ordered by connection start ascending.
    fn list_facts(&self, user: &UserIdentity) -> Result<Vec<StatsFact>, StorageError>;
}
