//! Data model produced by the status parser.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::timestamp::LocaleTimestamp;

/// One connected client as seen in a single snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Unique within a snapshot, matches `[A-Za-z0-9_-]+`
    pub common_name: String,
    /// Dotted-quad address the client connected from (port dropped)
    pub real_address: String,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub connected_since: LocaleTimestamp,
    /// Address handed out by the concentrator's pool, if an assignment line was seen
    pub virtual_address: Option<String>,
    /// Paired with `virtual_address`
    pub virtual_assigned_at: Option<LocaleTimestamp>,
}

impl ClientRecord {
    pub fn bytes_total(&self) -> u64 {
        self.bytes_received.saturating_add(self.bytes_sent)
    }
}

/// Full parse result of one status file, clients kept in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Declared update time, verbatim from the second line of the file
    pub snapshot_timestamp: String,
    clients: Vec<ClientRecord>,
    index: HashMap<String, usize>,
}

impl StatusSnapshot {
    pub fn new(snapshot_timestamp: impl Into<String>) -> Self {
        Self {
            snapshot_timestamp: snapshot_timestamp.into(),
            ..Default::default()
        }
    }

    /// Adds `record` unless a client with the same common name is already
    /// present. Returns `true` when the record was inserted.
    pub fn insert_first(&mut self, record: ClientRecord) -> bool {
        if self.index.contains_key(&record.common_name) {
            return false;
        }
        self.index
            .insert(record.common_name.clone(), self.clients.len());
        self.clients.push(record);
        true
    }

    pub fn get(&self, common_name: &str) -> Option<&ClientRecord> {
        self.index.get(common_name).map(|&i| &self.clients[i])
    }

    pub fn get_mut(&mut self, common_name: &str) -> Option<&mut ClientRecord> {
        match self.index.get(common_name) {
            Some(&i) => self.clients.get_mut(i),
            None => None,
        }
    }

    pub fn clients(&self) -> &[ClientRecord] {
        &self.clients
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Snapshot-wide totals, accumulated over first-occurrence stats lines only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalAggregate {
    pub snapshot_timestamp: String,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub client_count: u64,
}

impl GlobalAggregate {
    pub fn bytes_total(&self) -> u64 {
        self.bytes_received.saturating_add(self.bytes_sent)
    }
}
