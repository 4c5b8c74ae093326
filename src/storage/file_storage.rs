//! Flat-file history backend.
//!
//! ```text
//! <root>/
//!  -- global            latest snapshot totals, rewritten every run
//!  -- <common name>/
//!  -- -- <epoch>        one CSV file per connection, named by its start epoch
//! ```
//!
//! Connection files are written once and never touched again, so the path
//! itself is the identity: a new connection epoch always means a new file.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, error, info, warn};
use tempfile::NamedTempFile;

use crate::error_handling::types::StorageError;
use crate::formatting::{format_bytes, join_duration};
use crate::status_parser::types::{ClientRecord, GlobalAggregate, StatusSnapshot};
use crate::storage::storage_trait::HistoryStore;
use crate::storage::types::{RealConnection, StatsFact, UserIdentity, VirtualAssignment};
use crate::timestamp::LocaleTimestamp;

pub const FACT_HEADER: &str =
    "virtual ip,virtual ip given,remote ip,bytes in,bytes out,bytes total,session time,session length";
pub const GLOBAL_HEADER: &str =
    "date,bytes in,bytes in human,bytes out,bytes out human,bytes total,bytes total human,users";
const GLOBAL_FILE: &str = "global";

pub struct FlatFileStore {
    root: PathBuf,
}

impl FlatFileStore {
    /// Default directory name used in the application's working directory
    pub const DEFAULT_DIR: &'static str = "stats";

    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            error!("Failed to create stats dir {}: {}", root.display(), e);
            StorageError::Unavailable(format!("{}: {}", root.display(), e))
        })?;
        info!("FlatFileStore initialized at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_dir(&self, common_name: &str) -> PathBuf {
        self.root.join(common_name)
    }

    fn fact_path(&self, common_name: &str, connected_since: i64) -> PathBuf {
        self.user_dir(common_name).join(connected_since.to_string())
    }

    fn global_path(&self) -> PathBuf {
        self.root.join(GLOBAL_FILE)
    }

    /// Creates the connection file for `client` unless it already exists.
    ///
    /// The row is written to a temporary file in the user's directory and
    /// moved into place without clobbering, so a record file is either
    /// absent or complete. Returns the stored fact either way.
    fn write_once(
        &self,
        client: &ClientRecord,
        assignment: VirtualAssignment,
    ) -> Result<StatsFact, StorageError> {
        let dir = self.user_dir(&client.common_name);
        let path = self.fact_path(&client.common_name, client.connected_since.epoch);
        if path.exists() {
            debug!("Keeping existing record {}", path.display());
            return self.read_fact(&client.common_name, &path);
        }

        let fact = StatsFact {
            user: UserIdentity {
                common_name: client.common_name.clone(),
            },
            assignment,
            connection: RealConnection {
                address: client.real_address.clone(),
                connected_since: client.connected_since.clone(),
            },
            bytes_received: client.bytes_received,
            bytes_sent: client.bytes_sent,
        };
        let elapsed = (Utc::now().timestamp() - fact.connection.connected_since.epoch).max(0);
        let session_length = join_duration(elapsed as u64);

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| write_error(&dir, e))?;
        writeln!(tmp, "{}", FACT_HEADER).map_err(|e| write_error(tmp.path(), e))?;
        writeln!(
            tmp,
            "{},{},{},{},{},{},{},{}",
            fact.assignment.address,
            fact.assignment.assigned_at.text,
            fact.connection.address,
            fact.bytes_received,
            fact.bytes_sent,
            fact.bytes_total(),
            fact.connection.connected_since.text,
            session_length
        )
        .map_err(|e| write_error(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| write_error(tmp.path(), e))?;

        match tmp.persist_noclobber(&path) {
            Ok(_) => {
                info!("Saved record for {} to {}", client.common_name, path.display());
                Ok(fact)
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                debug!("Record {} appeared concurrently, keeping it", path.display());
                self.read_fact(&client.common_name, &path)
            }
            Err(e) => Err(write_error(&path, e.error)),
        }
    }

    fn read_fact(&self, common_name: &str, path: &Path) -> Result<StatsFact, StorageError> {
        let connected_since = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.parse::<i64>().ok())
            .ok_or_else(|| {
                error!("Record file name is not an epoch: {}", path.display());
                StorageError::ReadFailed
            })?;
        let row = read_data_row(path)?;
        let fields: Vec<&str> = row.splitn(8, ',').collect();
        if fields.len() < 7 {
            error!("Truncated record in {}", path.display());
            return Err(StorageError::ReadFailed);
        }

        let assigned_at = LocaleTimestamp::parse(fields[1]).map_err(|e| {
            error!("Invalid assignment time in {}: {}", path.display(), e);
            StorageError::ReadFailed
        })?;
        Ok(StatsFact {
            user: UserIdentity {
                common_name: common_name.to_string(),
            },
            assignment: VirtualAssignment {
                address: fields[0].to_string(),
                assigned_at,
            },
            connection: RealConnection {
                address: fields[2].to_string(),
                connected_since: LocaleTimestamp {
                    epoch: connected_since,
                    text: fields[6].to_string(),
                },
            },
            bytes_received: parse_count(fields[3], path)?,
            bytes_sent: parse_count(fields[4], path)?,
        })
    }
}

impl HistoryStore for FlatFileStore {
    fn reconcile(&self, snapshot: &StatusSnapshot) -> Result<Vec<StatsFact>, StorageError> {
        let mut facts = Vec::with_capacity(snapshot.len());
        for client in snapshot.clients() {
            if client.common_name == GLOBAL_FILE {
                warn!(
                    "Common name {:?} collides with the global totals file, not recording",
                    client.common_name
                );
                continue;
            }
            let dir = self.user_dir(&client.common_name);
            fs::create_dir_all(&dir).map_err(|e| write_error(&dir, e))?;
            let (Some(address), Some(assigned_at)) =
                (&client.virtual_address, &client.virtual_assigned_at)
            else {
                info!("No virtual address for {} yet, not recording stats", client.common_name);
                continue;
            };
            let assignment = VirtualAssignment {
                address: address.clone(),
                assigned_at: assigned_at.clone(),
            };
            match self.write_once(client, assignment) {
                Ok(fact) => facts.push(fact),
                Err(StorageError::ReadFailed) => {
                    warn!("Skipping unreadable record for {}", client.common_name)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(facts)
    }

    fn save_global(&self, aggregate: &GlobalAggregate) -> Result<(), StorageError> {
        let path = self.global_path();
        let mut f = File::create(&path).map_err(|e| write_error(&path, e))?;
        writeln!(f, "{}", GLOBAL_HEADER).map_err(|e| write_error(&path, e))?;
        writeln!(
            f,
            "{},{},{},{},{},{},{},{}",
            aggregate.snapshot_timestamp,
            aggregate.bytes_received,
            format_bytes(aggregate.bytes_received),
            aggregate.bytes_sent,
            format_bytes(aggregate.bytes_sent),
            aggregate.bytes_total(),
            format_bytes(aggregate.bytes_total()),
            aggregate.client_count
        )
        .map_err(|e| write_error(&path, e))?;
        debug!("Saved global record to {}", path.display());
        Ok(())
    }

    fn load_global(&self) -> Result<Option<GlobalAggregate>, StorageError> {
        let path = self.global_path();
        if !path.is_file() {
            return Ok(None);
        }
        let row = read_data_row(&path)?;
        let fields: Vec<&str> = row.split(',').collect();
        if fields.len() != 8 {
            error!("Malformed global record in {}", path.display());
            return Err(StorageError::ReadFailed);
        }
        Ok(Some(GlobalAggregate {
            snapshot_timestamp: fields[0].to_string(),
            bytes_received: parse_count(fields[1], &path)?,
            bytes_sent: parse_count(fields[3], &path)?,
            client_count: parse_count(fields[7], &path)?,
        }))
    }

    fn list_users(&self) -> Result<Vec<UserIdentity>, StorageError> {
        let mut users = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| read_error(&self.root, e))? {
            let entry = entry.map_err(|e| read_error(&self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                users.push(UserIdentity {
                    common_name: name.to_string(),
                });
            }
        }
        users.sort();
        Ok(users)
    }

    fn list_facts(&self, user: &UserIdentity) -> Result<Vec<StatsFact>, StorageError> {
        let dir = self.user_dir(&user.common_name);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut records: Vec<(i64, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| read_error(&dir, e))? {
            let path = entry.map_err(|e| read_error(&dir, e))?.path();
            match path.file_name().and_then(|n| n.to_str()).map(str::parse::<i64>) {
                Some(Ok(epoch)) if path.is_file() => records.push((epoch, path)),
                _ => debug!("Skipping {}", path.display()),
            }
        }
        records.sort_by_key(|(epoch, _)| *epoch);

        let mut facts = Vec::with_capacity(records.len());
        for (_, path) in records {
            facts.push(self.read_fact(&user.common_name, &path)?);
        }
        debug!("Loaded {} record(s) from {}", facts.len(), dir.display());
        Ok(facts)
    }
}

/// Second line of a two-line CSV file.
fn read_data_row(path: &Path) -> Result<String, StorageError> {
    let content = fs::read_to_string(path).map_err(|e| read_error(path, e))?;
    content
        .lines()
        .nth(1)
        .map(|line| line.trim().to_string())
        .ok_or_else(|| {
            error!("Missing data row in {}", path.display());
            StorageError::ReadFailed
        })
}

fn parse_count(field: &str, path: &Path) -> Result<u64, StorageError> {
    field.trim().parse::<u64>().map_err(|e| {
        error!("Invalid counter {:?} in {}: {}", field, path.display(), e);
        StorageError::ReadFailed
    })
}

fn write_error(path: &Path, e: std::io::Error) -> StorageError {
    error!("Failed to write {}: {}", path.display(), e);
    StorageError::WriteFailed
}

fn read_error(path: &Path, e: std::io::Error) -> StorageError {
    error!("Failed to read {}: {}", path.display(), e);
    StorageError::ReadFailed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status_parser::parse;
    use serial_test::serial;
    use tempfile::TempDir;

    const SNAPSHOT: &str = "OpenVPN CLIENT LIST
Updated,Thu Oct  3 15:32:00 2013
alice,203.0.113.5:1194,1000,2000,Thu Oct  3 15:31:08 2013
bob,198.51.100.7:40112,1048576,20,Wed Oct  2 08:00:00 2013
carol,192.0.2.44:1194,5,5,Thu Oct  3 15:00:00 2013
ROUTING TABLE
10.8.0.2,alice,203.0.113.5:1194,Thu Oct  3 15:31:09 2013
10.8.0.6,bob,198.51.100.7:40112,Wed Oct  2 08:00:01 2013
END
";

    fn alice() -> UserIdentity {
        UserIdentity {
            common_name: "alice".into(),
        }
    }

    #[test]
    fn test_reconcile_writes_one_file_per_connection() {
        let dir = TempDir::new().unwrap();
        let store = FlatFileStore::open(dir.path()).unwrap();
        let parsed = parse(SNAPSHOT).unwrap();

        let facts = store.reconcile(&parsed.snapshot).unwrap();
        assert_eq!(facts.len(), 2);

        let alice_record = parsed.snapshot.get("alice").unwrap();
        let path = dir
            .path()
            .join("alice")
            .join(alice_record.connected_since.epoch.to_string());
        let content = fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some(FACT_HEADER));
        let row = lines.next().unwrap();
        assert!(row.starts_with(
            "10.8.0.2,Thu Oct  3 15:31:09 2013,203.0.113.5,1000,2000,3000,Thu Oct  3 15:31:08 2013,"
        ));
        assert!(dir.path().join("carol").is_dir());
        assert_eq!(fs::read_dir(dir.path().join("carol")).unwrap().count(), 0);
    }

    #[test]
    #[serial]
    fn test_existing_connection_file_is_never_rewritten() {
        let dir = TempDir::new().unwrap();
        let store = FlatFileStore::open(dir.path()).unwrap();
        store.reconcile(&parse(SNAPSHOT).unwrap().snapshot).unwrap();

        let updated = SNAPSHOT.replace(",1000,2000,", ",4000,8000,");
        let facts = store.reconcile(&parse(&updated).unwrap().snapshot).unwrap();

        let alice_fact = facts.iter().find(|f| f.user == alice()).unwrap();
        assert_eq!(alice_fact.bytes_received, 1000);
        assert_eq!(alice_fact.bytes_sent, 2000);
        assert_eq!(store.list_facts(&alice()).unwrap().len(), 1);
    }

    #[test]
    #[serial]
    fn test_list_facts_reads_back_in_epoch_order() {
        let dir = TempDir::new().unwrap();
        let store = FlatFileStore::open(dir.path()).unwrap();
        let first = parse(SNAPSHOT).unwrap();
        store.reconcile(&first.snapshot).unwrap();

        let reconnected = SNAPSHOT
            .replace("alice,203.0.113.5:1194,1000,2000,Thu Oct  3 15:31:08 2013",
                     "alice,203.0.113.9:1194,7,7,Fri Oct  4 09:00:00 2013");
        store.reconcile(&parse(&reconnected).unwrap().snapshot).unwrap();

        let facts = store.list_facts(&alice()).unwrap();
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].connection.address, "203.0.113.5");
        assert_eq!(facts[0].connection.connected_since.text, "Thu Oct  3 15:31:08 2013");
        assert_eq!(
            facts[0].connection.connected_since.epoch,
            first.snapshot.get("alice").unwrap().connected_since.epoch
        );
        assert_eq!(facts[0].assignment.address, "10.8.0.2");
        assert_eq!(facts[0].bytes_received, 1000);
        assert_eq!(facts[1].connection.address, "203.0.113.9");
        assert_eq!(facts[1].bytes_received, 7);
    }

    #[test]
    fn test_list_users_ignores_global_file() {
        let dir = TempDir::new().unwrap();
        let store = FlatFileStore::open(dir.path()).unwrap();
        let parsed = parse(SNAPSHOT).unwrap();
        store.reconcile(&parsed.snapshot).unwrap();
        store.save_global(&parsed.aggregate).unwrap();

        let names: Vec<_> = store
            .list_users()
            .unwrap()
            .into_iter()
            .map(|u| u.common_name)
            .collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
        assert!(store
            .list_facts(&UserIdentity { common_name: "carol".into() })
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_global_file_layout_and_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = FlatFileStore::open(dir.path()).unwrap();
        assert_eq!(store.load_global().unwrap(), None);

        let aggregate = parse(SNAPSHOT).unwrap().aggregate;
        store.save_global(&aggregate).unwrap();
        let content = fs::read_to_string(dir.path().join("global")).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], GLOBAL_HEADER);
        assert_eq!(
            lines[1],
            "Thu Oct  3 15:32:00 2013,1049581,1.0 MB,2025,1.98 KB,1051606,1.0 MB,3"
        );
        assert_eq!(store.load_global().unwrap(), Some(aggregate.clone()));

        let later = GlobalAggregate {
            snapshot_timestamp: "Fri Oct  4 09:00:00 2013".into(),
            client_count: 1,
            ..aggregate
        };
        store.save_global(&later).unwrap();
        assert_eq!(store.load_global().unwrap(), Some(later));
    }

    #[test]
    fn test_stale_empty_record_does_not_block_other_clients() {
        let dir = TempDir::new().unwrap();
        let store = FlatFileStore::open(dir.path()).unwrap();
        let parsed = parse(SNAPSHOT).unwrap();
        let alice_epoch = parsed.snapshot.get("alice").unwrap().connected_since.epoch;
        fs::create_dir_all(dir.path().join("alice")).unwrap();
        fs::write(dir.path().join("alice").join(alice_epoch.to_string()), "").unwrap();

        for _ in 0..2 {
            let facts = store.reconcile(&parsed.snapshot).unwrap();
            let names: Vec<_> = facts.iter().map(|f| f.user.common_name.as_str()).collect();
            assert_eq!(names, vec!["bob"]);
        }
        let bob = UserIdentity { common_name: "bob".into() };
        assert_eq!(store.list_facts(&bob).unwrap().len(), 1);
    }

    #[test]
    fn test_no_temporary_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = FlatFileStore::open(dir.path()).unwrap();
        store.reconcile(&parse(SNAPSHOT).unwrap().snapshot).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path().join("alice"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].parse::<i64>().is_ok());
    }

    #[test]
    fn test_common_name_global_is_not_recorded() {
        let dir = TempDir::new().unwrap();
        let store = FlatFileStore::open(dir.path()).unwrap();
        let raw = SNAPSHOT
            .replace("carol,", "global,")
            .replace("ROUTING TABLE", "ROUTING TABLE\n10.8.0.10,global,192.0.2.44:1194,Thu Oct  3 15:00:01 2013");
        let parsed = parse(&raw).unwrap();

        let facts = store.reconcile(&parsed.snapshot).unwrap();
        assert_eq!(facts.len(), 2);
        store.save_global(&parsed.aggregate).unwrap();
        assert!(dir.path().join("global").is_file());
        assert_eq!(store.load_global().unwrap(), Some(parsed.aggregate));
    }

    #[test]
    fn test_corrupt_record_is_a_read_error() {
        let dir = TempDir::new().unwrap();
        let store = FlatFileStore::open(dir.path()).unwrap();
        fs::create_dir_all(dir.path().join("alice")).unwrap();
        fs::write(dir.path().join("alice").join("1380814268"), "header only\n").unwrap();
        fs::write(dir.path().join("alice").join("notes.txt"), "ignored").unwrap();

        assert!(matches!(
            store.list_facts(&alice()),
            Err(StorageError::ReadFailed)
        ));
    }
}
