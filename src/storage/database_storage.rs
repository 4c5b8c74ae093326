//! SQLite history backend.
//!
//! Normalized tables for users, virtual assignments and real connections,
//! plus a `stats` fact table referencing them. Every find-or-create is a read
//! followed by a conditional write and each write commits on its own, so an
//! interrupted run can leave identities without their fact. Re-running on the
//! same snapshot completes the missing rows.

use std::path::{Path, PathBuf};

use log::{debug, error, info};
use sea_orm::sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Schema, Set, SqlxSqliteConnector,
};

use crate::error_handling::types::StorageError;
use crate::status_parser::types::{GlobalAggregate, StatusSnapshot};
use crate::storage::db_entities::{
    global_stats, real_connections, stats, users, virtual_assignments,
};
use crate::storage::storage_trait::HistoryStore;
use crate::storage::types::{RealConnection, StatsFact, UserIdentity, VirtualAssignment};
use crate::timestamp::LocaleTimestamp;

pub struct DatabaseStore {
    db: DatabaseConnection,
    rt: tokio::runtime::Runtime,
    path: PathBuf,
}

impl DatabaseStore {
    /// Default database filename used in the application's working directory
    pub const DEFAULT_DB_FILE: &'static str = "vpnstat.sqlite3";

    /// Opens (creating if missing) the database at `path` and makes sure the
    /// schema exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StorageError::Unavailable(format!("tokio runtime: {}", e)))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Unavailable(format!("{}: {}", parent.display(), e))
            })?;
        }

        let db = rt.block_on(async {
            let opts = SqliteConnectOptions::new()
                .filename(&path)
                .create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(opts)
                .await
                .map_err(|e| StorageError::Unavailable(format!("{}: {}", path.display(), e)))?;
            let db = SqlxSqliteConnector::from_sqlx_sqlite_pool(pool);
            create_schema(&db).await?;
            Ok::<_, StorageError>(db)
        })?;
        info!("DatabaseStore opened at {}", path.display());

        Ok(Self { db, rt, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn find_or_create_user(&self, common_name: &str) -> Result<users::Model, StorageError> {
        let found = users::Entity::find()
            .filter(users::Column::CommonName.eq(common_name))
            .one(&self.db)
            .await
            .map_err(read_failed)?;
        if let Some(user) = found {
            return Ok(user);
        }
        let user = users::ActiveModel {
            common_name: Set(common_name.to_string()),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .map_err(write_failed)?;
        debug!("Created user {} ({})", user.id, common_name);
        Ok(user)
    }

    async fn find_or_create_assignment(
        &self,
        user_id: i32,
        address: &str,
        assigned_at: i64,
    ) -> Result<virtual_assignments::Model, StorageError> {
        let found = virtual_assignments::Entity::find()
            .filter(virtual_assignments::Column::UserId.eq(user_id))
            .filter(virtual_assignments::Column::Address.eq(address))
            .filter(virtual_assignments::Column::AssignedAt.eq(assigned_at))
            .one(&self.db)
            .await
            .map_err(read_failed)?;
        if let Some(assignment) = found {
            return Ok(assignment);
        }
        let assignment = virtual_assignments::ActiveModel {
            user_id: Set(user_id),
            address: Set(address.to_string()),
            assigned_at: Set(assigned_at),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .map_err(write_failed)?;
        debug!("Created virtual assignment {} for user {}", assignment.id, user_id);
        Ok(assignment)
    }

    async fn find_or_create_connection(
        &self,
        user_id: i32,
        address: &str,
        connected_since: i64,
    ) -> Result<real_connections::Model, StorageError> {
        let found = real_connections::Entity::find()
            .filter(real_connections::Column::UserId.eq(user_id))
            .filter(real_connections::Column::Address.eq(address))
            .filter(real_connections::Column::ConnectedSince.eq(connected_since))
            .one(&self.db)
            .await
            .map_err(read_failed)?;
        if let Some(connection) = found {
            return Ok(connection);
        }
        let connection = real_connections::ActiveModel {
            user_id: Set(user_id),
            address: Set(address.to_string()),
            connected_since: Set(connected_since),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .map_err(write_failed)?;
        debug!("Created real connection {} for user {}", connection.id, user_id);
        Ok(connection)
    }

    /// Inserts the fact for the triple, or overwrites its counters.
    async fn upsert_stats(
        &self,
        user_id: i32,
        virtual_assignment_id: i32,
        real_connection_id: i32,
        bytes_received: i64,
        bytes_sent: i64,
    ) -> Result<stats::Model, StorageError> {
        let found = stats::Entity::find()
            .filter(stats::Column::UserId.eq(user_id))
            .filter(stats::Column::VirtualAssignmentId.eq(virtual_assignment_id))
            .filter(stats::Column::RealConnectionId.eq(real_connection_id))
            .one(&self.db)
            .await
            .map_err(read_failed)?;

        match found {
            Some(existing) => {
                if existing.bytes_received == bytes_received && existing.bytes_sent == bytes_sent {
                    return Ok(existing);
                }
                let mut active: stats::ActiveModel = existing.into();
                active.bytes_received = Set(bytes_received);
                active.bytes_sent = Set(bytes_sent);
                let updated = active.update(&self.db).await.map_err(write_failed)?;
                debug!("Updated stats {} for user {}", updated.id, user_id);
                Ok(updated)
            }
            None => {
                let created = stats::ActiveModel {
                    user_id: Set(user_id),
                    virtual_assignment_id: Set(virtual_assignment_id),
                    real_connection_id: Set(real_connection_id),
                    bytes_received: Set(bytes_received),
                    bytes_sent: Set(bytes_sent),
                    ..Default::default()
                }
                .insert(&self.db)
                .await
                .map_err(write_failed)?;
                debug!("Created stats {} for user {}", created.id, user_id);
                Ok(created)
            }
        }
    }

    async fn load_fact(
        &self,
        user: &UserIdentity,
        row: stats::Model,
    ) -> Result<StatsFact, StorageError> {
        let assignment = virtual_assignments::Entity::find_by_id(row.virtual_assignment_id)
            .one(&self.db)
            .await
            .map_err(read_failed)?
            .ok_or_else(|| {
                error!("Stats {} references missing virtual assignment {}", row.id, row.virtual_assignment_id);
                StorageError::ReadFailed
            })?;
        let connection = real_connections::Entity::find_by_id(row.real_connection_id)
            .one(&self.db)
            .await
            .map_err(read_failed)?
            .ok_or_else(|| {
                error!("Stats {} references missing real connection {}", row.id, row.real_connection_id);
                StorageError::ReadFailed
            })?;

        Ok(StatsFact {
            user: user.clone(),
            assignment: VirtualAssignment {
                address: assignment.address,
                assigned_at: LocaleTimestamp::from_stored_epoch(assignment.assigned_at),
            },
            connection: RealConnection {
                address: connection.address,
                connected_since: LocaleTimestamp::from_stored_epoch(connection.connected_since),
            },
            bytes_received: from_db_count(row.bytes_received)?,
            bytes_sent: from_db_count(row.bytes_sent)?,
        })
    }
}

impl Drop for DatabaseStore {
    fn drop(&mut self) {
        if let Err(e) = self.rt.block_on(self.db.clone().close()) {
            debug!("Closing {} failed: {}", self.path.display(), e);
        }
    }
}

impl HistoryStore for DatabaseStore {
    fn reconcile(&self, snapshot: &StatusSnapshot) -> Result<Vec<StatsFact>, StorageError> {
        self.rt.block_on(async {
            let mut facts = Vec::with_capacity(snapshot.len());
            for client in snapshot.clients() {
                let user = self.find_or_create_user(&client.common_name).await?;
                let (Some(virtual_address), Some(assigned_at)) =
                    (&client.virtual_address, &client.virtual_assigned_at)
                else {
                    info!("No virtual address for {} yet, not recording stats", client.common_name);
                    continue;
                };

                let assignment = self
                    .find_or_create_assignment(user.id, virtual_address, assigned_at.epoch)
                    .await?;
                let connection = self
                    .find_or_create_connection(
                        user.id,
                        &client.real_address,
                        client.connected_since.epoch,
                    )
                    .await?;
                let row = self
                    .upsert_stats(
                        user.id,
                        assignment.id,
                        connection.id,
                        to_db_count(client.bytes_received)?,
                        to_db_count(client.bytes_sent)?,
                    )
                    .await?;

                facts.push(StatsFact {
                    user: UserIdentity {
                        common_name: user.common_name,
                    },
                    assignment: VirtualAssignment {
                        address: virtual_address.clone(),
                        assigned_at: assigned_at.clone(),
                    },
                    connection: RealConnection {
                        address: client.real_address.clone(),
                        connected_since: client.connected_since.clone(),
                    },
                    bytes_received: from_db_count(row.bytes_received)?,
                    bytes_sent: from_db_count(row.bytes_sent)?,
                });
            }
            info!("Reconciled {} fact(s) into {}", facts.len(), self.path.display());
            Ok(facts)
        })
    }

    fn save_global(&self, aggregate: &GlobalAggregate) -> Result<(), StorageError> {
        self.rt.block_on(async {
            let existing = global_stats::Entity::find_by_id(global_stats::GLOBAL_ROW_ID)
                .one(&self.db)
                .await
                .map_err(read_failed)?;
            let is_new = existing.is_none();
            let mut active: global_stats::ActiveModel = match existing {
                Some(row) => row.into(),
                None => global_stats::ActiveModel {
                    id: Set(global_stats::GLOBAL_ROW_ID),
                    ..Default::default()
                },
            };
            active.snapshot_timestamp = Set(aggregate.snapshot_timestamp.clone());
            active.bytes_received = Set(to_db_count(aggregate.bytes_received)?);
            active.bytes_sent = Set(to_db_count(aggregate.bytes_sent)?);
            active.client_count = Set(to_db_count(aggregate.client_count)?);
            if is_new {
                active.insert(&self.db).await.map_err(write_failed)?;
            } else {
                active.update(&self.db).await.map_err(write_failed)?;
            }
            debug!("Saved global aggregate for {}", aggregate.snapshot_timestamp);
            Ok(())
        })
    }

    fn load_global(&self) -> Result<Option<GlobalAggregate>, StorageError> {
        self.rt.block_on(async {
            let row = global_stats::Entity::find_by_id(global_stats::GLOBAL_ROW_ID)
                .one(&self.db)
                .await
                .map_err(read_failed)?;
            match row {
                Some(row) => Ok(Some(GlobalAggregate {
                    snapshot_timestamp: row.snapshot_timestamp,
                    bytes_received: from_db_count(row.bytes_received)?,
                    bytes_sent: from_db_count(row.bytes_sent)?,
                    client_count: from_db_count(row.client_count)?,
                })),
                None => Ok(None),
            }
        })
    }

    fn list_users(&self) -> Result<Vec<UserIdentity>, StorageError> {
        self.rt.block_on(async {
            let rows = users::Entity::find()
                .order_by_asc(users::Column::Id)
                .all(&self.db)
                .await
                .map_err(read_failed)?;
            Ok(rows
                .into_iter()
                .map(|row| UserIdentity {
                    common_name: row.common_name,
                })
                .collect())
        })
    }

    fn list_facts(&self, user: &UserIdentity) -> Result<Vec<StatsFact>, StorageError> {
        self.rt.block_on(async {
            let Some(user_row) = users::Entity::find()
                .filter(users::Column::CommonName.eq(user.common_name.as_str()))
                .one(&self.db)
                .await
                .map_err(read_failed)?
            else {
                return Ok(Vec::new());
            };
            let rows = stats::Entity::find()
                .filter(stats::Column::UserId.eq(user_row.id))
                .order_by_asc(stats::Column::Id)
                .all(&self.db)
                .await
                .map_err(read_failed)?;

            let mut facts = Vec::with_capacity(rows.len());
            for row in rows {
                facts.push(self.load_fact(user, row).await?);
            }
            facts.sort_by_key(|fact| fact.connection.connected_since.epoch);
            debug!("Loaded {} fact(s) for {}", facts.len(), user.common_name);
            Ok(facts)
        })
    }
}

async fn create_schema(db: &DatabaseConnection) -> Result<(), StorageError> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    let tables = [
        schema.create_table_from_entity(users::Entity),
        schema.create_table_from_entity(virtual_assignments::Entity),
        schema.create_table_from_entity(real_connections::Entity),
        schema.create_table_from_entity(stats::Entity),
        schema.create_table_from_entity(global_stats::Entity),
    ];
    for mut table in tables {
        table.if_not_exists();
        db.execute(backend.build(&table)).await.map_err(|e| {
            error!("Failed to create schema: {}", e);
            StorageError::Unavailable(e.to_string())
        })?;
    }
    Ok(())
}

fn read_failed(e: sea_orm::DbErr) -> StorageError {
    error!("Database read failed: {}", e);
    StorageError::ReadFailed
}

fn write_failed(e: sea_orm::DbErr) -> StorageError {
    error!("Database write failed: {}", e);
    StorageError::WriteFailed
}

fn to_db_count(value: u64) -> Result<i64, StorageError> {
    i64::try_from(value).map_err(|_| {
        error!("Counter {} does not fit the database column", value);
        StorageError::WriteFailed
    })
}

fn from_db_count(value: i64) -> Result<u64, StorageError> {
    u64::try_from(value).map_err(|_| {
        error!("Negative counter {} in database", value);
        StorageError::ReadFailed
    })
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
bob,198.51.100.7:40112,10,20,Wed Oct  2 08:00:00 2013
carol,192.0.2.44:1194,5,5,Thu Oct  3 15:00:00 2013
ROUTING TABLE
10.8.0.2,alice,203.0.113.5:1194,Thu Oct  3 15:31:09 2013
10.8.0.6,bob,198.51.100.7:40112,Wed Oct  2 08:00:01 2013
END
";

    fn temp_db() -> (TempDir, DatabaseStore) {
        let dir = TempDir::new().unwrap();
        let store = DatabaseStore::open(dir.path().join("test.sqlite3")).unwrap();
        (dir, store)
    }

    fn snapshot(raw: &str) -> StatusSnapshot {
        parse(raw).unwrap().snapshot
    }

    fn count<E: EntityTrait>(store: &DatabaseStore) -> usize {
        store
            .rt
            .block_on(E::find().all(&store.db))
            .unwrap()
            .len()
    }

    #[test]
    fn test_reconcile_records_user_without_virtual_address() {
        let (_dir, store) = temp_db();
        let facts = store.reconcile(&snapshot(SNAPSHOT)).unwrap();

        let names: Vec<_> = facts.iter().map(|f| f.user.common_name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
        assert_eq!(count::<users::Entity>(&store), 3);
        assert_eq!(count::<stats::Entity>(&store), 2);
    }

    #[test]
    fn test_unassigned_client_is_listed_without_stats() {
        let (_dir, store) = temp_db();
        let only_carol = "OpenVPN CLIENT LIST
Updated,Thu Oct  3 15:32:00 2013
carol,192.0.2.44:1194,5,5,Thu Oct  3 15:00:00 2013
";
        assert!(store.reconcile(&snapshot(only_carol)).unwrap().is_empty());

        let carol = UserIdentity { common_name: "carol".into() };
        assert_eq!(store.list_users().unwrap(), vec![carol.clone()]);
        assert!(store.list_facts(&carol).unwrap().is_empty());
        assert_eq!(count::<stats::Entity>(&store), 0);
        assert_eq!(count::<virtual_assignments::Entity>(&store), 0);
    }

    #[test]
    #[serial]
    fn test_reconcile_twice_is_idempotent_and_updates_counters() {
        let (_dir, store) = temp_db();
        store.reconcile(&snapshot(SNAPSHOT)).unwrap();

        let updated = SNAPSHOT.replace(",1000,2000,", ",4000,8000,");
        let facts = store.reconcile(&snapshot(&updated)).unwrap();

        assert_eq!(count::<users::Entity>(&store), 3);
        assert_eq!(count::<virtual_assignments::Entity>(&store), 2);
        assert_eq!(count::<real_connections::Entity>(&store), 2);
        assert_eq!(count::<stats::Entity>(&store), 2);

        let alice = facts.iter().find(|f| f.user.common_name == "alice").unwrap();
        assert_eq!(alice.bytes_received, 4000);
        assert_eq!(alice.bytes_sent, 8000);

        let stored = store
            .list_facts(&UserIdentity { common_name: "alice".into() })
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].bytes_received, 4000);
        assert_eq!(stored[0].bytes_sent, 8000);
    }

    #[test]
    #[serial]
    fn test_new_connection_creates_new_fact_and_reuses_user() {
        let (_dir, store) = temp_db();
        store.reconcile(&snapshot(SNAPSHOT)).unwrap();

        let reconnected = SNAPSHOT
            .replace("alice,203.0.113.5:1194,1000,2000,Thu Oct  3 15:31:08 2013",
                     "alice,203.0.113.9:1194,7,7,Fri Oct  4 09:00:00 2013")
            .replace("10.8.0.2,alice,203.0.113.5:1194,Thu Oct  3 15:31:09 2013",
                     "10.8.0.2,alice,203.0.113.9:1194,Fri Oct  4 09:00:01 2013");
        store.reconcile(&snapshot(&reconnected)).unwrap();

        assert_eq!(count::<users::Entity>(&store), 3);
        assert_eq!(count::<stats::Entity>(&store), 3);

        let facts = store
            .list_facts(&UserIdentity { common_name: "alice".into() })
            .unwrap();
        assert_eq!(facts.len(), 2);
        assert!(facts[0].connection.connected_since.epoch < facts[1].connection.connected_since.epoch);
        assert_eq!(facts[0].connection.address, "203.0.113.5");
        assert_eq!(facts[1].connection.address, "203.0.113.9");
    }

    #[test]
    fn test_stored_facts_render_epochs_in_utc() {
        let (_dir, store) = temp_db();
        let live = store.reconcile(&snapshot(SNAPSHOT)).unwrap();
        let bob = UserIdentity { common_name: "bob".into() };
        let stored = store.list_facts(&bob).unwrap();

        let live_bob = live.iter().find(|f| f.user == bob).unwrap();
        assert_eq!(stored[0].connection.connected_since.epoch, live_bob.connection.connected_since.epoch);
        assert_eq!(
            stored[0].connection.connected_since.text,
            crate::timestamp::from_epoch(live_bob.connection.connected_since.epoch)
        );
        assert_eq!(stored[0].assignment.address, "10.8.0.6");
    }

    #[test]
    fn test_list_users_and_unknown_user() {
        let (_dir, store) = temp_db();
        assert!(store.list_users().unwrap().is_empty());
        store.reconcile(&snapshot(SNAPSHOT)).unwrap();

        let users = store.list_users().unwrap();
        let names: Vec<_> = users.iter().map(|u| u.common_name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
        assert!(store
            .list_facts(&UserIdentity { common_name: "nobody".into() })
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_global_aggregate_is_overwritten() {
        let (_dir, store) = temp_db();
        assert_eq!(store.load_global().unwrap(), None);

        let first = parse(SNAPSHOT).unwrap().aggregate;
        store.save_global(&first).unwrap();
        assert_eq!(store.load_global().unwrap(), Some(first.clone()));

        let second = GlobalAggregate {
            snapshot_timestamp: "Fri Oct  4 09:00:00 2013".into(),
            client_count: 1,
            ..first
        };
        store.save_global(&second).unwrap();
        assert_eq!(store.load_global().unwrap(), Some(second));
        assert_eq!(count::<global_stats::Entity>(&store), 1);
    }

    #[test]
    #[serial]
    fn test_history_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("history.sqlite3");
        {
            let store = DatabaseStore::open(&path).unwrap();
            store.reconcile(&snapshot(SNAPSHOT)).unwrap();
        }
        let store = DatabaseStore::open(&path).unwrap();
        store.reconcile(&snapshot(SNAPSHOT)).unwrap();
        assert_eq!(count::<stats::Entity>(&store), 2);
        assert_eq!(store.list_users().unwrap().len(), 3);
    }

    #[test]
    fn test_path_is_used_verbatim() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("my%20history#1.sqlite3");
        DatabaseStore::open(&path).unwrap();
        assert!(path.is_file());
        assert!(!dir.path().join("my history#1.sqlite3").exists());
    }
}
