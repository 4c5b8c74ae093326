//! SeaORM entity models used by the database storage backend.
//!
//! These structs map to the SQLite tables created by `database_storage`:
//! - `users`: one row per common name
//! - `virtual_assignments`: (user, virtual address, assigned-at epoch)
//! - `real_connections`: (user, real address, connected-since epoch)
//! - `stats`: byte counters per (user, assignment, connection) triple
//! - `global_stats`: single row holding the latest snapshot totals

/// Users table entity models.
pub mod users {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "users")]
    pub struct Model {
        /// Auto-increment row id
        #[sea_orm(primary_key)]
        pub id: i32,
        /// Client common name (natural key)
        pub common_name: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Virtual address assignments table entity models.
pub mod virtual_assignments {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "virtual_assignments")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        /// Foreign key to `users.id`
        pub user_id: i32,
        /// Dotted-quad virtual address
        pub address: String,
        /// Epoch of the assignment
        pub assigned_at: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        /// Belongs to a user
        #[sea_orm(
            belongs_to = "super::users::Entity",
            from = "Column::UserId",
            to = "super::users::Column::Id"
        )]
        User,
    }

    impl ActiveModelBehavior for ActiveModel {}
}

/// Real connections table entity models.
pub mod real_connections {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "real_connections")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        /// Foreign key to `users.id`
        pub user_id: i32,
        /// Dotted-quad address the client connected from
        pub address: String,
        /// Epoch of the connection start
        pub connected_since: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        /// Belongs to a user
        #[sea_orm(
            belongs_to = "super::users::Entity",
            from = "Column::UserId",
            to = "super::users::Column::Id"
        )]
        User,
    }

    impl ActiveModelBehavior for ActiveModel {}
}

/// Stats facts table entity models.
pub mod stats {
    use sea_orm::entity::prelude::*;

    /// Mutable byte counters keyed by the identity triple.
    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "stats")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub user_id: i32,
        pub virtual_assignment_id: i32,
        pub real_connection_id: i32,
        pub bytes_received: i64,
        pub bytes_sent: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::users::Entity",
            from = "Column::UserId",
            to = "super::users::Column::Id"
        )]
        User,
        #[sea_orm(
            belongs_to = "super::virtual_assignments::Entity",
            from = "Column::VirtualAssignmentId",
            to = "super::virtual_assignments::Column::Id"
        )]
        VirtualAssignment,
        #[sea_orm(
            belongs_to = "super::real_connections::Entity",
            from = "Column::RealConnectionId",
            to = "super::real_connections::Column::Id"
        )]
        RealConnection,
    }

    impl ActiveModelBehavior for ActiveModel {}
}

/// Latest global aggregate, stored in a single row.
pub mod global_stats {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "global_stats")]
    pub struct Model {
        /// Always `GLOBAL_ROW_ID`
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: i32,
        pub snapshot_timestamp: String,
        pub bytes_received: i64,
        pub bytes_sent: i64,
        pub client_count: i64,
    }

    pub const GLOBAL_ROW_ID: i32 = 1;

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
