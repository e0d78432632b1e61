//! SeaORM entity models used by the relational storage backend.
//!
//! These structs map to the tables created by `database_storage`:
//! - `reports`: one row per report; lookups use the indexed columns, the full
//!   snapshot lives in `data` as JSON
//! - `report_history`: append-only snapshots per report id

use sea_orm::entity::prelude::*;

/// Reports table entity model.
///
/// Only `report_id`, `reported_player` and `reporter` are queried; adding a
/// field to `Report` never changes this table.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "reports")]
pub struct Model {
    /// Report id, primary key and uniqueness constraint
    #[sea_orm(primary_key, auto_increment = false)]
    pub report_id: String,
    pub reported_player: String,
    pub reporter: String,
    /// JSON-serialized `Report`
    #[sea_orm(column_type = "Text")]
    pub data: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Update history table entity models.
pub mod history {
    use sea_orm::entity::prelude::*;

    /// One historical snapshot of a report.
    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "report_history")]
    pub struct Model {
        /// Auto-increment row id, preserves insertion order
        #[sea_orm(primary_key)]
        pub id: i32,
        /// Not a foreign key: history outlives deleted reports
        pub report_id: String,
        pub updater: String,
        /// Epoch milliseconds of the write
        pub written_at: i64,
        /// JSON-serialized `Report`
        #[sea_orm(column_type = "Text")]
        pub data: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
