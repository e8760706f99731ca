//! DynamoDB adapter for an entity manager.
//!
//! The entity manager decides keys, sharding and transcoding; this crate turns
//! its config into DynamoDB table definitions and performs the table, item,
//! batch and query operations against a table built that way. It also carries
//! the scan/transform/write loops behind the `migrate-data` and `purge-table`
//! commands of the `entity-dynamo` binary.

pub mod config;
pub mod dynamodb;
pub mod entity;
pub mod error;
pub mod migrate;
pub mod pool;
pub mod purge;
pub mod table_file;
pub mod utils;

#[cfg(test)]
mod tests;

pub use dynamodb::{
    generate_table_definition, BatchOptions, EntityClient, Item, QueryBuilder, TableDefinition,
    TableStore,
};
pub use entity::{AttributeType, EntityManagerConfig, TranscodeAttributeTypes};
pub use error::{Error, Result};
pub use migrate::{migrate_data, MigrateOptions, MigrationSummary, TransformChain};
pub use purge::purge_table;
