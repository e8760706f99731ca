//! # DynamoDB Module
//!
//! DynamoDB side of the entity manager: table definitions generated from an
//! [`EntityManagerConfig`](crate::entity::EntityManagerConfig), a client that
//! performs item, batch, transaction and query operations against one table,
//! and the store abstraction the migration and purge loops run over.
//!
//! ## Components
//!
//! - `EntityClient`: A client wrapper bound to a single entity table.
//! - `Item`: A DynamoDB item with typed accessors and serde conversions.
//! - `TableDefinition`: Attribute definitions, key schema and indexes, as
//!   written to a table definition file or sent to `CreateTable`.
//! - `QueryBuilder`: Key condition, filter and projection expressions.
//! - `TableStore`: The page-scan and batch-write surface of a table.
//!
//! ## Usage
//!
//! AWS credentials and region come from the usual environment variables:
//!
//! - `AWS_ACCESS_KEY_ID`: Your AWS access key ID.
//! - `AWS_SECRET_ACCESS_KEY`: Your AWS secret access key.
//! - `AWS_REGION`: The AWS region where your DynamoDB tables are located.
//!
//! Optionally, you can also set:
//! - `AWS_SESSION_TOKEN`: If you're using temporary credentials.
//! - `AWS_ENDPOINT_URL`: For using a custom endpoint (e.g., DynamoDB Local).

mod batch;
mod client;
mod item;
#[cfg(test)]
pub(crate) mod mock;
mod query;
mod store;
mod table;

pub use batch::{BatchOptions, MAX_BATCH_GET, MAX_BATCH_WRITE, MAX_TRANSACT_ITEMS};
pub use client::{EntityClient, QueryPage};
pub use item::Item;
pub use query::{
    Comparator, FilterCondition, Junction, QueryBuilder, QueryRequest, RangeKeyCondition,
};
pub use store::{ScanPage, ScanRequest, TableStore};
pub use table::{
    attribute_type_of, generate_table_definition, AttributeDefinition, GlobalSecondaryIndex,
    KeySchemaElement, KeyType, Projection, ProjectionType, TableDefinition,
};
