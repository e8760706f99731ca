//! Integration tests against a live DynamoDB endpoint
//!
//! These tests cover:
//! - Table creation from an entity manager config, and deletion
//! - Item CRUD through generated keys
//! - Batch writes, batch gets and transactions
//! - Sharded queries over an index
//! - The migrate and purge scan loops
//!
//! # Setup
//!
//! Every test here is `#[ignore]`d and needs a running DynamoDB instance.
//! Set the following environment variables in your `.env` file:
//!
//! ```text
//! AWS_ACCESS_KEY_ID=local
//! AWS_SECRET_ACCESS_KEY=local
//! AWS_REGION=us-east-1
//! AWS_ENDPOINT_URL=http://localhost:8000
//! ```
//!
//! # Running Tests
//!
//! ```text
//! cargo test -- --ignored
//! ```
//!
//! Note: These tests may incur AWS charges if run against a real DynamoDB instance.

use crate::config::AwsConfig;
use crate::dynamodb::{
    Comparator, EntityClient, FilterCondition, Item, QueryBuilder, RangeKeyCondition,
};
use crate::entity::tests::user_config;
use crate::entity::TranscodeAttributeTypes;
use crate::migrate::{migrate_data, MigrateOptions, TransformChain};
use anyhow::Result;
use aws_sdk_dynamodb::types::AttributeValue;
use tracing::{info, instrument};

const SHARDS: [&str; 3] = ["user!0", "user!1", "user!2"];

fn user(i: usize) -> Item {
    let shard = SHARDS[i % SHARDS.len()];
    Item::new()
        .set_string("hashKey", "user")
        .set_string("rangeKey", format!("userId#{i:04}"))
        .set_string("userHashKey", shard)
        .set_string("userId", format!("{i:04}"))
        .set_string("email", format!("user{i}@example.com"))
        .set_string("active", if i % 2 == 0 { "true" } else { "false" })
        .set_number("created", 1_700_000_000_000.0 + i as f64)
}

#[instrument]
async fn setup_table(table_name: &str) -> Result<EntityClient> {
    dotenv::dotenv().ok();

    let sdk_config = AwsConfig::default().load().await;
    let client = EntityClient::new(&sdk_config, table_name, user_config());

    if client.table_exists().await? {
        info!("Table already exists, purging");
        client.purge_items().await?;
    } else {
        client
            .create_table_if_not_exists(&TranscodeAttributeTypes::default())
            .await?;
        client.wait_until_table_exists().await?;
    }

    Ok(client)
}

#[tokio::test]
#[ignore = "needs a DynamoDB endpoint"]
async fn test_item_operations() -> Result<()> {
    let client = setup_table("entity-dynamo-items").await?;

    client.put_item(user(1)).await?;

    let found = client.get_item(user(1), Some(&["email"][..])).await?;
    assert_eq!(
        found.and_then(|item| item.get_string("email").cloned()),
        Some("user1@example.com".to_string())
    );

    client.delete_item(user(1)).await?;
    assert!(client.get_item(user(1), None).await?.is_none());
    Ok(())
}

#[tokio::test]
#[ignore = "needs a DynamoDB endpoint"]
async fn test_batch_and_transactions() -> Result<()> {
    let client = setup_table("entity-dynamo-batch").await?;

    let items: Vec<Item> = (0..60).map(user).collect();
    assert_eq!(client.put_items(items.clone()).await?, 60);
    assert_eq!(client.get_items(items.clone()).await?.len(), 60);

    assert_eq!(client.delete_items(items[..30].to_vec()).await?, 30);
    assert_eq!(client.get_items(items.clone()).await?.len(), 30);

    client.transact_delete_items(items[30..].to_vec()).await?;
    assert!(client.get_items(items.clone()).await?.is_empty());

    client.transact_put_items(items[..10].to_vec()).await?;
    assert_eq!(client.purge_items().await?, 10);
    Ok(())
}

#[tokio::test]
#[ignore = "needs a DynamoDB endpoint"]
async fn test_sharded_index_query() -> Result<()> {
    let client = setup_table("entity-dynamo-query").await?;
    client.put_items((0..30).map(user).collect()).await?;

    let builder = QueryBuilder::for_index(client.config(), client.table_name(), "userCreated", "")?
        .range_key_condition(RangeKeyCondition::compare(
            "created",
            Comparator::Ge,
            AttributeValue::N("1700000000010".into()),
        ))
        .filter(FilterCondition::exists("email"));

    let items = client.query_shards(&builder, SHARDS, 2).await?;
    assert_eq!(items.len(), 20);
    assert!(items.iter().all(|item| item.contains("email")));
    Ok(())
}

#[tokio::test]
#[ignore = "needs a DynamoDB endpoint"]
async fn test_migrate_between_tables() -> Result<()> {
    let source = setup_table("entity-dynamo-source").await?;
    let target = setup_table("entity-dynamo-target").await?;
    source.put_items((0..40).map(user).collect()).await?;

    let chain = TransformChain::new().register("002", |item: Item| {
        Ok(Some(item.set_string("schemaVersion", "2")))
    });
    let summary = migrate_data(
        &source,
        &target,
        &chain,
        &MigrateOptions {
            page_size: Some(15),
            ..MigrateOptions::default()
        },
    )
    .await?;

    assert_eq!(summary.scanned, 40);
    assert_eq!(summary.written, 40);
    assert!(summary.pages >= 3);
    Ok(())
}
