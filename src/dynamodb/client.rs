use async_trait::async_trait;
use aws_sdk_dynamodb::{
    operation::create_table::CreateTableOutput,
    types::{
        AttributeValue, BillingMode, Delete, DeleteRequest, KeysAndAttributes, Put, PutRequest,
        TableDescription, TableStatus, TransactWriteItem, WriteRequest,
    },
    Client,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::dynamodb::batch::{chunked, send_until_processed, BatchOptions, MAX_TRANSACT_ITEMS};
use crate::dynamodb::query::{QueryBuilder, QueryRequest};
use crate::dynamodb::store::{ScanPage, ScanRequest, TableStore};
use crate::dynamodb::table::{generate_table_definition, TableDefinition};
use crate::dynamodb::Item;
use crate::entity::{EntityManagerConfig, TranscodeAttributeTypes};
use crate::error::{Error, Result};
use crate::pool::run_bounded;
use crate::purge::purge_table;
use crate::utils::retry_with_backoff;

/// DynamoDB client bound to one entity table.
///
/// Wraps the SDK client with the operations an entity manager needs: table
/// lifecycle from the generated definition, single-item CRUD, batched and
/// transactional writes, paged queries and scans.
///
/// Items passed in already carry their generated keys. Operations that take a
/// key accept either a bare key or a whole item; the key attributes named by
/// the entity config are projected out before the request is sent.
///
/// Batched calls are split into DynamoDB-sized chunks and run through the
/// bounded task pool; unprocessed items are resent with Fibonacci backoff
/// until `BatchOptions::max_retries` is exhausted.
///
/// # Example
///
/// ```no_run
/// use entity_client_dynamodb::{EntityClient, EntityManagerConfig, Item, TranscodeAttributeTypes};
///
/// # async fn run() -> entity_client_dynamodb::Result<()> {
/// let sdk_config = aws_config::load_from_env().await;
/// let client = EntityClient::new(&sdk_config, "users", EntityManagerConfig::default());
///
/// client
///     .create_table_if_not_exists(&TranscodeAttributeTypes::default())
///     .await?;
/// client.wait_until_table_exists().await?;
///
/// let item = Item::new()
///     .set_string("hashKey", "user!1")
///     .set_string("rangeKey", "userId#42");
/// client.put_item(item).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EntityClient {
    client: Client,
    table_name: String,
    config: Arc<EntityManagerConfig>,
    batch: BatchOptions,
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    pub items: Vec<Item>,
    /// Pass back to `query` for the next page; absent on the last page.
    pub page_key: Option<Item>,
}

impl EntityClient {
    /// Creates a new `EntityClient` from shared SDK configuration.
    pub fn new(
        sdk_config: &aws_config::SdkConfig,
        table_name: impl Into<String>,
        config: EntityManagerConfig,
    ) -> Self {
        Self::from_client(Client::new(sdk_config), table_name, config)
    }

    pub fn from_client(
        client: Client,
        table_name: impl Into<String>,
        config: EntityManagerConfig,
    ) -> Self {
        Self {
            client,
            table_name: table_name.into(),
            config: Arc::new(config),
            batch: BatchOptions::default(),
        }
    }

    pub fn with_batch_options(mut self, batch: BatchOptions) -> Self {
        self.batch = batch;
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn config(&self) -> &EntityManagerConfig {
        &self.config
    }

    /// Verifies authentication by attempting to list tables.
    pub async fn check_auth(&self) -> Result<()> {
        self.client.list_tables().limit(1).send().await.map_err(|e| {
            error!("Authentication failed: {}", e);
            Error::from(e)
        })?;
        info!("Authentication successful");
        Ok(())
    }

    fn key_of(&self, item: Item) -> Result<HashMap<String, AttributeValue>> {
        item.key(&self.config.key_attributes())
            .map(Item::into_attributes)
            .ok_or_else(|| {
                Error::MissingKey(
                    self.config
                        .key_attributes()
                        .iter()
                        .map(|k| k.to_string())
                        .collect(),
                )
            })
    }

    // --- Table Operations ---

    /// Creates the table from the definition generated for the entity config.
    ///
    /// Returns `None` if the table already exists.
    pub async fn create_table_if_not_exists(
        &self,
        transcode_types: &TranscodeAttributeTypes,
    ) -> Result<Option<CreateTableOutput>> {
        if self.table_exists().await? {
            info!("Table '{}' exists", self.table_name);
            return Ok(None);
        }

        let definition = generate_table_definition(&self.config, transcode_types);
        self.create_table(&definition).await.map(Some)
    }

    /// Creates the table from an explicit definition with on-demand billing.
    #[instrument(skip(self, definition), fields(table = %self.table_name))]
    pub async fn create_table(&self, definition: &TableDefinition) -> Result<CreateTableOutput> {
        let output = self
            .client
            .create_table()
            .table_name(&self.table_name)
            .billing_mode(BillingMode::PayPerRequest)
            .set_attribute_definitions(Some(definition.sdk_attribute_definitions()?))
            .set_key_schema(Some(definition.sdk_key_schema()?))
            .set_global_secondary_indexes(definition.sdk_global_secondary_indexes()?)
            .send()
            .await?;

        info!(
            "Table '{}' created with {} global secondary indexes",
            self.table_name,
            definition.global_secondary_indexes.len()
        );
        Ok(output)
    }

    /// Deletes the table.
    pub async fn delete_table(&self) -> Result<()> {
        self.client
            .delete_table()
            .table_name(&self.table_name)
            .send()
            .await?;
        info!("Table '{}' deleted", self.table_name);
        Ok(())
    }

    /// Retrieves the table description, `None` if the table does not exist.
    pub async fn describe_table(&self) -> Result<Option<TableDescription>> {
        match self
            .client
            .describe_table()
            .table_name(&self.table_name)
            .send()
            .await
        {
            Ok(output) => Ok(output.table),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_not_found_exception()) =>
            {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Checks if the table exists.
    pub async fn table_exists(&self) -> Result<bool> {
        Ok(self.describe_table().await?.is_some())
    }

    async fn table_in_state(&self, want_exists: bool) -> Result<()> {
        let state = self
            .describe_table()
            .await?
            .map(|table| table.table_status);

        let reached = match state {
            Some(Some(TableStatus::Active)) => want_exists,
            None => !want_exists,
            _ => false,
        };

        if reached {
            Ok(())
        } else {
            Err(Error::TableWaitTimeout {
                table_name: self.table_name.clone(),
                state: if want_exists { "exist" } else { "be deleted" },
            })
        }
    }

    /// Polls until the table is `ACTIVE`.
    pub async fn wait_until_table_exists(&self) -> Result<()> {
        retry_with_backoff(
            || self.table_in_state(true),
            self.batch.initial_delay.max(std::time::Duration::from_millis(500)),
            12,
        )
        .await?;
        info!("Table '{}' is active", self.table_name);
        Ok(())
    }

    /// Polls until the table is gone.
    pub async fn wait_until_table_not_exists(&self) -> Result<()> {
        retry_with_backoff(
            || self.table_in_state(false),
            self.batch.initial_delay.max(std::time::Duration::from_millis(500)),
            12,
        )
        .await?;
        info!("Table '{}' no longer exists", self.table_name);
        Ok(())
    }

    // --- Item Operations ---

    /// Puts an item into the table.
    pub async fn put_item(&self, item: Item) -> Result<()> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item.attributes))
            .send()
            .await?;

        debug!("Item added to '{}'", self.table_name);
        Ok(())
    }

    /// Gets an item by key, optionally returning only some attributes.
    pub async fn get_item(&self, key: Item, projection: Option<&[&str]>) -> Result<Option<Item>> {
        let mut request = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(self.key_of(key)?));

        if let Some(attributes) = projection.filter(|a| !a.is_empty()) {
            let (expression, names) = projection_expression(attributes.iter().copied());
            request = request
                .projection_expression(expression)
                .set_expression_attribute_names(Some(names));
        }

        let response = request.send().await?;
        Ok(response.item.map(Item::from))
    }

    /// Deletes an item by key.
    pub async fn delete_item(&self, key: Item) -> Result<()> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .set_key(Some(self.key_of(key)?))
            .send()
            .await?;

        debug!("Item deleted from '{}'", self.table_name);
        Ok(())
    }

    // --- Batch Operations ---

    /// Puts items in batches of up to 25.
    pub async fn put_items(&self, items: Vec<Item>) -> Result<usize> {
        let requests = items
            .into_iter()
            .map(|item| -> Result<WriteRequest> {
                Ok(WriteRequest::builder()
                    .put_request(
                        PutRequest::builder()
                            .set_item(Some(item.attributes))
                            .build()?,
                    )
                    .build())
            })
            .collect::<Result<Vec<_>>>()?;

        let written = self.write_requests(requests).await?;
        info!("Put {written} items into '{}'", self.table_name);
        Ok(written)
    }

    /// Deletes items in batches of up to 25.
    pub async fn delete_items(&self, keys: Vec<Item>) -> Result<usize> {
        let requests = keys
            .into_iter()
            .map(|key| -> Result<WriteRequest> {
                Ok(WriteRequest::builder()
                    .delete_request(
                        DeleteRequest::builder()
                            .set_key(Some(self.key_of(key)?))
                            .build()?,
                    )
                    .build())
            })
            .collect::<Result<Vec<_>>>()?;

        let deleted = self.write_requests(requests).await?;
        info!("Deleted {deleted} items from '{}'", self.table_name);
        Ok(deleted)
    }

    async fn write_requests(&self, requests: Vec<WriteRequest>) -> Result<usize> {
        if requests.is_empty() {
            return Ok(0);
        }

        let batches = chunked(requests, self.batch.write_size());
        let written = run_bounded(
            batches.into_iter().map(|batch| self.write_batch(batch)),
            self.batch.concurrency,
        )
        .await?;

        Ok(written.into_iter().sum())
    }

    async fn write_batch(&self, requests: Vec<WriteRequest>) -> Result<usize> {
        let count = requests.len();
        send_until_processed(&self.batch, requests, move |pending| async move {
            let output = self
                .client
                .batch_write_item()
                .request_items(&self.table_name, pending)
                .send()
                .await?;

            let unprocessed = output
                .unprocessed_items
                .and_then(|mut unprocessed| unprocessed.remove(&self.table_name))
                .unwrap_or_default();
            Ok::<_, Error>((Vec::<()>::new(), unprocessed))
        })
        .await?;

        Ok(count)
    }

    /// Gets items by key in batches of up to 100.
    ///
    /// DynamoDB returns batch results in no particular order.
    pub async fn get_items(&self, keys: Vec<Item>) -> Result<Vec<Item>> {
        let keys = keys
            .into_iter()
            .map(|key| self.key_of(key))
            .collect::<Result<Vec<_>>>()?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let batches = chunked(keys, self.batch.get_size());
        let found = run_bounded(
            batches.into_iter().map(|batch| self.get_batch(batch)),
            self.batch.concurrency,
        )
        .await?;

        Ok(found.into_iter().flatten().collect())
    }

    async fn get_batch(
        &self,
        keys: Vec<HashMap<String, AttributeValue>>,
    ) -> Result<Vec<Item>> {
        send_until_processed(&self.batch, keys, move |pending| async move {
            let output = self
                .client
                .batch_get_item()
                .request_items(
                    &self.table_name,
                    KeysAndAttributes::builder().set_keys(Some(pending)).build()?,
                )
                .send()
                .await?;

            let found = output
                .responses
                .and_then(|mut responses| responses.remove(&self.table_name))
                .unwrap_or_default()
                .into_iter()
                .map(Item::from)
                .collect();
            let unprocessed = output
                .unprocessed_keys
                .and_then(|mut unprocessed| unprocessed.remove(&self.table_name))
                .map(|keys| keys.keys().to_vec())
                .unwrap_or_default();
            Ok::<_, Error>((found, unprocessed))
        })
        .await
    }

    // --- Transactions ---

    /// Puts all items or none of them.
    pub async fn transact_put_items(&self, items: Vec<Item>) -> Result<()> {
        let actions = items
            .into_iter()
            .map(|item| -> Result<TransactWriteItem> {
                Ok(TransactWriteItem::builder()
                    .put(
                        Put::builder()
                            .table_name(&self.table_name)
                            .set_item(Some(item.attributes))
                            .build()?,
                    )
                    .build())
            })
            .collect::<Result<Vec<_>>>()?;

        self.transact(actions).await
    }

    /// Deletes all items or none of them.
    pub async fn transact_delete_items(&self, keys: Vec<Item>) -> Result<()> {
        let actions = keys
            .into_iter()
            .map(|key| -> Result<TransactWriteItem> {
                Ok(TransactWriteItem::builder()
                    .delete(
                        Delete::builder()
                            .table_name(&self.table_name)
                            .set_key(Some(self.key_of(key)?))
                            .build()?,
                    )
                    .build())
            })
            .collect::<Result<Vec<_>>>()?;

        self.transact(actions).await
    }

    async fn transact(&self, actions: Vec<TransactWriteItem>) -> Result<()> {
        if actions.is_empty() {
            return Ok(());
        }
        if actions.len() > MAX_TRANSACT_ITEMS {
            return Err(Error::TransactionTooLarge {
                count: actions.len(),
                max: MAX_TRANSACT_ITEMS,
            });
        }

        let count = actions.len();
        self.client
            .transact_write_items()
            .set_transact_items(Some(actions))
            .send()
            .await?;

        info!("Transaction of {count} actions committed on '{}'", self.table_name);
        Ok(())
    }

    // --- Query and Scan Operations ---

    /// Runs one page of a query.
    pub async fn query(&self, request: &QueryRequest, page_key: Option<Item>) -> Result<QueryPage> {
        let output = self
            .client
            .query()
            .table_name(&request.table_name)
            .set_index_name(request.index_name.clone())
            .key_condition_expression(&request.key_condition_expression)
            .set_filter_expression(request.filter_expression.clone())
            .set_projection_expression(request.projection_expression.clone())
            .set_expression_attribute_names(Some(request.expression_attribute_names.clone()))
            .set_expression_attribute_values(Some(request.expression_attribute_values.clone()))
            .set_limit(request.limit)
            .set_scan_index_forward(request.scan_index_forward)
            .set_consistent_read(request.consistent_read)
            .set_exclusive_start_key(page_key.map(Item::into_attributes))
            .send()
            .await?;

        Ok(QueryPage {
            items: output
                .items
                .unwrap_or_default()
                .into_iter()
                .map(Item::from)
                .collect(),
            page_key: output.last_evaluated_key.map(Item::from),
        })
    }

    /// Follows page keys until the query is exhausted.
    pub async fn query_all(&self, request: &QueryRequest) -> Result<Vec<Item>> {
        follow_pages(move |page_key| self.query(request, page_key)).await
    }

    /// Runs the same query once per shard hash value.
    ///
    /// At most `concurrency` shard queries run at once; results are
    /// concatenated in the order of `hash_values`.
    pub async fn query_shards<I>(
        &self,
        builder: &QueryBuilder,
        hash_values: I,
        concurrency: usize,
    ) -> Result<Vec<Item>>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let requests = hash_values
            .into_iter()
            .map(|value| builder.clone().hash_value(value).build())
            .collect::<Result<Vec<_>>>()?;

        gather_shards(&requests, concurrency, move |request| self.query_all(request)).await
    }

    /// Runs one page of a scan.
    pub async fn scan_page(&self, request: ScanRequest) -> Result<ScanPage> {
        let mut scan = self
            .client
            .scan()
            .table_name(&self.table_name)
            .set_limit(request.limit)
            .set_exclusive_start_key(request.exclusive_start_key.map(Item::into_attributes));

        if let Some(attributes) = request.projection.as_ref().filter(|a| !a.is_empty()) {
            let (expression, names) = projection_expression(attributes.iter().map(String::as_str));
            scan = scan
                .projection_expression(expression)
                .set_expression_attribute_names(Some(names));
        }

        let response = scan.send().await?;

        Ok(ScanPage {
            items: response
                .items
                .unwrap_or_default()
                .into_iter()
                .map(Item::from)
                .collect(),
            last_evaluated_key: response.last_evaluated_key.map(Item::from),
        })
    }

    /// Deletes every item in the table, returning how many were deleted.
    pub async fn purge_items(&self) -> Result<usize> {
        let keys: Vec<String> = self
            .config
            .key_attributes()
            .iter()
            .map(|k| k.to_string())
            .collect();
        purge_table(self, &keys, None).await
    }
}

/// Projection expression with `#pN` placeholders for `attributes`.
fn projection_expression<'a>(
    attributes: impl Iterator<Item = &'a str>,
) -> (String, HashMap<String, String>) {
    let names: Vec<(String, String)> = attributes
        .enumerate()
        .map(|(i, name)| (format!("#p{i}"), name.to_string()))
        .collect();
    let expression = names
        .iter()
        .map(|(placeholder, _)| placeholder.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    (expression, names.into_iter().collect())
}

/// Collects every page `fetch` returns, starting with no page key.
async fn follow_pages<F, Fut>(mut fetch: F) -> Result<Vec<Item>>
where
    F: FnMut(Option<Item>) -> Fut,
    Fut: Future<Output = Result<QueryPage>>,
{
    let mut items = Vec::new();
    let mut page_key = None;

    loop {
        let page = fetch(page_key).await?;
        items.extend(page.items);
        page_key = page.page_key;

        if page_key.is_none() {
            return Ok(items);
        }
    }
}

/// Runs `query` for each shard request and flattens results in shard order.
async fn gather_shards<'a, F, Fut>(
    requests: &'a [QueryRequest],
    concurrency: usize,
    query: F,
) -> Result<Vec<Item>>
where
    F: Fn(&'a QueryRequest) -> Fut,
    Fut: Future<Output = Result<Vec<Item>>>,
{
    let shards = run_bounded(requests.iter().map(query), concurrency).await?;
    Ok(shards.into_iter().flatten().collect())
}

#[async_trait]
impl TableStore for EntityClient {
    fn table_name(&self) -> &str {
        &self.table_name
    }

    async fn scan_page(&self, request: ScanRequest) -> Result<ScanPage> {
        EntityClient::scan_page(self, request).await
    }

    async fn put_items(&self, items: Vec<Item>) -> Result<usize> {
        EntityClient::put_items(self, items).await
    }

    async fn delete_items(&self, keys: Vec<Item>) -> Result<usize> {
        EntityClient::delete_items(self, keys).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_uses_placeholders() {
        let (expression, names) = projection_expression(["hashKey", "rangeKey"].into_iter());
        assert_eq!(expression, "#p0, #p1");
        assert_eq!(names["#p0"], "hashKey");
        assert_eq!(names["#p1"], "rangeKey");
    }

    fn offline_client() -> EntityClient {
        let config = aws_sdk_dynamodb::Config::builder()
            .behavior_version(aws_sdk_dynamodb::config::BehaviorVersion::latest())
            .region(aws_sdk_dynamodb::config::Region::new("us-east-1"))
            .build();
        EntityClient::from_client(
            Client::from_conf(config),
            "users",
            EntityManagerConfig::default(),
        )
    }

    #[tokio::test]
    async fn keys_are_projected_from_items() {
        let client = offline_client();
        let key = client
            .key_of(
                Item::new()
                    .set_string("hashKey", "user!0")
                    .set_string("rangeKey", "userId#1")
                    .set_string("email", "x@y.z"),
            )
            .unwrap();
        assert_eq!(key.len(), 2);
        assert!(!key.contains_key("email"));

        let err = client
            .key_of(Item::new().set_string("hashKey", "user!0"))
            .unwrap_err();
        assert!(matches!(err, Error::MissingKey(_)));
    }

    #[tokio::test]
    async fn oversized_transactions_are_rejected_locally() {
        let client = offline_client();
        let items = (0..=MAX_TRANSACT_ITEMS)
            .map(|i| {
                Item::new()
                    .set_string("hashKey", "user!0")
                    .set_string("rangeKey", format!("userId#{i}"))
            })
            .collect();

        let err = client.transact_put_items(items).await.unwrap_err();
        assert!(matches!(
            err,
            Error::TransactionTooLarge { count: 101, max: 100 }
        ));
    }

    #[tokio::test]
    async fn empty_batches_do_not_call_dynamodb() {
        let client = offline_client();
        assert_eq!(client.put_items(Vec::new()).await.unwrap(), 0);
        assert_eq!(client.delete_items(Vec::new()).await.unwrap(), 0);
        assert!(client.get_items(Vec::new()).await.unwrap().is_empty());
        client.transact_delete_items(Vec::new()).await.unwrap();
    }

    fn page_item(id: &str) -> Item {
        Item::new().set_string("hashKey", "user!0").set_string("rangeKey", id)
    }

    #[tokio::test]
    async fn pages_are_followed_until_no_page_key() {
        let seen = std::sync::Mutex::new(Vec::new());
        let items = follow_pages(|page_key: Option<Item>| {
            seen.lock().unwrap().push(page_key.clone());
            async move {
                let page = match page_key.as_ref().and_then(|k| k.get_string("rangeKey")).map(String::as_str) {
                    None => QueryPage {
                        items: vec![page_item("a"), page_item("b")],
                        page_key: Some(page_item("b")),
                    },
                    Some("b") => QueryPage {
                        items: Vec::new(),
                        page_key: Some(page_item("c")),
                    },
                    _ => QueryPage {
                        items: vec![page_item("d")],
                        page_key: None,
                    },
                };
                Ok(page)
            }
        })
        .await
        .unwrap();

        let ids: Vec<&String> = items.iter().filter_map(|i| i.get_string("rangeKey")).collect();
        assert_eq!(ids, ["a", "b", "d"]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![None, Some(page_item("b")), Some(page_item("c"))]
        );
    }

    #[tokio::test]
    async fn paging_stops_at_the_first_error() {
        let result = follow_pages(|_page_key| async {
            Err::<QueryPage, _>(Error::AwsSdk("throttled".into()))
        })
        .await;
        assert!(matches!(result, Err(Error::AwsSdk(_))));
    }

    #[tokio::test]
    async fn shard_results_keep_shard_order() {
        let builder = QueryBuilder::new("users", "hashKey", "user!0");
        let requests = (0..4)
            .map(|shard| builder.clone().hash_value(format!("user!{shard}")).build())
            .collect::<Result<Vec<_>>>()
            .unwrap();

        let items = gather_shards(&requests, 4, |request| async move {
            let shard = request
                .expression_attribute_values
                .values()
                .find_map(|value| value.as_s().ok())
                .cloned()
                .unwrap_or_default();
            // Later shards finish first.
            let index: u64 = shard.trim_start_matches("user!").parse().unwrap_or(0);
            tokio::time::sleep(std::time::Duration::from_millis(5 * (4 - index))).await;
            Ok(vec![Item::new().set_string("hashKey", shard)])
        })
        .await
        .unwrap();

        let shards: Vec<&String> = items.iter().filter_map(|i| i.get_string("hashKey")).collect();
        assert_eq!(shards, ["user!0", "user!1", "user!2", "user!3"]);
    }
}
