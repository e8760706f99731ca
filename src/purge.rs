//! Deletes every item in a table without dropping the table itself.

use crate::dynamodb::{ScanRequest, TableStore};
use crate::error::Result;
use tracing::{debug, info};

/// Scans key attributes only and batch-deletes each page until the scan
/// returns no `LastEvaluatedKey`. Returns the number of deleted items.
pub async fn purge_table<S>(
    store: &S,
    key_attributes: &[String],
    page_size: Option<i32>,
) -> Result<usize>
where
    S: TableStore + ?Sized,
{
    info!("Purging all items from '{}'", store.table_name());

    let mut deleted = 0;
    let mut pages = 0;
    let mut start_key = None;

    loop {
        let page = store
            .scan_page(ScanRequest {
                exclusive_start_key: start_key.take(),
                projection: Some(key_attributes.to_vec()),
                limit: page_size,
            })
            .await?;
        pages += 1;

        if !page.items.is_empty() {
            deleted += store.delete_items(page.items).await?;
        }
        debug!("Page {pages}: {deleted} items deleted so far");

        match page.last_evaluated_key {
            Some(key) => start_key = Some(key),
            None => break,
        }
    }

    info!("Purged {deleted} items from '{}' in {pages} pages", store.table_name());
    Ok(deleted)
}
