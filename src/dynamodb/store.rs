use crate::dynamodb::Item;
use crate::error::Result;
use async_trait::async_trait;

/// One `Scan` call's worth of parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanRequest {
    pub exclusive_start_key: Option<Item>,
    /// Attributes to return; all attributes when `None`.
    pub projection: Option<Vec<String>>,
    pub limit: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPage {
    pub items: Vec<Item>,
    /// Absent once the scan has reached the end of the table.
    pub last_evaluated_key: Option<Item>,
}

/// The table operations the scan/transform/write loops depend on.
#[async_trait]
pub trait TableStore: Send + Sync {
    fn table_name(&self) -> &str;

    async fn scan_page(&self, request: ScanRequest) -> Result<ScanPage>;

    /// Writes every item, returning how many were written.
    async fn put_items(&self, items: Vec<Item>) -> Result<usize>;

    /// Deletes the items identified by `keys`, returning how many were deleted.
    async fn delete_items(&self, keys: Vec<Item>) -> Result<usize>;
}
