use super::{Item, ScanPage, ScanRequest, TableStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// In-memory table ordered by key, paging like `Scan` does.
#[derive(Debug)]
pub struct MemoryStore {
    table_name: String,
    key_attributes: Vec<String>,
    page_size: usize,
    items: Mutex<BTreeMap<String, Item>>,
    scans: Mutex<Vec<ScanRequest>>,
    write_calls: Mutex<usize>,
}

fn key_part(value: &AttributeValue) -> String {
    match value {
        AttributeValue::S(s) => s.clone(),
        AttributeValue::N(n) => n.clone(),
        other => format!("{other:?}"),
    }
}

impl MemoryStore {
    pub fn new(table_name: &str, key_attributes: &[&str]) -> Self {
        Self {
            table_name: table_name.into(),
            key_attributes: key_attributes.iter().map(|k| k.to_string()).collect(),
            page_size: 100,
            items: Mutex::new(BTreeMap::new()),
            scans: Mutex::new(Vec::new()),
            write_calls: Mutex::new(0),
        }
    }

    /// Caps scan pages below any requested limit.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn seed(self, items: impl IntoIterator<Item = Item>) -> Self {
        {
            let mut stored = self.items.lock().unwrap();
            for item in items {
                let key = self.sort_key(&item).unwrap();
                stored.insert(key, item);
            }
        }
        self
    }

    pub fn items(&self) -> Vec<Item> {
        self.items.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn scans(&self) -> Vec<ScanRequest> {
        self.scans.lock().unwrap().clone()
    }

    pub fn write_calls(&self) -> usize {
        *self.write_calls.lock().unwrap()
    }

    fn key_names(&self) -> Vec<&str> {
        self.key_attributes.iter().map(String::as_str).collect()
    }

    fn sort_key(&self, item: &Item) -> Result<String> {
        let key = item
            .key(&self.key_names())
            .ok_or_else(|| Error::MissingKey(self.key_attributes.clone()))?;
        Ok(self
            .key_attributes
            .iter()
            .filter_map(|name| key.get(name).map(key_part))
            .collect::<Vec<_>>()
            .join("|"))
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    fn table_name(&self) -> &str {
        &self.table_name
    }

    async fn scan_page(&self, request: ScanRequest) -> Result<ScanPage> {
        self.scans.lock().unwrap().push(request.clone());

        let start = match &request.exclusive_start_key {
            Some(key) => Some(self.sort_key(key)?),
            None => None,
        };
        let limit = request
            .limit
            .map(|l| l as usize)
            .unwrap_or(usize::MAX)
            .min(self.page_size);

        let stored = self.items.lock().unwrap();
        let mut remaining = stored
            .iter()
            .filter(|(key, _)| start.as_ref().map_or(true, |start| *key > start))
            .map(|(_, item)| item.clone());

        let mut items: Vec<Item> = remaining.by_ref().take(limit).collect();
        let more = remaining.next().is_some();

        let last_evaluated_key = match (more, items.last()) {
            (true, Some(last)) => last.key(&self.key_names()),
            _ => None,
        };

        if let Some(projection) = &request.projection {
            for item in items.iter_mut() {
                item.attributes.retain(|name, _| projection.contains(name));
            }
        }

        Ok(ScanPage {
            items,
            last_evaluated_key,
        })
    }

    async fn put_items(&self, items: Vec<Item>) -> Result<usize> {
        *self.write_calls.lock().unwrap() += 1;
        let count = items.len();
        let mut stored = self.items.lock().unwrap();
        for item in items {
            let key = self.sort_key(&item)?;
            stored.insert(key, item);
        }
        Ok(count)
    }

    async fn delete_items(&self, keys: Vec<Item>) -> Result<usize> {
        *self.write_calls.lock().unwrap() += 1;
        let mut stored = self.items.lock().unwrap();
        let mut deleted = 0;
        for key in keys {
            if stored.remove(&self.sort_key(&key)?).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
