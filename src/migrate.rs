//! Copies a table into another one, transforming items on the way.
//!
//! The source is scanned page by page until DynamoDB stops returning a
//! `LastEvaluatedKey`. Each item runs through the transforms registered for
//! versions after `source_version` up to and including `target_version`, and
//! whatever survives is batch-written to the target.

use crate::dynamodb::{Item, ScanRequest, TableStore};
use crate::error::{Error, Result};
use aws_sdk_dynamodb::types::AttributeValue;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Turns an item into its next-version shape; `None` drops the item.
pub type Transform = Box<dyn Fn(Item) -> Result<Option<Item>> + Send + Sync>;

/// Version-keyed item transforms.
///
/// Versions are compared as strings, so zero-pad them (`"001"`, `"002"`, ...).
#[derive(Default)]
pub struct TransformChain {
    steps: BTreeMap<String, Transform>,
}

impl std::fmt::Debug for TransformChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformChain")
            .field("versions", &self.steps.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TransformChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the transform that produces `version` from the version before it.
    pub fn register<F>(mut self, version: impl Into<String>, transform: F) -> Self
    where
        F: Fn(Item) -> Result<Option<Item>> + Send + Sync + 'static,
    {
        self.steps.insert(version.into(), Box::new(transform));
        self
    }

    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }

    /// Transforms with `source < version <= target`, in version order.
    /// Open bounds take every version on that side.
    fn steps_between<'a>(
        &'a self,
        source: Option<&'a str>,
        target: Option<&'a str>,
    ) -> impl Iterator<Item = (&'a str, &'a Transform)> + 'a {
        self.steps
            .iter()
            .filter(move |(version, _)| source.map_or(true, |s| version.as_str() > s))
            .filter(move |(version, _)| target.map_or(true, |t| version.as_str() <= t))
            .map(|(version, transform)| (version.as_str(), transform))
    }

    /// Applies every step between the two versions, stopping if one drops the item.
    pub fn apply(
        &self,
        item: Item,
        source: Option<&str>,
        target: Option<&str>,
    ) -> Result<Option<Item>> {
        let mut current = item;
        for (version, transform) in self.steps_between(source, target) {
            match transform(current).map_err(|e| match e {
                Error::Transform { .. } => e,
                other => Error::Transform {
                    version: version.to_string(),
                    message: other.to_string(),
                },
            })? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Builds a chain from a declarative transform file.
    pub fn from_spec(spec: TransformSpec) -> Result<Self> {
        spec.0
            .into_iter()
            .try_fold(Self::new(), |chain, (version, step)| {
                let transform = step.compile(&version)?;
                Ok(chain.register(version, transform))
            })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_spec(TransformSpec::from_file(path)?)
    }
}

/// Declarative transforms keyed by version, as read from YAML:
///
/// ```yaml
/// "002":
///   rename: { name: fullName }
///   remove: [legacyId]
///   set: { schemaVersion: 2 }
/// "003":
///   require: [email]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct TransformSpec(pub BTreeMap<String, TransformStep>);

impl TransformSpec {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }
}

/// One version's worth of declarative edits, applied as
/// require, rename, remove, then set.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformStep {
    /// Items missing any of these attributes are dropped.
    pub require: Vec<String>,
    pub rename: BTreeMap<String, String>,
    pub remove: Vec<String>,
    pub set: BTreeMap<String, serde_yaml::Value>,
}

impl TransformStep {
    fn compile(self, version: &str) -> Result<Transform> {
        let set = self
            .set
            .into_iter()
            .map(|(name, value)| {
                serde_dynamo::to_attribute_value::<_, AttributeValue>(&value)
                    .map(|value| (name, value))
                    .map_err(|e| Error::Transform {
                        version: version.to_string(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        let require = self.require;
        let rename = self.rename;
        let remove = self.remove;

        Ok(Box::new(move |mut item: Item| {
            if require.iter().any(|name| !item.contains(name)) {
                return Ok(None);
            }
            for (from, to) in &rename {
                if let Some(value) = item.remove(from) {
                    item.insert(to.clone(), value);
                }
            }
            for name in &remove {
                item.remove(name);
            }
            for (name, value) in &set {
                item.insert(name.clone(), value.clone());
            }
            Ok(Some(item))
        }))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrateOptions {
    /// Items requested per scan page; DynamoDB's 1 MB page cap still applies.
    pub page_size: Option<i32>,
    pub source_version: Option<String>,
    pub target_version: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    pub pages: usize,
    pub scanned: usize,
    pub written: usize,
    pub dropped: usize,
}

/// Scans `source`, transforms every item and writes the survivors to `target`.
pub async fn migrate_data<S, T>(
    source: &S,
    target: &T,
    chain: &TransformChain,
    options: &MigrateOptions,
) -> Result<MigrationSummary>
where
    S: TableStore + ?Sized,
    T: TableStore + ?Sized,
{
    info!(
        "Migrating '{}' to '{}' (versions {} -> {})",
        source.table_name(),
        target.table_name(),
        options.source_version.as_deref().unwrap_or("start"),
        options.target_version.as_deref().unwrap_or("latest"),
    );

    let mut summary = MigrationSummary::default();
    let mut start_key = None;

    loop {
        let page = source
            .scan_page(ScanRequest {
                exclusive_start_key: start_key.take(),
                projection: None,
                limit: options.page_size,
            })
            .await?;

        summary.pages += 1;
        summary.scanned += page.items.len();

        let mut batch = Vec::with_capacity(page.items.len());
        for item in page.items {
            match chain.apply(
                item,
                options.source_version.as_deref(),
                options.target_version.as_deref(),
            )? {
                Some(item) => batch.push(item),
                None => summary.dropped += 1,
            }
        }

        if !batch.is_empty() {
            summary.written += target.put_items(batch).await?;
        }

        debug!(
            "Page {}: {} scanned, {} written so far",
            summary.pages, summary.scanned, summary.written
        );

        match page.last_evaluated_key {
            Some(key) => start_key = Some(key),
            None => break,
        }
    }

    info!(
        "Migration finished: {} pages, {} items scanned, {} written, {} dropped",
        summary.pages, summary.scanned, summary.written, summary.dropped
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamodb::mock::MemoryStore;

    fn user(i: usize) -> Item {
        Item::new()
            .set_string("hashKey", format!("user!{}", i % 3))
            .set_string("rangeKey", format!("userId#{i:03}"))
            .set_string("name", format!("User {i}"))
            .set_number("created", i as f64)
    }

    fn source(count: usize) -> MemoryStore {
        MemoryStore::new("users-v1", &["hashKey", "rangeKey"])
            .with_page_size(4)
            .seed((0..count).map(user))
    }

    #[tokio::test]
    async fn copies_every_page_until_no_last_key() {
        let source = source(10);
        let target = MemoryStore::new("users-v2", &["hashKey", "rangeKey"]);

        let summary = migrate_data(
            &source,
            &target,
            &TransformChain::new(),
            &MigrateOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(
            summary,
            MigrationSummary {
                pages: 3,
                scanned: 10,
                written: 10,
                dropped: 0
            }
        );
        assert_eq!(target.items(), source.items());

        let scans = source.scans();
        assert!(scans[0].exclusive_start_key.is_none());
        assert!(scans[1..].iter().all(|s| s.exclusive_start_key.is_some()));
    }

    #[tokio::test]
    async fn applies_only_versions_in_range() {
        let source = source(4);
        let target = MemoryStore::new("users-v3", &["hashKey", "rangeKey"]);
        let chain = TransformChain::new()
            .register("001", |item: Item| Ok(Some(item.set_string("v1", "yes"))))
            .register("002", |item: Item| Ok(Some(item.set_string("v2", "yes"))))
            .register("003", |item: Item| Ok(Some(item.set_string("v3", "yes"))))
            .register("004", |item: Item| Ok(Some(item.set_string("v4", "yes"))));

        migrate_data(
            &source,
            &target,
            &chain,
            &MigrateOptions {
                source_version: Some("001".into()),
                target_version: Some("003".into()),
                ..MigrateOptions::default()
            },
        )
        .await
        .unwrap();

        for item in target.items() {
            assert!(!item.contains("v1"));
            assert!(item.contains("v2"));
            assert!(item.contains("v3"));
            assert!(!item.contains("v4"));
        }
    }

    #[tokio::test]
    async fn dropped_items_are_counted_not_written() {
        let source = source(9);
        let target = MemoryStore::new("users-v2", &["hashKey", "rangeKey"]);
        let chain = TransformChain::new().register("002", |item: Item| {
            let keep = item.get_number("created").is_some_and(|n| n as usize % 2 == 0);
            Ok(keep.then_some(item))
        });

        let summary = migrate_data(&source, &target, &chain, &MigrateOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.scanned, 9);
        assert_eq!(summary.written, 5);
        assert_eq!(summary.dropped, 4);
        assert_eq!(target.len(), 5);
    }

    #[tokio::test]
    async fn transform_errors_name_their_version() {
        let source = source(2);
        let target = MemoryStore::new("users-v2", &["hashKey", "rangeKey"]);
        let chain = TransformChain::new()
            .register("005", |_: Item| Err(Error::Config("bad item".into())));

        let err = migrate_data(&source, &target, &chain, &MigrateOptions::default())
            .await
            .unwrap_err();

        match err {
            Error::Transform { version, message } => {
                assert_eq!(version, "005");
                assert!(message.contains("bad item"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(target.len(), 0);
    }

    #[tokio::test]
    async fn empty_source_is_one_empty_page() {
        let source = MemoryStore::new("empty", &["hashKey", "rangeKey"]);
        let target = MemoryStore::new("target", &["hashKey", "rangeKey"]);

        let summary = migrate_data(
            &source,
            &target,
            &TransformChain::new(),
            &MigrateOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(summary.pages, 1);
        assert_eq!(summary.written, 0);
        assert_eq!(target.write_calls(), 0);
    }

    #[test]
    fn declarative_steps_rename_remove_set_and_require() {
        let spec: TransformSpec = serde_yaml::from_str(
            r#"
"002":
  rename: { name: fullName }
  remove: [created]
  set: { schemaVersion: 2, status: active }
"003":
  require: [email]
"#,
        )
        .unwrap();
        let chain = TransformChain::from_spec(spec).unwrap();
        assert_eq!(chain.versions().collect::<Vec<_>>(), ["002", "003"]);

        let migrated = chain
            .apply(user(1), Some("001"), Some("002"))
            .unwrap()
            .unwrap();
        assert_eq!(migrated.get_string("fullName"), Some(&"User 1".to_string()));
        assert!(!migrated.contains("name"));
        assert!(!migrated.contains("created"));
        assert_eq!(migrated.get_number("schemaVersion"), Some(2.0));
        assert_eq!(migrated.get_string("status"), Some(&"active".to_string()));

        assert_eq!(chain.apply(user(1), None, None).unwrap(), None);
        assert!(chain
            .apply(user(1).set_string("email", "u@example.com"), None, None)
            .unwrap()
            .is_some());
    }

    #[test]
    fn unknown_step_fields_are_rejected() {
        let parsed: std::result::Result<TransformSpec, _> =
            serde_yaml::from_str("\"002\":\n  rename_all: {}\n");
        assert!(parsed.is_err());
    }
}
