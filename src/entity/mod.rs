//! Configuration shape of the entity manager.
//!
//! The entity manager owns sharding and key generation; this crate only needs
//! to know which attributes are keys, which of them are generated, what the
//! indexes look like and how properties are transcoded. Field names follow
//! the entity manager's camelCase so existing config files load unchanged.

mod transcode;

pub use transcode::{AttributeType, TranscodeAttributeTypes};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub const DEFAULT_HASH_KEY: &str = "hashKey";
pub const DEFAULT_RANGE_KEY: &str = "rangeKey";

fn default_hash_key() -> String {
    DEFAULT_HASH_KEY.to_string()
}

fn default_range_key() -> String {
    DEFAULT_RANGE_KEY.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityManagerConfig {
    /// Table partition key. Always holds a generated, sharded value.
    #[serde(default = "default_hash_key")]
    pub hash_key: String,
    /// Table sort key. Always holds a generated value.
    #[serde(default = "default_range_key")]
    pub range_key: String,
    #[serde(default)]
    pub entities: BTreeMap<String, EntityConfig>,
    #[serde(default)]
    pub generated_properties: GeneratedProperties,
    #[serde(default)]
    pub indexes: BTreeMap<String, IndexConfig>,
    #[serde(default)]
    pub property_transcodes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityConfig {
    pub unique_property: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_property: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_page_size: Option<u32>,
}

/// Composite keys derived from other item properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedProperties {
    #[serde(default)]
    pub sharded: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub unsharded: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexConfig {
    pub hash_key: String,
    pub range_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projections: Option<Vec<String>>,
}

impl Default for EntityManagerConfig {
    fn default() -> Self {
        Self::with_keys(DEFAULT_HASH_KEY, DEFAULT_RANGE_KEY)
    }
}

impl EntityManagerConfig {
    /// A config that declares nothing but the table keys.
    pub fn with_keys(hash_key: impl Into<String>, range_key: impl Into<String>) -> Self {
        Self {
            hash_key: hash_key.into(),
            range_key: range_key.into(),
            entities: BTreeMap::new(),
            generated_properties: GeneratedProperties::default(),
            indexes: BTreeMap::new(),
            property_transcodes: BTreeMap::new(),
        }
    }

    /// Reads a YAML (or JSON) config file and validates its structure.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| {
            Error::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Names of the table key attributes, hash key first.
    pub fn key_attributes(&self) -> [&str; 2] {
        [self.hash_key.as_str(), self.range_key.as_str()]
    }

    /// Whether `property` holds a value generated by the entity manager.
    pub fn is_generated(&self, property: &str) -> bool {
        property == self.hash_key
            || property == self.range_key
            || self.generated_properties.sharded.contains_key(property)
            || self.generated_properties.unsharded.contains_key(property)
    }

    pub fn transcode_of(&self, property: &str) -> Option<&str> {
        self.property_transcodes.get(property).map(String::as_str)
    }

    pub fn index(&self, name: &str) -> Result<&IndexConfig> {
        self.indexes
            .get(name)
            .ok_or_else(|| Error::UnknownIndex(name.to_string()))
    }

    /// Structural checks run when a config file is loaded.
    pub fn validate(&self) -> Result<()> {
        if self.hash_key.is_empty() || self.range_key.is_empty() {
            return Err(Error::Config("table keys must not be empty".into()));
        }
        if self.hash_key == self.range_key {
            return Err(Error::Config(format!(
                "hash key and range key are both '{}'",
                self.hash_key
            )));
        }

        let sharded = &self.generated_properties.sharded;
        let unsharded = &self.generated_properties.unsharded;
        if let Some(name) = sharded.keys().find(|name| unsharded.contains_key(*name)) {
            return Err(Error::Config(format!(
                "generated property '{name}' is both sharded and unsharded"
            )));
        }

        for (name, index) in &self.indexes {
            if index.hash_key != self.hash_key && !sharded.contains_key(&index.hash_key) {
                return Err(Error::Config(format!(
                    "index '{name}' hash key '{}' is neither the table hash key nor a sharded generated property",
                    index.hash_key
                )));
            }
            if index.range_key.is_empty() {
                return Err(Error::Config(format!("index '{name}' has no range key")));
            }
            if let Some(projections) = &index.projections {
                let unique: BTreeSet<&String> = projections.iter().collect();
                if unique.len() != projections.len() {
                    return Err(Error::Config(format!(
                        "index '{name}' lists a projection twice"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const USER_CONFIG: &str = r#"
hashKey: hashKey
rangeKey: rangeKey
entities:
  user:
    uniqueProperty: userId
    timestampProperty: created
generatedProperties:
  sharded:
    userHashKey: [userId]
  unsharded:
    firstNameRangeKey: [firstNameCanonical, lastNameCanonical]
indexes:
  created:
    hashKey: hashKey
    rangeKey: created
  userCreated:
    hashKey: userHashKey
    rangeKey: created
    projections: [email, phone]
  firstName:
    hashKey: hashKey
    rangeKey: firstNameRangeKey
  active:
    hashKey: hashKey
    rangeKey: active
propertyTranscodes:
  created: timestamp
  email: string
  firstNameCanonical: string
  lastNameCanonical: string
  active: boolean
  userId: string
"#;

    pub(crate) fn user_config() -> EntityManagerConfig {
        serde_yaml::from_str(USER_CONFIG).unwrap()
    }

    #[test]
    fn parses_entity_manager_config() {
        let config = user_config();
        assert_eq!(config.key_attributes(), ["hashKey", "rangeKey"]);
        assert_eq!(config.entities["user"].unique_property, "userId");
        assert_eq!(config.indexes.len(), 4);
        assert_eq!(
            config.indexes["userCreated"].projections,
            Some(vec!["email".to_string(), "phone".to_string()])
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn keys_default_when_omitted() {
        let config: EntityManagerConfig = serde_yaml::from_str("indexes: {}").unwrap();
        assert_eq!(config, EntityManagerConfig::default());
    }

    #[test]
    fn generated_properties_are_recognised() {
        let config = user_config();
        assert!(config.is_generated("hashKey"));
        assert!(config.is_generated("rangeKey"));
        assert!(config.is_generated("userHashKey"));
        assert!(config.is_generated("firstNameRangeKey"));
        assert!(!config.is_generated("created"));
        assert_eq!(config.transcode_of("created"), Some("timestamp"));
        assert_eq!(config.transcode_of("phone"), None);
    }

    #[test]
    fn rejects_unsharded_index_hash_key() {
        let mut config = user_config();
        config.indexes.insert(
            "bad".into(),
            IndexConfig {
                hash_key: "firstNameRangeKey".into(),
                range_key: "created".into(),
                projections: None,
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("index 'bad' hash key"));
    }

    #[test]
    fn rejects_identical_table_keys() {
        let config = EntityManagerConfig::with_keys("pk", "pk");
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_index_is_an_error() {
        let config = user_config();
        assert!(matches!(config.index("nope"), Err(Error::UnknownIndex(name)) if name == "nope"));
    }
}
