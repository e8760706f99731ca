use crate::error::Result;
use aws_sdk_dynamodb::types::AttributeValue;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;

/// A DynamoDB item: attribute names mapped to attribute values.
///
/// Items reaching this crate already carry the generated keys the entity
/// manager computed for them. A key is just an `Item` holding the key
/// attributes only.
///
/// # Example
///
/// ```
/// use entity_client_dynamodb::Item;
///
/// let item = Item::new()
///     .set_string("hashKey", "user!1")
///     .set_string("rangeKey", "userId#42")
///     .set_number("created", 1_700_000_000_000.0);
///
/// assert_eq!(item.get_string("hashKey"), Some(&"user!1".to_string()));
/// ```
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Item {
    pub(crate) attributes: HashMap<String, AttributeValue>,
}

impl Item {
    /// Creates a new empty `Item`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts any serializable record into an item.
    pub fn from_record<T: Serialize>(record: &T) -> Result<Self> {
        Ok(Self {
            attributes: serde_dynamo::to_item(record)?,
        })
    }

    /// Converts the item back into a typed record.
    pub fn to_record<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_dynamo::from_item(self.attributes.clone())?)
    }

    pub fn set(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Sets a string attribute.
    pub fn set_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .insert(key.into(), AttributeValue::S(value.into()));
        self
    }

    /// Sets a number attribute.
    pub fn set_number(mut self, key: impl Into<String>, value: impl Into<f64>) -> Self {
        self.attributes
            .insert(key.into(), AttributeValue::N(value.into().to_string()));
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: AttributeValue) -> Option<AttributeValue> {
        self.attributes.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<AttributeValue> {
        self.attributes.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Gets the value of an attribute as a string.
    ///
    /// Returns `None` if the attribute doesn't exist or is not a string.
    pub fn get_string(&self, key: &str) -> Option<&String> {
        self.attributes.get(key).and_then(|av| av.as_s().ok())
    }

    /// Gets the value of an attribute as a number (f64).
    ///
    /// Returns `None` if the attribute doesn't exist, is not a number, or can't be parsed as f64.
    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.attributes
            .get(key)
            .and_then(|av| av.as_n().ok())
            .and_then(|n| n.parse().ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Projects the item onto `key_attributes`.
    ///
    /// Returns `None` when any key attribute is missing.
    pub fn key(&self, key_attributes: &[&str]) -> Option<Item> {
        key_attributes
            .iter()
            .map(|name| {
                self.attributes
                    .get(*name)
                    .map(|value| (name.to_string(), value.clone()))
            })
            .collect::<Option<HashMap<_, _>>>()
            .map(|attributes| Item { attributes })
    }

    pub fn attributes(&self) -> &HashMap<String, AttributeValue> {
        &self.attributes
    }

    pub fn into_attributes(self) -> HashMap<String, AttributeValue> {
        self.attributes
    }
}

impl From<HashMap<String, AttributeValue>> for Item {
    fn from(attributes: HashMap<String, AttributeValue>) -> Self {
        Self { attributes }
    }
}

impl From<Item> for HashMap<String, AttributeValue> {
    fn from(item: Item) -> Self {
        item.attributes
    }
}
