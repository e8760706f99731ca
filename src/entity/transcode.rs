use aws_sdk_dynamodb::types::ScalarAttributeType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scalar attribute types a key attribute can be declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    S,
    N,
    B,
}

impl From<AttributeType> for ScalarAttributeType {
    fn from(value: AttributeType) -> Self {
        match value {
            AttributeType::S => ScalarAttributeType::S,
            AttributeType::N => ScalarAttributeType::N,
            AttributeType::B => ScalarAttributeType::B,
        }
    }
}

/// Maps transcode names to the attribute type their encoded values use.
///
/// Transcodes missing from the table encode to strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TranscodeAttributeTypes(BTreeMap<String, AttributeType>);

impl Default for TranscodeAttributeTypes {
    fn default() -> Self {
        Self(
            ["bigint", "fix6", "int", "number", "timestamp"]
                .into_iter()
                .map(|name| (name.to_string(), AttributeType::N))
                .collect(),
        )
    }
}

impl TranscodeAttributeTypes {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, transcode: impl Into<String>, attribute_type: AttributeType) -> Self {
        self.0.insert(transcode.into(), attribute_type);
        self
    }

    pub fn get(&self, transcode: &str) -> Option<AttributeType> {
        self.0.get(transcode).copied()
    }

    /// Adds or replaces entries from `overrides`.
    pub fn merge(mut self, overrides: TranscodeAttributeTypes) -> Self {
        self.0.extend(overrides.0);
        self
    }
}
