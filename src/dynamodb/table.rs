use crate::entity::{AttributeType, EntityManagerConfig, TranscodeAttributeTypes};
use crate::error::Result;
use aws_sdk_dynamodb::types::{
    AttributeDefinition as SdkAttributeDefinition, GlobalSecondaryIndex as SdkGlobalSecondaryIndex,
    KeySchemaElement as SdkKeySchemaElement, KeyType as SdkKeyType, Projection as SdkProjection,
    ProjectionType as SdkProjectionType,
};
use serde::{Deserialize, Serialize};

/// The generated part of a DynamoDB `CreateTable` request.
///
/// Field names follow the DynamoDB and CloudFormation spelling so the struct
/// can be written straight into a table template. Table name, billing mode
/// and any other property are left to whoever owns the template.
///
/// # Example
///
/// ```
/// use entity_client_dynamodb::{generate_table_definition, EntityManagerConfig, TranscodeAttributeTypes};
///
/// let config = EntityManagerConfig::default();
/// let definition = generate_table_definition(&config, &TranscodeAttributeTypes::default());
///
/// assert_eq!(definition.attribute_definitions.len(), 2);
/// assert!(definition.global_secondary_indexes.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableDefinition {
    pub attribute_definitions: Vec<AttributeDefinition>,
    pub key_schema: Vec<KeySchemaElement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub global_secondary_indexes: Vec<GlobalSecondaryIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeDefinition {
    pub attribute_name: String,
    pub attribute_type: AttributeType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeySchemaElement {
    pub attribute_name: String,
    pub key_type: KeyType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyType {
    Hash,
    Range,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GlobalSecondaryIndex {
    pub index_name: String,
    pub key_schema: Vec<KeySchemaElement>,
    pub projection: Projection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Projection {
    pub projection_type: ProjectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_key_attributes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectionType {
    All,
    KeysOnly,
    Include,
}

fn key_schema(hash_key: &str, range_key: &str) -> Vec<KeySchemaElement> {
    vec![
        KeySchemaElement {
            attribute_name: hash_key.to_string(),
            key_type: KeyType::Hash,
        },
        KeySchemaElement {
            attribute_name: range_key.to_string(),
            key_type: KeyType::Range,
        },
    ]
}

/// Attribute type of a key component.
///
/// Generated keys are composite strings. Anything else takes the attribute
/// type of its transcode, and untranscoded or unmapped properties are strings.
pub fn attribute_type_of(
    config: &EntityManagerConfig,
    transcode_types: &TranscodeAttributeTypes,
    component: &str,
) -> AttributeType {
    if config.is_generated(component) {
        return AttributeType::S;
    }

    config
        .transcode_of(component)
        .and_then(|transcode| transcode_types.get(transcode))
        .unwrap_or(AttributeType::S)
}

/// Builds the generated table definition for an entity manager config.
///
/// Every key attribute used by the table or one of its indexes is declared
/// exactly once, in order of first use. Indexes come out in name order.
pub fn generate_table_definition(
    config: &EntityManagerConfig,
    transcode_types: &TranscodeAttributeTypes,
) -> TableDefinition {
    let mut attribute_definitions: Vec<AttributeDefinition> = Vec::new();
    let mut declare = |name: &str| {
        if !attribute_definitions
            .iter()
            .any(|a| a.attribute_name == name)
        {
            attribute_definitions.push(AttributeDefinition {
                attribute_name: name.to_string(),
                attribute_type: attribute_type_of(config, transcode_types, name),
            });
        }
    };

    declare(&config.hash_key);
    declare(&config.range_key);

    let global_secondary_indexes = config
        .indexes
        .iter()
        .map(|(index_name, index)| {
            declare(&index.hash_key);
            declare(&index.range_key);

            let projection = match &index.projections {
                Some(attributes) if !attributes.is_empty() => Projection {
                    projection_type: ProjectionType::Include,
                    non_key_attributes: Some(attributes.clone()),
                },
                _ => Projection {
                    projection_type: ProjectionType::All,
                    non_key_attributes: None,
                },
            };

            GlobalSecondaryIndex {
                index_name: index_name.clone(),
                key_schema: key_schema(&index.hash_key, &index.range_key),
                projection,
            }
        })
        .collect();

    TableDefinition {
        attribute_definitions,
        key_schema: key_schema(&config.hash_key, &config.range_key),
        global_secondary_indexes,
    }
}

impl From<KeyType> for SdkKeyType {
    fn from(value: KeyType) -> Self {
        match value {
            KeyType::Hash => SdkKeyType::Hash,
            KeyType::Range => SdkKeyType::Range,
        }
    }
}

impl From<ProjectionType> for SdkProjectionType {
    fn from(value: ProjectionType) -> Self {
        match value {
            ProjectionType::All => SdkProjectionType::All,
            ProjectionType::KeysOnly => SdkProjectionType::KeysOnly,
            ProjectionType::Include => SdkProjectionType::Include,
        }
    }
}

fn sdk_key_schema(elements: &[KeySchemaElement]) -> Result<Vec<SdkKeySchemaElement>> {
    elements
        .iter()
        .map(|element| {
            SdkKeySchemaElement::builder()
                .attribute_name(&element.attribute_name)
                .key_type(element.key_type.into())
                .build()
                .map_err(Into::into)
        })
        .collect()
}

impl TableDefinition {
    /// Attribute definitions as SDK request types.
    pub fn sdk_attribute_definitions(&self) -> Result<Vec<SdkAttributeDefinition>> {
        self.attribute_definitions
            .iter()
            .map(|definition| {
                SdkAttributeDefinition::builder()
                    .attribute_name(&definition.attribute_name)
                    .attribute_type(definition.attribute_type.into())
                    .build()
                    .map_err(Into::into)
            })
            .collect()
    }

    pub fn sdk_key_schema(&self) -> Result<Vec<SdkKeySchemaElement>> {
        sdk_key_schema(&self.key_schema)
    }

    /// Global secondary indexes as SDK request types, `None` when there are none.
    pub fn sdk_global_secondary_indexes(&self) -> Result<Option<Vec<SdkGlobalSecondaryIndex>>> {
        if self.global_secondary_indexes.is_empty() {
            return Ok(None);
        }

        self.global_secondary_indexes
            .iter()
            .map(|index| {
                SdkGlobalSecondaryIndex::builder()
                    .index_name(&index.index_name)
                    .set_key_schema(Some(sdk_key_schema(&index.key_schema)?))
                    .projection(
                        SdkProjection::builder()
                            .projection_type(index.projection.projection_type.into())
                            .set_non_key_attributes(index.projection.non_key_attributes.clone())
                            .build(),
                    )
                    .build()
                    .map_err(Into::into)
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }
}
