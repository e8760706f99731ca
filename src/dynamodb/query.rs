//! Query construction.
//!
//! `QueryBuilder` turns a hash key value plus optional range key and filter
//! conditions into a `QueryRequest`: expressions with `#nN` name and `:vN`
//! value placeholders and the maps that resolve them. Building is pure, so the
//! generated expressions can be inspected without talking to DynamoDB.

use crate::entity::EntityManagerConfig;
use crate::error::{Error, Result};
use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;

/// Comparison operators usable in key and filter conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparator {
    fn as_str(self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Ne => "<>",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
        }
    }
}

/// Condition on the range key of the queried table or index.
///
/// DynamoDB does not allow `<>` in key conditions, so `Compare` rejects it
/// when the request is built.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeKeyCondition {
    Compare {
        attribute: String,
        comparator: Comparator,
        value: AttributeValue,
    },
    BeginsWith {
        attribute: String,
        prefix: String,
    },
    Between {
        attribute: String,
        from: AttributeValue,
        to: AttributeValue,
    },
}

impl RangeKeyCondition {
    pub fn compare(attribute: impl Into<String>, comparator: Comparator, value: AttributeValue) -> Self {
        Self::Compare {
            attribute: attribute.into(),
            comparator,
            value,
        }
    }

    pub fn begins_with(attribute: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::BeginsWith {
            attribute: attribute.into(),
            prefix: prefix.into(),
        }
    }

    pub fn between(attribute: impl Into<String>, from: AttributeValue, to: AttributeValue) -> Self {
        Self::Between {
            attribute: attribute.into(),
            from,
            to,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Junction {
    And,
    Or,
}

/// Filter applied by DynamoDB after the key condition.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterCondition {
    Compare {
        attribute: String,
        comparator: Comparator,
        value: AttributeValue,
    },
    Between {
        attribute: String,
        from: AttributeValue,
        to: AttributeValue,
    },
    BeginsWith {
        attribute: String,
        prefix: String,
    },
    Contains {
        attribute: String,
        value: AttributeValue,
    },
    Exists(String),
    NotExists(String),
    In {
        attribute: String,
        values: Vec<AttributeValue>,
    },
    Group {
        junction: Junction,
        conditions: Vec<FilterCondition>,
    },
    Not(Box<FilterCondition>),
}

impl FilterCondition {
    pub fn compare(attribute: impl Into<String>, comparator: Comparator, value: AttributeValue) -> Self {
        Self::Compare {
            attribute: attribute.into(),
            comparator,
            value,
        }
    }

    pub fn between(attribute: impl Into<String>, from: AttributeValue, to: AttributeValue) -> Self {
        Self::Between {
            attribute: attribute.into(),
            from,
            to,
        }
    }

    pub fn begins_with(attribute: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::BeginsWith {
            attribute: attribute.into(),
            prefix: prefix.into(),
        }
    }

    pub fn contains(attribute: impl Into<String>, value: AttributeValue) -> Self {
        Self::Contains {
            attribute: attribute.into(),
            value,
        }
    }

    pub fn exists(attribute: impl Into<String>) -> Self {
        Self::Exists(attribute.into())
    }

    pub fn not_exists(attribute: impl Into<String>) -> Self {
        Self::NotExists(attribute.into())
    }

    pub fn one_of(attribute: impl Into<String>, values: Vec<AttributeValue>) -> Self {
        Self::In {
            attribute: attribute.into(),
            values,
        }
    }

    pub fn and(conditions: Vec<FilterCondition>) -> Self {
        Self::Group {
            junction: Junction::And,
            conditions,
        }
    }

    pub fn or(conditions: Vec<FilterCondition>) -> Self {
        Self::Group {
            junction: Junction::Or,
            conditions,
        }
    }

    pub fn negate(condition: FilterCondition) -> Self {
        Self::Not(Box::new(condition))
    }
}

/// Placeholder allocation shared by every expression of one request.
#[derive(Debug, Default)]
struct Expressions {
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
}

impl Expressions {
    fn name(&mut self, attribute: &str) -> String {
        if let Some((placeholder, _)) = self.names.iter().find(|(_, name)| *name == attribute) {
            return placeholder.clone();
        }
        let placeholder = format!("#n{}", self.names.len());
        self.names.insert(placeholder.clone(), attribute.to_string());
        placeholder
    }

    fn value(&mut self, value: AttributeValue) -> String {
        let placeholder = format!(":v{}", self.values.len());
        self.values.insert(placeholder.clone(), value);
        placeholder
    }

    fn range_key(&mut self, condition: &RangeKeyCondition) -> Result<String> {
        Ok(match condition {
            RangeKeyCondition::Compare {
                comparator: Comparator::Ne,
                ..
            } => {
                return Err(Error::InvalidQuery(
                    "'<>' is not a valid range key condition".into(),
                ))
            }
            RangeKeyCondition::Compare {
                attribute,
                comparator,
                value,
            } => format!(
                "{} {} {}",
                self.name(attribute),
                comparator.as_str(),
                self.value(value.clone())
            ),
            RangeKeyCondition::BeginsWith { attribute, prefix } => format!(
                "begins_with({}, {})",
                self.name(attribute),
                self.value(AttributeValue::S(prefix.clone()))
            ),
            RangeKeyCondition::Between {
                attribute,
                from,
                to,
            } => format!(
                "{} BETWEEN {} AND {}",
                self.name(attribute),
                self.value(from.clone()),
                self.value(to.clone())
            ),
        })
    }

    /// Renders a filter; empty groups render as an empty string so the
    /// caller can drop them.
    fn filter(&mut self, condition: &FilterCondition) -> Result<String> {
        Ok(match condition {
            FilterCondition::Compare {
                attribute,
                comparator,
                value,
            } => format!(
                "{} {} {}",
                self.name(attribute),
                comparator.as_str(),
                self.value(value.clone())
            ),
            FilterCondition::Between {
                attribute,
                from,
                to,
            } => format!(
                "{} BETWEEN {} AND {}",
                self.name(attribute),
                self.value(from.clone()),
                self.value(to.clone())
            ),
            FilterCondition::BeginsWith { attribute, prefix } => format!(
                "begins_with({}, {})",
                self.name(attribute),
                self.value(AttributeValue::S(prefix.clone()))
            ),
            FilterCondition::Contains { attribute, value } => format!(
                "contains({}, {})",
                self.name(attribute),
                self.value(value.clone())
            ),
            FilterCondition::Exists(attribute) => {
                format!("attribute_exists({})", self.name(attribute))
            }
            FilterCondition::NotExists(attribute) => {
                format!("attribute_not_exists({})", self.name(attribute))
            }
            FilterCondition::In { attribute, values } => {
                if values.is_empty() {
                    return Err(Error::InvalidQuery(format!(
                        "IN on '{attribute}' needs at least one value"
                    )));
                }
                let name = self.name(attribute);
                let placeholders: Vec<String> =
                    values.iter().map(|v| self.value(v.clone())).collect();
                format!("{} IN ({})", name, placeholders.join(", "))
            }
            FilterCondition::Group {
                junction,
                conditions,
            } => {
                let separator = match junction {
                    Junction::And => " AND ",
                    Junction::Or => " OR ",
                };
                let mut parts = Vec::with_capacity(conditions.len());
                for condition in conditions {
                    let part = self.filter(condition)?;
                    if !part.is_empty() {
                        parts.push(part);
                    }
                }
                match parts.len() {
                    0 => String::new(),
                    1 => parts.into_iter().next().unwrap_or_default(),
                    _ => format!("({})", parts.join(separator)),
                }
            }
            FilterCondition::Not(inner) => match self.filter(inner)? {
                inner if inner.is_empty() => String::new(),
                inner => format!("NOT ({inner})"),
            },
        })
    }
}

/// A fully built query, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub table_name: String,
    pub index_name: Option<String>,
    pub key_condition_expression: String,
    pub filter_expression: Option<String>,
    pub projection_expression: Option<String>,
    pub expression_attribute_names: HashMap<String, String>,
    pub expression_attribute_values: HashMap<String, AttributeValue>,
    pub limit: Option<i32>,
    pub scan_index_forward: Option<bool>,
    pub consistent_read: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryBuilder {
    table_name: String,
    index_name: Option<String>,
    hash_key: String,
    hash_value: String,
    range_key_condition: Option<RangeKeyCondition>,
    filters: Vec<FilterCondition>,
    projection: Option<Vec<String>>,
    limit: Option<i32>,
    scan_index_forward: Option<bool>,
    consistent_read: Option<bool>,
}

impl QueryBuilder {
    /// Starts a query on the table's own key.
    ///
    /// Hash keys are generated, so their values are always strings.
    pub fn new(
        table_name: impl Into<String>,
        hash_key: impl Into<String>,
        hash_value: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            index_name: None,
            hash_key: hash_key.into(),
            hash_value: hash_value.into(),
            range_key_condition: None,
            filters: Vec::new(),
            projection: None,
            limit: None,
            scan_index_forward: None,
            consistent_read: None,
        }
    }

    /// Starts a query on a declared index, taking its hash key name from the config.
    pub fn for_index(
        config: &EntityManagerConfig,
        table_name: impl Into<String>,
        index_name: &str,
        hash_value: impl Into<String>,
    ) -> Result<Self> {
        let index = config.index(index_name)?;
        Ok(Self::new(table_name, &index.hash_key, hash_value).index(index_name))
    }

    pub fn index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    /// Same query against another shard of the hash key.
    pub fn hash_value(mut self, hash_value: impl Into<String>) -> Self {
        self.hash_value = hash_value.into();
        self
    }

    pub fn range_key_condition(mut self, condition: RangeKeyCondition) -> Self {
        self.range_key_condition = Some(condition);
        self
    }

    /// Adds a filter; multiple filters are joined with `AND`.
    pub fn filter(mut self, condition: FilterCondition) -> Self {
        self.filters.push(condition);
        self
    }

    pub fn projection<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(attributes.into_iter().map(Into::into).collect());
        self
    }

    pub fn limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn scan_index_forward(mut self, forward: bool) -> Self {
        self.scan_index_forward = Some(forward);
        self
    }

    pub fn consistent_read(mut self, consistent: bool) -> Self {
        self.consistent_read = Some(consistent);
        self
    }

    pub fn build(&self) -> Result<QueryRequest> {
        let mut expressions = Expressions::default();

        let mut key_condition_expression = format!(
            "{} = {}",
            expressions.name(&self.hash_key),
            expressions.value(AttributeValue::S(self.hash_value.clone()))
        );
        if let Some(condition) = &self.range_key_condition {
            key_condition_expression.push_str(" AND ");
            key_condition_expression.push_str(&expressions.range_key(condition)?);
        }

        let mut filter_parts = Vec::with_capacity(self.filters.len());
        for filter in &self.filters {
            let part = expressions.filter(filter)?;
            if !part.is_empty() {
                filter_parts.push(part);
            }
        }
        let filter_expression = match filter_parts.len() {
            0 => None,
            _ => Some(filter_parts.join(" AND ")),
        };

        let projection_expression = self.projection.as_ref().map(|attributes| {
            attributes
                .iter()
                .map(|a| expressions.name(a))
                .collect::<Vec<_>>()
                .join(", ")
        });

        Ok(QueryRequest {
            table_name: self.table_name.clone(),
            index_name: self.index_name.clone(),
            key_condition_expression,
            filter_expression,
            projection_expression,
            expression_attribute_names: expressions.names,
            expression_attribute_values: expressions.values,
            limit: self.limit,
            scan_index_forward: self.scan_index_forward,
            consistent_read: self.consistent_read,
        })
    }
}
