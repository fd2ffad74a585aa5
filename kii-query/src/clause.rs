use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::QueryError;

/// Declared type for a `has_field` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    String,
    Integer,
    Decimal,
    Boolean,
}

/// An immutable filter predicate.
///
/// Clauses are built with the associated constructors and combined with
/// [`Clause::and`], [`Clause::or`] and [`Clause::not`]. Once built a clause
/// cannot be changed; combining clauses produces a new tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    node: Node,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
enum Node {
    #[serde(rename = "all")]
    All,
    #[serde(rename = "eq")]
    Eq { field: String, value: Value },
    #[serde(rename = "range")]
    Range {
        field: String,
        #[serde(rename = "lowerLimit", skip_serializing_if = "Option::is_none")]
        lower_limit: Option<Value>,
        #[serde(rename = "lowerIncluded", skip_serializing_if = "Option::is_none")]
        lower_included: Option<bool>,
        #[serde(rename = "upperLimit", skip_serializing_if = "Option::is_none")]
        upper_limit: Option<Value>,
        #[serde(rename = "upperIncluded", skip_serializing_if = "Option::is_none")]
        upper_included: Option<bool>,
    },
    #[serde(rename = "in")]
    In { field: String, values: Vec<Value> },
    #[serde(rename = "prefix")]
    Prefix { field: String, prefix: String },
    #[serde(rename = "hasField")]
    HasField {
        field: String,
        #[serde(rename = "fieldType")]
        field_type: FieldType,
    },
    #[serde(rename = "not")]
    Not { clause: Box<Node> },
    #[serde(rename = "and")]
    And { clauses: Vec<Node> },
    #[serde(rename = "or")]
    Or { clauses: Vec<Node> },
}

impl Clause {
    fn from_node(node: Node) -> Self {
        Self { node }
    }

    fn lower(field: &str, value: Value, included: bool) -> Self {
        Self::from_node(Node::Range {
            field: field.into(),
            lower_limit: Some(value),
            lower_included: Some(included),
            upper_limit: None,
            upper_included: None,
        })
    }

    fn upper(field: &str, value: Value, included: bool) -> Self {
        Self::from_node(Node::Range {
            field: field.into(),
            lower_limit: None,
            lower_included: None,
            upper_limit: Some(value),
            upper_included: Some(included),
        })
    }

    /// Matches every entity in the target.
    pub fn all() -> Self {
        Self::from_node(Node::All)
    }

    /// `field == value`
    pub fn equals(field: &str, value: impl Into<Value>) -> Self {
        Self::from_node(Node::Eq {
            field: field.into(),
            value: value.into(),
        })
    }

    /// `field != value`
    pub fn not_equals(field: &str, value: impl Into<Value>) -> Self {
        Self::not(Self::equals(field, value))
    }

    /// `field > value`
    pub fn greater_than(field: &str, value: impl Into<Value>) -> Self {
        Self::lower(field, value.into(), false)
    }

    /// `field >= value`
    pub fn greater_than_or_equal(field: &str, value: impl Into<Value>) -> Self {
        Self::lower(field, value.into(), true)
    }

    /// `field < value`
    pub fn less_than(field: &str, value: impl Into<Value>) -> Self {
        Self::upper(field, value.into(), false)
    }

    /// `field <= value`
    pub fn less_than_or_equal(field: &str, value: impl Into<Value>) -> Self {
        Self::upper(field, value.into(), true)
    }

    /// `field` is one of `values`.
    pub fn in_values<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::from_node(Node::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    /// String `field` starts with `prefix`.
    pub fn starts_with(field: &str, prefix: &str) -> Self {
        Self::from_node(Node::Prefix {
            field: field.into(),
            prefix: prefix.into(),
        })
    }

    /// `field` exists and holds a value of `field_type`.
    pub fn has_field(field: &str, field_type: FieldType) -> Self {
        Self::from_node(Node::HasField {
            field: field.into(),
            field_type,
        })
    }

    /// Negates `clause`.
    pub fn not(clause: Clause) -> Self {
        Self::from_node(Node::Not {
            clause: Box::new(clause.node),
        })
    }

    /// All of `clauses` must match.
    pub fn and(clauses: impl IntoIterator<Item = Clause>) -> Self {
        Self::from_node(Node::And {
            clauses: clauses.into_iter().map(|c| c.node).collect(),
        })
    }

    /// Any of `clauses` must match.
    pub fn or(clauses: impl IntoIterator<Item = Clause>) -> Self {
        Self::from_node(Node::Or {
            clauses: clauses.into_iter().map(|c| c.node).collect(),
        })
    }

    /// Checks the tree for shapes the server would reject.
    pub fn validate(&self) -> Result<(), QueryError> {
        validate_node(&self.node)
    }

    /// Wire representation of the clause.
    pub fn to_json(&self) -> Value {
        // A tree of strings, bools and already-built JSON values cannot fail to serialize.
        serde_json::to_value(&self.node).unwrap_or(Value::Null)
    }
}

fn validate_node(node: &Node) -> Result<(), QueryError> {
    match node {
        Node::All => Ok(()),
        Node::Eq { field, value } => {
            check_field(field)?;
            check_scalar(field, value)
        }
        Node::Range {
            field,
            lower_limit,
            upper_limit,
            ..
        } => {
            check_field(field)?;
            for v in lower_limit.iter().chain(upper_limit.iter()) {
                check_scalar(field, v)?;
            }
            Ok(())
        }
        Node::In { field, values } => {
            check_field(field)?;
            if values.is_empty() {
                return Err(QueryError::EmptyIn(field.clone()));
            }
            values.iter().try_for_each(|v| check_scalar(field, v))
        }
        Node::Prefix { field, .. } | Node::HasField { field, .. } => check_field(field),
        Node::Not { clause } => validate_node(clause),
        Node::And { clauses } => validate_compound("and", clauses),
        Node::Or { clauses } => validate_compound("or", clauses),
    }
}

fn validate_compound(name: &'static str, clauses: &[Node]) -> Result<(), QueryError> {
    if clauses.is_empty() {
        return Err(QueryError::EmptyCompound(name));
    }
    clauses.iter().try_for_each(validate_node)
}

fn check_field(field: &str) -> Result<(), QueryError> {
    if field.is_empty() {
        Err(QueryError::EmptyField)
    } else {
        Ok(())
    }
}

fn check_scalar(field: &str, value: &Value) -> Result<(), QueryError> {
    match value {
        Value::Array(_) | Value::Object(_) | Value::Null => {
            Err(QueryError::NonScalarValue(field.to_string()))
        }
        _ => Ok(()),
    }
}
