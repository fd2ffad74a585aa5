use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

use crate::{Clause, QueryError};

/// Smallest accepted result limit.
pub const MIN_LIMIT: u32 = 1;
/// Largest accepted result limit.
pub const MAX_LIMIT: u32 = 100;

/// What a query runs against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryTarget {
    /// An object bucket, by name.
    Collection(String),
    /// A file bucket, by name.
    Container(String),
}

impl fmt::Display for QueryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryTarget::Collection(name) => write!(f, "collection {name:?}"),
            QueryTarget::Container(name) => write!(f, "container {name:?}"),
        }
    }
}

/// Sort directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

/// A clause plus its execution envelope.
///
/// Apart from [`Query::sort_by_asc`], [`Query::sort_by_desc`] and
/// [`Query::set_limit`] a query never changes after construction. The limit
/// setter accepts any value; range checking happens in [`Query::validate`],
/// which every executor calls before issuing a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    clause: Clause,
    target: Option<QueryTarget>,
    sort: Option<Sort>,
    limit: Option<u32>,
}

impl Query {
    /// Creates a query around `clause`, with no target, sort or limit.
    pub fn with_clause(clause: Clause) -> Self {
        Self {
            clause,
            target: None,
            sort: None,
            limit: None,
        }
    }

    /// Matches everything in whatever bucket it runs against.
    pub fn all() -> Self {
        Self::with_clause(Clause::all())
    }

    /// Pins the query to an object collection.
    #[must_use]
    pub fn on_collection(mut self, name: &str) -> Self {
        self.target = Some(QueryTarget::Collection(name.to_string()));
        self
    }

    /// Pins the query to a file container.
    #[must_use]
    pub fn on_container(mut self, name: &str) -> Self {
        self.target = Some(QueryTarget::Container(name.to_string()));
        self
    }

    /// Sorts ascending by `field`, replacing any earlier sort.
    pub fn sort_by_asc(&mut self, field: &str) {
        self.sort = Some(Sort {
            field: field.to_string(),
            descending: false,
        });
    }

    /// Sorts descending by `field`, replacing any earlier sort.
    pub fn sort_by_desc(&mut self, field: &str) {
        self.sort = Some(Sort {
            field: field.to_string(),
            descending: true,
        });
    }

    /// Sets the maximum number of results per page.
    pub fn set_limit(&mut self, limit: u32) {
        self.limit = Some(limit);
    }

    pub fn clause(&self) -> &Clause {
        &self.clause
    }

    pub fn target(&self) -> Option<&QueryTarget> {
        self.target.as_ref()
    }

    /// The object collection queried, if any.
    pub fn collection(&self) -> Option<&str> {
        match &self.target {
            Some(QueryTarget::Collection(name)) => Some(name),
            _ => None,
        }
    }

    /// The file container queried, if any.
    pub fn container(&self) -> Option<&str> {
        match &self.target {
            Some(QueryTarget::Container(name)) => Some(name),
            _ => None,
        }
    }

    pub fn sort(&self) -> Option<&Sort> {
        self.sort.as_ref()
    }

    pub fn sort_field(&self) -> Option<&str> {
        self.sort.as_ref().map(|s| s.field.as_str())
    }

    pub fn sort_descending(&self) -> bool {
        self.sort.as_ref().is_some_and(|s| s.descending)
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    /// Checks limit range, sort field and clause shape.
    pub fn validate(&self) -> Result<(), QueryError> {
        if let Some(limit) = self.limit {
            if !(MIN_LIMIT..=MAX_LIMIT).contains(&limit) {
                return Err(QueryError::LimitOutOfRange(limit));
            }
        }
        if let Some(sort) = &self.sort {
            if sort.field.is_empty() {
                return Err(QueryError::EmptySortField);
            }
        }
        self.clause.validate()
    }

    /// Returns a copy of this query bound to `target`.
    ///
    /// A query without a target adopts the executor's; a query already
    /// pinned elsewhere is rejected.
    pub fn bind(&self, target: QueryTarget) -> Result<Query, QueryError> {
        match &self.target {
            Some(existing) if *existing != target => Err(QueryError::TargetMismatch {
                expected: target,
                found: existing.clone(),
            }),
            _ => Ok(Query {
                target: Some(target),
                ..self.clone()
            }),
        }
    }

    /// Builds the request body for one page of results.
    ///
    /// Validates first, so an out-of-range limit never reaches the wire.
    pub fn to_request_body(&self, pagination_key: Option<&str>) -> Result<Value, QueryError> {
        self.validate()?;

        let mut bucket_query = Map::new();
        bucket_query.insert("clause".into(), self.clause.to_json());
        if let Some(sort) = &self.sort {
            bucket_query.insert("orderBy".into(), json!(sort.field));
            bucket_query.insert("descending".into(), json!(sort.descending));
        }

        let mut body = Map::new();
        body.insert("bucketQuery".into(), Value::Object(bucket_query));
        if let Some(limit) = self.limit {
            body.insert("bestEffortLimit".into(), json!(limit));
        }
        if let Some(key) = pagination_key {
            body.insert("paginationKey".into(), json!(key));
        }
        Ok(Value::Object(body))
    }
}
