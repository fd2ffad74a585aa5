//! Query model for Kii Cloud.
//!
//! Defines the pure, side-effect-free types used to describe server-side
//! filtering:
//! - [`Clause`]: an immutable predicate tree (comparisons combined with AND/OR/NOT)
//! - [`Query`]: one root clause plus sort, result limit and target collection
//! - [`QueryTarget`]: either an object collection or a file container, never both
//!
//! Nothing here talks to the network. Buckets in `kii-cloud` turn a [`Query`]
//! into a request and hydrate the results.

mod clause;
mod query;

pub use clause::{Clause, FieldType};
pub use query::{Query, QueryTarget, Sort, MAX_LIMIT, MIN_LIMIT};

/// Reasons a query cannot be executed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("limit {0} is outside the accepted range 1..=100")]
    LimitOutOfRange(u32),

    #[error("clause field name must not be empty")]
    EmptyField,

    #[error("`{0}` clause needs at least one sub-clause")]
    EmptyCompound(&'static str),

    #[error("`in` clause on field {0:?} needs at least one value")]
    EmptyIn(String),

    #[error("comparison on field {0:?} must use a scalar value")]
    NonScalarValue(String),

    #[error("sort field must not be empty")]
    EmptySortField,

    #[error("query targets {found} but was executed against {expected}")]
    TargetMismatch {
        expected: QueryTarget,
        found: QueryTarget,
    },
}
