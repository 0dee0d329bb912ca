//! Criteria builder: composable query construction without strings.

use crate::query::{Expr, Query};

/// Builds a [`Query`] from typed combinators.
///
/// Produces the same internal representation as [`Query::parse`], for
/// callers who want static structure instead of templates:
///
/// ```rust
/// use relmap_core::{Criteria, Expr, Query};
///
/// let by_builder = Criteria::from_type("geek")
///     .filter(Expr::eq_param("favourite_language", "fpl"))
///     .build();
/// let by_template = Query::parse("from geek where favourite_language = :fpl").unwrap();
/// assert_eq!(by_builder, by_template);
/// ```
#[derive(Debug, Clone)]
pub struct Criteria {
    target: String,
    predicate: Expr,
    fetch: Vec<String>,
}

impl Criteria {
    /// Starts a criteria query against an entity type or variant.
    #[must_use]
    pub fn from_type(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            predicate: Expr::All,
            fetch: Vec::new(),
        }
    }

    /// Adds a predicate, conjoined with any existing one.
    #[must_use]
    pub fn filter(mut self, expr: Expr) -> Self {
        self.predicate = self.predicate.and(expr);
        self
    }

    /// Adds an eager-fetch directive for a relationship.
    #[must_use]
    pub fn fetch(mut self, relationship: impl Into<String>) -> Self {
        self.fetch.push(relationship.into());
        self
    }

    /// Compiles to the internal query representation.
    #[must_use]
    pub fn build(self) -> Query {
        Query {
            target: self.target,
            predicate: self.predicate,
            fetch: self.fetch,
        }
    }
}

impl From<Criteria> for Query {
    fn from(criteria: Criteria) -> Self {
        criteria.build()
    }
}
