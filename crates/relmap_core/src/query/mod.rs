//! Query representation, construction, and parameter binding.
//!
//! Both construction modes, template strings ([`Query::parse`]) and
//! the criteria builder ([`Criteria`]), compile to the same [`Query`]
//! form: a target type, a predicate tree of equality conjunctions, and
//! eager-fetch directives. Execution lives on the session.

mod criteria;
mod parse;

pub use criteria::Criteria;

use crate::error::{CoreError, CoreResult};
use relmap_store::SqlValue;
use std::collections::HashMap;

/// Right-hand side of an equality: a literal or a named placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A literal value.
    Value(SqlValue),
    /// A named placeholder, bound at execution time.
    Param(String),
}

/// A predicate tree over typed field paths.
///
/// Equality and conjunction only; field paths may be dotted to reach
/// embedded value-object members.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Matches every row.
    All,
    /// Field equals operand.
    Eq {
        /// Field path on the target type.
        path: String,
        /// Literal or placeholder.
        operand: Operand,
    },
    /// Both subtrees match.
    And(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Equality against a literal value.
    #[must_use]
    pub fn eq_value(path: impl Into<String>, value: SqlValue) -> Self {
        Self::Eq {
            path: path.into(),
            operand: Operand::Value(value),
        }
    }

    /// Equality against a named placeholder.
    #[must_use]
    pub fn eq_param(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Eq {
            path: path.into(),
            operand: Operand::Param(name.into()),
        }
    }

    /// Conjunction of two predicates.
    #[must_use]
    pub fn and(self, other: Expr) -> Self {
        match self {
            Self::All => other,
            this => Self::And(Box::new(this), Box::new(other)),
        }
    }
}

/// A compiled query: target entity type, predicate, fetch directives.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Entity type or variant name the query targets.
    pub target: String,
    /// Predicate tree.
    pub predicate: Expr,
    /// Relationships to materialize eagerly, beyond those the
    /// registry already marks eager.
    pub fetch: Vec<String>,
}

impl Query {
    /// Creates a query matching every instance of `target`.
    #[must_use]
    pub fn all(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            predicate: Expr::All,
            fetch: Vec::new(),
        }
    }

    /// Parses a query template.
    ///
    /// Supported form, keywords case-insensitive:
    ///
    /// ```text
    /// from <type> [<alias>]
    ///     [left join fetch <alias>.<relationship>]*
    ///     [where <path> = :<param> [and <path> = :<param>]*]
    /// ```
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::QueryParse`] on malformed input.
    pub fn parse(template: &str) -> CoreResult<Self> {
        parse::parse(template)
    }
}

/// Named parameter bindings for query execution.
#[derive(Debug, Clone, Default)]
pub struct Params {
    values: HashMap<String, SqlValue>,
}

impl Params {
    /// Creates an empty binding set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a value to a placeholder name.
    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: SqlValue) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Looks up a binding.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.values.get(name)
    }
}

/// Flattens a predicate tree into (path, value) equality pairs,
/// resolving placeholders against `params`.
///
/// # Errors
///
/// Fails with [`CoreError::UnboundParameter`] before any store
/// round-trip if a placeholder has no binding.
pub(crate) fn bind_predicate(expr: &Expr, params: &Params) -> CoreResult<Vec<(String, SqlValue)>> {
    let mut pairs = Vec::new();
    collect(expr, params, &mut pairs)?;
    Ok(pairs)
}

fn collect(
    expr: &Expr,
    params: &Params,
    pairs: &mut Vec<(String, SqlValue)>,
) -> CoreResult<()> {
    match expr {
        Expr::All => Ok(()),
        Expr::Eq { path, operand } => {
            let value = match operand {
                Operand::Value(value) => value.clone(),
                Operand::Param(name) => params
                    .get(name)
                    .cloned()
                    .ok_or_else(|| CoreError::unbound_parameter(name))?,
            };
            pairs.push((path.clone(), value));
            Ok(())
        }
        Expr::And(left, right) => {
            collect(left, params, pairs)?;
            collect(right, params, pairs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_resolves_params_in_order() {
        let expr = Expr::eq_param("a", "x").and(Expr::eq_value("b", SqlValue::Integer(2)));
        let params = Params::new().bind("x", SqlValue::Integer(1));

        let pairs = bind_predicate(&expr, &params).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("a".into(), SqlValue::Integer(1)),
                ("b".into(), SqlValue::Integer(2)),
            ]
        );
    }

    #[test]
    fn unbound_parameter_fails_fast() {
        let expr = Expr::eq_param("a", "missing");
        let err = bind_predicate(&expr, &Params::new()).unwrap_err();
        assert!(matches!(err, CoreError::UnboundParameter { .. }));
    }

    #[test]
    fn and_on_all_collapses() {
        let expr = Expr::All.and(Expr::eq_value("a", SqlValue::Integer(1)));
        assert!(matches!(expr, Expr::Eq { .. }));
    }
}
