//! Template string parser.

use crate::error::{CoreError, CoreResult};
use crate::query::{Expr, Query};

/// Whitespace-token scanner over a query template.
struct Tokens<'a> {
    tokens: Vec<&'a str>,
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn new(template: &'a str) -> Self {
        Self {
            tokens: template.split_whitespace().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<&'a str> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, keyword: &str) -> CoreResult<()> {
        match self.next() {
            Some(token) if token.eq_ignore_ascii_case(keyword) => Ok(()),
            Some(token) => Err(CoreError::query_parse(format!(
                "expected '{keyword}', found '{token}'"
            ))),
            None => Err(CoreError::query_parse(format!(
                "expected '{keyword}', found end of input"
            ))),
        }
    }

    fn peek_is(&self, keyword: &str) -> bool {
        self.peek()
            .map_or(false, |token| token.eq_ignore_ascii_case(keyword))
    }
}

/// Strips a leading `alias.` from a path when an alias is in scope.
fn strip_alias<'a>(token: &'a str, alias: Option<&str>) -> &'a str {
    match (token.split_once('.'), alias) {
        (Some((prefix, rest)), Some(alias)) if prefix == alias => rest,
        // No alias declared, or the prefix is an embedded field path.
        _ => token,
    }
}

pub(crate) fn parse(template: &str) -> CoreResult<Query> {
    let mut tokens = Tokens::new(template);

    tokens.expect("from")?;
    let target = tokens
        .next()
        .ok_or_else(|| CoreError::query_parse("expected entity type after 'from'"))?;

    // Optional alias: any token that is not a clause keyword.
    let mut alias = None;
    if let Some(token) = tokens.peek() {
        if !token.eq_ignore_ascii_case("where") && !token.eq_ignore_ascii_case("left") {
            alias = Some(token);
            tokens.next();
        }
    }

    let mut fetch = Vec::new();
    while tokens.peek_is("left") {
        tokens.expect("left")?;
        tokens.expect("join")?;
        tokens.expect("fetch")?;
        let path = tokens
            .next()
            .ok_or_else(|| CoreError::query_parse("expected relationship after 'fetch'"))?;
        fetch.push(strip_alias(path, alias).to_owned());
    }

    let mut predicate = Expr::All;
    if tokens.peek_is("where") {
        tokens.next();
        loop {
            let path = tokens
                .next()
                .ok_or_else(|| CoreError::query_parse("expected field path in 'where'"))?;
            let path = strip_alias(path, alias);
            tokens.expect("=")?;
            let param = tokens
                .next()
                .ok_or_else(|| CoreError::query_parse("expected parameter after '='"))?;
            let name = param.strip_prefix(':').ok_or_else(|| {
                CoreError::query_parse(format!("expected ':param' placeholder, found '{param}'"))
            })?;
            if name.is_empty() {
                return Err(CoreError::query_parse("empty parameter name"));
            }
            predicate = predicate.and(Expr::eq_param(path, name));

            if tokens.peek_is("and") {
                tokens.next();
            } else {
                break;
            }
        }
    }

    if let Some(token) = tokens.peek() {
        return Err(CoreError::query_parse(format!(
            "unexpected token '{token}'"
        )));
    }

    Ok(Query {
        target: target.to_owned(),
        predicate,
        fetch,
    })
}
