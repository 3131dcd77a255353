//! Query AST.
//!
//! Field groups are expanded at parse time: `f:(a OR b)` becomes
//! `Or[Term(f, a), Term(f, b)]`, so every leaf carries its own field.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Query {
    /// `field:value`; `field` is `None` for a bare term searched in all fields.
    Term { field: Option<String>, value: Value },
    And { clauses: Vec<Query> },
    Or { clauses: Vec<Query> },
    Not { clause: Box<Query> },
}

impl Query {
    pub fn term(field: Option<&str>, value: Value) -> Self {
        Query::Term {
            field: field.map(str::to_string),
            value,
        }
    }

    /// Visit every leaf term in source order.
    pub fn walk_terms<'a>(&'a self, visit: &mut impl FnMut(Option<&'a str>, &'a Value)) {
        match self {
            Query::Term { field, value } => visit(field.as_deref(), value),
            Query::And { clauses } | Query::Or { clauses } => {
                for clause in clauses {
                    clause.walk_terms(visit);
                }
            }
            Query::Not { clause } => clause.walk_terms(visit),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Exact(String),
    Wildcard(Pattern),
    Phrase(String),
    Range(Range),
    /// `field:*`
    Exists,
}

impl Value {
    /// Interpret a raw term: resolve escapes and detect unescaped wildcards.
    pub fn from_raw_term(raw: &str) -> Value {
        if raw == "*" {
            return Value::Exists;
        }
        let pattern = Pattern::from_raw(raw);
        if pattern.has_wildcards() {
            Value::Wildcard(pattern)
        } else {
            Value::Exact(pattern.literal())
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Value::Wildcard(_) | Value::Exists)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternToken {
    Literal(char),
    AnyChar,
    AnyRun,
}

/// Glob pattern with `?` (one char) and `*` (any run).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub tokens: Vec<PatternToken>,
}

impl Pattern {
    pub fn from_raw(raw: &str) -> Self {
        let mut tokens = Vec::new();
        let mut chars = raw.chars();
        while let Some(ch) = chars.next() {
            let token = match ch {
                '\\' => match chars.next() {
                    Some(escaped) => PatternToken::Literal(escaped),
                    None => PatternToken::Literal('\\'),
                },
                '*' => PatternToken::AnyRun,
                '?' => PatternToken::AnyChar,
                other => PatternToken::Literal(other),
            };
            tokens.push(token);
        }
        Self { tokens }
    }

    pub fn has_wildcards(&self) -> bool {
        self.tokens
            .iter()
            .any(|t| !matches!(t, PatternToken::Literal(_)))
    }

    /// Literal characters only; wildcards are dropped.
    pub fn literal(&self) -> String {
        self.tokens
            .iter()
            .filter_map(|t| match t {
                PatternToken::Literal(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    /// Case-insensitive glob match of the whole input.
    pub fn matches(&self, input: &str) -> bool {
        let text: Vec<char> = input.to_lowercase().chars().collect();
        let pattern: Vec<PatternToken> = self
            .tokens
            .iter()
            .map(|t| match t {
                PatternToken::Literal(c) => {
                    let mut lower = c.to_lowercase();
                    match (lower.next(), lower.next()) {
                        (Some(l), None) => PatternToken::Literal(l),
                        _ => PatternToken::Literal(*c),
                    }
                }
                other => other.clone(),
            })
            .collect();

        let (mut t, mut p) = (0usize, 0usize);
        let mut backtrack: Option<(usize, usize)> = None;
        while t < text.len() {
            match pattern.get(p) {
                Some(PatternToken::AnyRun) => {
                    backtrack = Some((p, t));
                    p += 1;
                    continue;
                }
                Some(PatternToken::AnyChar) => {
                    t += 1;
                    p += 1;
                    continue;
                }
                Some(PatternToken::Literal(c)) if *c == text[t] => {
                    t += 1;
                    p += 1;
                    continue;
                }
                _ => {}
            }
            match backtrack {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    backtrack = Some((star_p, star_t + 1));
                }
                None => return false,
            }
        }
        pattern[p..].iter().all(|t| matches!(t, PatternToken::AnyRun))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    /// `None` for an open `*` bound.
    pub value: Option<String>,
    pub inclusive: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub lower: Bound,
    pub upper: Bound,
}
