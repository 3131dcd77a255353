//! Syntax validation entry point used by the first pipeline gate.

use crate::ast::Query;
use crate::errors::QueryResult;
use crate::parser::{OperatorCounts, Parser};

/// Successful syntax check of one query.
#[derive(Clone, Debug, PartialEq)]
pub struct SyntaxReport {
    pub ast: Query,
    /// Distinct field names in first-seen order. Bare terms contribute none.
    pub fields_referenced: Vec<String>,
    pub operator_counts: OperatorCounts,
}

impl SyntaxReport {
    pub fn valid(&self) -> bool {
        true
    }
}

/// Parse `query` and report the fields and operators it uses.
pub fn validate_syntax(query: &str) -> QueryResult<SyntaxReport> {
    let parsed = Parser::parse(query)?;

    let mut fields_referenced: Vec<String> = Vec::new();
    parsed.ast.walk_terms(&mut |field, _| {
        if let Some(field) = field {
            if !fields_referenced.iter().any(|f| f == field) {
                fields_referenced.push(field.to_string());
            }
        }
    });

    Ok(SyntaxReport {
        ast: parsed.ast,
        fields_referenced,
        operator_counts: parsed.operators,
    })
}
