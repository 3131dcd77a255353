//! Query error types

use vigil_types::Issue;

/// Errors raised while tokenizing or parsing a query string.
///
/// Every variant carries the offending token text and its 0-based character
/// offset in the original query.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("Unexpected token '{found}' at position {position}: expected {expected}")]
    UnexpectedToken {
        found: String,
        position: usize,
        expected: String,
    },

    #[error("Unexpected end of query at position {position}: expected {expected}")]
    UnexpectedEof { position: usize, expected: String },

    #[error("Unterminated phrase starting at position {position}")]
    UnterminatedPhrase { position: usize },

    #[error("Dangling escape at position {position}")]
    DanglingEscape { position: usize },

    #[error("Missing operator before '{token}' at position {position}")]
    ImplicitOperator { token: String, position: usize },

    #[error("Mixed AND/OR without parentheses at '{token}', position {position}")]
    MixedOperators { token: String, position: usize },

    /// Fuzzy, boost, regex and comparison syntax the matcher does not evaluate.
    #[error("Unsupported operator '{token}' at position {position}: escape it with '\\'")]
    ReservedSyntax { token: String, position: usize },

    #[error("Field '{field}' at position {position} cannot be used as a field name")]
    InvalidFieldName { field: String, position: usize },

    #[error("Empty query")]
    Empty,
}

/// Result type alias for query operations
pub type QueryResult<T> = Result<T, QueryError>;

/// The `{token, position}` pair reported for a rejected query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub token: String,
    pub position: usize,
}

impl QueryError {
    pub fn token(&self) -> String {
        match self {
            Self::UnexpectedToken { found, .. } => found.clone(),
            Self::UnexpectedEof { .. } | Self::Empty => "<end of query>".to_string(),
            Self::UnterminatedPhrase { .. } => "\"".to_string(),
            Self::DanglingEscape { .. } => "\\".to_string(),
            Self::ImplicitOperator { token, .. }
            | Self::MixedOperators { token, .. }
            | Self::ReservedSyntax { token, .. } => token.clone(),
            Self::InvalidFieldName { field, .. } => field.clone(),
        }
    }

    pub fn position(&self) -> usize {
        match self {
            Self::UnexpectedToken { position, .. }
            | Self::UnexpectedEof { position, .. }
            | Self::UnterminatedPhrase { position }
            | Self::DanglingEscape { position }
            | Self::ImplicitOperator { position, .. }
            | Self::MixedOperators { position, .. }
            | Self::ReservedSyntax { position, .. }
            | Self::InvalidFieldName { position, .. } => *position,
            Self::Empty => 0,
        }
    }

    pub fn syntax_error(&self) -> SyntaxError {
        SyntaxError {
            token: self.token(),
            position: self.position(),
        }
    }

    /// Gate issue carrying this error's token and position.
    pub fn to_issue(&self) -> Issue {
        let mut issue = Issue::syntax(self.token(), self.position());
        issue.message = self.to_string();
        issue
    }
}
