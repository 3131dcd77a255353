//! Vigil Query - Lucene query-string validation and evaluation.
//!
//! The first pipeline gate uses [`validate_syntax`] to reject malformed or
//! ambiguous queries and to learn which fields a rule references. The parsed
//! [`Query`] can also be evaluated against a JSON log record, which the
//! in-memory search index uses in place of Elasticsearch.
//!
//! ## Example
//!
//! ```rust
//! use vigil_query::validate_syntax;
//!
//! let report = validate_syntax("process.name:vssadmin.exe AND process.command_line:*delete*")
//!     .unwrap();
//! assert_eq!(report.fields_referenced, vec!["process.name", "process.command_line"]);
//! ```

#![deny(unsafe_code)]

pub mod ast;
pub mod errors;
pub mod lexer;
pub mod matcher;
pub mod parser;
pub mod validator;

pub use ast::{Bound, Pattern, Query, Range, Value};
pub use errors::{QueryError, QueryResult, SyntaxError};
pub use parser::{OperatorCounts, ParsedQuery, Parser};
pub use validator::{validate_syntax, SyntaxReport};
