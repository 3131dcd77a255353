//! Vigil Schema - field validation against an authoritative catalog.
//!
//! Fields the catalog knows are valid outright. Anything else goes through
//! the [`FieldKnowledgeCache`] and, on a miss, the [`FieldResearcher`]
//! collaborator. The cache is shared by every rule in a run and guarantees at
//! most one research call per unfamiliar field.

#![deny(unsafe_code)]

pub mod cache;
pub mod catalog;
pub mod error;
pub mod mocks;
pub mod research;
pub mod validator;

pub use cache::{CacheStats, FieldKnowledgeCache};
pub use catalog::{FieldDefinition, FieldLevel, FieldSchema};
pub use error::{SchemaError, SchemaResult};
pub use research::{FieldResearcher, ResearchContext};
pub use validator::{
    FieldReport, SchemaFieldValidator, DEFAULT_MAX_CONCURRENT_RESEARCH, MAX_ALTERNATIVES,
};
