//! Vigil Harness - empirical rule testing against a search index.
//!
//! The harness stages a rule's labeled corpus in an isolated namespace of a
//! [`SearchIndex`], runs the rule's query, and turns the matches into a
//! confusion matrix. Backends:
//!
//! - [`ElasticsearchIndex`]: HTTP, one index per namespace
//! - [`InMemoryIndex`]: evaluates the parsed query in process
//!
//! Index calls are retried under a [`vigil_types::RetryPolicy`]; persistent
//! failure surfaces as an infrastructure error, never as a rule failure.

#![deny(unsafe_code)]

pub mod abort;
pub mod elasticsearch;
pub mod error;
pub mod harness;
pub mod index;
pub mod memory;
pub mod mocks;

pub use abort::{abort_pair, AbortController, AbortSignal};
pub use elasticsearch::ElasticsearchIndex;
pub use error::HarnessError;
pub use harness::{HarnessReport, IntegrationHarness};
pub use index::{HealthStatus, IndexHealth, Namespace, SearchIndex};
pub use memory::InMemoryIndex;
