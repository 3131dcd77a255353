//! Infrastructure faults shared by every crate that talks to the outside world.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfrastructureKind {
    /// The remote end could not be reached or answered with a server error.
    Unavailable,
    /// A call did not complete within its deadline.
    Timeout,
    /// The remote end answered, but not in a form we understand.
    Protocol,
    /// The index refused to parse the rule's query. A rule defect, not an
    /// outage.
    QueryRejected,
}

/// A search index or collaborator failed.
///
/// Never charged to a refinement budget. `attempts` is the number of calls made
/// before giving up.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
#[error("{operation} failed after {attempts} attempt(s) ({kind:?}): {message}")]
pub struct InfrastructureError {
    pub operation: String,
    pub message: String,
    pub kind: InfrastructureKind,
    pub attempts: u32,
}

impl InfrastructureError {
    fn new(kind: InfrastructureKind, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            kind,
            attempts: 1,
        }
    }

    pub fn unavailable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(InfrastructureKind::Unavailable, operation, message)
    }

    pub fn timeout(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(InfrastructureKind::Timeout, operation, message)
    }

    pub fn protocol(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(InfrastructureKind::Protocol, operation, message)
    }

    pub fn query_rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(InfrastructureKind::QueryRejected, operation, message)
    }

    pub fn is_query_rejected(&self) -> bool {
        self.kind == InfrastructureKind::QueryRejected
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Protocol faults and rejected queries repeat deterministically.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind,
            InfrastructureKind::Protocol | InfrastructureKind::QueryRejected
        )
    }
}
