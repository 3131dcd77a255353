use thiserror::Error;
use vigil_types::{InfrastructureError, RuleId};

/// Errors from a refinement round.
#[derive(Debug, Error)]
pub enum RefinementError {
    /// A collaborator could not be reached within the retry policy.
    #[error(transparent)]
    Collaborator(#[from] InfrastructureError),

    /// The generator returned a rule that breaks the revision contract.
    #[error("Invalid revision of rule {rule_id}: {reason}")]
    InvalidRevision { rule_id: RuleId, reason: String },
}

impl RefinementError {
    pub fn invalid_revision(rule_id: &RuleId, reason: impl Into<String>) -> Self {
        Self::InvalidRevision {
            rule_id: rule_id.clone(),
            reason: reason.into(),
        }
    }
}

pub type RefinementResult<T> = Result<T, RefinementError>;
