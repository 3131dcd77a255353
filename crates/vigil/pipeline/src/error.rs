use std::path::PathBuf;

use thiserror::Error;
use vigil_types::{InfrastructureError, RuleId};

/// Run-level failures. Quality problems with a rule are not errors; they end
/// in a rejected [`crate::RunReport`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Infrastructure fault: {0}")]
    Infrastructure(#[from] InfrastructureError),

    #[error("Run of rule {rule_id} aborted")]
    Aborted { rule_id: RuleId },

    #[error("Failed to load {path}: {message}")]
    Load { path: PathBuf, message: String },

    #[error("Failed to write {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize artifact: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

impl PipelineError {
    pub fn load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Load {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
