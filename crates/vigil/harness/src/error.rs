use thiserror::Error;
use vigil_types::InfrastructureError;

use crate::index::Namespace;

/// Errors that can end a harness run without a result.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),

    #[error("Harness run aborted; namespace {namespace} was torn down")]
    Aborted { namespace: Namespace },
}
