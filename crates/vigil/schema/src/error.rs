use std::path::PathBuf;

use thiserror::Error;
use vigil_types::InfrastructureError;

/// Schema loading and field validation errors.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to read schema catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid schema catalog {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Unsupported schema catalog format: {0} (expected .yml, .yaml or .json)")]
    UnsupportedFormat(PathBuf),

    #[error("Field research failed: {0}")]
    Research(#[from] InfrastructureError),
}

pub type SchemaResult<T> = Result<T, SchemaError>;
