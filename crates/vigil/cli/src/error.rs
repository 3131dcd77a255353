//! CLI error types

use std::path::PathBuf;

use thiserror::Error;
use vigil_pipeline::PipelineError;
use vigil_schema::SchemaError;
use vigil_types::InfrastructureError;

#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be layered or deserialized
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Rules directory not found: {}", .0.display())]
    MissingRulesDir(PathBuf),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type CliResult<T> = Result<T, CliError>;
