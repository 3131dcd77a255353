//! Configuration for the vigil CLI
//!
//! Layered the same way for every command: built-in defaults, then an
//! optional file (YAML, TOML or JSON by extension), then `VIGIL_*`
//! environment variables such as `VIGIL_INDEX__ENDPOINT` or
//! `VIGIL_PIPELINE__MAX_CONCURRENT_RULES`. Command-line flags are applied
//! on top by the caller.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vigil_pipeline::{ControllerConfig, StageBudgets, DEFAULT_APPROVE_THRESHOLD, DEFAULT_MAX_CONCURRENT_RULES};
use vigil_schema::DEFAULT_MAX_CONCURRENT_RESEARCH;
use vigil_types::{QualityGates, RetryPolicy};

/// Endpoint value that selects the in-process index.
pub const MEMORY_INDEX: &str = "memory";

const REDACTED: &str = "********";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VigilConfig {
    #[serde(default)]
    pub index: IndexConfig,

    /// Retry policy shared by the index and collaborator calls
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub gates: GatesConfig,

    #[serde(default)]
    pub schema: SchemaConfig,

    #[serde(default)]
    pub collaborators: CollaboratorsConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Search index connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Base URL, or `memory` for the in-process index
    #[serde(default = "default_index_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,

    /// How long to wait for cluster health before a batch
    #[serde(default = "default_readiness_timeout")]
    pub readiness_timeout_secs: u64,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            endpoint: default_index_endpoint(),
            namespace_prefix: default_namespace_prefix(),
            readiness_timeout_secs: default_readiness_timeout(),
            username: None,
            password: None,
        }
    }
}

impl IndexConfig {
    pub fn is_memory(&self) -> bool {
        self.endpoint.eq_ignore_ascii_case(MEMORY_INDEX)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Deadline for each individual call
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            multiplier: default_multiplier(),
            call_timeout_ms: default_call_timeout(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
            call_timeout: Duration::from_millis(self.call_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatesConfig {
    #[serde(default = "default_precision_min")]
    pub precision_min: f64,

    #[serde(default = "default_recall_min")]
    pub recall_min: f64,

    /// Minimum judgment score for an approval to count
    #[serde(default = "default_approve_threshold")]
    pub approve_threshold: f64,

    /// Evaluations allowed per gate
    #[serde(default)]
    pub budgets: StageBudgets,
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            precision_min: default_precision_min(),
            recall_min: default_recall_min(),
            approve_threshold: default_approve_threshold(),
            budgets: StageBudgets::default(),
        }
    }
}

impl GatesConfig {
    pub fn quality(&self) -> QualityGates {
        QualityGates::new(self.precision_min, self.recall_min)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// YAML or JSON field catalog; the bundled ECS core catalog when unset
    #[serde(default)]
    pub catalog: Option<PathBuf>,

    #[serde(default = "default_max_concurrent_research")]
    pub max_concurrent_research: usize,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            catalog: None,
            max_concurrent_research: default_max_concurrent_research(),
        }
    }
}

/// Remote collaborator service. Offline collaborators are used when no
/// endpoint is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaboratorsConfig {
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_collaborator_timeout")]
    pub timeout_secs: u64,
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_collaborator_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_concurrent_rules")]
    pub max_concurrent_rules: usize,

    /// Approved rules and rejection reports are written here
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_rules: default_max_concurrent_rules(),
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_index_endpoint() -> String {
    "http://localhost:9200".to_string()
}

fn default_namespace_prefix() -> String {
    "vigil".to_string()
}

fn default_readiness_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    200
}

fn default_max_backoff() -> u64 {
    5_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_call_timeout() -> u64 {
    30_000
}

fn default_precision_min() -> f64 {
    QualityGates::default().precision_min
}

fn default_recall_min() -> f64 {
    QualityGates::default().recall_min
}

fn default_approve_threshold() -> f64 {
    DEFAULT_APPROVE_THRESHOLD
}

fn default_max_concurrent_research() -> usize {
    DEFAULT_MAX_CONCURRENT_RESEARCH
}

fn default_collaborator_timeout() -> u64 {
    120
}

fn default_max_concurrent_rules() -> usize {
    DEFAULT_MAX_CONCURRENT_RULES
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("approved")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl VigilConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&VigilConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Double underscore separates sections so field names keep theirs
        builder = builder.add_source(
            config::Environment::with_prefix("VIGIL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Copy safe to print: secrets are masked.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.index.password.is_some() {
            config.index.password = Some(REDACTED.to_string());
        }
        config
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            budgets: self.gates.budgets,
            quality: self.gates.quality(),
            approve_threshold: self.gates.approve_threshold,
            retry: self.retry.policy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_pipeline() {
        let config = VigilConfig::default();
        assert_eq!(config.retry.policy(), RetryPolicy::default());
        assert_eq!(config.gates.quality(), QualityGates::default());
        assert_eq!(config.gates.approve_threshold, 0.65);
        assert_eq!(config.gates.budgets, StageBudgets::default());
        assert_eq!(config.pipeline.max_concurrent_rules, DEFAULT_MAX_CONCURRENT_RULES);
        assert!(config.collaborators.endpoint.is_none());
        assert!(!config.index.is_memory());
    }

    #[test]
    fn printed_config_masks_the_index_password() {
        let mut config = VigilConfig::default();
        config.index.username = Some("elastic".into());
        config.index.password = Some("changeme".into());

        let printed = serde_yaml::to_string(&config.redacted()).unwrap();
        assert!(!printed.contains("changeme"));
        assert!(printed.contains("elastic"));
        assert_eq!(config.index.password.as_deref(), Some("changeme"));
        assert!(VigilConfig::default().redacted().index.password.is_none());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yml");
        let config = VigilConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.index.endpoint, "http://localhost:9200");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn file_overrides_selected_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.yml");
        std::fs::write(
            &path,
            "index:\n  endpoint: memory\ngates:\n  precision_min: 0.9\n  budgets:\n    judgment: 1\nretry:\n  max_retries: 0\n",
        )
        .unwrap();

        let config = VigilConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert!(config.index.is_memory());
        assert_eq!(config.gates.precision_min, 0.9);
        assert_eq!(config.gates.recall_min, 0.70);
        assert_eq!(config.gates.budgets.judgment, 1);
        assert_eq!(config.gates.budgets.integration_test, 2);

        let controller = config.controller_config();
        assert_eq!(controller.retry.max_retries, 0);
        assert_eq!(controller.quality.precision_min, 0.9);
    }
}
