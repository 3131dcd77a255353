//! Command implementations

pub mod check;
pub mod run;

use std::path::Path;
use std::sync::Arc;

use tracing::info;
use vigil_pipeline::load_rules;
use vigil_schema::FieldSchema;
use vigil_types::DetectionRule;

use crate::config::VigilConfig;
use crate::error::{CliError, CliResult};

/// The configured field catalog, or the bundled ECS core catalog.
pub fn load_schema(config: &VigilConfig) -> CliResult<Arc<FieldSchema>> {
    let schema = match &config.schema.catalog {
        Some(path) => FieldSchema::load(path)?,
        None => FieldSchema::ecs_core()?,
    };
    info!(catalog = %schema.name, fields = schema.len(), "Field catalog loaded");
    Ok(Arc::new(schema))
}

pub fn read_rules(dir: &Path) -> CliResult<Vec<DetectionRule>> {
    if !dir.is_dir() {
        return Err(CliError::MissingRulesDir(dir.to_path_buf()));
    }
    let rules = load_rules(dir)?;
    info!(dir = %dir.display(), rules = rules.len(), "Rules loaded");
    Ok(rules)
}
