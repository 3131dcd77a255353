//! `vigil run`: validate and refine every rule in a directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tracing::{debug, info, warn};

use vigil_harness::{abort_pair, ElasticsearchIndex, InMemoryIndex, IntegrationHarness, SearchIndex};
use vigil_pipeline::{ArtifactStore, BatchRunner, IterationController};
use vigil_refinement::RefinementEngine;
use vigil_schema::{FieldKnowledgeCache, SchemaFieldValidator};

use crate::collaborators::Collaborators;
use crate::config::VigilConfig;
use crate::error::CliResult;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Directory of rule files (.yml, .yaml, .json)
    pub rules_dir: PathBuf,

    /// Search index endpoint, or `memory` for the in-process index
    #[arg(long)]
    pub index: Option<String>,

    /// Where approved rules and rejection reports are written
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Rules validated at the same time
    #[arg(long)]
    pub max_concurrent: Option<usize>,
}

impl RunArgs {
    fn apply(&self, config: &mut VigilConfig) {
        if let Some(index) = &self.index {
            config.index.endpoint = index.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.pipeline.output_dir = dir.clone();
        }
        if let Some(n) = self.max_concurrent {
            config.pipeline.max_concurrent_rules = n;
        }
    }
}

/// Returns the process exit code for the batch.
pub async fn execute(args: RunArgs, mut config: VigilConfig, format: OutputFormat) -> CliResult<u8> {
    args.apply(&mut config);
    let rules = super::read_rules(&args.rules_dir)?;
    if rules.is_empty() {
        output::print_warning(&format!("No rule files in {}", args.rules_dir.display()));
        return Ok(0);
    }

    let retry = config.retry.policy();
    let schema = super::load_schema(&config)?;
    let collaborators = Collaborators::from_config(&config, schema.clone())?;
    info!(mode = collaborators.mode, "Collaborators configured");

    let index = build_index(&config)?;
    let harness = IntegrationHarness::new(index)
        .with_retry(retry.clone())
        .with_namespace_prefix(config.index.namespace_prefix.clone());
    if !config.index.is_memory() {
        let health = harness
            .wait_until_ready(Duration::from_secs(config.index.readiness_timeout_secs))
            .await?;
        info!(endpoint = %config.index.endpoint, status = ?health.status, "Index ready");
    }

    let cache = Arc::new(FieldKnowledgeCache::new());
    let fields = SchemaFieldValidator::new(schema, cache.clone(), collaborators.researcher)
        .with_retry(retry.clone())
        .with_max_concurrent_research(config.schema.max_concurrent_research);
    let engine = RefinementEngine::new(collaborators.generator, collaborators.judge)
        .with_retry(retry);
    let controller = IterationController::standard(
        Arc::new(fields),
        Arc::new(harness),
        Arc::new(engine),
        config.controller_config(),
    );

    let runner = BatchRunner::new(Arc::new(controller))
        .with_store(ArtifactStore::new(config.pipeline.output_dir.clone()))
        .with_max_concurrent_rules(config.pipeline.max_concurrent_rules);

    let (abort, signal) = abort_pair();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting in-flight rules");
            abort.abort();
        }
    });

    let summary = runner.run(rules, signal).await;
    interrupt.abort();

    let stats = cache.stats();
    debug!(
        entries = stats.entries,
        hits = stats.hits,
        research_calls = stats.research_calls,
        "Field knowledge cache"
    );

    output::print_summary(&summary, format)?;
    Ok(summary.exit_code() as u8)
}

fn build_index(config: &VigilConfig) -> CliResult<Arc<dyn SearchIndex>> {
    if config.index.is_memory() {
        return Ok(Arc::new(InMemoryIndex::new()));
    }
    let timeout = Duration::from_millis(config.retry.call_timeout_ms);
    let mut index = ElasticsearchIndex::new(&config.index.endpoint, timeout)?;
    if let (Some(user), Some(password)) = (&config.index.username, &config.index.password) {
        index = index.with_credentials(user.clone(), password.clone());
    }
    Ok(Arc::new(index))
}
