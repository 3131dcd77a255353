//! Schema field validation for the first pipeline gate.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use vigil_types::{FieldKnowledge, InfrastructureError, Issue, RetryPolicy};

use crate::cache::FieldKnowledgeCache;
use crate::catalog::FieldSchema;
use crate::research::{FieldResearcher, ResearchContext};

/// Alternatives offered per invalid field.
pub const MAX_ALTERNATIVES: usize = 5;

/// Research calls in flight at once across all rules.
pub const DEFAULT_MAX_CONCURRENT_RESEARCH: usize = 3;

/// Outcome of validating a rule's referenced fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldReport {
    pub valid_fields: Vec<String>,
    pub invalid_fields: Vec<String>,
    pub alternatives: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub knowledge: Vec<FieldKnowledge>,
}

impl FieldReport {
    pub fn passed(&self) -> bool {
        self.invalid_fields.is_empty()
    }

    /// One `UnknownField` issue per invalid field, with its alternatives.
    pub fn issues(&self) -> Vec<Issue> {
        self.invalid_fields
            .iter()
            .map(|field| {
                Issue::unknown_field(
                    field.clone(),
                    self.alternatives.get(field).cloned().unwrap_or_default(),
                )
            })
            .collect()
    }
}

pub struct SchemaFieldValidator {
    schema: Arc<FieldSchema>,
    cache: Arc<FieldKnowledgeCache>,
    researcher: Arc<dyn FieldResearcher>,
    retry: RetryPolicy,
    research_permits: Arc<Semaphore>,
}

impl SchemaFieldValidator {
    pub fn new(
        schema: Arc<FieldSchema>,
        cache: Arc<FieldKnowledgeCache>,
        researcher: Arc<dyn FieldResearcher>,
    ) -> Self {
        Self {
            schema,
            cache,
            researcher,
            retry: RetryPolicy::default(),
            research_permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_RESEARCH)),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_concurrent_research(mut self, permits: usize) -> Self {
        self.research_permits = Arc::new(Semaphore::new(permits.max(1)));
        self
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    pub fn cache(&self) -> &Arc<FieldKnowledgeCache> {
        &self.cache
    }

    /// Classify every field. Fails only when research is unreachable.
    #[instrument(skip(self, fields, context), fields(rule_id = %context.rule_id, count = fields.len()))]
    pub async fn validate(
        &self,
        fields: &[String],
        context: &ResearchContext,
    ) -> Result<FieldReport, InfrastructureError> {
        let lookups = fields.iter().map(|field| self.resolve(field, context));
        let resolved = join_all(lookups).await;

        let mut report = FieldReport::default();
        for (field, knowledge) in fields.iter().zip(resolved) {
            let knowledge = knowledge?;
            if knowledge.is_usable() {
                report.valid_fields.push(field.clone());
            } else {
                let alternatives = self.alternatives_for(field, &knowledge);
                warn!(field = %field, ?alternatives, "Field is not usable");
                report.invalid_fields.push(field.clone());
                report.alternatives.insert(field.clone(), alternatives);
            }
            report.knowledge.push(knowledge);
        }

        debug!(
            valid = report.valid_fields.len(),
            invalid = report.invalid_fields.len(),
            "Field validation complete"
        );
        Ok(report)
    }

    async fn resolve(
        &self,
        field: &str,
        context: &ResearchContext,
    ) -> Result<FieldKnowledge, InfrastructureError> {
        if let Some(definition) = self.schema.get(field) {
            return Ok(FieldKnowledge::from_schema(field, &definition.field_type));
        }

        self.cache
            .get_or_research(field, || async {
                let _permit = self
                    .research_permits
                    .acquire()
                    .await
                    .map_err(|_| InfrastructureError::unavailable("research", "research pool closed"))?;
                let research = self
                    .retry
                    .run("research", || self.researcher.research(field, context))
                    .await?;
                Ok::<_, InfrastructureError>(FieldKnowledge::from_research(field, research))
            })
            .await
    }

    fn alternatives_for(&self, field: &str, knowledge: &FieldKnowledge) -> Vec<String> {
        let mut alternatives: Vec<String> = Vec::new();
        let candidates = knowledge
            .alternatives
            .iter()
            .cloned()
            .chain(self.schema.suggest(field, MAX_ALTERNATIVES));
        for candidate in candidates {
            if candidate != field && !alternatives.contains(&candidate) {
                alternatives.push(candidate);
            }
        }
        alternatives.truncate(MAX_ALTERNATIVES);
        alternatives
    }
}
