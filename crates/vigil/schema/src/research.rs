//! Field research seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vigil_types::{DetectionRule, FieldResearch, InfrastructureError, RuleId};

/// What the researcher is told about the rule that referenced a field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResearchContext {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub query: String,
}

impl ResearchContext {
    pub fn for_rule(rule: &DetectionRule) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.metadata.name.clone(),
            query: rule.query.clone(),
        }
    }
}

/// Looks up fields the authoritative schema does not know.
#[async_trait]
pub trait FieldResearcher: Send + Sync {
    async fn research(
        &self,
        field: &str,
        context: &ResearchContext,
    ) -> Result<FieldResearch, InfrastructureError>;
}
