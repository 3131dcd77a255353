//! Search index seam.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vigil_types::{CaseId, InfrastructureError, RuleId};

/// Isolated index namespace owned by one harness run.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// `<prefix>-<rule>-<uuid>`, lowercased and restricted to characters every
    /// backend accepts in an index name.
    pub fn allocate(prefix: &str, rule: &RuleId) -> Self {
        let rule_part: String = sanitize(rule.as_str()).chars().take(120).collect();
        let prefix = sanitize(prefix);
        let prefix = if prefix.is_empty() { "vigil".to_string() } else { prefix };
        Self(format!("{}-{}-{}", prefix, rule_part, Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn sanitize(raw: &str) -> String {
    let mapped: String = raw
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    mapped.trim_matches(|c| c == '-' || c == '_').to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Green,
    Yellow,
    Red,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexHealth {
    pub status: HealthStatus,
    #[serde(default)]
    pub detail: Option<String>,
}

impl IndexHealth {
    pub fn green() -> Self {
        Self {
            status: HealthStatus::Green,
            detail: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status != HealthStatus::Red
    }
}

/// A search backend the harness can stage documents in and query.
///
/// Implementations report transport failures as [`InfrastructureError`]s and
/// leave retrying to the caller.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    async fn health(&self) -> Result<IndexHealth, InfrastructureError>;

    async fn ingest(
        &self,
        namespace: &Namespace,
        id: &CaseId,
        document: &serde_json::Value,
    ) -> Result<(), InfrastructureError>;

    /// Make every ingested document visible to queries.
    async fn refresh(&self, namespace: &Namespace) -> Result<(), InfrastructureError>;

    async fn count(&self, namespace: &Namespace) -> Result<usize, InfrastructureError>;

    /// Ids of the documents in `namespace` matched by a Lucene query string.
    async fn query(&self, namespace: &Namespace, query: &str)
        -> Result<Vec<CaseId>, InfrastructureError>;

    /// Remove the namespace and everything in it. Deleting a namespace that
    /// does not exist succeeds.
    async fn delete(&self, namespace: &Namespace) -> Result<(), InfrastructureError>;
}
