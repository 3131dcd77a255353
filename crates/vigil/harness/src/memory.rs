//! In-process search index evaluating queries with the Vigil query matcher.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;

use vigil_query::validate_syntax;
use vigil_types::{CaseId, InfrastructureError};

use crate::index::{IndexHealth, Namespace, SearchIndex};

#[derive(Default)]
pub struct InMemoryIndex {
    namespaces: DashMap<Namespace, BTreeMap<CaseId, serde_json::Value>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespaces currently holding documents.
    pub fn live_namespaces(&self) -> Vec<Namespace> {
        self.namespaces.iter().map(|e| e.key().clone()).collect()
    }
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn health(&self) -> Result<IndexHealth, InfrastructureError> {
        Ok(IndexHealth::green())
    }

    async fn ingest(
        &self,
        namespace: &Namespace,
        id: &CaseId,
        document: &serde_json::Value,
    ) -> Result<(), InfrastructureError> {
        self.namespaces
            .entry(namespace.clone())
            .or_default()
            .insert(id.clone(), document.clone());
        Ok(())
    }

    async fn refresh(&self, _namespace: &Namespace) -> Result<(), InfrastructureError> {
        Ok(())
    }

    async fn count(&self, namespace: &Namespace) -> Result<usize, InfrastructureError> {
        Ok(self
            .namespaces
            .get(namespace)
            .map(|docs| docs.len())
            .unwrap_or(0))
    }

    async fn query(
        &self,
        namespace: &Namespace,
        query: &str,
    ) -> Result<Vec<CaseId>, InfrastructureError> {
        let parsed = validate_syntax(query)
            .map_err(|e| InfrastructureError::query_rejected("query", e.to_string()))?;
        let docs = self.namespaces.get(namespace).ok_or_else(|| {
            InfrastructureError::protocol("query", format!("no such namespace: {}", namespace))
        })?;
        Ok(docs
            .iter()
            .filter(|(_, doc)| parsed.ast.matches(doc))
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn delete(&self, namespace: &Namespace) -> Result<(), InfrastructureError> {
        self.namespaces.remove(namespace);
        Ok(())
    }
}
