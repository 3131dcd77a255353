//! Elasticsearch over HTTP.
//!
//! One index per namespace. Queries run as `query_string` with
//! `default_field: "*"` and `analyze_wildcard`, so a rule's Lucene query is
//! evaluated exactly as a SIEM would evaluate it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use vigil_types::{CaseId, InfrastructureError};

use crate::index::{IndexHealth, Namespace, SearchIndex};

/// Upper bound on hits returned by one search.
pub const DEFAULT_MAX_HITS: usize = 10_000;

/// Error types Elasticsearch reports for a query it cannot parse.
const QUERY_PARSE_ERRORS: [&str; 3] = [
    "parse_exception",
    "query_shard_exception",
    "search_phase_execution_exception",
];

pub struct ElasticsearchIndex {
    client: Client,
    base_url: Url,
    credentials: Option<(String, String)>,
    max_hits: usize,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
}

impl ElasticsearchIndex {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, InfrastructureError> {
        let base_url = Url::parse(endpoint.trim_end_matches('/'))
            .map_err(|e| InfrastructureError::protocol("connect", format!("invalid endpoint '{}': {}", endpoint, e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InfrastructureError::protocol("connect", e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            credentials: None,
            max_hits: DEFAULT_MAX_HITS,
        })
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    pub fn with_max_hits(mut self, max_hits: usize) -> Self {
        self.max_hits = max_hits.max(1);
        self
    }

    fn url(&self, operation: &str, segments: &[&str]) -> Result<Url, InfrastructureError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| InfrastructureError::protocol(operation, "endpoint cannot be a base URL"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        operation: &str,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, InfrastructureError> {
        debug!(operation, %method, %url, "Elasticsearch request");
        let mut request = self.client.request(method, url);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        request.send().await.map_err(|e| transport_error(operation, e))
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        operation: &str,
        response: reqwest::Response,
    ) -> Result<T, InfrastructureError> {
        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| InfrastructureError::protocol(operation, format!("unreadable response: {}", e)))
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(status_error(operation, status, message))
        }
    }
}

fn transport_error(operation: &str, err: reqwest::Error) -> InfrastructureError {
    if err.is_timeout() {
        InfrastructureError::timeout(operation, err.to_string())
    } else {
        InfrastructureError::unavailable(operation, err.to_string())
    }
}

fn status_error(operation: &str, status: StatusCode, body: String) -> InfrastructureError {
    let message = format!("HTTP {}: {}", status.as_u16(), body);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        InfrastructureError::unavailable(operation, message)
    } else if status == StatusCode::BAD_REQUEST
        && operation == "query"
        && QUERY_PARSE_ERRORS.iter().any(|e| body.contains(e))
    {
        InfrastructureError::query_rejected(operation, message)
    } else {
        InfrastructureError::protocol(operation, message)
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    fn backend(&self) -> &'static str {
        "elasticsearch"
    }

    async fn health(&self) -> Result<IndexHealth, InfrastructureError> {
        let url = self.url("health", &["_cluster", "health"])?;
        let response = self.send("health", Method::GET, url, None).await?;
        self.handle_response("health", response).await
    }

    async fn ingest(
        &self,
        namespace: &Namespace,
        id: &CaseId,
        document: &serde_json::Value,
    ) -> Result<(), InfrastructureError> {
        let mut url = self.url("ingest", &[namespace.as_str(), "_doc", id.as_str()])?;
        url.query_pairs_mut().append_pair("refresh", "wait_for");
        let response = self
            .send("ingest", Method::PUT, url, Some(document.clone()))
            .await?;
        let _: serde_json::Value = self.handle_response("ingest", response).await?;
        Ok(())
    }

    async fn refresh(&self, namespace: &Namespace) -> Result<(), InfrastructureError> {
        let url = self.url("refresh", &[namespace.as_str(), "_refresh"])?;
        let response = self.send("refresh", Method::POST, url, None).await?;
        let _: serde_json::Value = self.handle_response("refresh", response).await?;
        Ok(())
    }

    async fn count(&self, namespace: &Namespace) -> Result<usize, InfrastructureError> {
        let url = self.url("count", &[namespace.as_str(), "_count"])?;
        let response = self.send("count", Method::GET, url, None).await?;
        let body: CountResponse = self.handle_response("count", response).await?;
        Ok(body.count)
    }

    async fn query(
        &self,
        namespace: &Namespace,
        query: &str,
    ) -> Result<Vec<CaseId>, InfrastructureError> {
        let url = self.url("query", &[namespace.as_str(), "_search"])?;
        let body = json!({
            "query": {
                "query_string": {
                    "query": query,
                    "default_field": "*",
                    "analyze_wildcard": true
                }
            },
            "size": self.max_hits,
            "_source": false
        });
        let response = self.send("query", Method::POST, url, Some(body)).await?;
        let body: SearchResponse = self.handle_response("query", response).await?;
        Ok(body
            .hits
            .hits
            .into_iter()
            .map(|hit| CaseId::new(hit.id))
            .collect())
    }

    async fn delete(&self, namespace: &Namespace) -> Result<(), InfrastructureError> {
        let url = self.url("delete", &[namespace.as_str()])?;
        let response = self.send("delete", Method::DELETE, url, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let _: serde_json::Value = self.handle_response("delete", response).await?;
        Ok(())
    }
}
