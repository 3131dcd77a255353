//! Collaborator wiring for the CLI.
//!
//! With `collaborators.endpoint` set, field research, rule revision and
//! judgment go to a JSON-over-HTTP service. Without it the CLI runs fully
//! offline: fields outside the catalog are never accepted, revisions return
//! the rule unchanged and the judge scores by F1.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use vigil_refinement::{Judge, RuleGenerator};
use vigil_schema::{FieldResearcher, FieldSchema, ResearchContext, MAX_ALTERNATIVES};
use vigil_types::{
    CaseOutcome, ConfusionMatrix, DetectionRule, FieldResearch, InfrastructureError, Judgment,
    QualityGates, RefinementTarget, Stage, TestCase,
};

use crate::config::VigilConfig;

/// The three collaborator seams a controller needs.
pub struct Collaborators {
    pub researcher: Arc<dyn FieldResearcher>,
    pub generator: Arc<dyn RuleGenerator>,
    pub judge: Arc<dyn Judge>,
    /// `http` or `offline`
    pub mode: &'static str,
}

impl Collaborators {
    pub fn from_config(
        config: &VigilConfig,
        schema: Arc<FieldSchema>,
    ) -> Result<Self, InfrastructureError> {
        match &config.collaborators.endpoint {
            Some(endpoint) => {
                let http = Arc::new(HttpCollaborators::new(
                    endpoint,
                    Duration::from_secs(config.collaborators.timeout_secs),
                )?);
                Ok(Self {
                    researcher: http.clone(),
                    generator: http.clone(),
                    judge: http,
                    mode: "http",
                })
            }
            None => Ok(Self::offline(schema, config.gates.quality())),
        }
    }

    pub fn offline(schema: Arc<FieldSchema>, quality: QualityGates) -> Self {
        Self {
            researcher: Arc::new(SchemaOnlyResearcher::new(schema)),
            generator: Arc::new(PassThroughReviser),
            judge: Arc::new(MetricsJudge::new(quality)),
            mode: "offline",
        }
    }
}

// ========== HTTP ==========

#[derive(Serialize)]
struct ResearchRequest<'a> {
    field: &'a str,
    context: &'a ResearchContext,
}

#[derive(Serialize)]
struct ReviseRequest<'a> {
    rule: &'a DetectionRule,
    stage: Stage,
    target: RefinementTarget,
    feedback: &'a str,
}

#[derive(Serialize)]
struct EvaluateRequest<'a> {
    rule: &'a DetectionRule,
    matrix: &'a ConfusionMatrix,
    corpus: &'a [TestCase],
}

#[derive(Serialize)]
struct RealismRequest<'a> {
    rule: &'a DetectionRule,
    matrix: &'a ConfusionMatrix,
    corpus: &'a [TestCase],
    unexpected: &'a [CaseOutcome],
}

#[derive(Debug, Deserialize)]
struct RealismResponse {
    target: RefinementTarget,
}

/// Client for a collaborator service exposing `POST /research`, `/revise`,
/// `/evaluate` and `/realism`.
pub struct HttpCollaborators {
    client: Client,
    base_url: String,
}

impl HttpCollaborators {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, InfrastructureError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InfrastructureError::protocol("connect", e.to_string()))?;

        Ok(Self {
            client,
            base_url: endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        operation: &str,
        body: &B,
    ) -> Result<T, InfrastructureError> {
        let url = format!("{}/{}", self.base_url, operation);
        debug!(operation, %url, "Collaborator request");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;
        self.handle_response(operation, response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        operation: &str,
        response: reqwest::Response,
    ) -> Result<T, InfrastructureError> {
        let status = response.status();
        if status.is_success() {
            response.json().await.map_err(|e| {
                InfrastructureError::protocol(operation, format!("unreadable response: {}", e))
            })
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
    } else {
        InfrastructureError::protocol(operation, message)
    }
}

#[async_trait]
impl FieldResearcher for HttpCollaborators {
    async fn research(
        &self,
        field: &str,
        context: &ResearchContext,
    ) -> Result<FieldResearch, InfrastructureError> {
        self.post("research", &ResearchRequest { field, context }).await
    }
}

#[async_trait]
impl RuleGenerator for HttpCollaborators {
    async fn revise(
        &self,
        rule: &DetectionRule,
        stage: Stage,
        target: RefinementTarget,
        feedback: &str,
    ) -> Result<DetectionRule, InfrastructureError> {
        let request = ReviseRequest {
            rule,
            stage,
            target,
            feedback,
        };
        self.post("revise", &request).await
    }
}

#[async_trait]
impl Judge for HttpCollaborators {
    async fn evaluate(
        &self,
        rule: &DetectionRule,
        matrix: &ConfusionMatrix,
        corpus: &[TestCase],
    ) -> Result<Judgment, InfrastructureError> {
        self.post("evaluate", &EvaluateRequest { rule, matrix, corpus })
            .await
    }

    async fn assess_realism(
        &self,
        rule: &DetectionRule,
        matrix: &ConfusionMatrix,
        corpus: &[TestCase],
        unexpected: &[CaseOutcome],
    ) -> Result<RefinementTarget, InfrastructureError> {
        let request = RealismRequest {
            rule,
            matrix,
            corpus,
            unexpected,
        };
        let response: RealismResponse = self.post("realism", &request).await?;
        Ok(response.target)
    }
}

// ========== Offline ==========

/// Never confirms a field; offers the closest catalog names instead.
pub struct SchemaOnlyResearcher {
    schema: Arc<FieldSchema>,
}

impl SchemaOnlyResearcher {
    pub fn new(schema: Arc<FieldSchema>) -> Self {
        Self { schema }
    }
}

#[async_trait]
impl FieldResearcher for SchemaOnlyResearcher {
    async fn research(
        &self,
        field: &str,
        _context: &ResearchContext,
    ) -> Result<FieldResearch, InfrastructureError> {
        Ok(FieldResearch::invalid(
            self.schema.suggest(field, MAX_ALTERNATIVES),
        ))
    }
}

/// Returns the rule unchanged. Refinement spends budget without progress.
pub struct PassThroughReviser;

#[async_trait]
impl RuleGenerator for PassThroughReviser {
    async fn revise(
        &self,
        rule: &DetectionRule,
        _stage: Stage,
        _target: RefinementTarget,
        _feedback: &str,
    ) -> Result<DetectionRule, InfrastructureError> {
        Ok(rule.clone())
    }
}

/// Scores by F1 and approves whenever the quality gates hold.
pub struct MetricsJudge {
    quality: QualityGates,
}

impl MetricsJudge {
    pub fn new(quality: QualityGates) -> Self {
        Self { quality }
    }
}

#[async_trait]
impl Judge for MetricsJudge {
    async fn evaluate(
        &self,
        _rule: &DetectionRule,
        matrix: &ConfusionMatrix,
        _corpus: &[TestCase],
    ) -> Result<Judgment, InfrastructureError> {
        let shortfalls = self.quality.check(matrix);
        if shortfalls.is_empty() {
            Ok(Judgment::approve(matrix.f1()))
        } else {
            let recommendations = shortfalls.into_iter().map(|i| i.message).collect();
            Ok(Judgment::refine(matrix.f1(), recommendations))
        }
    }

    async fn assess_realism(
        &self,
        _rule: &DetectionRule,
        _matrix: &ConfusionMatrix,
        _corpus: &[TestCase],
        _unexpected: &[CaseOutcome],
    ) -> Result<RefinementTarget, InfrastructureError> {
        Ok(RefinementTarget::Query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vigil_types::{CaseLabel, InfrastructureKind, JudgeDecision};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rule() -> DetectionRule {
        let mut rule = DetectionRule::new(
            "vss-delete",
            "Shadow copy deletion",
            "process.name:vssadmin.exe",
        )
        .with_case(TestCase::new(
            "",
            CaseLabel::TruePositive,
            json!({"process": {"name": "vssadmin.exe"}}),
            true,
        ));
        rule.assign_case_ids();
        rule
    }

    fn client(server: &MockServer) -> HttpCollaborators {
        HttpCollaborators::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn research_posts_field_and_context() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/research"))
            .and(body_partial_json(json!({
                "field": "winlog.event_data.CommandLine",
                "context": {"rule_id": "vss-delete"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "valid": true,
                "type": "keyword",
                "confidence": "high",
                "alternatives": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let research = client(&server)
            .research(
                "winlog.event_data.CommandLine",
                &ResearchContext::for_rule(&rule()),
            )
            .await
            .unwrap();
        assert!(research.valid);
        assert_eq!(research.field_type.as_deref(), Some("keyword"));
    }

    #[tokio::test]
    async fn revise_round_trips_the_rule() {
        let server = MockServer::start().await;
        let mut revised = rule();
        revised.query = "process.name:vssadmin.exe AND process.command_line:*delete*".into();
        Mock::given(method("POST"))
            .and(path("/revise"))
            .and(body_partial_json(json!({"target": "query", "feedback": "narrow it"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(&revised))
            .mount(&server)
            .await;

        let out = client(&server)
            .revise(&rule(), Stage::IntegrationTest, RefinementTarget::Query, "narrow it")
            .await
            .unwrap();
        assert_eq!(out, revised);
    }

    #[tokio::test]
    async fn evaluate_and_realism_decode_responses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/evaluate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "quality_score": 0.72,
                "decision": "REFINE",
                "recommendations": ["exclude backup agents"]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/realism"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"target": "tests"})))
            .mount(&server)
            .await;

        let http = client(&server);
        let rule = rule();
        let matrix = ConfusionMatrix { tp: 1, ..Default::default() };
        let judgment = http.evaluate(&rule, &matrix, &rule.test_cases).await.unwrap();
        assert_eq!(judgment.decision, JudgeDecision::Refine);
        assert_eq!(judgment.recommendations, vec!["exclude backup agents".to_string()]);

        let target = http
            .assess_realism(&rule, &matrix, &rule.test_cases, &[])
            .await
            .unwrap();
        assert_eq!(target, RefinementTarget::Tests);
    }

    #[tokio::test]
    async fn server_errors_are_retryable_and_client_errors_are_not() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/research"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/evaluate"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad corpus"))
            .mount(&server)
            .await;

        let http = client(&server);
        let rule = rule();
        let err = http
            .research("x.y", &ResearchContext::for_rule(&rule))
            .await
            .unwrap_err();
        assert_eq!(err.kind, InfrastructureKind::Unavailable);
        assert!(err.is_retryable());

        let err = http
            .evaluate(&rule, &ConfusionMatrix::default(), &rule.test_cases)
            .await
            .unwrap_err();
        assert_eq!(err.kind, InfrastructureKind::Protocol);
        assert!(err.message.contains("422"));
    }

    #[tokio::test]
    async fn offline_researcher_offers_catalog_names_only() {
        let schema = Arc::new(FieldSchema::ecs_core().unwrap());
        let researcher = SchemaOnlyResearcher::new(schema);
        let research = researcher
            .research("process.cmdline", &ResearchContext::for_rule(&rule()))
            .await
            .unwrap();
        assert!(!research.valid);
        assert_eq!(research.alternatives[0], "process.command_line");
    }

    #[tokio::test]
    async fn metrics_judge_follows_the_gates() {
        let judge = MetricsJudge::new(QualityGates::default());
        let rule = rule();

        let good = ConfusionMatrix { tp: 4, tn: 4, ..Default::default() };
        let judgment = judge.evaluate(&rule, &good, &rule.test_cases).await.unwrap();
        assert_eq!(judgment.decision, JudgeDecision::Approve);
        assert_eq!(judgment.quality_score, 1.0);

        let noisy = ConfusionMatrix { tp: 2, fp: 2, ..Default::default() };
        let judgment = judge.evaluate(&rule, &noisy, &rule.test_cases).await.unwrap();
        assert_eq!(judgment.decision, JudgeDecision::Refine);
        assert!(judgment.recommendations[0].starts_with("precision"));

        let target = judge
            .assess_realism(&rule, &noisy, &rule.test_cases, &[])
            .await
            .unwrap();
        assert_eq!(target, RefinementTarget::Query);
    }
}
