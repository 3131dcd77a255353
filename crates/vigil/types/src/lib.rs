//! Vigil Types - core data model for detection rule validation.
//!
//! Every stage of the Vigil pipeline exchanges the records defined here by
//! value. No stage mutates a rule it does not own: the iteration controller
//! holds the authoritative snapshot and all other components return proposed
//! revisions.
//!
//! ## Key Concepts
//!
//! - **DetectionRule**: a Lucene query plus metadata and an embedded labeled
//!   test corpus
//! - **TestCase**: one log record with `expected_match`; the TP/FN/FP/TN label
//!   is reporting-only
//! - **ConfusionMatrix**: TP/FP/TN/FN tabulation with derived precision,
//!   recall, F1 and accuracy
//! - **ValidationResult**: per-gate verdict with machine-checkable issues
//! - **RefinementAttempt** / **IterationBudget**: audit trail and bounded
//!   retries per gate
//! - **RetryPolicy**: bounded exponential backoff for infrastructure calls,
//!   kept separate from refinement budgets

#![deny(unsafe_code)]

pub mod error;
pub mod ids;
pub mod judgment;
pub mod knowledge;
pub mod metrics;
pub mod refinement;
pub mod retry;
pub mod rule;
pub mod validation;

pub use error::{InfrastructureError, InfrastructureKind};
pub use ids::{CaseId, RuleId};
pub use judgment::{JudgeDecision, Judgment};
pub use knowledge::{Confidence, FieldKnowledge, FieldResearch, KnowledgeSource};
pub use metrics::{
    CaseOutcome, Classification, ConfusionMatrix, MetricsSnapshot, QualityGates,
};
pub use refinement::{IterationBudget, RefinementAttempt, RefinementTarget};
pub use retry::RetryPolicy;
pub use rule::{CaseLabel, DetectionRule, QueryLanguage, RuleMetadata, Severity, TestCase};
pub use validation::{FailureClass, Issue, IssueCause, QualityMetric, Stage, ValidationResult};
