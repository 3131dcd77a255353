//! `vigil check`: offline syntax, schema and corpus checks.
//!
//! No index is contacted and nothing is refined. Fields outside the catalog
//! are reported with the catalog's closest names.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use colored::*;
use serde::Serialize;
use tracing::debug;

use vigil_pipeline::SyntaxAndSchemaGate;
use vigil_schema::{FieldKnowledgeCache, FieldSchema, ResearchContext, SchemaFieldValidator};
use vigil_types::{DetectionRule, Issue, QualityGates, RetryPolicy, RuleId};

use crate::collaborators::Collaborators;
use crate::config::VigilConfig;
use crate::error::CliResult;
use crate::output::{self, CheckRow, OutputFormat};

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Directory of rule files (.yml, .yaml, .json)
    pub rules_dir: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub rule_id: RuleId,
    pub passed: bool,
    pub fields: Vec<String>,
    pub issues: Vec<Issue>,
}

pub async fn execute(args: CheckArgs, config: VigilConfig, format: OutputFormat) -> CliResult<u8> {
    let rules = super::read_rules(&args.rules_dir)?;
    let schema = super::load_schema(&config)?;

    let mut results = Vec::with_capacity(rules.len());
    for rule in &rules {
        results.push(check_rule(rule, schema.clone()).await?);
    }

    match format {
        OutputFormat::Table => {
            let rows: Vec<CheckRow> = results
                .iter()
                .map(|r| CheckRow {
                    rule: r.rule_id.to_string(),
                    result: if r.passed { "ok" } else { "failed" }.to_string(),
                    fields: r.fields.len(),
                    issues: r.issues.len(),
                })
                .collect();
            output::print_rows(rows, format)?;
            for result in results.iter().filter(|r| !r.passed) {
                println!("{}", result.rule_id.to_string().bold());
                for issue in &result.issues {
                    println!("  - {}", issue.message);
                }
            }
        }
        _ => output::print_single(&results, format)?,
    }

    Ok(if results.iter().all(|r| r.passed) { 0 } else { 1 })
}

/// The checks gate 1 runs, plus corpus readiness, without any collaborator.
pub async fn check_rule(rule: &DetectionRule, schema: Arc<FieldSchema>) -> CliResult<CheckResult> {
    let (mut issues, fields) = SyntaxAndSchemaGate::check_syntax(rule);

    if !fields.is_empty() {
        let offline = Collaborators::offline(schema.clone(), QualityGates::default());
        let validator =
            SchemaFieldValidator::new(schema, Arc::new(FieldKnowledgeCache::new()), offline.researcher)
                .with_retry(RetryPolicy::no_retry());
        let report = validator
            .validate(&fields, &ResearchContext::for_rule(rule))
            .await?;
        issues.extend(report.issues());
    }
    issues.extend(rule.missing_corpus_labels().into_iter().map(Issue::missing_label));

    debug!(rule_id = %rule.id, fields = fields.len(), issues = issues.len(), "Checked");
    Ok(CheckResult {
        rule_id: rule.id.clone(),
        passed: issues.is_empty(),
        fields,
        issues,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vigil_types::{CaseLabel, IssueCause, TestCase};

    fn schema() -> Arc<FieldSchema> {
        Arc::new(FieldSchema::ecs_core().unwrap())
    }

    fn rule(query: &str) -> DetectionRule {
        let mut rule = DetectionRule::new("vss-delete", "Shadow copy deletion", query)
            .with_case(TestCase::new(
                "",
                CaseLabel::TruePositive,
                json!({"process": {"name": "vssadmin.exe"}}),
                true,
            ))
            .with_case(TestCase::new(
                "",
                CaseLabel::FalseNegative,
                json!({"process": {"name": "powershell.exe"}}),
                false,
            ));
        rule.assign_case_ids();
        rule
    }

    #[tokio::test]
    async fn clean_rule_passes() {
        let result = check_rule(&rule("process.name:vssadmin.exe"), schema()).await.unwrap();
        assert!(result.passed, "issues: {:?}", result.issues);
        assert_eq!(result.fields, vec!["process.name".to_string()]);
    }

    #[tokio::test]
    async fn unknown_field_and_missing_label_are_reported() {
        let mut rule = rule("process.cmdline:*delete*");
        rule.test_cases.retain(|c| c.label == CaseLabel::TruePositive);

        let result = check_rule(&rule, schema()).await.unwrap();
        assert!(!result.passed);
        assert!(result.issues.iter().any(|i| matches!(
            &i.cause,
            IssueCause::UnknownField { alternatives, .. } if alternatives.contains(&"process.command_line".to_string())
        )));
        assert!(result
            .issues
            .iter()
            .any(|i| matches!(i.cause, IssueCause::MissingCorpusLabel { label: CaseLabel::FalseNegative })));
    }

    #[tokio::test]
    async fn syntax_error_skips_field_checks() {
        let result = check_rule(&rule("process.name:(vssadmin.exe"), schema()).await.unwrap();
        assert!(!result.passed);
        assert!(result.fields.is_empty());
        assert!(matches!(result.issues[0].cause, IssueCause::SyntaxError { .. }));
    }
}
