#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use vigil_harness::{IntegrationHarness, SearchIndex};
use vigil_pipeline::{ControllerConfig, IterationController, StageBudgets};
use vigil_refinement::mocks::{FixedJudge, ScriptedGenerator};
use vigil_refinement::RefinementEngine;
use vigil_schema::mocks::MockFieldResearcher;
use vigil_schema::{FieldKnowledgeCache, FieldSchema, SchemaFieldValidator};
use vigil_types::{CaseLabel, DetectionRule, RetryPolicy, TestCase};

pub const VSS_QUERY: &str =
    "event.code:1 AND process.name:vssadmin.exe AND process.command_line:*delete*shadows*";

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        multiplier: 2.0,
        call_timeout: Duration::from_secs(5),
    }
}

/// Collaborators wired into one controller.
pub struct Fixture {
    pub index: Arc<dyn SearchIndex>,
    pub researcher: Arc<MockFieldResearcher>,
    pub generator: Arc<ScriptedGenerator>,
    pub judge: Arc<FixedJudge>,
    pub cache: Arc<FieldKnowledgeCache>,
    pub budgets: StageBudgets,
}

impl Fixture {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self {
            index,
            researcher: Arc::new(MockFieldResearcher::unknown_everything()),
            generator: Arc::new(ScriptedGenerator::pass_through()),
            judge: Arc::new(FixedJudge::approving(0.9)),
            cache: Arc::new(FieldKnowledgeCache::new()),
            budgets: StageBudgets::default(),
        }
    }

    pub fn generator(mut self, generator: ScriptedGenerator) -> Self {
        self.generator = Arc::new(generator);
        self
    }

    pub fn judge(mut self, judge: FixedJudge) -> Self {
        self.judge = Arc::new(judge);
        self
    }

    pub fn researcher(mut self, researcher: MockFieldResearcher) -> Self {
        self.researcher = Arc::new(researcher);
        self
    }

    pub fn budgets(mut self, budgets: StageBudgets) -> Self {
        self.budgets = budgets;
        self
    }

    pub fn controller(&self) -> IterationController {
        let schema = FieldSchema::ecs_core().expect("bundled catalog parses");
        let fields = SchemaFieldValidator::new(
            Arc::new(schema),
            self.cache.clone(),
            self.researcher.clone(),
        )
        .with_retry(fast_retry());
        let harness = IntegrationHarness::new(self.index.clone()).with_retry(fast_retry());
        let engine = RefinementEngine::new(self.generator.clone(), self.judge.clone())
            .with_retry(fast_retry());
        IterationController::standard(
            Arc::new(fields),
            Arc::new(harness),
            Arc::new(engine),
            ControllerConfig {
                budgets: self.budgets,
                retry: fast_retry(),
                ..ControllerConfig::default()
            },
        )
    }
}

pub fn tp(command_line: &str) -> TestCase {
    TestCase::new(
        "",
        CaseLabel::TruePositive,
        json!({"event": {"code": 1}, "process": {"name": "vssadmin.exe", "command_line": command_line}}),
        true,
    )
    .with_description("shadow copy deletion via vssadmin")
}

pub fn fn_case() -> TestCase {
    TestCase::new(
        "",
        CaseLabel::FalseNegative,
        json!({"event": {"code": 1}, "process": {"name": "powershell.exe", "command_line": "Get-WmiObject Win32_ShadowCopy | %{$_.Delete()}"}}),
        false,
    )
    .with_evasion("WMI deletion instead of vssadmin")
}

pub fn tn(command_line: &str) -> TestCase {
    TestCase::new(
        "",
        CaseLabel::TrueNegative,
        json!({"event": {"code": 1}, "process": {"name": "vssadmin.exe", "command_line": command_line}}),
        false,
    )
    .with_description("administrator inspecting shadow copies")
}

/// The shadow copy deletion rule with one TP and one FN case.
pub fn vss_rule(query: &str) -> DetectionRule {
    let mut rule = DetectionRule::new("vss-delete", "Shadow copy deletion", query)
        .with_case(tp("vssadmin delete shadows /all /quiet"))
        .with_case(fn_case());
    rule.assign_case_ids();
    rule
}
