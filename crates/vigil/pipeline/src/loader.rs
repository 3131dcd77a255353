//! Rule file loading.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use vigil_types::DetectionRule;

use crate::error::{PipelineError, PipelineResult};

/// True for `.yml`, `.yaml` and `.json` files.
pub fn is_rule_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml") | Some("json")
    )
}

/// Load one rule file and assign case ids.
pub fn load_rule(path: &Path) -> PipelineResult<DetectionRule> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::load(path, e.to_string()))?;
    let mut rule: DetectionRule = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&contents)
            .map_err(|e| PipelineError::load(path, e.to_string()))?,
        _ => serde_yaml::from_str(&contents)
            .map_err(|e| PipelineError::load(path, e.to_string()))?,
    };
    rule.assign_case_ids();
    Ok(rule)
}

/// Load every rule file directly under `dir`, in path order.
///
/// Duplicate rule ids are an error: they would share output artifacts.
pub fn load_rules(dir: &Path) -> PipelineResult<Vec<DetectionRule>> {
    let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::load(dir, e.to_string()))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_rule_file(path))
        .collect();
    paths.sort();

    let mut seen = HashSet::new();
    let mut rules = Vec::with_capacity(paths.len());
    for path in paths {
        let rule = load_rule(&path)?;
        if !seen.insert(rule.id.clone()) {
            return Err(PipelineError::load(
                &path,
                format!("duplicate rule id '{}'", rule.id),
            ));
        }
        debug!(path = %path.display(), rule_id = %rule.id, cases = rule.test_cases.len(), "Loaded rule");
        rules.push(rule);
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::CaseLabel;

    const VSS_RULE: &str = r#"
id: vss-delete
name: Shadow copy deletion
query: 'process.name:vssadmin.exe AND process.command_line:*delete*shadows*'
severity: high
risk_score: 73
tags: [attack.impact, attack.t1490]
test_cases:
  - type: TP
    description: Ransomware deleting shadow copies
    log_entry:
      process:
        name: vssadmin.exe
        command_line: vssadmin delete shadows /all /quiet
    expected_match: true
  - type: FN
    description: WMI based deletion
    log_entry:
      process:
        name: powershell.exe
    expected_match: false
    evasion_technique: WMI instead of vssadmin
"#;

    #[test]
    fn loads_yaml_rules_and_assigns_ids() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vss.yml"), VSS_RULE).unwrap();
        std::fs::write(dir.path().join("README.md"), "not a rule").unwrap();

        let rules = load_rules(dir.path()).unwrap();
        assert_eq!(rules.len(), 1);
        let rule = &rules[0];
        assert_eq!(rule.id.as_str(), "vss-delete");
        assert_eq!(rule.metadata.risk_score, 73);
        assert_eq!(rule.test_cases[1].label, CaseLabel::FalseNegative);
        assert_eq!(rule.test_cases[1].id.as_str(), "vss-delete-case-2");
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yml"), VSS_RULE).unwrap();
        std::fs::write(dir.path().join("b.yaml"), VSS_RULE).unwrap();
        let err = load_rules(dir.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate rule id"));
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        match load_rule(&path) {
            Err(PipelineError::Load { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected result {:?}", other.map(|r| r.id)),
        }
    }
}
