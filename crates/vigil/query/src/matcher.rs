//! Evaluate a parsed query against a JSON log record.
//!
//! Field lookup accepts both nested objects (`{"process": {"name": ..}}`) and
//! flat dotted keys (`{"process.name": ..}`), in any mix. Arrays are any-of.
//! Term and wildcard comparison is case-insensitive. Exact terms match a whole
//! value or one of its whitespace-separated words.

use serde_json::Value as Json;

use crate::ast::{Bound, Query, Range, Value};

impl Query {
    pub fn matches(&self, document: &Json) -> bool {
        match self {
            Query::Term { field, value } => {
                let leaves = match field {
                    Some(path) => lookup(document, path),
                    None => all_leaves(document),
                };
                match value {
                    Value::Exists => leaves.iter().any(|leaf| !leaf.is_null()),
                    _ => leaves
                        .iter()
                        .filter_map(|leaf| leaf_text(leaf))
                        .any(|text| value_matches(value, &text)),
                }
            }
            Query::And { clauses } => clauses.iter().all(|c| c.matches(document)),
            Query::Or { clauses } => clauses.iter().any(|c| c.matches(document)),
            Query::Not { clause } => !clause.matches(document),
        }
    }
}

fn value_matches(value: &Value, text: &str) -> bool {
    match value {
        Value::Exact(expected) => {
            let expected = expected.to_lowercase();
            let text = text.to_lowercase();
            text == expected || text.split_whitespace().any(|word| word == expected)
        }
        Value::Wildcard(pattern) => pattern.matches(text),
        Value::Phrase(phrase) => text.to_lowercase().contains(&phrase.to_lowercase()),
        Value::Range(range) => in_range(range, text),
        Value::Exists => true,
    }
}

fn in_range(range: &Range, text: &str) -> bool {
    let numeric = text.parse::<f64>().ok().filter(|_| {
        [&range.lower, &range.upper]
            .iter()
            .all(|b| b.value.as_deref().map_or(true, |v| v.parse::<f64>().is_ok()))
    });

    let check = |bound: &Bound, is_lower: bool| -> bool {
        let Some(limit) = bound.value.as_deref() else {
            return true;
        };
        let ordering = match numeric {
            Some(n) => match limit.parse::<f64>().ok().and_then(|l| n.partial_cmp(&l)) {
                Some(ordering) => ordering,
                None => return false,
            },
            None => text.cmp(limit),
        };
        match (is_lower, bound.inclusive) {
            (true, true) => ordering.is_ge(),
            (true, false) => ordering.is_gt(),
            (false, true) => ordering.is_le(),
            (false, false) => ordering.is_lt(),
        }
    };

    check(&range.lower, true) && check(&range.upper, false)
}

fn leaf_text(leaf: &Json) -> Option<String> {
    match leaf {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        Json::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// All scalar values reachable at `path`, with arrays flattened.
pub fn lookup<'a>(document: &'a Json, path: &str) -> Vec<&'a Json> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    collect(document, &segments, &mut out);
    out
}

fn collect<'a>(node: &'a Json, segments: &[&str], out: &mut Vec<&'a Json>) {
    if segments.is_empty() {
        push_leaves(node, out);
        return;
    }
    match node {
        Json::Array(items) => {
            for item in items {
                collect(item, segments, out);
            }
        }
        Json::Object(map) => {
            // Try every split of the remaining path into "key" + "rest" so
            // flat dotted keys and nested objects can be mixed.
            for split in 1..=segments.len() {
                let key = segments[..split].join(".");
                if let Some(child) = map.get(&key) {
                    collect(child, &segments[split..], out);
                }
            }
        }
        _ => {}
    }
}

fn push_leaves<'a>(node: &'a Json, out: &mut Vec<&'a Json>) {
    match node {
        Json::Array(items) => {
            for item in items {
                push_leaves(item, out);
            }
        }
        Json::Object(_) => {}
        leaf => out.push(leaf),
    }
}

fn all_leaves(document: &Json) -> Vec<&Json> {
    let mut out = Vec::new();
    walk_all(document, &mut out);
    out
}

fn walk_all<'a>(node: &'a Json, out: &mut Vec<&'a Json>) {
    match node {
        Json::Array(items) => items.iter().for_each(|i| walk_all(i, out)),
        Json::Object(map) => map.values().for_each(|v| walk_all(v, out)),
        leaf => out.push(leaf),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate_syntax;
    use serde_json::json;

    fn matches(query: &str, doc: Json) -> bool {
        validate_syntax(query).unwrap().ast.matches(&doc)
    }

    const VSS: &str =
        "event.code:1 AND process.name:vssadmin.exe AND process.command_line:*delete*shadows*";

    #[test]
    fn vssadmin_rule_matches_deletion_only() {
        let delete = json!({
            "event": {"code": 1},
            "process": {"name": "vssadmin.exe", "command_line": "vssadmin delete shadows /all /quiet"}
        });
        let list = json!({
            "event": {"code": "1"},
            "process": {"name": "vssadmin.exe", "command_line": "vssadmin list shadows"}
        });
        let wmi = json!({
            "event": {"code": 1},
            "process": {"name": "powershell.exe", "command_line": "Get-WmiObject Win32_ShadowCopy | %{$_.Delete()}"}
        });
        assert!(matches(VSS, delete));
        assert!(!matches(VSS, list));
        assert!(!matches(VSS, wmi));
    }

    #[test]
    fn flat_dotted_keys_resolve() {
        let doc = json!({"process.name": "VSSADMIN.EXE", "event": {"code": 1}});
        assert!(matches("process.name:vssadmin.exe AND event.code:1", doc));
    }

    #[test]
    fn arrays_are_any_of() {
        let doc = json!({"process": {"args": ["delete", "shadows"]}, "hosts": [{"name": "a"}, {"name": "b"}]});
        assert!(matches("process.args:shadows", doc.clone()));
        assert!(matches("hosts.name:b", doc));
    }

    #[test]
    fn not_exists_and_ranges() {
        let doc = json!({"bytes": 512, "user": {"name": "root"}});
        assert!(matches("user.name:* AND NOT user.domain:*", doc.clone()));
        assert!(matches("bytes:[100 TO 1000]", doc.clone()));
        assert!(!matches("bytes:{512 TO *}", doc.clone()));
        assert!(matches("user.name:[a TO s]", doc));
    }

    #[test]
    fn bare_terms_search_every_field() {
        let doc = json!({"message": "Mimikatz sekurlsa::logonpasswords"});
        assert!(matches("mimikatz", doc.clone()));
        assert!(matches("\"sekurlsa::logonpasswords\"", doc));
    }
}
