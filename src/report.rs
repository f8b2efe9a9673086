// Copyright (c) 2024 Red Hat, Inc.
//
// SPDX-License-Identifier: Apache-2.0
//

//! Check result and report types shared between the runner boundary and
//! the evaluation pipeline.

use std::collections::HashSet;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata key holding the canonical `<package>.<short_name>` rule code.
pub const METADATA_CODE: &str = "code";
/// Metadata key for the finer-grained selector within a rule.
pub const METADATA_TERM: &str = "term";
pub const METADATA_COLLECTIONS: &str = "collections";
pub const METADATA_EFFECTIVE_ON: &str = "effective_on";
pub const METADATA_DEPENDS_ON: &str = "depends_on";
pub const METADATA_TITLE: &str = "title";
pub const METADATA_DESCRIPTION: &str = "description";
pub const METADATA_SOLUTION: &str = "solution";

/// A single rule outcome as reported by the runner.
///
/// The metadata document is polymorphic: values arrive with whatever
/// dynamic types the rule author produced. Accessors coerce defensively
/// and never panic on unexpected shapes.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RuleResult {
    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl RuleResult {
    /// The rule code, when present and a string.
    pub fn code(&self) -> Option<&str> {
        self.metadata.get(METADATA_CODE).and_then(Value::as_str)
    }

    pub fn term(&self) -> Option<&str> {
        self.metadata.get(METADATA_TERM).and_then(Value::as_str)
    }

    /// Collection tags attached to this result. Only string entries of a
    /// list are recognized.
    pub fn collections(&self) -> Vec<String> {
        match self.metadata.get(METADATA_COLLECTIONS) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Codes this result depends on. A bare string is treated as a
    /// single-entry list.
    pub fn depends_on(&self) -> Vec<String> {
        match self.metadata.get(METADATA_DEPENDS_ON) {
            Some(value) => string_list(value),
            None => Vec::new(),
        }
    }
}

/// Coerce a metadata value into a list of strings. A string becomes a
/// singleton, a list keeps its string entries, anything else is empty.
pub(crate) fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Rewrite the `collections` metadata entry into a list of strings, or
/// drop it when it has an unusable shape.
pub(crate) fn normalize_collections(metadata: &mut Map<String, Value>) {
    let Some(value) = metadata.get(METADATA_COLLECTIONS) else {
        return;
    };

    match value {
        Value::Array(items) => {
            let strings: Vec<Value> = items
                .iter()
                .filter(|item| {
                    if !item.is_string() {
                        warn!("dropping non-string collections entry: {item}");
                    }
                    item.is_string()
                })
                .cloned()
                .collect();
            metadata.insert(METADATA_COLLECTIONS.to_string(), Value::Array(strings));
        }
        other => {
            warn!("removing collections metadata of unexpected type: {other}");
            metadata.remove(METADATA_COLLECTIONS);
        }
    }
}

/// A named bucket of rule outcomes for one input namespace. The relative
/// order of results within each bucket is the runner's order.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckResult {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default)]
    pub failures: Vec<RuleResult>,

    #[serde(default)]
    pub warnings: Vec<RuleResult>,

    #[serde(default)]
    pub successes: Vec<RuleResult>,

    #[serde(default)]
    pub skipped: Vec<RuleResult>,

    #[serde(default)]
    pub exceptions: Vec<RuleResult>,
}

impl CheckResult {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
            && self.warnings.is_empty()
            && self.successes.is_empty()
            && self.skipped.is_empty()
            && self.exceptions.is_empty()
    }
}

/// Post-processed evaluation output: the ordered check results plus the
/// opaque data document passed through from the runner.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub results: Vec<CheckResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Report {
    /// Remove warnings and successes that depend on a rule which failed
    /// in the same check result. A failed prerequisite makes dependant
    /// outcomes redundant. Failures are never removed.
    pub fn trim(&mut self) {
        for check in self.results.iter_mut() {
            let failed: HashSet<String> = check
                .failures
                .iter()
                .filter_map(|failure| failure.code().map(str::to_string))
                .collect();

            if failed.is_empty() {
                continue;
            }

            let unaffected =
                |result: &RuleResult| !result.depends_on().iter().any(|dep| failed.contains(dep));

            check.warnings.retain(unaffected);
            check.successes.retain(unaffected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(code: &str, depends_on: &[&str]) -> RuleResult {
        let mut metadata = Map::new();
        metadata.insert(METADATA_CODE.to_string(), json!(code));
        if !depends_on.is_empty() {
            metadata.insert(METADATA_DEPENDS_ON.to_string(), json!(depends_on));
        }
        RuleResult {
            message: String::new(),
            metadata,
        }
    }

    #[test]
    fn trim_removes_dependants_of_failures() {
        let mut report = Report {
            results: vec![CheckResult {
                failures: vec![result("a.failure1", &[])],
                warnings: vec![result("a.warning1", &["a.failure1"])],
                successes: vec![result("a.success1", &["a.failure1"])],
                ..Default::default()
            }],
            data: None,
        };

        report.trim();

        let check = &report.results[0];
        assert_eq!(check.failures.len(), 1);
        assert!(check.warnings.is_empty());
        assert!(check.successes.is_empty());
    }

    #[test]
    fn trim_keeps_successful_dependants() {
        let mut report = Report {
            results: vec![CheckResult {
                successes: vec![
                    result("a.success1", &[]),
                    result("a.success2", &["a.success1"]),
                ],
                ..Default::default()
            }],
            data: None,
        };

        report.trim();
        assert_eq!(report.results[0].successes.len(), 2);
    }

    #[test]
    fn trim_keeps_unrelated_dependants() {
        let mut report = Report {
            results: vec![CheckResult {
                failures: vec![result("a.failure", &[])],
                successes: vec![result("a.success1", &["a.unrelated"])],
                ..Default::default()
            }],
            data: None,
        };

        report.trim();
        assert_eq!(report.results[0].successes.len(), 1);
    }

    #[test]
    fn trim_never_removes_failures() {
        let mut report = Report {
            results: vec![CheckResult {
                failures: vec![
                    result("a.failure", &[]),
                    result("a.dependant", &["a.failure"]),
                ],
                ..Default::default()
            }],
            data: None,
        };

        report.trim();
        assert_eq!(report.results[0].failures.len(), 2);
    }

    #[test]
    fn trim_is_scoped_to_one_check_result() {
        let mut report = Report {
            results: vec![
                CheckResult {
                    failures: vec![result("a.failure", &[])],
                    ..Default::default()
                },
                CheckResult {
                    successes: vec![result("a.success", &["a.failure"])],
                    ..Default::default()
                },
            ],
            data: None,
        };

        report.trim();
        assert_eq!(report.results[1].successes.len(), 1);
    }

    #[test]
    fn normalize_keeps_string_entries() {
        let mut metadata = Map::new();
        metadata.insert(METADATA_COLLECTIONS.to_string(), json!(["foo", 1, "bar"]));
        normalize_collections(&mut metadata);
        assert_eq!(metadata.get(METADATA_COLLECTIONS), Some(&json!(["foo", "bar"])));
    }

    #[test]
    fn normalize_removes_unexpected_shapes() {
        for unexpected in [json!(0), json!(false), json!("solo")] {
            let mut metadata = Map::new();
            metadata.insert(METADATA_COLLECTIONS.to_string(), unexpected);
            normalize_collections(&mut metadata);
            assert!(!metadata.contains_key(METADATA_COLLECTIONS));
        }
    }

    #[test]
    fn skipped_and_exceptions_serialize_as_empty_arrays() {
        let check = CheckResult::default();
        let doc = serde_json::to_value(&check).unwrap();
        assert_eq!(doc["skipped"], json!([]));
        assert_eq!(doc["exceptions"], json!([]));
    }

    #[test]
    fn depends_on_accepts_a_bare_string() {
        let mut metadata = Map::new();
        metadata.insert(METADATA_DEPENDS_ON.to_string(), json!("a.b"));
        let result = RuleResult {
            message: String::new(),
            metadata,
        };
        assert_eq!(result.depends_on(), vec!["a.b".to_string()]);
    }
}
