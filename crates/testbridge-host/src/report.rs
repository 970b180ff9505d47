//! Summary of a run, as printed by the host binary.
//!
//! Execution outcomes are grouped under their parent test: a result whose
//! id carries a parameter suffix (`t.Cls.test_a (x=1)`) becomes a subtest of
//! `t.Cls.test_a`.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::payload::{DiscoveryPayload, ExecutionPayload, Status, TestNode, TestOutcome};

const SUCCESS: &str = "success";
const SUBTEST_FAILURE: &str = "subtest-failure";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Report {
    Discovery {
        status: Status,
        errors: Vec<String>,
        test_count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        tests: Option<TestNode>,
    },
    Execution {
        status: Status,
        errors: Vec<String>,
        /// Outcome name → number of parent tests with it.
        summary: BTreeMap<String, usize>,
        results: Vec<TestReport>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestReport {
    pub test: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subtests: Vec<SubtestReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtestReport {
    pub name: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Report {
    pub fn from_discovery(payload: &DiscoveryPayload) -> Self {
        Report::Discovery {
            status: payload.status,
            errors: payload.errors().to_vec(),
            test_count: payload.tests.as_ref().map_or(0, |t| t.test_ids().len()),
            tests: payload.tests.clone(),
        }
    }

    pub fn from_execution(payload: &ExecutionPayload) -> Self {
        let results = group_outcomes(payload.outcomes().map(|(_, outcome)| outcome));
        let mut summary = BTreeMap::new();
        for result in &results {
            *summary.entry(result.outcome.clone()).or_insert(0) += 1;
        }
        Report::Execution {
            status: payload.status,
            errors: payload.errors().to_vec(),
            summary,
            results,
        }
    }

    /// True when the runner reported success and no test failed.
    pub fn passed(&self) -> bool {
        match self {
            Report::Discovery { status, errors, .. } => {
                *status == Status::Success && errors.is_empty()
            }
            Report::Execution {
                status,
                errors,
                results,
                ..
            } => {
                *status == Status::Success
                    && errors.is_empty()
                    && results.iter().all(|r| is_passing(&r.outcome))
            }
        }
    }
}

fn is_passing(outcome: &str) -> bool {
    matches!(outcome, SUCCESS | "skipped" | "expected-failure")
}

fn group_outcomes<'a>(outcomes: impl Iterator<Item = &'a TestOutcome>) -> Vec<TestReport> {
    let mut grouped: BTreeMap<String, TestReport> = BTreeMap::new();

    for outcome in outcomes {
        let (parent, suffix) = outcome.split_id();
        if suffix.is_empty() {
            let entry = grouped
                .entry(parent.to_string())
                .or_insert_with(|| empty_report(parent));
            entry.outcome = outcome.outcome.clone();
            entry.message = outcome.message.clone();
            entry.traceback = outcome.traceback.clone();
            continue;
        }

        let entry = grouped
            .entry(parent.to_string())
            .or_insert_with(|| empty_report(parent));
        entry.subtests.push(SubtestReport {
            name: suffix.to_string(),
            outcome: outcome.outcome.clone(),
            message: outcome.message.clone(),
        });
    }

    for report in grouped.values_mut() {
        if report.outcome.is_empty() {
            report.outcome = if report.subtests.iter().all(|s| is_passing(&s.outcome)) {
                SUCCESS.to_string()
            } else {
                SUBTEST_FAILURE.to_string()
            };
        }
    }
    grouped.into_values().collect()
}

fn empty_report(test: &str) -> TestReport {
    TestReport {
        test: test.to_string(),
        outcome: String::new(),
        message: None,
        traceback: None,
        subtests: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn execution(result: serde_json::Value) -> ExecutionPayload {
        serde_json::from_value(json!({"status": "success", "error": null, "result": result})).unwrap()
    }

    #[test]
    fn subtests_are_grouped_under_parent() {
        let payload = execution(json!({
            "t.C.test_a (x=1)": {"test": "t.C.test_a (x=1)", "outcome": "success"},
            "t.C.test_a (x=2)": {"test": "t.C.test_a (x=2)", "outcome": "failure", "message": "2 != 3"},
            "t.C.test_b": {"test": "t.C.test_b", "outcome": "success"}
        }));

        let Report::Execution { results, summary, .. } = Report::from_execution(&payload) else {
            panic!("expected execution report");
        };
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].test, "t.C.test_a");
        assert_eq!(results[0].outcome, SUBTEST_FAILURE);
        assert_eq!(results[0].subtests.len(), 2);
        assert_eq!(results[0].subtests[1].message.as_deref(), Some("2 != 3"));
        assert_eq!(results[1].outcome, SUCCESS);
        assert_eq!(summary.get(SUBTEST_FAILURE), Some(&1));
        assert_eq!(summary.get(SUCCESS), Some(&1));
    }

    #[test]
    fn parent_outcome_wins_over_subtests() {
        let payload = execution(json!({
            "t.test_a": {"test": "t.test_a", "outcome": "error", "traceback": "tb"},
            "t.test_a [case]": {"test": "t.test_a [case]", "outcome": "success"}
        }));
        let report = Report::from_execution(&payload);
        assert!(!report.passed());
        let Report::Execution { results, .. } = report else {
            panic!("expected execution report");
        };
        assert_eq!(results[0].outcome, "error");
        assert_eq!(results[0].traceback.as_deref(), Some("tb"));
    }

    #[test]
    fn discovery_report_counts_tests() {
        let payload: DiscoveryPayload = serde_json::from_value(json!({
            "status": "success",
            "tests": {"path": "/w", "name": "w", "type_": "folder", "children": [
                {"path": "/w/t.py", "name": "t.py", "type_": "file", "children": [
                    {"path": "/w/t.py", "name": "test_a", "type_": "test", "id_": "t.py::test_a", "lineno": "1", "runID": "t.py::test_a"},
                    {"path": "/w/t.py", "name": "test_b", "type_": "test", "id_": "t.py::test_b", "lineno": "4", "runID": "t.py::test_b"}
                ]}
            ]}
        }))
        .unwrap();
        let report = Report::from_discovery(&payload);
        assert!(report.passed());
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["kind"], "discovery");
        assert_eq!(value["test_count"], 2);
    }

    #[test]
    fn empty_execution_passes() {
        let payload: ExecutionPayload = serde_json::from_value(json!({"status": "success"})).unwrap();
        let report = Report::from_execution(&payload);
        assert!(report.passed());
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({"kind": "execution", "status": "success", "errors": [], "summary": {}, "results": []})
        );
    }
}
