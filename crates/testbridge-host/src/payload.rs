//! Request and result bodies exchanged with the runner.
//!
//! The router hands resolvers raw JSON; these types are what the adapters
//! decode it into. Unknown fields are ignored so newer runners stay
//! compatible.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::ident::split_test_name;

// ── Requests ────────────────────────────────────────────────────────

/// Body of a request written down to the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum RunnerRequest {
    Discovery {
        cwd: String,
    },
    #[serde(rename_all = "camelCase")]
    Execution {
        cwd: String,
        test_ids: Vec<String>,
        debug: bool,
    },
}

// ── Results ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
    #[serde(other)]
    Unknown,
}

/// Accepts `null`, a list of strings, or a bare string.
fn error_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => None,
        Some(Raw::One(message)) => Some(vec![message]),
        Some(Raw::Many(messages)) => Some(messages),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    pub status: Status,
    #[serde(default, deserialize_with = "error_list")]
    pub error: Option<Vec<String>>,
    #[serde(default)]
    pub tests: Option<TestNode>,
}

impl DiscoveryPayload {
    pub fn errors(&self) -> &[String] {
        self.error.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    pub status: Status,
    #[serde(default, deserialize_with = "error_list")]
    pub error: Option<Vec<String>>,
    #[serde(default)]
    pub result: Option<BTreeMap<String, TestOutcome>>,
}

impl ExecutionPayload {
    pub fn errors(&self) -> &[String] {
        self.error.as_deref().unwrap_or_default()
    }

    pub fn outcomes(&self) -> impl Iterator<Item = (&str, &TestOutcome)> {
        self.result
            .iter()
            .flat_map(|m| m.iter())
            .map(|(id, outcome)| (id.as_str(), outcome))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub test: String,
    pub outcome: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub traceback: Option<String>,
    #[serde(default)]
    pub subtest: Option<String>,
}

impl TestOutcome {
    /// `(parent, subtest)` of the reported test id.
    pub fn split_id(&self) -> (&str, &str) {
        split_test_name(&self.test)
    }
}

// ── Discovery tree ──────────────────────────────────────────────────

/// Node of the discovered test tree. Folders, files and classes carry
/// `children`; test items carry `id_` and `lineno`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestNode {
    pub path: String,
    pub name: String,
    #[serde(rename = "type_")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TestNode>>,
    #[serde(default, rename = "id_", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<Value>,
    #[serde(default, rename = "runID", skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl TestNode {
    /// Structural equality that ignores child order.
    pub fn same_tree(&self, other: &TestNode) -> bool {
        if self.path != other.path || self.name != other.name || self.kind != other.kind {
            return false;
        }

        match (&self.children, &other.children, &self.id, &other.id) {
            (Some(a), Some(b), _, _) => {
                if a.len() != b.len() {
                    return false;
                }
                let mut a: Vec<&TestNode> = a.iter().collect();
                let mut b: Vec<&TestNode> = b.iter().collect();
                a.sort_by(|x, y| x.path.cmp(&y.path));
                b.sort_by(|x, y| x.path.cmp(&y.path));
                a.iter().zip(b.iter()).all(|(x, y)| x.same_tree(y))
            }
            (_, _, Some(a), Some(b)) => a == b && self.lineno == other.lineno,
            _ => false,
        }
    }

    /// Ids of every test item below this node, depth first.
    pub fn test_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        self.collect_ids(&mut ids);
        ids
    }

    fn collect_ids<'a>(&'a self, ids: &mut Vec<&'a str>) {
        if let Some(id) = &self.id {
            ids.push(id);
        }
        for child in self.children.iter().flatten() {
            child.collect_ids(ids);
        }
    }
}
