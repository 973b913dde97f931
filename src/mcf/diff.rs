//! MCF Diff - Compares two node sets property by property
//!
//! Nodes with global keys are paired by key; file-local nodes are paired by
//! a fingerprint of their normalised PVs.

use crate::counters::Counters;
use crate::mcf::node::{is_local_key, normalize_value, McfNode, McfNodes};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt::Write as _;

/// Normalised node: property to sorted set of canonical values.
pub type NormalizedPvs = BTreeMap<String, BTreeSet<String>>;

pub struct McfDiffer {
    ignore_properties: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDiff {
    pub property: String,
    pub added: Vec<String>,
    pub deleted: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDiff {
    pub key: String,
    pub properties: Vec<PropertyDiff>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McfDiff {
    /// Nodes only in the right input, by key.
    pub added: BTreeMap<String, NormalizedPvs>,
    /// Nodes only in the left input, by key.
    pub deleted: BTreeMap<String, NormalizedPvs>,
    pub modified: Vec<NodeDiff>,
    /// Nodes present on both sides with identical PVs.
    pub matched: usize,
}

impl McfDiffer {
    pub fn new(ignore_properties: Vec<String>) -> Self {
        Self { ignore_properties }
    }

    /// Compare two node sets. Nodes with global keys are paired by key;
    /// nodes with file-local keys are paired by fingerprint.
    pub fn compare(&self, left: &McfNodes, right: &McfNodes) -> McfDiff {
        let mut diff = McfDiff::default();

        let mut right_local: HashMap<String, VecDeque<&String>> = HashMap::new();
        for (key, node) in right.iter().filter(|(k, _)| is_local_key(k)) {
            right_local
                .entry(fingerprint_node(node, &self.ignore_properties))
                .or_default()
                .push_back(key);
        }

        let mut matched_local: BTreeSet<&String> = BTreeSet::new();
        for (key, node) in left {
            if is_local_key(key) {
                let fingerprint = fingerprint_node(node, &self.ignore_properties);
                match right_local.get_mut(&fingerprint).and_then(|keys| keys.pop_front()) {
                    Some(right_key) => {
                        matched_local.insert(right_key);
                        diff.matched += 1;
                    }
                    None => {
                        diff.deleted.insert(key.clone(), self.normalize(node));
                    }
                }
                continue;
            }
            match right.get(key) {
                Some(other) => {
                    let properties = self.diff_node_pvs(node, other);
                    if properties.is_empty() {
                        diff.matched += 1;
                    } else {
                        diff.modified.push(NodeDiff {
                            key: key.clone(),
                            properties,
                        });
                    }
                }
                None => {
                    diff.deleted.insert(key.clone(), self.normalize(node));
                }
            }
        }

        for (key, node) in right {
            let unmatched = if is_local_key(key) {
                !matched_local.contains(key)
            } else {
                !left.contains_key(key)
            };
            if unmatched {
                diff.added.insert(key.clone(), self.normalize(node));
            }
        }

        diff.modified.sort_by(|a, b| a.key.cmp(&b.key));
        tracing::info!(
            "MCF diff: {} added, {} deleted, {} modified, {} matched",
            diff.added.len(),
            diff.deleted.len(),
            diff.modified.len(),
            diff.matched
        );
        diff
    }

    pub fn normalize(&self, node: &McfNode) -> NormalizedPvs {
        normalize_node(node, &self.ignore_properties)
    }

    /// Per-property value differences between two nodes.
    pub fn diff_node_pvs(&self, left: &McfNode, right: &McfNode) -> Vec<PropertyDiff> {
        let left = self.normalize(left);
        let right = self.normalize(right);
        let empty = BTreeSet::new();

        let props: BTreeSet<&String> = left.keys().chain(right.keys()).collect();
        props
            .into_iter()
            .filter_map(|prop| {
                let l = left.get(prop).unwrap_or(&empty);
                let r = right.get(prop).unwrap_or(&empty);
                let added: Vec<String> = r.difference(l).cloned().collect();
                let deleted: Vec<String> = l.difference(r).cloned().collect();
                if added.is_empty() && deleted.is_empty() {
                    None
                } else {
                    Some(PropertyDiff {
                        property: prop.clone(),
                        added,
                        deleted,
                    })
                }
            })
            .collect()
    }
}

/// Canonical PVs of a node, without `Node` and ignored properties.
pub fn normalize_node(node: &McfNode, ignore_properties: &[String]) -> NormalizedPvs {
    node.iter()
        .filter(|(prop, _)| prop.as_str() != "Node")
        .filter(|(prop, _)| !ignore_properties.iter().any(|p| p == *prop))
        .map(|(prop, values)| {
            let values: BTreeSet<String> = values.iter().map(|v| normalize_value(v)).collect();
            (prop.clone(), values)
        })
        .collect()
}

/// Stable SHA-256 fingerprint of a node's normalised PVs.
pub fn fingerprint_node(node: &McfNode, ignore_properties: &[String]) -> String {
    let mut hasher = Sha256::new();
    for (prop, values) in normalize_node(node, ignore_properties) {
        hasher.update(prop.as_bytes());
        hasher.update(b"=");
        for value in values {
            hasher.update(value.as_bytes());
            hasher.update(b",");
        }
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

impl McfDiff {
    pub fn has_differences(&self) -> bool {
        !self.added.is_empty() || !self.deleted.is_empty() || !self.modified.is_empty()
    }

    pub fn record(&self, counters: &Counters) {
        counters.add("nodes-added", self.added.len() as i64);
        counters.add("nodes-deleted", self.deleted.len() as i64);
        counters.add("nodes-modified", self.modified.len() as i64);
        counters.add("nodes-matched", self.matched as i64);

        let mut pvs_added: usize = self.added.values().map(|n| n.values().map(|v| v.len()).sum::<usize>()).sum();
        let mut pvs_deleted: usize = self.deleted.values().map(|n| n.values().map(|v| v.len()).sum::<usize>()).sum();
        for node in &self.modified {
            for prop in &node.properties {
                pvs_added += prop.added.len();
                pvs_deleted += prop.deleted.len();
            }
        }
        counters.add("pvs-added", pvs_added as i64);
        counters.add("pvs-deleted", pvs_deleted as i64);
    }

    /// Render as text: deleted nodes, added nodes, then modified nodes, each
    /// under a `Node:` header with `-`/`+` prefixed PVs.
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for (key, pvs) in &self.deleted {
            let _ = writeln!(text, "- Node: {}", key);
            for (prop, values) in pvs {
                for value in values {
                    let _ = writeln!(text, "- {}: {}", prop, value);
                }
            }
            text.push('\n');
        }
        for (key, pvs) in &self.added {
            let _ = writeln!(text, "+ Node: {}", key);
            for (prop, values) in pvs {
                for value in values {
                    let _ = writeln!(text, "+ {}: {}", prop, value);
                }
            }
            text.push('\n');
        }
        for node in &self.modified {
            let _ = writeln!(text, "  Node: {}", node.key);
            for prop in &node.properties {
                for value in &prop.deleted {
                    let _ = writeln!(text, "- {}: {}", prop.property, value);
                }
                for value in &prop.added {
                    let _ = writeln!(text, "+ {}: {}", prop.property, value);
                }
            }
            text.push('\n');
        }
        text
    }
}
