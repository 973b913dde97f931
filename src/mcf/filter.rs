//! MCF Filter - Select nodes and drop properties

use crate::mcf::node::{normalize_value, strip_namespace, McfNodes};
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct McfFilter {
    /// When non-empty, only these keys are kept.
    pub keep_keys: HashSet<String>,
    pub drop_keys: HashSet<String>,
    /// Every `(property, value)` pair must be present on a kept node.
    pub require_pvs: Vec<(String, String)>,
    pub drop_properties: Vec<String>,
}

impl McfFilter {
    /// Parse `property=value` selectors.
    pub fn with_required(mut self, selectors: &[String]) -> Self {
        for selector in selectors {
            if let Some((prop, value)) = selector.split_once('=') {
                self.require_pvs
                    .push((prop.trim().to_string(), normalize_value(value)));
            }
        }
        self
    }

    pub fn apply(&self, nodes: McfNodes) -> McfNodes {
        // Node keys are stored without a namespace prefix.
        let keep: HashSet<&str> = self.keep_keys.iter().map(|k| strip_namespace(k)).collect();
        let drop: HashSet<&str> = self.drop_keys.iter().map(|k| strip_namespace(k)).collect();
        nodes
            .into_iter()
            .filter(|(key, _)| keep.is_empty() || keep.contains(key.as_str()))
            .filter(|(key, _)| !drop.contains(key.as_str()))
            .filter(|(_, node)| {
                self.require_pvs.iter().all(|(prop, value)| {
                    node.get(prop)
                        .map(|values| values.iter().any(|v| normalize_value(v) == *value))
                        .unwrap_or(false)
                })
            })
            .map(|(key, mut node)| {
                node.retain(|prop| !self.drop_properties.iter().any(|p| p == prop));
                (key, node)
            })
            .collect()
    }
}
