//! MCF Merge - Combine nodes that share a key

use crate::counters::Counters;
use crate::mcf::node::{normalize_value, McfNode, McfNodes};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How a property present on both nodes is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergePolicy {
    /// Union of values.
    #[default]
    Append,
    /// Values from the later node replace earlier ones.
    Replace,
    /// Earlier values are kept.
    KeepFirst,
}

impl std::str::FromStr for MergePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "append" => Ok(Self::Append),
            "replace" => Ok(Self::Replace),
            "keep-first" => Ok(Self::KeepFirst),
            other => Err(format!("unknown merge policy '{}'", other)),
        }
    }
}

/// Append every value of `src` into `dst`.
pub fn append_node(dst: &mut McfNode, src: &McfNode) {
    for (prop, values) in src.iter() {
        for value in values {
            dst.add_value(prop, value);
        }
    }
}

fn normalized_set(values: &[String]) -> BTreeSet<String> {
    values.iter().map(|v| normalize_value(v)).collect()
}

/// Merge `src` into `dst` under `policy`. Properties listed in
/// `multi_value_props` are always unioned. Disagreeing single-valued
/// properties are counted as `mcf-merge-conflict`.
pub fn merge_node(
    dst: &mut McfNode,
    src: &McfNode,
    policy: MergePolicy,
    multi_value_props: &[String],
    counters: &Counters,
) {
    for (prop, values) in src.iter() {
        let existing = match dst.get(prop) {
            Some(existing) => existing.to_vec(),
            None => {
                dst.set_values(prop, values.clone());
                continue;
            }
        };
        let is_multi = multi_value_props.iter().any(|p| p == prop);
        if !is_multi && prop != "Node" && normalized_set(&existing) != normalized_set(values) {
            counters.add_with_sample(
                "mcf-merge-conflict",
                1,
                format!("{}: {:?} vs {:?}", prop, existing, values),
            );
        }
        match policy {
            MergePolicy::Replace if !is_multi && prop != "Node" => {
                dst.set_values(prop, values.clone())
            }
            MergePolicy::KeepFirst if !is_multi => {}
            _ => {
                for value in values {
                    dst.add_value(prop, value);
                }
            }
        }
    }
}

/// Merge every node of `src` into `dst`, deduplicating by key.
pub fn merge_nodes(
    dst: &mut McfNodes,
    src: McfNodes,
    policy: MergePolicy,
    multi_value_props: &[String],
    counters: &Counters,
) {
    for (key, node) in src {
        match dst.get_mut(&key) {
            Some(existing) => {
                counters.add("mcf-nodes-merged", 1);
                merge_node(existing, &node, policy, multi_value_props, counters);
            }
            None => {
                dst.insert(key, node);
            }
        }
    }
}

/// True when the nodes agree on every shared single-valued property.
pub fn can_merge(a: &McfNode, b: &McfNode, multi_value_props: &[String]) -> bool {
    a.iter().all(|(prop, values)| {
        if prop == "Node" || multi_value_props.iter().any(|p| p == prop) {
            return true;
        }
        match b.get(prop) {
            Some(other) => normalized_set(values) == normalized_set(other),
            None => true,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(pairs: &[(&str, &str)]) -> McfNode {
        McfNode::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn test_append_unions_values() {
        let counters = Counters::new();
        let mut dst = node(&[("Node", "A"), ("typeOf", "dcs:Place")]);
        let src = node(&[("Node", "A"), ("typeOf", "dcs:City"), ("name", "\"A\"")]);
        merge_node(&mut dst, &src, MergePolicy::Append, &[], &counters);
        assert_eq!(dst.get("typeOf").unwrap(), &["dcs:Place", "dcs:City"]);
        assert_eq!(dst.first_value("name"), Some("\"A\""));
        assert_eq!(counters.get("mcf-merge-conflict"), 1);
    }

    #[test]
    fn test_replace_and_keep_first() {
        let counters = Counters::new();
        let src = node(&[("name", "\"new\""), ("memberOf", "dc/g/B")]);

        let mut replaced = node(&[("name", "\"old\""), ("memberOf", "dc/g/A")]);
        let multi = vec!["memberOf".to_string()];
        merge_node(&mut replaced, &src, MergePolicy::Replace, &multi, &counters);
        assert_eq!(replaced.first_value("name"), Some("\"new\""));
        assert_eq!(replaced.get("memberOf").unwrap().len(), 2);

        let mut kept = node(&[("name", "\"old\"")]);
        merge_node(&mut kept, &src, MergePolicy::KeepFirst, &multi, &counters);
        assert_eq!(kept.first_value("name"), Some("\"old\""));
        assert_eq!(kept.first_value("memberOf"), Some("dc/g/B"));
    }

    #[test]
    fn test_equivalent_values_do_not_conflict() {
        let counters = Counters::new();
        let mut dst = node(&[("gender", "dcs:Male"), ("value", "10.0")]);
        let src = node(&[("gender", "Male"), ("value", "10")]);
        assert!(can_merge(&dst, &src, &[]));
        merge_node(&mut dst, &src, MergePolicy::KeepFirst, &[], &counters);
        assert_eq!(counters.get("mcf-merge-conflict"), 0);
    }

    #[test]
    fn test_merge_nodes_dedups_by_key() {
        let counters = Counters::new();
        let mut dst = McfNodes::new();
        dst.insert("A".to_string(), node(&[("Node", "A"), ("typeOf", "dcs:Thing")]));
        let mut src = McfNodes::new();
        src.insert("A".to_string(), node(&[("Node", "A"), ("name", "\"a\"")]));
        src.insert("B".to_string(), node(&[("Node", "B")]));

        merge_nodes(&mut dst, src, MergePolicy::Append, &[], &counters);
        assert_eq!(dst.len(), 2);
        assert_eq!(dst["A"].len(), 3);
        assert_eq!(counters.get("mcf-nodes-merged"), 1);
    }

    #[test]
    fn test_can_merge_detects_conflict() {
        let a = node(&[("populationType", "dcs:Person")]);
        let b = node(&[("populationType", "dcs:Household")]);
        assert!(!can_merge(&a, &b, &[]));
        assert!(can_merge(&a, &b, &["populationType".to_string()]));
    }
}
