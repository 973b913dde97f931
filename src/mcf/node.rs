//! MCF Node - Graph node model and value helpers

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Namespace prefixes recognised on reference values.
pub const NAMESPACES: [&str; 3] = ["dcid:", "dcs:", "schema:"];

/// Prefix for keys assigned to nodes that carry neither `Node` nor `dcid`.
pub const AUTO_KEY_PREFIX: &str = "_node_";

lazy_static! {
    static ref NUMBER_RE: Regex = Regex::new(r"^-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][-+]?[0-9]+)?$").unwrap();
    static ref REFERENCE_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_/.\-]*$").unwrap();
}

/// A graph node: ordered properties, each with an ordered list of distinct
/// values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McfNode {
    props: IndexMap<String, Vec<String>>,
}

/// Nodes keyed by their node key, in first-seen order.
pub type McfNodes = IndexMap<String, McfNode>;

impl McfNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut node = Self::new();
        for (prop, value) in pairs {
            let prop: String = prop.into();
            node.add_values(&prop, value.as_ref());
        }
        node
    }

    pub fn get(&self, prop: &str) -> Option<&[String]> {
        self.props.get(prop).map(|v| v.as_slice())
    }

    pub fn first_value(&self, prop: &str) -> Option<&str> {
        self.props
            .get(prop)
            .and_then(|values| values.first())
            .map(|s| s.as_str())
    }

    pub fn contains(&self, prop: &str) -> bool {
        self.props.contains_key(prop)
    }

    /// Append a single value. Returns false for empty or duplicate values.
    pub fn add_value(&mut self, prop: &str, value: &str) -> bool {
        let value = value.trim();
        if value.is_empty() {
            return false;
        }
        let values = self.props.entry(prop.to_string()).or_default();
        if values.iter().any(|v| v == value) {
            return false;
        }
        values.push(value.to_string());
        true
    }

    /// Append every value of a comma separated list.
    pub fn add_values(&mut self, prop: &str, text: &str) -> usize {
        split_values(text)
            .iter()
            .filter(|value| self.add_value(prop, value))
            .count()
    }

    pub fn set_value(&mut self, prop: &str, value: &str) {
        self.props.insert(prop.to_string(), vec![value.trim().to_string()]);
    }

    pub fn set_values(&mut self, prop: &str, values: Vec<String>) {
        if values.is_empty() {
            self.props.shift_remove(prop);
        } else {
            self.props.insert(prop.to_string(), values);
        }
    }

    pub fn remove(&mut self, prop: &str) -> Option<Vec<String>> {
        self.props.shift_remove(prop)
    }

    pub fn retain<F: FnMut(&str) -> bool>(&mut self, mut keep: F) {
        self.props.retain(|prop, _| keep(prop));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.props.iter()
    }

    pub fn properties(&self) -> impl Iterator<Item = &String> {
        self.props.keys()
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// Node key: the `Node` value, else the `dcid`, without namespace.
    pub fn key(&self) -> Option<String> {
        self.first_value("Node")
            .or_else(|| self.first_value("dcid"))
            .map(|k| strip_namespace(strip_quotes(k)).to_string())
            .filter(|k| !k.is_empty())
    }

    /// Global identifier: the `dcid`, else a `Node` value that is not a
    /// file-local id.
    pub fn dcid(&self) -> Option<String> {
        if let Some(dcid) = self.first_value("dcid") {
            return Some(strip_namespace(strip_quotes(dcid)).to_string());
        }
        self.key().filter(|k| !is_local_key(k))
    }
}

/// True for keys that only identify a node within one file.
pub fn is_local_key(key: &str) -> bool {
    key.starts_with(AUTO_KEY_PREFIX) || key.starts_with("E:") || key.starts_with("l:")
}

pub fn strip_namespace(value: &str) -> &str {
    let value = value.trim();
    for ns in NAMESPACES {
        if let Some(rest) = value.strip_prefix(ns) {
            return rest.trim_start();
        }
    }
    value
}

pub fn is_quoted(value: &str) -> bool {
    value.len() >= 2 && value.starts_with('"') && value.ends_with('"')
}

pub fn strip_quotes(value: &str) -> &str {
    let value = value.trim();
    if is_quoted(value) {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

pub fn is_number(value: &str) -> bool {
    NUMBER_RE.is_match(value.trim())
}

/// Add `dcid:` to values that look like node references.
pub fn add_namespace(value: &str) -> String {
    let value = value.trim();
    if value.is_empty()
        || is_quoted(value)
        || is_number(value)
        || value.starts_with('[')
        || NAMESPACES.iter().any(|ns| value.starts_with(ns))
        || value.contains(':')
        || !REFERENCE_RE.is_match(value)
    {
        return value.to_string();
    }
    format!("dcid:{}", value)
}

/// Split a comma separated value list, keeping commas inside double quotes
/// and `[...]` ranges.
pub fn split_values(text: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut bracket_depth = 0usize;

    for c in text.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '[' if !in_quotes => {
                bracket_depth += 1;
                current.push(c);
            }
            ']' if !in_quotes => {
                bracket_depth = bracket_depth.saturating_sub(1);
                current.push(c);
            }
            ',' if !in_quotes && bracket_depth == 0 => {
                let value = current.trim();
                if !value.is_empty() {
                    values.push(value.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    let value = current.trim();
    if !value.is_empty() {
        values.push(value.to_string());
    }
    values
}

/// Canonical form of a value for comparisons.
pub fn normalize_value(value: &str) -> String {
    let value = strip_namespace(strip_quotes(value)).trim();
    if is_number(value) {
        if let Ok(number) = value.parse::<f64>() {
            return format_number(number);
        }
    }
    value.to_string()
}

/// Render a number without a trailing `.0`.
pub fn format_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        format!("{}", number)
    }
}

/// Parse a numeric cell, tolerating thousands separators and quotes.
pub fn numeric_value(value: &str) -> Option<f64> {
    let cleaned: String = strip_quotes(value)
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    let numeric_chars = cleaned
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
    if cleaned.is_empty() || !numeric_chars {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_values_respects_quotes_and_ranges() {
        assert_eq!(
            split_values(r#"dcs:A, "x, y", [10 20 Years],B"#),
            vec!["dcs:A", "\"x, y\"", "[10 20 Years]", "B"]
        );
        assert!(split_values(" , ").is_empty());
    }

    #[test]
    fn test_node_key_and_dcid() {
        let node = McfNode::from_pairs([("Node", "dcid:Count_Person"), ("typeOf", "dcs:StatisticalVariable")]);
        assert_eq!(node.key().as_deref(), Some("Count_Person"));
        assert_eq!(node.dcid().as_deref(), Some("Count_Person"));

        let local = McfNode::from_pairs([("Node", "E:obs->E0")]);
        assert_eq!(local.key().as_deref(), Some("E:obs->E0"));
        assert_eq!(local.dcid(), None);

        let with_dcid = McfNode::from_pairs([("Node", "l:tmp"), ("dcid", "\"geoId/06\"")]);
        assert_eq!(with_dcid.dcid().as_deref(), Some("geoId/06"));
    }

    #[test]
    fn test_add_value_dedups() {
        let mut node = McfNode::new();
        assert!(node.add_value("typeOf", "dcs:Place"));
        assert!(!node.add_value("typeOf", " dcs:Place "));
        assert_eq!(node.add_values("typeOf", "dcs:Place, dcs:City"), 1);
        assert_eq!(node.get("typeOf").unwrap(), &["dcs:Place", "dcs:City"]);
    }

    #[test]
    fn test_normalize_value() {
        assert_eq!(normalize_value("dcs:Person"), "Person");
        assert_eq!(normalize_value("\"dcid:geoId/06\""), "geoId/06");
        assert_eq!(normalize_value("1.50"), "1.5");
        assert_eq!(normalize_value("10.0"), "10");
        assert_eq!(normalize_value("00501"), "00501");
    }

    #[test]
    fn test_add_namespace() {
        assert_eq!(add_namespace("Count_Person"), "dcid:Count_Person");
        assert_eq!(add_namespace("geoId/06"), "dcid:geoId/06");
        assert_eq!(add_namespace("dcs:Person"), "dcs:Person");
        assert_eq!(add_namespace("\"a name\""), "\"a name\"");
        assert_eq!(add_namespace("12.5"), "12.5");
        assert_eq!(add_namespace("[10 20 Years]"), "[10 20 Years]");
        assert_eq!(add_namespace("two words"), "two words");
    }

    #[test]
    fn test_numeric_value() {
        assert_eq!(numeric_value("1,234"), Some(1234.0));
        assert_eq!(numeric_value("\"-2.5\""), Some(-2.5));
        assert_eq!(numeric_value("n/a"), None);
        assert_eq!(numeric_value("007"), Some(7.0));
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(0.25), "0.25");
    }
}
