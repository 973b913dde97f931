//! PV Map - Property-value mapping tables
//!
//! A PV map assigns a set of `property: value` pairs to a piece of source
//! text (a column header or a cell value). Entries live in namespaces: a
//! column name scopes entries to cells of that column, and `GLOBAL` applies
//! everywhere.

pub mod eval;
pub mod mapper;
pub mod rules;

pub use mapper::{MapperOptions, PropertyValueMapper};
pub use rules::{is_template, merge_pvs, process_pvs_for_data};

use crate::error::{ImportError, Result};
use csv::ReaderBuilder;
use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

pub const GLOBAL_NAMESPACE: &str = "GLOBAL";

/// Ordered `property -> value` assignments for one key.
pub type PropertyValues = IndexMap<String, String>;

/// Keys starting with this character are matched as anchored regexes.
const REGEX_KEY_PREFIX: char = '^';

#[derive(Debug, Clone, Default)]
pub struct PvMap {
    entries: IndexMap<String, IndexMap<String, PropertyValues>>,
    /// namespace -> normalized key -> key
    normalized: HashMap<String, HashMap<String, String>>,
    /// namespace -> (compiled pattern, key)
    regex_keys: HashMap<String, Vec<(Regex, String)>>,
}

/// Lowercase, trim and collapse internal whitespace.
pub fn normalize_key(key: &str) -> String {
    key.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Add a PV, appending to an existing value: `,` for ordinary properties and
/// `;` for `#` rule properties.
pub fn add_pv(pvs: &mut PropertyValues, prop: &str, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }
    match pvs.get_mut(prop) {
        Some(existing) if existing != value => {
            let sep = if prop.starts_with('#') { ";" } else { "," };
            existing.push_str(sep);
            existing.push_str(value);
        }
        Some(_) => {}
        None => {
            pvs.insert(prop.to_string(), value.to_string());
        }
    }
}

impl PvMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, namespace: &str, key: &str, pvs: PropertyValues) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            return Ok(());
        }
        let entries = self.entries.entry(namespace.to_string()).or_default();
        if !entries.contains_key(key) && key.starts_with(REGEX_KEY_PREFIX) {
            let pattern = Regex::new(&format!("{}$", key.trim_end_matches('$'))).map_err(|e| {
                ImportError::PvMap(format!("Invalid regex key '{}': {}", key, e))
            })?;
            self.regex_keys
                .entry(namespace.to_string())
                .or_default()
                .push((pattern, key.to_string()));
        }
        let entry = entries.entry(key.to_string()).or_default();
        for (prop, value) in pvs {
            add_pv(entry, &prop, &value);
        }
        self.normalized
            .entry(namespace.to_string())
            .or_default()
            .entry(normalize_key(key))
            .or_insert_with(|| key.to_string());
        Ok(())
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<&PropertyValues> {
        self.entries.get(namespace).and_then(|e| e.get(key))
    }

    /// Case and whitespace insensitive lookup.
    pub fn get_normalized(&self, namespace: &str, key: &str) -> Option<&PropertyValues> {
        let original = self.normalized.get(namespace)?.get(&normalize_key(key))?;
        self.get(namespace, original)
    }

    /// First regex key in the namespace matching all of `text`, with its
    /// named capture groups.
    pub fn get_regex_match(
        &self,
        namespace: &str,
        text: &str,
    ) -> Option<(&PropertyValues, HashMap<String, String>)> {
        let patterns = self.regex_keys.get(namespace)?;
        for (pattern, key) in patterns {
            if let Some(caps) = pattern.captures(text) {
                let bindings = pattern
                    .capture_names()
                    .flatten()
                    .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
                    .collect();
                return self.get(namespace, key).map(|pvs| (pvs, bindings));
            }
        }
        None
    }

    pub fn keys(&self, namespace: &str) -> impl Iterator<Item = &String> {
        self.entries
            .get(namespace)
            .into_iter()
            .flat_map(|e| e.keys())
            .filter(|k| !k.starts_with(REGEX_KEY_PREFIX))
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.entries.contains_key(namespace)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(|e| e.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load a file spec of the form `[namespace:]path`. CSV and JSON are
    /// recognised by extension.
    pub fn load_file_spec(&mut self, spec: &str) -> Result<()> {
        let (namespace, path) = split_file_spec(spec);
        let path = Path::new(path);
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let text = std::fs::read_to_string(path)
            .map_err(|e| ImportError::PvMap(format!("Failed to read {}: {}", path.display(), e)))?;
        let before = self.len();
        if is_json {
            self.load_json_text(&text, namespace)?;
        } else {
            self.load_csv_text(&text, namespace)?;
        }
        tracing::info!(
            "Loaded {} PV map entries from {} into {}",
            self.len() - before,
            path.display(),
            namespace
        );
        Ok(())
    }

    /// Rows of `key,prop1,value1,prop2,value2,...`. An optional header row
    /// whose first cell is `key` and rows whose key starts with `#` are
    /// skipped.
    pub fn load_csv_text(&mut self, text: &str, namespace: &str) -> Result<()> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        for (idx, record) in rdr.records().enumerate() {
            let record = record?;
            let key = record.get(0).unwrap_or("").trim();
            if key.is_empty() || key.starts_with('#') || (idx == 0 && key.eq_ignore_ascii_case("key")) {
                continue;
            }
            let cells: Vec<&str> = record.iter().skip(1).collect();
            let mut pvs = PropertyValues::new();
            for pair in cells.chunks(2) {
                let prop = pair[0].trim();
                let value = pair.get(1).map(|v| v.trim()).unwrap_or("");
                if prop.is_empty() && value.is_empty() {
                    continue;
                }
                if prop.is_empty() || (value.is_empty() && pair.len() < 2) {
                    return Err(ImportError::PvMap(format!(
                        "Row {} for key '{}' has an unpaired property or value",
                        idx + 1,
                        key
                    )));
                }
                add_pv(&mut pvs, prop, value);
            }
            self.insert(namespace, key, pvs)?;
        }
        Ok(())
    }

    /// Either `{key: {prop: value}}` or `{namespace: {key: {prop: value}}}`.
    pub fn load_json_text(&mut self, text: &str, namespace: &str) -> Result<()> {
        let root: Value = serde_json::from_str(text)?;
        let root = root
            .as_object()
            .ok_or_else(|| ImportError::PvMap("PV map JSON must be an object".to_string()))?;
        for (name, entry) in root {
            let entry = entry.as_object().ok_or_else(|| {
                ImportError::PvMap(format!("PV map entry '{}' must be an object", name))
            })?;
            if !entry.is_empty() && entry.values().all(|v| v.is_object()) {
                for (key, pvs) in entry {
                    self.insert(name, key, json_pvs(pvs)?)?;
                }
            } else {
                self.insert(namespace, name, json_pvs(&Value::Object(entry.clone()))?)?;
            }
        }
        Ok(())
    }
}

fn json_pvs(value: &Value) -> Result<PropertyValues> {
    let object = value
        .as_object()
        .ok_or_else(|| ImportError::PvMap(format!("Expected PV object, got {}", value)))?;
    let mut pvs = PropertyValues::new();
    for (prop, value) in object {
        let value = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .collect::<Vec<_>>()
                .join(","),
            other => {
                return Err(ImportError::PvMap(format!(
                    "Unsupported value for property '{}': {}",
                    prop, other
                )))
            }
        };
        add_pv(&mut pvs, prop, &value);
    }
    Ok(pvs)
}

/// `namespace:path` or a bare path. A single letter before `:` is a drive
/// letter, not a namespace.
pub fn split_file_spec(spec: &str) -> (&str, &str) {
    match spec.split_once(':') {
        Some((namespace, path))
            if namespace.len() > 1 && !namespace.contains('/') && !namespace.contains('\\') =>
        {
            (namespace, path)
        }
        _ => (GLOBAL_NAMESPACE, spec),
    }
}
