//! Import Configuration
//!
//! Every field has a default, so a config file only carries the values it
//! changes. Command-line `key=value` overrides are applied on top.

use crate::error::{ImportError, Result};
use crate::statvar::aggregate::Aggregation;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Environment variable naming a default config file.
pub const CONFIG_ENV_VAR: &str = "STATVAR_IMPORT_CONFIG";

/// Adds `set` PVs to a statvar when all `when` PVs are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRule {
    #[serde(default)]
    pub when: IndexMap<String, String>,
    pub set: IndexMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Number of header rows after `skip_rows`.
    pub header_rows: usize,
    pub skip_rows: usize,
    pub input_delimiter: char,

    /// Separator used to split cell text into words for fragment lookups.
    pub word_delimiter: String,
    pub max_fragment_words: usize,
    /// Jaro-Winkler threshold for fuzzy key lookups. Disabled when unset.
    pub fuzzy_match_threshold: Option<f64>,

    pub multi_value_properties: Vec<String>,
    pub default_statvar_pvs: IndexMap<String, String>,
    pub required_statvar_properties: Vec<String>,
    pub required_svobs_properties: Vec<String>,
    pub inference_rules: Vec<InferenceRule>,
    pub aggregation: Aggregation,
    pub statvar_dcid_ignore_properties: Vec<String>,

    /// chrono formats tried on dates that are not already ISO 8601.
    pub date_formats: Vec<String>,
    pub existing_statvar_mcf: Vec<PathBuf>,
    pub output_columns: Vec<String>,

    pub num_shards: usize,
    pub diff_ignore_properties: Vec<String>,
    pub max_concurrent_files: usize,

    pub sample_max_rows: usize,
    pub sample_unique_per_column: usize,
    pub sample_rate: f64,
    pub sample_seed: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        let default_statvar_pvs = [
            ("typeOf", "dcs:StatisticalVariable"),
            ("statType", "dcs:measuredValue"),
            ("measuredProperty", "dcs:count"),
        ]
        .into_iter()
        .map(|(p, v)| (p.to_string(), v.to_string()))
        .collect();

        Self {
            header_rows: 1,
            skip_rows: 0,
            input_delimiter: ',',
            word_delimiter: " ".to_string(),
            max_fragment_words: 5,
            fuzzy_match_threshold: None,
            multi_value_properties: strings(&["measurementQualifier", "memberOf"]),
            default_statvar_pvs,
            required_statvar_properties: strings(&["populationType", "measuredProperty"]),
            required_svobs_properties: strings(&["observationAbout", "observationDate", "value"]),
            inference_rules: Vec::new(),
            aggregation: Aggregation::None,
            statvar_dcid_ignore_properties: strings(&[
                "description",
                "name",
                "memberOf",
                "provenance",
                "alternateName",
                "nameWithLanguage",
            ]),
            date_formats: strings(&["%m/%d/%Y", "%d-%m-%Y", "%Y/%m/%d"]),
            existing_statvar_mcf: Vec::new(),
            output_columns: strings(&[
                "observationAbout",
                "observationDate",
                "variableMeasured",
                "value",
                "unit",
                "scalingFactor",
                "measurementMethod",
                "observationPeriod",
            ]),
            num_shards: 1,
            diff_ignore_properties: Vec::new(),
            max_concurrent_files: 8,
            sample_max_rows: 100,
            sample_unique_per_column: 3,
            sample_rate: 1.0,
            sample_seed: 0,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl ImportConfig {
    /// Load a config file, or the defaults when no path is given, then apply
    /// `key=value` overrides in order.
    pub fn load(path: Option<&Path>, overrides: &[String]) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    ImportError::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                let config: ImportConfig = serde_json::from_str(&text)?;
                tracing::info!("Loaded config from {}", path.display());
                config
            }
            None => ImportConfig::default(),
        };
        for item in overrides {
            let (key, value) = item.split_once('=').ok_or_else(|| {
                ImportError::Config(format!("Override '{}' is not of the form key=value", item))
            })?;
            config.set(key.trim(), value.trim())?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Set a single field by name. The value is parsed as JSON and falls back
    /// to a plain string.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut current = serde_json::to_value(&*self)?;
        let fields = current
            .as_object_mut()
            .ok_or_else(|| ImportError::Config("Config is not an object".to_string()))?;
        if !fields.contains_key(key) {
            return Err(ImportError::Config(format!("Unknown config key '{}'", key)));
        }
        let parsed = serde_json::from_str::<Value>(value)
            .unwrap_or_else(|_| Value::String(value.to_string()));
        fields.insert(key.to_string(), parsed);
        *self = serde_json::from_value(current)
            .map_err(|e| ImportError::Config(format!("Invalid value for '{}': {}", key, e)))?;
        tracing::debug!("Config override {}={}", key, value);
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.num_shards == 0 {
            return Err(ImportError::Config("num_shards must be at least 1".to_string()));
        }
        if self.max_concurrent_files == 0 {
            return Err(ImportError::Config(
                "max_concurrent_files must be at least 1".to_string(),
            ));
        }
        if let Some(threshold) = self.fuzzy_match_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ImportError::Config(format!(
                    "fuzzy_match_threshold {} is outside 0.0..=1.0",
                    threshold
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(ImportError::Config(format!(
                "sample_rate {} is outside 0.0..=1.0",
                self.sample_rate
            )));
        }
        Ok(())
    }

    /// Config file named on the command line, else the one named by the
    /// environment.
    pub fn resolve_path(cli_path: Option<PathBuf>) -> Option<PathBuf> {
        cli_path.or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
    }

    pub fn is_multi_value(&self, property: &str) -> bool {
        self.multi_value_properties.iter().any(|p| p == property)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ImportConfig::default();
        assert_eq!(config.header_rows, 1);
        assert_eq!(config.aggregation, Aggregation::None);
        assert_eq!(
            config.default_statvar_pvs.get("measuredProperty").map(String::as_str),
            Some("dcs:count")
        );
        assert!(config.is_multi_value("measurementQualifier"));
    }

    #[test]
    fn test_load_partial_file_with_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"header_rows": 2, "aggregation": "sum"}}"#).unwrap();

        let config = ImportConfig::load(
            Some(file.path()),
            &["skip_rows=3".to_string(), "word_delimiter=-".to_string()],
        )
        .unwrap();
        assert_eq!(config.header_rows, 2);
        assert_eq!(config.skip_rows, 3);
        assert_eq!(config.word_delimiter, "-");
        assert_eq!(config.aggregation, Aggregation::Sum);
        assert_eq!(config.max_fragment_words, 5);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = ImportConfig::load(None, &["no_such_key=1".to_string()]).unwrap_err();
        assert!(err.to_string().contains("no_such_key"));
    }

    #[test]
    fn test_invalid_shards_rejected() {
        assert!(ImportConfig::load(None, &["num_shards=0".to_string()]).is_err());
    }
}
