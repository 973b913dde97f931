//! Property Value Mapper - Resolves source text to PVs
//!
//! Lookup order for a key: the column namespace (exact, then normalized),
//! then `GLOBAL` (exact, normalized), then regex keys, then an optional
//! fuzzy match. Values that match nothing as a whole are split into word
//! fragments that are looked up individually.

use crate::config::ImportConfig;
use crate::counters::Counters;
use crate::error::Result;
use crate::pvmap::normalize_key;
use crate::pvmap::rules::process_pvs_for_data;
use crate::pvmap::{PropertyValues, PvMap, GLOBAL_NAMESPACE};
use std::collections::HashMap;
use strsim::jaro_winkler;

#[derive(Debug, Clone)]
pub struct MapperOptions {
    pub word_delimiter: String,
    pub max_fragment_words: usize,
    pub fuzzy_match_threshold: Option<f64>,
}

impl Default for MapperOptions {
    fn default() -> Self {
        Self {
            word_delimiter: " ".to_string(),
            max_fragment_words: 5,
            fuzzy_match_threshold: None,
        }
    }
}

impl From<&ImportConfig> for MapperOptions {
    fn from(config: &ImportConfig) -> Self {
        Self {
            word_delimiter: config.word_delimiter.clone(),
            max_fragment_words: config.max_fragment_words.max(1),
            fuzzy_match_threshold: config.fuzzy_match_threshold,
        }
    }
}

/// A raw PV map hit with any bindings captured by a regex key.
struct KeyMatch<'a> {
    pvs: &'a PropertyValues,
    bindings: HashMap<String, String>,
}

pub struct PropertyValueMapper {
    pv_map: PvMap,
    options: MapperOptions,
    counters: Counters,
}

impl PropertyValueMapper {
    pub fn new(pv_map: PvMap, options: MapperOptions, counters: Counters) -> Self {
        Self {
            pv_map,
            options,
            counters,
        }
    }

    pub fn pv_map(&self) -> &PvMap {
        &self.pv_map
    }

    fn namespaces<'a>(&self, namespace: &'a str) -> Vec<&'a str> {
        if namespace == GLOBAL_NAMESPACE {
            vec![GLOBAL_NAMESPACE]
        } else {
            vec![namespace, GLOBAL_NAMESPACE]
        }
    }

    fn lookup(&self, key: &str, namespace: &str, allow_fuzzy: bool) -> Option<KeyMatch<'_>> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        for ns in self.namespaces(namespace) {
            if let Some(pvs) = self
                .pv_map
                .get(ns, key)
                .or_else(|| self.pv_map.get_normalized(ns, key))
            {
                return Some(KeyMatch {
                    pvs,
                    bindings: HashMap::new(),
                });
            }
        }
        for ns in self.namespaces(namespace) {
            if let Some((pvs, bindings)) = self.pv_map.get_regex_match(ns, key) {
                return Some(KeyMatch { pvs, bindings });
            }
        }
        if allow_fuzzy {
            return self.fuzzy_lookup(key, namespace);
        }
        None
    }

    fn fuzzy_lookup(&self, key: &str, namespace: &str) -> Option<KeyMatch<'_>> {
        let threshold = self.options.fuzzy_match_threshold?;
        let target = normalize_key(key);
        let mut best: Option<(f64, &str, &String)> = None;
        for ns in self.namespaces(namespace) {
            for candidate in self.pv_map.keys(ns) {
                let score = jaro_winkler(&target, &normalize_key(candidate));
                if score < threshold {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((best_score, _, best_key)) => {
                        score > best_score || (score == best_score && candidate < best_key)
                    }
                };
                if better {
                    best = Some((score, ns, candidate));
                }
            }
        }
        let (score, ns, candidate) = best?;
        self.counters.add_with_sample(
            "pv-fuzzy-match",
            1,
            format!("'{}' -> '{}' ({:.3})", key, candidate, score),
        );
        self.pv_map.get(ns, candidate).map(|pvs| KeyMatch {
            pvs,
            bindings: HashMap::new(),
        })
    }

    /// Unprocessed PVs for `key` with any bindings captured by a regex key.
    pub fn get_raw_pvs_for_key(
        &self,
        key: &str,
        namespace: &str,
    ) -> Option<(PropertyValues, HashMap<String, String>)> {
        self.lookup(key, namespace, true)
            .map(|hit| (hit.pvs.clone(), hit.bindings))
    }

    /// PVs for `key` with rules applied using the key itself as data.
    pub fn get_pvs_for_key(&self, key: &str, namespace: &str) -> Result<Option<PropertyValues>> {
        match self.lookup(key, namespace, true) {
            Some(hit) => process_pvs_for_data(hit.pvs, key, &hit.bindings, &self.counters),
            None => Ok(None),
        }
    }

    /// PV sets for a value: the whole value if it matches, else matching
    /// word fragments, longest first and left to right without overlap.
    pub fn get_all_pvs_for_value(&self, value: &str, namespace: &str) -> Result<Vec<PropertyValues>> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(pvs) = self.get_pvs_for_key(value, namespace)? {
            return Ok(vec![pvs]);
        }

        let delimiter = self.options.word_delimiter.as_str();
        let words: Vec<&str> = value
            .split(delimiter)
            .map(|w| w.trim())
            .filter(|w| !w.is_empty())
            .collect();
        if words.len() < 2 {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        let mut start = 0;
        while start < words.len() {
            let max_len = self.options.max_fragment_words.min(words.len() - start);
            let mut consumed = 1;
            for len in (1..=max_len).rev() {
                let fragment = words[start..start + len].join(delimiter);
                if let Some(hit) = self.lookup(&fragment, namespace, false) {
                    if let Some(pvs) =
                        process_pvs_for_data(hit.pvs, &fragment, &hit.bindings, &self.counters)?
                    {
                        results.push(pvs);
                        consumed = len;
                        break;
                    }
                }
            }
            start += consumed;
        }
        if !results.is_empty() {
            self.counters.add("pv-fragment-matches", results.len() as i64);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper(csv: &str, options: MapperOptions) -> PropertyValueMapper {
        let mut map = PvMap::new();
        map.load_csv_text(csv, GLOBAL_NAMESPACE).unwrap();
        map.load_csv_text("M,gender,dcs:Male\n", "Sex").unwrap();
        PropertyValueMapper::new(map, options, Counters::new())
    }

    const CSV: &str = "Male,gender,dcs:Male\n\
        Female,gender,dcs:Female\n\
        Veterans,populationType,dcs:Person,armedForcesStatus,dcs:Veteran\n\
        Under 5 years,age,[- 5 Years]\n\
        Median household income,statType,dcs:medianValue,measuredProperty,dcs:income\n\
        \"^(?P<Start>[0-9]+) years\",age,[{Start} Years]\n";

    #[test]
    fn test_namespace_then_global() {
        let m = mapper(CSV, MapperOptions::default());
        assert_eq!(m.get_pvs_for_key("M", "Sex").unwrap().unwrap()["gender"], "dcs:Male");
        assert!(m.get_pvs_for_key("M", GLOBAL_NAMESPACE).unwrap().is_none());
        assert_eq!(
            m.get_pvs_for_key("female", "Sex").unwrap().unwrap()["gender"],
            "dcs:Female"
        );
    }

    #[test]
    fn test_regex_key_binds_groups() {
        let m = mapper(CSV, MapperOptions::default());
        let pvs = m.get_pvs_for_key("65 years", GLOBAL_NAMESPACE).unwrap().unwrap();
        assert_eq!(pvs["age"], "[65 Years]");
    }

    #[test]
    fn test_fragments_longest_first() {
        let m = mapper(CSV, MapperOptions::default());
        let sets = m
            .get_all_pvs_for_value("Female Veterans Under 5 years", GLOBAL_NAMESPACE)
            .unwrap();
        assert_eq!(sets.len(), 3);
        assert_eq!(sets[0]["gender"], "dcs:Female");
        assert_eq!(sets[1]["armedForcesStatus"], "dcs:Veteran");
        assert_eq!(sets[2]["age"], "[- 5 Years]");
    }

    #[test]
    fn test_whole_value_preferred() {
        let m = mapper(CSV, MapperOptions::default());
        let sets = m
            .get_all_pvs_for_value("Median Household Income", GLOBAL_NAMESPACE)
            .unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0]["measuredProperty"], "dcs:income");
    }

    #[test]
    fn test_fuzzy_match_when_enabled() {
        let strict = mapper(CSV, MapperOptions::default());
        assert!(strict.get_pvs_for_key("Veteranz", GLOBAL_NAMESPACE).unwrap().is_none());

        let fuzzy = mapper(
            CSV,
            MapperOptions {
                fuzzy_match_threshold: Some(0.9),
                ..MapperOptions::default()
            },
        );
        let pvs = fuzzy.get_pvs_for_key("Veteranz", GLOBAL_NAMESPACE).unwrap().unwrap();
        assert_eq!(pvs["armedForcesStatus"], "dcs:Veteran");
        assert_eq!(fuzzy.counters.get("pv-fuzzy-match"), 1);
    }

    #[test]
    fn test_unmatched_value() {
        let m = mapper(CSV, MapperOptions::default());
        assert!(m.get_all_pvs_for_value("Something else", GLOBAL_NAMESPACE).unwrap().is_empty());
        assert!(m.get_all_pvs_for_value("  ", GLOBAL_NAMESPACE).unwrap().is_empty());
    }
}
