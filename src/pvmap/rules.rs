//! PV Rules - Data-dependent PV processing
//!
//! PV map values may reference placeholders that are bound per cell:
//! `{Data}` is the matched text, `{Number}` its numeric value, and named
//! groups of a `#Regex` rule bind their own names. `#Eval` and `#Format`
//! compute further properties from those bindings.

use crate::counters::Counters;
use crate::error::Result;
use crate::mcf::node::{format_number, numeric_value, split_values};
use crate::pvmap::eval::evaluate;
use crate::pvmap::PropertyValues;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;

pub const REGEX_PROP: &str = "#Regex";
pub const EVAL_PROP: &str = "#Eval";
pub const FORMAT_PROP: &str = "#Format";
pub const IGNORE_PROP: &str = "#Ignore";
pub const AGGREGATE_PROP: &str = "#Aggregate";

lazy_static! {
    static ref PLACEHOLDER_RE: Regex = Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    static ref REGEX_CACHE: Mutex<HashMap<String, Regex>> = Mutex::new(HashMap::new());
}

fn cached_regex(pattern: &str) -> Result<Regex> {
    let mut cache = REGEX_CACHE.lock().unwrap();
    if let Some(re) = cache.get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern)?;
    cache.insert(pattern.to_string(), re.clone());
    Ok(re)
}

/// Replace `{name}` placeholders. None when any placeholder is unbound.
pub fn substitute(template: &str, vars: &HashMap<String, String>) -> Option<String> {
    let mut unbound = false;
    let result = PLACEHOLDER_RE.replace_all(template, |caps: &regex::Captures| {
        match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => {
                unbound = true;
                caps[0].to_string()
            }
        }
    });
    if unbound {
        None
    } else {
        Some(result.into_owned())
    }
}

/// True when the PVs depend on the text they are applied to.
pub fn is_template(pvs: &PropertyValues) -> bool {
    pvs.contains_key(REGEX_PROP)
        || pvs.contains_key(EVAL_PROP)
        || pvs.contains_key(FORMAT_PROP)
        || pvs.values().any(|v| v.contains("{Data}") || v.contains("{Number}"))
}

fn assignments(rule: &str) -> impl Iterator<Item = (&str, &str)> {
    rule.split(';').filter_map(|a| {
        let (prop, expr) = a.split_once('=')?;
        let prop = prop.trim();
        if prop.is_empty() {
            None
        } else {
            Some((prop, expr.trim()))
        }
    })
}

/// Resolve PVs against `data`. Returns None when a `#Regex` rule does not
/// match. Extra `bindings` (for example from a regex key) are available as
/// placeholders.
pub fn process_pvs_for_data(
    pvs: &PropertyValues,
    data: &str,
    bindings: &HashMap<String, String>,
    counters: &Counters,
) -> Result<Option<PropertyValues>> {
    let data = data.trim();
    let mut vars = bindings.clone();
    vars.insert("Data".to_string(), data.to_string());
    if let Some(number) = numeric_value(data) {
        vars.insert("Number".to_string(), format_number(number));
    }

    if let Some(pattern) = pvs.get(REGEX_PROP) {
        let re = cached_regex(pattern)?;
        let caps = match re.captures(data) {
            Some(caps) => caps,
            None => {
                counters.add_with_sample("pv-regex-no-match", 1, format!("{} !~ {}", data, pattern));
                return Ok(None);
            }
        };
        for name in re.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                vars.insert(name.to_string(), m.as_str().to_string());
            }
        }
    }

    let mut computed = PropertyValues::new();
    if let Some(rule) = pvs.get(EVAL_PROP) {
        for (prop, expr) in assignments(rule) {
            let Some(expr) = substitute(expr, &vars) else {
                counters.add_with_sample("pv-unresolved-placeholder", 1, format!("{}={}", prop, expr));
                continue;
            };
            match evaluate(&expr) {
                Ok(value) => {
                    let value = format_number(value);
                    vars.insert(prop.to_string(), value.clone());
                    computed.insert(prop.to_string(), value);
                }
                Err(e) => {
                    counters.add_with_sample("pv-eval-error", 1, e.to_string());
                }
            }
        }
    }
    if let Some(rule) = pvs.get(FORMAT_PROP) {
        for (prop, template) in assignments(rule) {
            match substitute(template, &vars) {
                Some(value) => {
                    vars.insert(prop.to_string(), value.clone());
                    computed.insert(prop.to_string(), value);
                }
                None => {
                    counters.add_with_sample("pv-unresolved-placeholder", 1, format!("{}={}", prop, template));
                }
            }
        }
    }

    let mut result = PropertyValues::new();
    for (prop, value) in pvs {
        match prop.as_str() {
            REGEX_PROP | EVAL_PROP | FORMAT_PROP => continue,
            _ => {}
        }
        if computed.contains_key(prop) {
            continue;
        }
        match substitute(value, &vars) {
            Some(value) => {
                result.insert(prop.clone(), value);
            }
            None => {
                counters.add_with_sample("pv-unresolved-placeholder", 1, format!("{}={}", prop, value));
            }
        }
    }
    result.extend(computed);
    Ok(Some(result))
}

/// Merge `src` into `dst`. Multi-valued properties take the union of their
/// values; any other differing value is overwritten and counted.
pub fn merge_pvs(
    dst: &mut PropertyValues,
    src: &PropertyValues,
    multi_value_props: &[String],
    counters: &Counters,
) {
    for (prop, value) in src {
        match dst.get_mut(prop) {
            None => {
                dst.insert(prop.clone(), value.clone());
            }
            Some(existing) if *existing == *value => {}
            Some(existing) => {
                if multi_value_props.iter().any(|p| p == prop) {
                    *existing = split_values(existing)
                        .into_iter()
                        .chain(split_values(value))
                        .unique()
                        .join(",");
                } else {
                    counters.add_with_sample(
                        "pv-overwrite",
                        1,
                        format!("{}: {} -> {}", prop, existing, value),
                    );
                    *existing = value.clone();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pvs(pairs: &[(&str, &str)]) -> PropertyValues {
        pairs
            .iter()
            .map(|(p, v)| (p.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_data_and_number_placeholders() {
        let counters = Counters::new();
        let template = pvs(&[("observationAbout", "geoId/{Data}"), ("value", "{Number}")]);
        let out = process_pvs_for_data(&template, "06", &HashMap::new(), &counters)
            .unwrap()
            .unwrap();
        assert_eq!(out["observationAbout"], "geoId/06");
        assert_eq!(out["value"], "6");

        let out = process_pvs_for_data(&template, "abc", &HashMap::new(), &counters)
            .unwrap()
            .unwrap();
        assert!(!out.contains_key("value"));
        assert_eq!(counters.get("pv-unresolved-placeholder"), 1);
    }

    #[test]
    fn test_regex_groups_and_format() {
        let counters = Counters::new();
        let rule = pvs(&[
            ("#Regex", r"^(?P<Start>[0-9]+) to (?P<End>[0-9]+) years$"),
            ("#Format", "age=[{Start} {End} Years]"),
            ("populationType", "dcs:Person"),
        ]);
        let out = process_pvs_for_data(&rule, "25 to 34 years", &HashMap::new(), &counters)
            .unwrap()
            .unwrap();
        assert_eq!(out["age"], "[25 34 Years]");
        assert_eq!(out["populationType"], "dcs:Person");
        assert!(!out.contains_key("#Regex"));

        let none = process_pvs_for_data(&rule, "Total", &HashMap::new(), &counters).unwrap();
        assert!(none.is_none());
        assert_eq!(counters.get("pv-regex-no-match"), 1);
    }

    #[test]
    fn test_eval_rule() {
        let counters = Counters::new();
        let rule = pvs(&[("#Eval", "value={Number} * 1000; half={Number} / 2"), ("unit", "dcs:USDollar")]);
        let out = process_pvs_for_data(&rule, "1,250", &HashMap::new(), &counters)
            .unwrap()
            .unwrap();
        assert_eq!(out["value"], "1250000");
        assert_eq!(out["half"], "625");
        assert_eq!(out["unit"], "dcs:USDollar");
    }

    #[test]
    fn test_bindings_are_available() {
        let counters = Counters::new();
        let rule = pvs(&[("age", "[{Start} Years]")]);
        let bindings: HashMap<String, String> = [("Start".to_string(), "5".to_string())].into_iter().collect();
        let out = process_pvs_for_data(&rule, "5 years", &bindings, &counters)
            .unwrap()
            .unwrap();
        assert_eq!(out["age"], "[5 Years]");
    }

    #[test]
    fn test_merge_pvs_multi_value_and_overwrite() {
        let counters = Counters::new();
        let multi = vec!["memberOf".to_string()];
        let mut dst = pvs(&[("gender", "dcs:Male"), ("memberOf", "dc/g/A")]);
        merge_pvs(
            &mut dst,
            &pvs(&[("gender", "dcs:Female"), ("memberOf", "dc/g/B,dc/g/A"), ("age", "[5 Years]")]),
            &multi,
            &counters,
        );
        assert_eq!(dst["gender"], "dcs:Female");
        assert_eq!(dst["memberOf"], "dc/g/A,dc/g/B");
        assert_eq!(dst["age"], "[5 Years]");
        assert_eq!(counters.get("pv-overwrite"), 1);
    }

    #[test]
    fn test_is_template() {
        assert!(is_template(&pvs(&[("observationDate", "{Data}")])));
        assert!(is_template(&pvs(&[("#Regex", "x")])));
        assert!(!is_template(&pvs(&[("gender", "dcs:Male")])));
    }
}
