//! StatVar DCID Generation
//!
//! Builds a readable dcid such as `Count_Person_25To34Years_Male` from a
//! statistical variable's PVs.

use crate::mcf::node::{split_values, strip_namespace, strip_quotes};
use crate::pvmap::PropertyValues;

/// Properties that shape the dcid prefix/suffix rather than acting as
/// constraints.
const RESERVED_PROPERTIES: [&str; 8] = [
    "Node",
    "dcid",
    "typeOf",
    "statType",
    "measuredProperty",
    "populationType",
    "measurementDenominator",
    "measurementQualifier",
];

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn alphanumeric(token: &str) -> String {
    token.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Render a quantity range such as `[25 34 Years]`.
fn render_quantity(inner: &str) -> String {
    let tokens: Vec<&str> = inner.split_whitespace().collect();
    match tokens.as_slice() {
        ["-", end, unit] => format!("Upto{}{}", alphanumeric(end), alphanumeric(unit)),
        [start, "-", unit] => format!("{}OrMore{}", alphanumeric(start), alphanumeric(unit)),
        [start, end, unit] => format!(
            "{}To{}{}",
            alphanumeric(start),
            alphanumeric(end),
            alphanumeric(unit)
        ),
        [amount, unit] => format!("{}{}", alphanumeric(amount), alphanumeric(unit)),
        other => other.iter().map(|t| capitalize(&alphanumeric(t))).collect(),
    }
}

/// Render one constraint value as a dcid fragment.
pub fn render_value(value: &str) -> String {
    let value = strip_namespace(strip_quotes(value));
    if let Some(inner) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
        return render_quantity(inner);
    }
    value
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(capitalize)
        .collect()
}

fn stat_type_prefix(stat_type: &str) -> Option<String> {
    let stat_type = strip_namespace(stat_type);
    if stat_type.is_empty() || stat_type == "measuredValue" {
        return None;
    }
    let stem = stat_type.strip_suffix("Value").unwrap_or(stat_type);
    Some(capitalize(stem))
}

fn rendered_values(value: &str) -> String {
    let mut values: Vec<String> = split_values(value).iter().map(|v| render_value(v)).collect();
    values.sort();
    values.join("_")
}

/// Generate a dcid for the statvar PVs. `#` rule properties and
/// `ignore_properties` do not contribute.
pub fn generate_statvar_dcid(pvs: &PropertyValues, ignore_properties: &[String]) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(prefix) = pvs.get("statType").and_then(|s| stat_type_prefix(s)) {
        parts.push(prefix);
    }
    if let Some(mprop) = pvs.get("measuredProperty") {
        parts.push(render_value(mprop));
    }
    if let Some(population) = pvs.get("populationType") {
        parts.push(render_value(population));
    }

    let mut constraints: Vec<(&String, &String)> = pvs
        .iter()
        .filter(|(prop, _)| !prop.starts_with('#'))
        .filter(|(prop, _)| !RESERVED_PROPERTIES.contains(&prop.as_str()))
        .filter(|(prop, _)| !ignore_properties.iter().any(|p| p == *prop))
        .collect();
    constraints.sort_by(|a, b| a.0.cmp(b.0));
    for (_, value) in constraints {
        let rendered = rendered_values(value);
        if !rendered.is_empty() {
            parts.push(rendered);
        }
    }

    if let Some(qualifier) = pvs.get("measurementQualifier") {
        parts.push(rendered_values(qualifier));
    }
    if let Some(denominator) = pvs.get("measurementDenominator") {
        parts.push(format!("AsAFractionOf_{}", strip_namespace(denominator)));
    }

    parts.retain(|p| !p.is_empty());
    parts.join("_")
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
    fn test_count_with_sorted_constraints() {
        let sv = pvs(&[
            ("typeOf", "dcs:StatisticalVariable"),
            ("statType", "dcs:measuredValue"),
            ("measuredProperty", "dcs:count"),
            ("populationType", "dcs:Person"),
            ("gender", "dcs:Male"),
            ("age", "[25 34 Years]"),
        ]);
        assert_eq!(generate_statvar_dcid(&sv, &[]), "Count_Person_25To34Years_Male");
    }

    #[test]
    fn test_stat_type_prefix_and_denominator() {
        let sv = pvs(&[
            ("statType", "dcs:medianValue"),
            ("measuredProperty", "dcs:income"),
            ("populationType", "dcs:Household"),
            ("measurementDenominator", "dcs:Count_Household"),
            ("name", "\"Median income\""),
            ("#Aggregate", "sum"),
        ]);
        assert_eq!(
            generate_statvar_dcid(&sv, &["name".to_string()]),
            "Median_Income_Household_AsAFractionOf_Count_Household"
        );
    }

    #[test]
    fn test_quantity_ranges() {
        assert_eq!(render_value("[- 5 Years]"), "Upto5Years");
        assert_eq!(render_value("[65 - Years]"), "65OrMoreYears");
        assert_eq!(render_value("[10 Years]"), "10Years");
        assert_eq!(render_value("[2.5 5 Years]"), "25To5Years");
        assert_eq!(render_value("[1,000 - USDollar]"), "1000OrMoreUSDollar");
        assert_eq!(render_value("dcs:USDollar"), "USDollar");
        assert_eq!(render_value("dcs:black or african american"), "BlackOrAfricanAmerican");
    }
}
