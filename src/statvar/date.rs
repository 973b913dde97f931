//! Observation date normalization to ISO 8601.

use crate::counters::Counters;
use crate::mcf::node::numeric_value;
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref ISO_DATE_RE: Regex = Regex::new(r"^[0-9]{4}(-[0-9]{2}(-[0-9]{2})?)?$").unwrap();
    static ref MONTH_YEAR_RE: Regex = Regex::new(r"^([A-Za-z]+)\.?,?\s+([0-9]{4})$").unwrap();
}

pub fn normalize_date(value: &str, formats: &[String], counters: &Counters) -> String {
    let value = value.trim();
    if ISO_DATE_RE.is_match(value) {
        return value.to_string();
    }

    // Spreadsheet exports turn years into floats.
    if let Some(year) = numeric_value(value) {
        if year.fract() == 0.0 && (1000.0..=9999.0).contains(&year) {
            return format!("{}", year as i64);
        }
    }

    if let Some(caps) = MONTH_YEAR_RE.captures(value) {
        let text = format!("1 {} {}", &caps[1], &caps[2]);
        let parsed = NaiveDate::parse_from_str(&text, "%d %b %Y")
            .or_else(|_| NaiveDate::parse_from_str(&text, "%d %B %Y"));
        if let Ok(date) = parsed {
            return date.format("%Y-%m").to_string();
        }
    }

    for format in formats {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return date.format("%Y-%m-%d").to_string();
        }
    }

    counters.add_with_sample("warning-unparsed-date", 1, value.to_string());
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formats() -> Vec<String> {
        vec!["%m/%d/%Y".to_string(), "%d-%m-%Y".to_string()]
    }

    #[test]
    fn test_iso_passthrough() {
        let counters = Counters::new();
        assert_eq!(normalize_date("2020", &formats(), &counters), "2020");
        assert_eq!(normalize_date("2020-03", &formats(), &counters), "2020-03");
        assert_eq!(normalize_date(" 2020-03-04 ", &formats(), &counters), "2020-03-04");
        assert_eq!(normalize_date("2019.0", &formats(), &counters), "2019");
    }

    #[test]
    fn test_month_names() {
        let counters = Counters::new();
        assert_eq!(normalize_date("Jan 2021", &formats(), &counters), "2021-01");
        assert_eq!(normalize_date("September 2021", &formats(), &counters), "2021-09");
        assert_eq!(normalize_date("January 2020", &formats(), &counters), "2020-01");
        assert_eq!(normalize_date("Mar, 2019", &formats(), &counters), "2019-03");
        assert_eq!(normalize_date("Sept. 2021", &formats(), &counters), "Sept. 2021");
        assert_eq!(counters.get("warning-unparsed-date"), 1);
    }

    #[test]
    fn test_configured_formats() {
        let counters = Counters::new();
        assert_eq!(normalize_date("03/15/2020", &formats(), &counters), "2020-03-15");
        assert_eq!(normalize_date("15-03-2020", &formats(), &counters), "2020-03-15");
        assert_eq!(counters.get("warning-unparsed-date"), 0);
    }
}
