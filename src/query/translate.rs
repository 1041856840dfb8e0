//! Filter and sort expression builders.
//!
//! Filter grammar:
//! - exact match: `field='literal'`
//! - range bounds: `field >= 'ISO8601'` / `field <= 'ISO8601'`
//! - clauses joined by ` && `
//!
//! Sort grammar: a run of `(+|-)field` with no delimiter, primary key first.

use crate::models::timefmt::parse_date;
use crate::query::fields::{FieldRegistry, FieldSpec};

/// Time suffix appended to range-bound dates.
const DAY_START: &str = "T00:00:00.000Z";

/// Filter values keyed by field, in the order they were set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterParams {
    entries: Vec<(String, Option<String>)>,
}

impl FilterParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`FilterParams::set`].
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(field, Some(value.into()));
        self
    }

    /// Set or clear a field. An existing field keeps its position.
    pub fn set(&mut self, field: impl Into<String>, value: Option<String>) {
        let field = field.into();
        match self.entries.iter_mut().find(|(f, _)| *f == field) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((field, value)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(f, _)| f == field)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(f, v)| (f.as_str(), v.as_deref()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read loosely-typed form values. Nulls are kept (and later skipped),
    /// strings are taken as-is, numbers and booleans are stringified.
    pub fn from_json(map: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut params = Self::new();
        for (field, value) in map {
            let value = match value {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                serde_json::Value::Bool(b) => Some(b.to_string()),
                other => Some(other.to_string()),
            };
            params.set(field.clone(), value);
        }
        params
    }
}

/// Sort order for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// Parse a direction. Empty means "not sorted" and yields `None`;
    /// anything that is not an ascending spelling sorts descending.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "" => None,
            "ascending" | "ascend" | "asc" => Some(Self::Ascending),
            _ => Some(Self::Descending),
        }
    }

    pub fn prefix(&self) -> char {
        match self {
            Self::Ascending => '+',
            Self::Descending => '-',
        }
    }
}

/// Sort keys, highest priority first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortParams {
    entries: Vec<(String, SortDirection)>,
}

impl SortParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.push(field, direction);
        self
    }

    pub fn push(&mut self, field: impl Into<String>, direction: SortDirection) {
        self.entries.push((field.into(), direction));
    }

    /// Build from raw `(field, direction)` pairs; pairs with an empty
    /// direction are dropped.
    pub fn from_pairs<I, F, D>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (F, D)>,
        F: Into<String>,
        D: AsRef<str>,
    {
        let mut sort = Self::new();
        for (field, direction) in pairs {
            if let Some(direction) = SortDirection::parse(direction.as_ref()) {
                sort.push(field, direction);
            }
        }
        sort
    }

    /// Parse a `field[:direction]` spec as given on the command line.
    /// A bare field sorts ascending.
    pub fn parse_spec(spec: &str) -> Option<(String, SortDirection)> {
        let (field, direction) = match spec.split_once(':') {
            Some((f, d)) => (f.trim(), SortDirection::parse(d)?),
            None => (spec.trim(), SortDirection::Ascending),
        };
        if field.is_empty() {
            return None;
        }
        Some((field.to_string(), direction))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SortDirection)> {
        self.entries.iter().map(|(f, d)| (f.as_str(), *d))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Build a filter expression from field values.
///
/// Unknown fields and absent values are skipped. No clauses yields an empty
/// string, which callers must omit from the request rather than send.
pub fn translate_filter(registry: &FieldRegistry, params: &FilterParams) -> String {
    let mut clauses: Vec<String> = Vec::new();

    for (field, value) in params.iter() {
        let Some(value) = value else { continue };
        let Some(spec) = registry.get(field) else {
            continue;
        };
        match spec {
            // No quote escaping: the value is interpolated verbatim.
            FieldSpec::ExactMatch => clauses.push(format!("{}='{}'", field, value)),
            FieldSpec::DateRangeLower => {
                clauses.push(format!("{} >= '{}'", field, day_start(value)));
            }
            FieldSpec::DateRangeUpper => {
                clauses.push(format!("{} <= '{}'", field, day_start(value)));
            }
        }
    }

    clauses.join(" && ")
}

/// Build a sort expression. Empty input yields an empty string.
pub fn translate_sort(sort: &SortParams) -> String {
    sort.iter()
        .map(|(field, direction)| format!("{}{}", direction.prefix(), field))
        .collect()
}

fn day_start(value: &str) -> String {
    match parse_date(value) {
        Some(date) => format!("{}{}", date.format("%Y-%m-%d"), DAY_START),
        None => {
            tracing::debug!(value, "range value is not a calendar date, passing through");
            format!("{}{}", value.trim(), DAY_START)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tasks() -> &'static FieldRegistry {
        FieldRegistry::tasks()
    }

    #[test]
    fn test_empty_filter() {
        assert_eq!(translate_filter(tasks(), &FilterParams::new()), "");
    }

    #[test]
    fn test_exact_match() {
        let params = FilterParams::new().with("status", "done");
        assert_eq!(translate_filter(tasks(), &params), "status='done'");
    }

    #[test]
    fn test_lower_bound_alone() {
        let params = FilterParams::new().with("startDate", "2024-01-01");
        let filter = translate_filter(tasks(), &params);
        assert!(filter.contains("startDate >= '2024-01-01T00:00:00.000Z'"));
        assert!(!filter.contains("endDate"));
    }

    #[test]
    fn test_upper_bound_alone() {
        let params = FilterParams::new().with("endDate", "2024-02-01");
        assert_eq!(
            translate_filter(tasks(), &params),
            "endDate <= '2024-02-01T00:00:00.000Z'"
        );
    }

    #[test]
    fn test_range_pair_joined_in_order() {
        let params = FilterParams::new()
            .with("startDate", "2024-01-01")
            .with("endDate", "2024-02-01");
        assert_eq!(
            translate_filter(tasks(), &params),
            "startDate >= '2024-01-01T00:00:00.000Z' && endDate <= '2024-02-01T00:00:00.000Z'"
        );
    }

    #[test]
    fn test_visit_order_preserved() {
        let params = FilterParams::new()
            .with("status", "pending")
            .with("assignedTo", "u1")
            .with("title", "Report");
        assert_eq!(
            translate_filter(tasks(), &params),
            "status='pending' && assignedTo='u1' && title='Report'"
        );
    }

    #[test]
    fn test_unknown_and_null_fields_skipped() {
        let mut params = FilterParams::new().with("timer", "5").with("status", "pending");
        params.set("title", None);
        params.set("current", Some("2".to_string()));
        assert_eq!(translate_filter(tasks(), &params), "status='pending'");
    }

    #[test]
    fn test_quotes_not_escaped() {
        let params = FilterParams::new().with("title", "it's");
        assert_eq!(translate_filter(tasks(), &params), "title='it's'");
    }

    #[test]
    fn test_range_value_with_time_suffix_is_normalized() {
        let params = FilterParams::new().with("startDate", "2024-01-01 00:00:00");
        assert_eq!(
            translate_filter(tasks(), &params),
            "startDate >= '2024-01-01T00:00:00.000Z'"
        );
    }

    #[test]
    fn test_set_keeps_position() {
        let mut params = FilterParams::new().with("status", "a").with("title", "b");
        params.set("status", Some("c".to_string()));
        assert_eq!(translate_filter(tasks(), &params), "status='c' && title='b'");
        assert_eq!(params.get("status"), Some("c"));
    }

    #[test]
    fn test_from_json_stringifies_scalars() {
        let value = serde_json::json!({"status": "pending", "title": null, "current": 1});
        let params = FilterParams::from_json(value.as_object().unwrap());
        assert_eq!(params.get("status"), Some("pending"));
        assert_eq!(params.get("title"), None);
        assert_eq!(params.get("current"), Some("1"));
    }

    #[test]
    fn test_sort_single() {
        let asc = SortParams::new().with("timer", SortDirection::Ascending);
        assert_eq!(translate_sort(&asc), "+timer");
        let desc = SortParams::from_pairs([("timer", "descending")]);
        assert_eq!(translate_sort(&desc), "-timer");
    }

    #[test]
    fn test_sort_concatenates_in_priority_order() {
        let sort = SortParams::from_pairs([("startDate", "ascend"), ("timer", "descend")]);
        assert_eq!(translate_sort(&sort), "+startDate-timer");
    }

    #[test]
    fn test_sort_empty() {
        assert_eq!(translate_sort(&SortParams::new()), "");
        assert_eq!(translate_sort(&SortParams::from_pairs([("timer", "")])), "");
    }

    #[test]
    fn test_sort_direction_parse() {
        assert_eq!(SortDirection::parse("ascending"), Some(SortDirection::Ascending));
        assert_eq!(SortDirection::parse("ASC"), Some(SortDirection::Ascending));
        assert_eq!(SortDirection::parse("whatever"), Some(SortDirection::Descending));
        assert_eq!(SortDirection::parse("  "), None);
    }

    #[test]
    fn test_parse_spec() {
        assert_eq!(
            SortParams::parse_spec("timer:desc"),
            Some(("timer".to_string(), SortDirection::Descending))
        );
        assert_eq!(
            SortParams::parse_spec("startDate"),
            Some(("startDate".to_string(), SortDirection::Ascending))
        );
        assert_eq!(SortParams::parse_spec(":asc"), None);
    }
}
