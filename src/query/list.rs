//! List request parameters.

use serde::Serialize;

/// Default number of rows per page in table views.
pub const DEFAULT_PAGE_SIZE: u32 = 5;

/// Upper bound the store accepts for a single page.
pub const MAX_PAGE_SIZE: u32 = 500;

/// Parameters of a single list request.
///
/// Empty filter and sort expressions are dropped on construction so the
/// request never carries a blank clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub page: u32,
    pub per_page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expand: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PAGE_SIZE,
            filter: None,
            sort: None,
            expand: None,
        }
    }
}

impl ListQuery {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PAGE_SIZE),
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = non_empty(filter.into());
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = non_empty(sort.into());
        self
    }

    pub fn expand(mut self, expand: impl Into<String>) -> Self {
        self.expand = non_empty(expand.into());
        self
    }

    /// Query-string pairs for an HTTP list request.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("page", self.page.to_string()),
            ("perPage", self.per_page.to_string()),
        ];
        if let Some(ref filter) = self.filter {
            pairs.push(("filter", filter.clone()));
        }
        if let Some(ref sort) = self.sort {
            pairs.push(("sort", sort.clone()));
        }
        if let Some(ref expand) = self.expand {
            pairs.push(("expand", expand.clone()));
        }
        pairs
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() { None } else { Some(s) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_clauses_are_omitted() {
        let query = ListQuery::new(1, 5).filter("").sort("").expand("assignedTo");
        let pairs = query.to_pairs();
        assert_eq!(
            pairs,
            vec![
                ("page", "1".to_string()),
                ("perPage", "5".to_string()),
                ("expand", "assignedTo".to_string()),
            ]
        );
    }

    #[test]
    fn test_page_bounds_clamped() {
        let query = ListQuery::new(0, 10_000);
        assert_eq!(query.page, 1);
        assert_eq!(query.per_page, MAX_PAGE_SIZE);
    }

    #[test]
    fn test_clauses_kept() {
        let query = ListQuery::new(2, 5).filter("status='pending'").sort("-timer");
        assert_eq!(query.filter.as_deref(), Some("status='pending'"));
        assert_eq!(query.sort.as_deref(), Some("-timer"));
        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json["perPage"], 5);
        assert!(json.get("expand").is_none());
    }
}
