//! Table state to store query translation.
//!
//! - [`fields`] - which fields can be filtered and how they compare
//! - [`translate`] - filter/sort expression builders
//! - [`list`] - paging and the assembled list request

pub mod fields;
pub mod list;
pub mod translate;

pub use fields::{FieldRegistry, FieldSpec};
pub use list::{DEFAULT_PAGE_SIZE, ListQuery, MAX_PAGE_SIZE};
pub use translate::{
    FilterParams, SortDirection, SortParams, translate_filter, translate_sort,
};

/// Assemble a list request from table state.
pub fn build_list_query(
    registry: &FieldRegistry,
    page: u32,
    per_page: u32,
    filters: &FilterParams,
    sort: &SortParams,
    expand: Option<&str>,
) -> ListQuery {
    ListQuery::new(page, per_page)
        .filter(translate_filter(registry, filters))
        .sort(translate_sort(sort))
        .expand(expand.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_list_query_from_table_state() {
        let filters = FilterParams::new().with("status", "pending").with("bogus", "x");
        let sort = SortParams::new().with("timer", SortDirection::Descending);
        let query = build_list_query(
            FieldRegistry::tasks(),
            1,
            5,
            &filters,
            &sort,
            Some("assignedTo"),
        );
        assert_eq!(query.filter.as_deref(), Some("status='pending'"));
        assert_eq!(query.sort.as_deref(), Some("-timer"));
        assert_eq!(query.expand.as_deref(), Some("assignedTo"));
    }

    #[test]
    fn test_build_list_query_without_state() {
        let query = build_list_query(
            FieldRegistry::tasks(),
            1,
            5,
            &FilterParams::new(),
            &SortParams::new(),
            None,
        );
        assert!(query.filter.is_none());
        assert!(query.sort.is_none());
        assert!(query.expand.is_none());
    }
}
