//! Deterministic identifiers derived from agency and resource ids

use regex::Regex;
use std::sync::OnceLock;

fn non_word() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| match Regex::new(r"[^0-9a-zA-Z_]+") {
        Ok(re) => re,
        Err(e) => unreachable!("static pattern is valid: {e}"),
    })
}

/// Collapse every run of characters outside `[0-9a-zA-Z_]` into one `_`.
pub fn clean(value: &str) -> String {
    non_word().replace_all(value, "_").into_owned()
}

/// Table (and source) identifier for an `(agency, resource)` pair.
///
/// Pure and case-insensitive: `table_name("INSEE", "A-B") == table_name("insee", "a-b")`.
pub fn table_name(agency: &str, resource: &str) -> String {
    format!(
        "{}_{}",
        clean(&agency.to_lowercase()),
        clean(&resource.to_lowercase())
    )
}

/// Column name for a DSD component id.
pub fn column_name(component_id: &str) -> String {
    clean(&component_id.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_collapses_runs() {
        assert_eq!(clean("a--b..c"), "a_b_c");
        assert_eq!(clean("keep_under_score"), "keep_under_score");
        assert_eq!(clean("é"), "_");
    }

    #[test]
    fn test_table_name_is_case_insensitive() {
        assert_eq!(
            table_name("INSEE", "CHOMAGE-TRIM-NATIONAL"),
            table_name("insee", "chomage-trim-national")
        );
        assert_eq!(table_name("INSEE", "CHOMAGE-TRIM-NATIONAL"), "insee_chomage_trim_national");
    }

    #[test]
    fn test_column_name() {
        assert_eq!(column_name("TIME_PERIOD"), "time_period");
        assert_eq!(column_name("REF-AREA"), "ref_area");
    }
}
