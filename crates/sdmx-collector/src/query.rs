//! SDMX key-filter construction

use crate::model::Component;
use std::collections::BTreeMap;

/// Build the positional key filter for a data query.
///
/// One slot per dimension, in declaration order, joined with `.`. A
/// dimension missing from `keys` leaves its slot empty so later slots keep
/// their position.
pub fn build_query(dimensions: &[Component], keys: &BTreeMap<String, String>) -> String {
    dimensions
        .iter()
        .map(|d| keys.get(&d.id).map(String::as_str).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(".")
}
