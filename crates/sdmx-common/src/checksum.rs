//! MD5 checksums over ordered record sequences
//!
//! The digest covers the concatenation of each record's JSON rendering in
//! iteration order, so reordering identical records changes the result.
//! [`ChecksumMode::Canonical`] sorts the rendered records first when a
//! source is known to shuffle its responses.

use crate::error::Result;
use serde::Serialize;

/// How records are ordered before hashing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumMode {
    /// Hash records in the order they were produced
    #[default]
    Ordered,
    /// Hash records sorted by their rendered form
    Canonical,
}

/// Compute MD5 checksum of bytes
pub fn compute_md5(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Checksum a sequence of serializable records.
pub fn records_checksum<T: Serialize>(records: &[T], mode: ChecksumMode) -> Result<String> {
    let mut rendered = records
        .iter()
        .map(serde_json::to_string)
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if mode == ChecksumMode::Canonical {
        rendered.sort_unstable();
    }

    let mut context = md5::Context::new();
    for record in &rendered {
        context.consume(record.as_bytes());
    }
    Ok(format!("{:x}", context.compute()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compute_md5() {
        assert_eq!(compute_md5(b"Hello, world!"), "6cd3556deb0da54bca060b4c39479839");
    }

    #[test]
    fn test_checksum_matches_concatenation() {
        let records = vec![json!({"a": "1"}), json!({"a": "2"})];
        let expected = compute_md5(br#"{"a":"1"}{"a":"2"}"#);
        assert_eq!(records_checksum(&records, ChecksumMode::Ordered).unwrap(), expected);
    }

    #[test]
    fn test_same_sequence_same_checksum() {
        let a = vec![json!({"x": 1.0}), json!({"x": null})];
        let b = a.clone();
        assert_eq!(
            records_checksum(&a, ChecksumMode::Ordered).unwrap(),
            records_checksum(&b, ChecksumMode::Ordered).unwrap()
        );
    }

    #[test]
    fn test_order_sensitivity() {
        let forward = vec![json!({"x": "1"}), json!({"x": "2"})];
        let reversed = vec![json!({"x": "2"}), json!({"x": "1"})];

        assert_ne!(
            records_checksum(&forward, ChecksumMode::Ordered).unwrap(),
            records_checksum(&reversed, ChecksumMode::Ordered).unwrap()
        );
        assert_eq!(
            records_checksum(&forward, ChecksumMode::Canonical).unwrap(),
            records_checksum(&reversed, ChecksumMode::Canonical).unwrap()
        );
    }

    #[test]
    fn test_empty_records() {
        assert_eq!(
            records_checksum::<serde_json::Value>(&[], ChecksumMode::Ordered).unwrap(),
            compute_md5(b"")
        );
    }
}
