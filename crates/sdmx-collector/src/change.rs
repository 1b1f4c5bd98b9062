//! Content checksums and tri-state change classification

use crate::error::Result;
use sdmx_common::checksum::{records_checksum, ChecksumMode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of comparing a fresh checksum with the committed one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatasetStatus {
    /// Nothing committed yet
    Created,
    Unchanged,
    Updated,
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetStatus::Created => write!(f, "CREATED"),
            DatasetStatus::Unchanged => write!(f, "UNCHANGED"),
            DatasetStatus::Updated => write!(f, "UPDATED"),
        }
    }
}

pub fn classify(previous: Option<&str>, current: &str) -> DatasetStatus {
    match previous {
        None => DatasetStatus::Created,
        Some(previous) if previous == current => DatasetStatus::Unchanged,
        Some(_) => DatasetStatus::Updated,
    }
}

/// Checksums record sequences and classifies them against committed state
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector {
    mode: ChecksumMode,
}

impl ChangeDetector {
    pub fn new(mode: ChecksumMode) -> Self {
        Self { mode }
    }

    pub fn checksum<T: Serialize>(&self, records: &[T]) -> Result<String> {
        Ok(records_checksum(records, self.mode)?)
    }

    /// Checksum `records` and classify them against `previous`.
    pub fn detect<T: Serialize>(
        &self,
        previous: Option<&str>,
        records: &[T],
    ) -> Result<(String, DatasetStatus)> {
        let checksum = self.checksum(records)?;
        let status = classify(previous, &checksum);
        Ok((checksum, status))
    }
}
