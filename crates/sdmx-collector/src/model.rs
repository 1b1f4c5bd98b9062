//! Structural metadata and observation types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One flattened observation: column key -> raw wire value (`None` when absent)
pub type Record = BTreeMap<String, Option<String>>;

/// Reference from a dataflow to its data structure definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureRef {
    pub id: String,
    pub agency_id: String,
}

/// A named dataset definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataflow {
    pub id: String,
    pub name: String,
    pub structure: StructureRef,
}

/// A dimension or attribute, with the codelist constraining its values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    pub codelist: Option<String>,
    /// Agency maintaining `codelist` when the reference names one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codelist_agency: Option<String>,
}

impl Component {
    pub fn new(id: impl Into<String>, codelist: Option<&str>) -> Self {
        Self {
            id: id.into(),
            codelist: codelist.map(str::to_string),
            codelist_agency: None,
        }
    }

    /// Set the agency maintaining the codelist
    pub fn owned_by(mut self, agency: Option<&str>) -> Self {
        self.codelist_agency = agency.filter(|a| !a.is_empty()).map(str::to_string);
        self
    }
}

/// `(list_id, code, label)` triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodelistEntry {
    pub list_id: String,
    pub code: String,
    pub label: String,
}

impl CodelistEntry {
    pub fn new(list_id: &str, code: &str, label: &str) -> Self {
        Self {
            list_id: list_id.to_string(),
            code: code.to_string(),
            label: label.to_string(),
        }
    }
}

/// Data structure definition of a dataflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dsd {
    /// Dimensions in declaration order (the time dimension excluded)
    pub dimensions: Vec<Component>,
    pub attributes: Vec<Component>,
    pub time_dimension: String,
    pub primary_measure: String,
    pub codelist: Vec<CodelistEntry>,
}

impl Dsd {
    /// Every key an observation record carries, without duplicates:
    /// dimensions, attributes, time dimension, primary measure.
    pub fn record_keys(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.dimensions
            .iter()
            .chain(&self.attributes)
            .map(|c| c.id.as_str())
            .chain([self.time_dimension.as_str(), self.primary_measure.as_str()])
            .filter(|id| seen.insert(*id))
            .map(str::to_string)
            .collect()
    }

    /// Entries of one codelist
    pub fn codes<'a>(&'a self, list_id: &'a str) -> impl Iterator<Item = &'a CodelistEntry> + 'a {
        self.codelist.iter().filter(move |c| c.list_id == list_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dsd() -> Dsd {
        Dsd {
            dimensions: vec![Component::new("AGE", Some("CL_AGE")), Component::new("SEX", None)],
            attributes: vec![Component::new("OBS_STATUS", Some("CL_OBS_STATUS"))],
            time_dimension: "TIME_PERIOD".into(),
            primary_measure: "OBS_VALUE".into(),
            codelist: vec![
                CodelistEntry::new("CL_AGE", "0", "All ages"),
                CodelistEntry::new("CL_OBS_STATUS", "A", "Normal"),
            ],
        }
    }

    #[test]
    fn test_record_keys() {
        assert_eq!(
            dsd().record_keys(),
            vec!["AGE", "SEX", "OBS_STATUS", "TIME_PERIOD", "OBS_VALUE"]
        );
    }

    #[test]
    fn test_codes_filter_by_list() {
        let dsd = dsd();
        let codes: Vec<_> = dsd.codes("CL_AGE").map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["0"]);
    }
}
