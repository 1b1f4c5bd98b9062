//! XML namespace tables per SDMX protocol version and agency
//!
//! Every `(version, agency)` pair resolves to a prefix -> URI table. Agencies
//! without an override get the version-wide default set. Logical prefixes
//! are mapped once per resolution to whatever short prefix the dialect uses
//! (`com`/`str`/`mes` in 2.1), so extraction code can address elements
//! without caring which spelling a given source uses. For data tables,
//! [`Logical::Data`] names the namespace `Series` and `Obs` live in.

use crate::error::{CollectorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Namespace of `xml:lang` and friends
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// SDMX wire dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// SDMX-ML 2.1
    #[serde(rename = "2.1")]
    V2_1,
    /// SDMX-ML 2.0 key-family dialect (e.g. the historical ILOSTAT API)
    #[serde(rename = "legacy", alias = "ilo", alias = "2.0")]
    Legacy,
}

impl FromStr for ProtocolVersion {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "2.1" => Ok(ProtocolVersion::V2_1),
            "legacy" | "ilo" | "2.0" => Ok(ProtocolVersion::Legacy),
            other => Err(CollectorError::structural(format!(
                "unsupported protocol version '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V2_1 => write!(f, "2.1"),
            ProtocolVersion::Legacy => write!(f, "legacy"),
        }
    }
}

/// Data message flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Structure-specific (compact) data: values carried as XML attributes
    #[default]
    Specific,
    /// Generic data: values carried as `Value` child elements
    Generic,
}

impl FromStr for MessageKind {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "specific" => Ok(MessageKind::Specific),
            "generic" => Ok(MessageKind::Generic),
            other => Err(CollectorError::structural(format!(
                "unsupported message kind '{other}'"
            ))),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Specific => write!(f, "specific"),
            MessageKind::Generic => write!(f, "generic"),
        }
    }
}

/// Which family of documents the table is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceKind {
    Structure,
    Data(MessageKind),
}

/// Dialect-independent prefix names
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Logical {
    Common,
    Structure,
    Message,
    /// Namespace qualifying `Series` / `Obs` in data messages
    Data,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    logical: Option<Logical>,
    prefix: &'static str,
    uri: &'static str,
}

const fn entry(logical: Option<Logical>, prefix: &'static str, uri: &'static str) -> Entry {
    Entry {
        logical,
        prefix,
        uri,
    }
}

const V21_MESSAGE: &str = "http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message";
const V21_STRUCTURE: &str = "http://www.sdmx.org/resources/sdmxml/schemas/v2_1/structure";
const V21_COMMON: &str = "http://www.sdmx.org/resources/sdmxml/schemas/v2_1/common";

const V20_MESSAGE: &str = "http://www.SDMX.org/resources/SDMXML/schemas/v2_0/message";
const V20_STRUCTURE: &str = "http://www.SDMX.org/resources/SDMXML/schemas/v2_0/structure";
const V20_COMMON: &str = "http://www.SDMX.org/resources/SDMXML/schemas/v2_0/common";

const V21_BASE: [Entry; 3] = [
    entry(Some(Logical::Message), "mes", V21_MESSAGE),
    entry(Some(Logical::Structure), "str", V21_STRUCTURE),
    entry(Some(Logical::Common), "com", V21_COMMON),
];

const V20_BASE: [Entry; 3] = [
    entry(Some(Logical::Message), "message", V20_MESSAGE),
    entry(Some(Logical::Structure), "structure", V20_STRUCTURE),
    entry(Some(Logical::Common), "common", V20_COMMON),
];

const V21_SPECIFIC: &str = "http://www.sdmx.org/resources/sdmxml/schemas/v2_1/data/structurespecific";
const V21_GENERIC: &str = "http://www.sdmx.org/resources/sdmxml/schemas/v2_1/data/generic";
const V20_COMPACT: &str = "http://www.SDMX.org/resources/SDMXML/schemas/v2_0/compact";
const V20_GENERIC: &str = "http://www.SDMX.org/resources/SDMXML/schemas/v2_0/generic";

const ILO_DATA: &str = "http://www.ilo.org/ilostat/sdmx";

/// Entries layered over the version default for specific agencies.
///
/// An entry bound to a logical prefix replaces the default binding.
struct AgencyOverride {
    version: ProtocolVersion,
    agency: &'static str,
    entries: &'static [Entry],
}

const AGENCY_OVERRIDES: &[AgencyOverride] = &[
    // The old ILOSTAT endpoint qualifies series and observations with its own namespace
    AgencyOverride {
        version: ProtocolVersion::Legacy,
        agency: "ILO",
        entries: &[entry(Some(Logical::Data), "ilo", ILO_DATA)],
    },
];

fn default_entries(version: ProtocolVersion, kind: NamespaceKind) -> Vec<Entry> {
    let (base, data) = match version {
        ProtocolVersion::V2_1 => (V21_BASE, (V21_SPECIFIC, V21_GENERIC)),
        ProtocolVersion::Legacy => (V20_BASE, (V20_COMPACT, V20_GENERIC)),
    };

    let mut entries = base.to_vec();
    match (version, kind) {
        (_, NamespaceKind::Structure) => {},
        (ProtocolVersion::V2_1, NamespaceKind::Data(MessageKind::Specific)) => {
            entries.push(entry(Some(Logical::Data), "ss", data.0))
        },
        (ProtocolVersion::Legacy, NamespaceKind::Data(MessageKind::Specific)) => {
            entries.push(entry(Some(Logical::Data), "compact", data.0))
        },
        (_, NamespaceKind::Data(MessageKind::Generic)) => {
            entries.push(entry(Some(Logical::Data), "generic", data.1))
        },
    }
    entries
}

/// Resolved namespace table for one `(version, agency, kind)` triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespaces {
    version: ProtocolVersion,
    prefixes: BTreeMap<String, String>,
    aliases: BTreeMap<Logical, String>,
}

impl Namespaces {
    /// Resolve the namespace table, applying any agency override.
    pub fn resolve(version: ProtocolVersion, agency_id: &str, kind: NamespaceKind) -> Self {
        let mut entries = default_entries(version, kind);

        let agency = agency_id.to_uppercase();
        for over in AGENCY_OVERRIDES
            .iter()
            .filter(|o| o.version == version && o.agency == agency)
        {
            // Data bindings only make sense in data tables
            let applicable = over
                .entries
                .iter()
                .filter(|e| e.logical != Some(Logical::Data) || kind != NamespaceKind::Structure);
            for e in applicable {
                entries.retain(|existing| {
                    existing.prefix != e.prefix && (e.logical.is_none() || existing.logical != e.logical)
                });
                entries.push(*e);
            }
        }

        let mut prefixes = BTreeMap::new();
        let mut aliases = BTreeMap::new();
        for e in entries {
            prefixes.insert(e.prefix.to_string(), e.uri.to_string());
            if let Some(logical) = e.logical {
                aliases.insert(logical, e.prefix.to_string());
            }
        }

        Self {
            version,
            prefixes,
            aliases,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Full prefix -> URI table
    pub fn prefixes(&self) -> &BTreeMap<String, String> {
        &self.prefixes
    }

    /// URI bound to a concrete prefix
    pub fn uri(&self, prefix: &str) -> Option<&str> {
        self.prefixes.get(prefix).map(String::as_str)
    }

    /// Dialect prefix standing in for a logical prefix (`Structure` -> `str` in 2.1)
    pub fn alias(&self, logical: Logical) -> &str {
        self.aliases.get(&logical).map(String::as_str).unwrap_or_default()
    }

    /// URI of a logical prefix, empty when the table does not bind it
    pub fn logical_uri(&self, logical: Logical) -> &str {
        self.uri(self.alias(logical)).unwrap_or_default()
    }

    /// Expanded element name usable with `roxmltree::Node::has_tag_name`
    pub fn tag<'a>(&'a self, logical: Logical, local: &'a str) -> (&'a str, &'a str) {
        (self.logical_uri(logical), local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v21_short_prefixes() {
        let ns = Namespaces::resolve(ProtocolVersion::V2_1, "FR1", NamespaceKind::Structure);
        assert_eq!(ns.alias(Logical::Common), "com");
        assert_eq!(ns.alias(Logical::Structure), "str");
        assert_eq!(ns.alias(Logical::Message), "mes");
        assert_eq!(ns.uri("str"), Some(V21_STRUCTURE));
    }

    #[test]
    fn test_legacy_prefixes() {
        let ns = Namespaces::resolve(ProtocolVersion::Legacy, "XYZ", NamespaceKind::Structure);
        assert_eq!(ns.alias(Logical::Structure), "structure");
        assert_eq!(ns.logical_uri(Logical::Message), V20_MESSAGE);
    }

    #[test]
    fn test_agency_override_rebinds_data_prefix() {
        let data = NamespaceKind::Data(MessageKind::Specific);
        let ilo = Namespaces::resolve(ProtocolVersion::Legacy, "ilo", data);
        assert_eq!(ilo.alias(Logical::Data), "ilo");
        assert_eq!(ilo.logical_uri(Logical::Data), ILO_DATA);
        assert_eq!(ilo.uri("compact"), None);
        assert_eq!(ilo.alias(Logical::Structure), "structure");

        let other = Namespaces::resolve(ProtocolVersion::Legacy, "XYZ", data);
        assert_eq!(other.alias(Logical::Data), "compact");
        assert_eq!(other.logical_uri(Logical::Data), V20_COMPACT);
    }

    #[test]
    fn test_override_is_scoped_to_version_and_kind() {
        let v21 = Namespaces::resolve(
            ProtocolVersion::V2_1,
            "ILO",
            NamespaceKind::Data(MessageKind::Specific),
        );
        assert_eq!(v21.logical_uri(Logical::Data), V21_SPECIFIC);

        let structure = Namespaces::resolve(ProtocolVersion::Legacy, "ILO", NamespaceKind::Structure);
        assert_eq!(structure.alias(Logical::Data), "");
        assert!(structure.uri("ilo").is_none());
    }

    #[test]
    fn test_unknown_agency_falls_back_to_default() {
        let unknown = Namespaces::resolve(ProtocolVersion::V2_1, "NOPE", NamespaceKind::Structure);
        let default = Namespaces::resolve(ProtocolVersion::V2_1, "FR1", NamespaceKind::Structure);
        assert_eq!(unknown, default);
    }

    #[test]
    fn test_data_namespaces() {
        let specific = Namespaces::resolve(
            ProtocolVersion::V2_1,
            "FR1",
            NamespaceKind::Data(MessageKind::Specific),
        );
        assert_eq!(specific.uri("ss"), Some(V21_SPECIFIC));
        assert_eq!(specific.alias(Logical::Data), "ss");

        let generic = Namespaces::resolve(
            ProtocolVersion::Legacy,
            "XYZ",
            NamespaceKind::Data(MessageKind::Generic),
        );
        assert_eq!(generic.logical_uri(Logical::Data), V20_GENERIC);
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!("2.1".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::V2_1);
        assert_eq!("ILO".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::Legacy);
        assert!(matches!(
            "3.0".parse::<ProtocolVersion>(),
            Err(CollectorError::Structural(_))
        ));
    }

    #[test]
    fn test_version_serde() {
        let v: ProtocolVersion = serde_json::from_str("\"ilo\"").unwrap();
        assert_eq!(v, ProtocolVersion::Legacy);
        assert_eq!(serde_json::to_string(&ProtocolVersion::V2_1).unwrap(), "\"2.1\"");
    }
}
