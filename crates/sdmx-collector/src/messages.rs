//! Bus message shapes, outbound and inbound

use crate::change::DatasetStatus;
use crate::schema::TableSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Value of `meta.source` on every message this collector owns
pub const SOURCE_TAG: &str = "sdmx";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityInformations {
    pub id: String,
    pub name: String,
    pub table: String,
}

/// Catalogue entry describing the published table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entity {
    pub id: String,
    pub common_name: String,
    pub provider: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub informations: EntityInformations,
}

impl Entity {
    pub fn dataset(table: &str, name: &str) -> Self {
        Self {
            id: table.to_string(),
            common_name: name.to_string(),
            provider: "internal".to_string(),
            kind: "dataset".to_string(),
            informations: EntityInformations {
                id: table.to_string(),
                name: name.to_string(),
                table: table.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Referential {
    pub entities: Vec<Entity>,
}

/// A table schema with its rows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatastoreEntry {
    #[serde(flatten)]
    pub schema: TableSchema,
    pub records: Vec<Map<String, Value>>,
}

/// One source's content for one poll cycle, as handed to the loader
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedDataset {
    pub referential: Referential,
    pub datastore: Vec<DatastoreEntry>,
    pub checksum: String,
    pub id: String,
    pub status: DatasetStatus,
    pub meta: Meta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

/// `meta` block of inbound events; anything may be missing
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InboundMeta {
    pub source: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl InboundMeta {
    pub fn is_ours(&self) -> bool {
        self.source.as_deref() == Some(SOURCE_TAG)
    }
}

/// Loader confirmation that a published dataset was written
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoadAck {
    pub id: Option<String>,
    pub checksum: Option<String>,
    pub meta: Option<InboundMeta>,
}

/// Connection fields carried by a config event
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SourceConfig {
    pub root_url: Option<String>,
    pub agency: Option<String>,
    pub resource: Option<String>,
    pub version: Option<String>,
    pub kind: Option<String>,
    #[serde(default)]
    pub keys: BTreeMap<String, String>,
}

/// Request to start collecting a new feed
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConfigEvent {
    pub meta: Option<InboundMeta>,
    pub config: Option<SourceConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_with_missing_fields_parses() {
        let ack: LoadAck = serde_json::from_str(r#"{"id": "x"}"#).unwrap();
        assert_eq!(ack.id.as_deref(), Some("x"));
        assert!(ack.checksum.is_none());
        assert!(ack.meta.is_none());
    }

    #[test]
    fn test_meta_source_tag() {
        let ack: LoadAck =
            serde_json::from_str(r#"{"id": "x", "checksum": "c", "meta": {"source": "sdmx", "type": "insee"}}"#)
                .unwrap();
        let meta = ack.meta.unwrap();
        assert!(meta.is_ours());
        assert_eq!(meta.kind.as_deref(), Some("insee"));

        let other = InboundMeta {
            source: Some("csv".into()),
            kind: None,
        };
        assert!(!other.is_ours());
    }

    #[test]
    fn test_config_event_parses() {
        let event: ConfigEvent = serde_json::from_str(
            r#"{"meta": {"source": "sdmx"}, "config": {"root_url": "http://x", "agency": "FR1",
                "resource": "CHOMAGE", "version": "2.1", "keys": {"INDICATEUR": "XY"}}}"#,
        )
        .unwrap();
        let config = event.config.unwrap();
        assert_eq!(config.agency.as_deref(), Some("FR1"));
        assert!(config.kind.is_none());
        assert_eq!(config.keys["INDICATEUR"], "XY");
    }

    #[test]
    fn test_notification_shape() {
        let value = serde_json::to_value(Notification {
            id: "a_b".into(),
            source: SOURCE_TAG.into(),
            kind: String::new(),
            content: "A new SDMX feed has been added.".into(),
        })
        .unwrap();
        assert_eq!(value["type"], "");
        assert_eq!(value["source"], "sdmx");
    }

    #[test]
    fn test_entity_shape() {
        let value = serde_json::to_value(Entity::dataset("fr1_flow", "Flow")).unwrap();
        assert_eq!(value["type"], "dataset");
        assert_eq!(value["provider"], "internal");
        assert_eq!(value["informations"]["table"], "fr1_flow");
    }
}
