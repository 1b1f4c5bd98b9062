//! Observation extraction from structure-specific data messages
//!
//! The body of one data fetch is walked exactly once with a streaming
//! reader. Each `Series` contributes its attribute values to every `Obs`
//! below it; each `Obs` becomes one [`Record`] carrying the full DSD key set.
//!
//! Only unqualified `Series`/`Obs` elements, or those in the data namespace
//! resolved for the source's `(version, agency)`, are read.

use crate::error::{CollectorError, Result};
use crate::fetcher::{WireFetcher, ACCEPT_SPECIFIC_DATA};
use crate::model::{Dsd, Record};
use crate::namespaces::{Logical, MessageKind, NamespaceKind, Namespaces, ProtocolVersion};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use std::collections::BTreeMap;
use std::io::Cursor;
use tracing::debug;

/// Single-pass sequence of records over one fetched data message.
///
/// Not restartable: iterating again requires a new fetch.
pub struct Observations {
    reader: NsReader<Cursor<Vec<u8>>>,
    buf: Vec<u8>,
    data_ns: Vec<u8>,
    keys: Vec<String>,
    series: BTreeMap<String, String>,
    done: bool,
}

impl std::fmt::Debug for Observations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observations")
            .field("keys", &self.keys)
            .field("data_ns", &String::from_utf8_lossy(&self.data_ns))
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl Observations {
    /// Stream records out of an already fetched data message, reading
    /// series and observations in the data namespace of `namespaces`.
    pub fn from_xml(xml: String, keys: Vec<String>, namespaces: &Namespaces) -> Self {
        let mut reader = NsReader::from_reader(Cursor::new(xml.into_bytes()));
        reader.config_mut().trim_text(true);

        Self {
            reader,
            buf: Vec::new(),
            data_ns: namespaces.logical_uri(Logical::Data).as_bytes().to_vec(),
            keys,
            series: BTreeMap::new(),
            done: false,
        }
    }

    /// Plain attributes of an element; namespace declarations and prefixed
    /// attributes such as `xsi:type` are not data.
    fn attributes(element: &BytesStart) -> Result<BTreeMap<String, String>> {
        let mut values = BTreeMap::new();
        for attr in element.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            if attr.key.prefix().is_some() || attr.key.as_namespace_binding().is_some() {
                continue;
            }
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            values.insert(key, attr.unescape_value()?.into_owned());
        }
        Ok(values)
    }

    fn record(
        keys: &[String],
        series: &BTreeMap<String, String>,
        obs: BTreeMap<String, String>,
    ) -> Record {
        keys.iter()
            .map(|key| {
                let value = obs.get(key).or_else(|| series.get(key)).cloned();
                (key.clone(), value)
            })
            .collect()
    }

    fn is_data(data_ns: &[u8], ns: &ResolveResult) -> bool {
        match ns {
            ResolveResult::Unbound => true,
            ResolveResult::Bound(Namespace(uri)) => !data_ns.is_empty() && *uri == data_ns,
            ResolveResult::Unknown(_) => false,
        }
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            self.buf.clear();
            let (ns, event) = self.reader.read_resolved_event_into(&mut self.buf)?;
            match event {
                Event::Start(ref e) | Event::Empty(ref e) if Self::is_data(&self.data_ns, &ns) => {
                    match e.local_name().as_ref() {
                        b"Series" => self.series = Self::attributes(e)?,
                        b"Obs" => {
                            let obs = Self::attributes(e)?;
                            return Ok(Some(Self::record(&self.keys, &self.series, obs)));
                        },
                        _ => {},
                    }
                },
                Event::End(ref e)
                    if e.local_name().as_ref() == b"Series" && Self::is_data(&self.data_ns, &ns) =>
                {
                    self.series.clear()
                },
                Event::Eof => return Ok(None),
                _ => {},
            }
        }
    }
}

impl Iterator for Observations {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            },
            Err(e) => {
                self.done = true;
                Some(Err(e))
            },
        }
    }
}

/// Fetches data messages for one dialect and data-message kind
#[derive(Debug, Clone)]
pub struct ObservationExtractor {
    fetcher: WireFetcher,
    kind: MessageKind,
    namespaces: Namespaces,
}

impl ObservationExtractor {
    pub fn new(
        fetcher: WireFetcher,
        version: ProtocolVersion,
        agency_id: &str,
        kind: MessageKind,
    ) -> Self {
        Self {
            fetcher,
            kind,
            namespaces: Namespaces::resolve(version, agency_id, NamespaceKind::Data(kind)),
        }
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    /// Fetch `{root}/data/{resource}/{query}` and return its records.
    ///
    /// A query whose slots are all empty selects everything (`all`); sent
    /// as is, a bare `.` or `..` path segment would be normalized away.
    pub async fn extract(
        &self,
        root_url: &str,
        resource_id: &str,
        dsd: &Dsd,
        query: &str,
    ) -> Result<Observations> {
        if self.kind != MessageKind::Specific {
            return Err(CollectorError::UnsupportedMode(format!(
                "{} data messages are not supported",
                self.kind
            )));
        }

        let filter = if query.chars().all(|c| c == '.') { "all" } else { query };
        let url = format!("{}/data/{resource_id}/{filter}", root_url.trim_end_matches('/'));
        let xml = self
            .fetcher
            .get(&url, Some(ACCEPT_SPECIFIC_DATA))
            .await?
            .into_xml("data")?;

        debug!(resource_id, query, bytes = xml.len(), "Fetched data message");
        Ok(Observations::from_xml(xml, dsd.record_keys(), &self.namespaces))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FetchConfig;

    const DATA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<message:StructureSpecificData xmlns:message="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message"
    xmlns:ss="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/data/structurespecific"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <message:DataSet ss:structureRef="DSD" xsi:type="ns1:DataSetType">
    <Series AGE="0" INDICATEUR="XY" UNIT="PC">
      <Obs TIME_PERIOD="2019-Q4" OBS_VALUE="35" OBS_STATUS="A"/>
      <Obs TIME_PERIOD="2019-Q3" OBS_VALUE="36"/>
    </Series>
    <Series AGE="10">
      <Obs TIME_PERIOD="2019-Q4" OBS_VALUE="NaN" AGE="15"/>
    </Series>
  </message:DataSet>
</message:StructureSpecificData>"#;

    fn v21() -> Namespaces {
        Namespaces::resolve(
            ProtocolVersion::V2_1,
            "FR1",
            NamespaceKind::Data(MessageKind::Specific),
        )
    }

    fn legacy(agency: &str) -> Namespaces {
        Namespaces::resolve(
            ProtocolVersion::Legacy,
            agency,
            NamespaceKind::Data(MessageKind::Specific),
        )
    }

    const QUALIFIED: &str = r#"<CompactData xmlns="http://www.SDMX.org/resources/SDMXML/schemas/v2_0/message"
             xmlns:ilo="http://www.ilo.org/ilostat/sdmx">
  <ilo:DataSet>
    <ilo:Series AGE="0" INDICATEUR="XY">
      <ilo:Obs TIME_PERIOD="2018" OBS_VALUE="1.5"/>
      <ilo:Obs TIME_PERIOD="2017" OBS_VALUE="1.4"/>
    </ilo:Series>
  </ilo:DataSet>
</CompactData>"#;

    fn keys() -> Vec<String> {
        ["AGE", "INDICATEUR", "OBS_STATUS", "TIME_PERIOD", "OBS_VALUE"]
            .iter()
            .map(|k| k.to_string())
            .collect()
    }

    #[test]
    fn test_records_merge_series_and_obs() {
        let records: Vec<Record> = Observations::from_xml(DATA.to_string(), keys(), &v21())
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["AGE"].as_deref(), Some("0"));
        assert_eq!(records[0]["INDICATEUR"].as_deref(), Some("XY"));
        assert_eq!(records[0]["OBS_STATUS"].as_deref(), Some("A"));
        assert_eq!(records[0]["OBS_VALUE"].as_deref(), Some("35"));
        assert_eq!(records[1]["OBS_STATUS"], None);
    }

    #[test]
    fn test_records_are_homogeneous() {
        let records: Vec<Record> = Observations::from_xml(DATA.to_string(), keys(), &v21())
            .collect::<Result<_>>()
            .unwrap();

        for record in &records {
            assert_eq!(record.keys().cloned().collect::<Vec<_>>().len(), 5);
            assert!(!record.contains_key("UNIT"));
        }
        // Series values do not leak into the next series
        assert_eq!(records[2]["INDICATEUR"], None);
    }

    #[test]
    fn test_obs_value_overrides_series() {
        let records: Vec<Record> = Observations::from_xml(DATA.to_string(), keys(), &v21())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records[2]["AGE"].as_deref(), Some("15"));
    }

    #[test]
    fn test_agency_namespace_selects_series() {
        let ilo: Vec<Record> = Observations::from_xml(QUALIFIED.to_string(), keys(), &legacy("ILO"))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(ilo.len(), 2);
        assert_eq!(ilo[1]["INDICATEUR"].as_deref(), Some("XY"));
        assert_eq!(ilo[1]["TIME_PERIOD"].as_deref(), Some("2017"));

        // Without the ILO binding the qualified elements belong to a foreign namespace
        let other: Vec<Record> =
            Observations::from_xml(QUALIFIED.to_string(), keys(), &legacy("XYZ"))
                .collect::<Result<_>>()
                .unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn test_compact_namespace_is_read_by_default() {
        let xml = QUALIFIED.replace(
            "http://www.ilo.org/ilostat/sdmx",
            "http://www.SDMX.org/resources/SDMXML/schemas/v2_0/compact",
        );
        let records: Vec<Record> = Observations::from_xml(xml, keys(), &legacy("XYZ"))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_malformed_xml_yields_error_then_stops() {
        let mut obs = Observations::from_xml("<a><Obs X=\"1\"/></b>".to_string(), keys(), &v21());
        assert!(obs.next().unwrap().is_ok());
        assert!(obs.next().unwrap().is_err());
        assert!(obs.next().is_none());
    }

    #[tokio::test]
    async fn test_generic_kind_is_unsupported() {
        let fetcher = WireFetcher::new(&FetchConfig::default()).unwrap();
        let extractor = ObservationExtractor::new(fetcher, ProtocolVersion::V2_1, "FR1", MessageKind::Generic);
        let dsd = Dsd {
            dimensions: vec![],
            attributes: vec![],
            time_dimension: "TIME_PERIOD".into(),
            primary_measure: "OBS_VALUE".into(),
            codelist: vec![],
        };

        let err = extractor
            .extract("http://127.0.0.1:9", "FLOW", &dsd, "")
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::UnsupportedMode(_)));
    }
}
