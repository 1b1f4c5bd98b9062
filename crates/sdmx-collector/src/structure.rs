//! Structural metadata extraction: dataflows, DSDs and codelists
//!
//! The two supported dialects are parallel but not interchangeable:
//!
//! | | 2.1 | legacy (2.0) |
//! |---|---|---|
//! | dataflow -> DSD | `Structure/Ref@id,@agencyID` | `KeyFamilyRef/KeyFamilyID` |
//! | DSD root | `DataStructure` | `KeyFamily` |
//! | component id | `@id` | `@conceptRef` |
//! | codelist ref | `LocalRepresentation/Enumeration/Ref@id,@agencyID` | `@codelist`, `@codelistAgency` |
//! | codelist / code | `Codelist` / `Code@id` + `Name` | `CodeList` / `Code@value` + `Description` |
//!
//! Which one applies is decided by the registration's version tag, never by
//! looking at the document.

use crate::error::{CollectorError, Result};
use crate::fetcher::WireFetcher;
use crate::model::{CodelistEntry, Component, Dataflow, Dsd, StructureRef};
use crate::namespaces::{Logical, NamespaceKind, Namespaces, ProtocolVersion, XML_NS};
use roxmltree::{Document, Node};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Components of a DSD before the mandatory parts are checked
#[derive(Debug, Default)]
struct DsdParts {
    dimensions: Vec<Component>,
    attributes: Vec<Component>,
    time_dimension: Option<String>,
    primary_measure: Option<String>,
}

/// Field paths of one dialect
struct Dialect {
    dataflows: fn(&Document, &Namespaces) -> Result<Vec<Dataflow>>,
    dsd: fn(&Document, &Namespaces) -> Result<DsdParts>,
    codelists: fn(&Document, &Namespaces) -> Vec<CodelistEntry>,
}

static V2_1: Dialect = Dialect {
    dataflows: v21::dataflows,
    dsd: v21::dsd,
    codelists: v21::codelists,
};

static LEGACY: Dialect = Dialect {
    dataflows: legacy::dataflows,
    dsd: legacy::dsd,
    codelists: legacy::codelists,
};

fn dialect(version: ProtocolVersion) -> &'static Dialect {
    match version {
        ProtocolVersion::V2_1 => &V2_1,
        ProtocolVersion::Legacy => &LEGACY,
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: (&str, &str)) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

fn text_of(node: Node) -> Option<String> {
    node.text().map(str::trim).filter(|t| !t.is_empty()).map(str::to_string)
}

/// English variant of a multilingual element, else the first one present.
fn localized(node: Node, name: (&str, &str)) -> Option<String> {
    let candidates: Vec<_> = node.children().filter(|n| n.has_tag_name(name)).collect();
    candidates
        .iter()
        .find(|n| n.attribute((XML_NS, "lang")) == Some("en"))
        .or_else(|| candidates.first())
        .and_then(|n| text_of(*n))
}

mod v21 {
    use super::*;

    /// `Ref` of the codelist enumerating a component. A measure dimension
    /// enumerates a concept scheme instead, which is not a codelist.
    fn enumeration<'a, 'input>(
        node: Node<'a, 'input>,
        ns: &Namespaces,
    ) -> Option<Node<'a, 'input>> {
        node.descendants()
            .find(|n| n.has_tag_name(ns.tag(Logical::Structure, "Enumeration")))
            .and_then(|e| e.children().find(|n| n.has_tag_name("Ref")))
            .filter(|r| r.attribute("class").map_or(true, |c| c == "Codelist"))
    }

    fn component(node: Node, ns: &Namespaces) -> Option<Component> {
        let id = node.attribute("id")?;
        let reference = enumeration(node, ns);
        Some(
            Component::new(id, reference.and_then(|r| r.attribute("id")))
                .owned_by(reference.and_then(|r| r.attribute("agencyID"))),
        )
    }

    pub(super) fn dataflows(doc: &Document, ns: &Namespaces) -> Result<Vec<Dataflow>> {
        doc.descendants()
            .filter(|n| n.has_tag_name(ns.tag(Logical::Structure, "Dataflow")))
            .map(|node| {
                let id = node
                    .attribute("id")
                    .ok_or_else(|| CollectorError::structural("dataflow without id"))?;
                let reference = child(node, ns.tag(Logical::Structure, "Structure"))
                    .and_then(|s| s.children().find(|n| n.has_tag_name("Ref")))
                    .ok_or_else(|| {
                        CollectorError::structural(format!("dataflow {id} has no structure reference"))
                    })?;
                let structure_id = reference.attribute("id").ok_or_else(|| {
                    CollectorError::structural(format!("dataflow {id} references a structure without id"))
                })?;
                let agency_id = reference
                    .attribute("agencyID")
                    .or_else(|| node.attribute("agencyID"))
                    .unwrap_or_default();

                Ok(Dataflow {
                    id: id.to_string(),
                    name: localized(node, ns.tag(Logical::Common, "Name")).unwrap_or_else(|| id.to_string()),
                    structure: StructureRef {
                        id: structure_id.to_string(),
                        agency_id: agency_id.to_string(),
                    },
                })
            })
            .collect()
    }

    pub(super) fn dsd(doc: &Document, ns: &Namespaces) -> Result<DsdParts> {
        let root = doc
            .descendants()
            .find(|n| n.has_tag_name(ns.tag(Logical::Structure, "DataStructure")))
            .ok_or_else(|| CollectorError::structural("no DataStructure in response"))?;

        let find_all = |local: &'static str| {
            root.descendants()
                .filter(move |n| n.has_tag_name(ns.tag(Logical::Structure, local)))
        };

        let dimensions = root
            .descendants()
            .filter(|n| {
                n.has_tag_name(ns.tag(Logical::Structure, "Dimension"))
                    || n.has_tag_name(ns.tag(Logical::Structure, "MeasureDimension"))
            })
            .filter_map(|n| component(n, ns))
            .collect();

        Ok(DsdParts {
            dimensions,
            attributes: find_all("Attribute").filter_map(|n| component(n, ns)).collect(),
            time_dimension: find_all("TimeDimension")
                .find_map(|n| n.attribute("id"))
                .map(str::to_string),
            primary_measure: find_all("PrimaryMeasure")
                .find_map(|n| n.attribute("id"))
                .map(str::to_string),
        })
    }

    pub(super) fn codelists(doc: &Document, ns: &Namespaces) -> Vec<CodelistEntry> {
        let mut entries = Vec::new();
        for list in doc
            .descendants()
            .filter(|n| n.has_tag_name(ns.tag(Logical::Structure, "Codelist")))
        {
            let Some(list_id) = list.attribute("id") else {
                continue;
            };
            for code in list
                .children()
                .filter(|n| n.has_tag_name(ns.tag(Logical::Structure, "Code")))
            {
                if let Some(value) = code.attribute("id") {
                    let label = localized(code, ns.tag(Logical::Common, "Name")).unwrap_or_default();
                    entries.push(CodelistEntry::new(list_id, value, &label));
                }
            }
        }
        entries
    }
}

mod legacy {
    use super::*;

    fn component(node: Node) -> Option<Component> {
        let id = node.attribute("conceptRef")?;
        let codelist = node.attribute("codelist");
        Some(Component::new(id, codelist).owned_by(node.attribute("codelistAgency")))
    }

    pub(super) fn dataflows(doc: &Document, ns: &Namespaces) -> Result<Vec<Dataflow>> {
        doc.descendants()
            .filter(|n| n.has_tag_name(ns.tag(Logical::Structure, "Dataflow")))
            .map(|node| {
                let id = node
                    .attribute("id")
                    .ok_or_else(|| CollectorError::structural("dataflow without id"))?;
                let key_family = child(node, ns.tag(Logical::Structure, "KeyFamilyRef"))
                    .ok_or_else(|| {
                        CollectorError::structural(format!("dataflow {id} has no key family reference"))
                    })?;
                let key_family_id = child(key_family, ns.tag(Logical::Structure, "KeyFamilyID"))
                    .and_then(text_of)
                    .ok_or_else(|| {
                        CollectorError::structural(format!("dataflow {id} has no key family id"))
                    })?;
                let agency_id = child(key_family, ns.tag(Logical::Structure, "KeyFamilyAgencyID"))
                    .and_then(text_of)
                    .or_else(|| node.attribute("agencyID").map(str::to_string))
                    .unwrap_or_default();

                Ok(Dataflow {
                    id: id.to_string(),
                    name: localized(node, ns.tag(Logical::Structure, "Name"))
                        .unwrap_or_else(|| id.to_string()),
                    structure: StructureRef {
                        id: key_family_id,
                        agency_id,
                    },
                })
            })
            .collect()
    }

    pub(super) fn dsd(doc: &Document, ns: &Namespaces) -> Result<DsdParts> {
        let root = doc
            .descendants()
            .find(|n| n.has_tag_name(ns.tag(Logical::Structure, "KeyFamily")))
            .ok_or_else(|| CollectorError::structural("no KeyFamily in response"))?;

        let find_all = |local: &'static str| {
            root.descendants()
                .filter(move |n| n.has_tag_name(ns.tag(Logical::Structure, local)))
        };

        Ok(DsdParts {
            dimensions: find_all("Dimension").filter_map(component).collect(),
            attributes: find_all("Attribute").filter_map(component).collect(),
            time_dimension: find_all("TimeDimension")
                .find_map(|n| n.attribute("conceptRef"))
                .map(str::to_string),
            primary_measure: find_all("PrimaryMeasure")
                .find_map(|n| n.attribute("conceptRef"))
                .map(str::to_string),
        })
    }

    pub(super) fn codelists(doc: &Document, ns: &Namespaces) -> Vec<CodelistEntry> {
        let mut entries = Vec::new();
        for list in doc
            .descendants()
            .filter(|n| n.has_tag_name(ns.tag(Logical::Structure, "CodeList")))
        {
            let Some(list_id) = list.attribute("id") else {
                continue;
            };
            for code in list
                .children()
                .filter(|n| n.has_tag_name(ns.tag(Logical::Structure, "Code")))
            {
                if let Some(value) = code.attribute("value") {
                    let label = localized(code, ns.tag(Logical::Structure, "Description"))
                        .unwrap_or_default();
                    entries.push(CodelistEntry::new(list_id, value, &label));
                }
            }
        }
        entries
    }
}

/// Parse every dataflow in a structure message.
pub fn parse_dataflows(xml: &str, ns: &Namespaces) -> Result<Vec<Dataflow>> {
    let doc = Document::parse(xml)?;
    (dialect(ns.version()).dataflows)(&doc, ns)
}

/// Parse the codelists embedded in a structure message.
pub fn parse_codelists(xml: &str, ns: &Namespaces) -> Result<Vec<CodelistEntry>> {
    let doc = Document::parse(xml)?;
    Ok((dialect(ns.version()).codelists)(&doc, ns))
}

fn parse_dsd(xml: &str, ns: &Namespaces) -> Result<(DsdParts, Vec<CodelistEntry>)> {
    let doc = Document::parse(xml)?;
    let d = dialect(ns.version());
    Ok(((d.dsd)(&doc, ns)?, (d.codelists)(&doc, ns)))
}

fn finish(parts: DsdParts, codelist: Vec<CodelistEntry>, dsd_id: &str) -> Result<Dsd> {
    let time_dimension = parts.time_dimension.ok_or_else(|| {
        CollectorError::structural(format!("DSD {dsd_id} declares no time dimension"))
    })?;
    let primary_measure = parts.primary_measure.ok_or_else(|| {
        CollectorError::structural(format!("DSD {dsd_id} declares no primary measure"))
    })?;

    Ok(Dsd {
        dimensions: parts.dimensions,
        attributes: parts.attributes,
        time_dimension,
        primary_measure,
        codelist,
    })
}

/// Parse a DSD message that embeds all the codelists it needs.
pub fn parse_dsd_with_codelists(xml: &str, ns: &Namespaces, dsd_id: &str) -> Result<Dsd> {
    let (parts, codelist) = parse_dsd(xml, ns)?;
    finish(parts, codelist, dsd_id)
}

/// Fetches and interprets structure messages for one dialect
#[derive(Debug, Clone)]
pub struct StructuralExtractor {
    fetcher: WireFetcher,
    namespaces: Namespaces,
}

impl StructuralExtractor {
    pub fn new(fetcher: WireFetcher, version: ProtocolVersion, agency_id: &str) -> Self {
        Self {
            fetcher,
            namespaces: Namespaces::resolve(version, agency_id, NamespaceKind::Structure),
        }
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    async fn fetch_xml(&self, url: &str, what: &str) -> Result<String> {
        self.fetcher.get(url, None).await?.into_xml(what)
    }

    /// All dataflows published by `agency`
    pub async fn list_dataflows(&self, root_url: &str, agency: &str) -> Result<Vec<Dataflow>> {
        let url = format!("{}/dataflow/{agency}", root_url.trim_end_matches('/'));
        let xml = self.fetch_xml(&url, "dataflow").await?;
        parse_dataflows(&xml, &self.namespaces)
    }

    /// The dataflow `resource_id`, or `None` when the answer does not contain it
    pub async fn get_dataflow(
        &self,
        root_url: &str,
        agency: &str,
        resource_id: &str,
    ) -> Result<Option<Dataflow>> {
        let url = format!("{}/dataflow/{agency}/{resource_id}", root_url.trim_end_matches('/'));
        let xml = self.fetch_xml(&url, "dataflow").await?;
        let flows = parse_dataflows(&xml, &self.namespaces)?;

        Ok(flows.into_iter().find(|f| f.id == resource_id))
    }

    /// Resolve a DSD, fetching referenced codelists one by one when the
    /// structure message does not embed them. Each codelist is fetched from
    /// the agency maintaining it, `agency` when the reference names none.
    pub async fn get_dsd(&self, root_url: &str, agency: &str, dsd_id: &str) -> Result<Dsd> {
        let root_url = root_url.trim_end_matches('/');
        let url = format!("{root_url}/datastructure/{agency}/{dsd_id}");
        let xml = self.fetch_xml(&url, "datastructure").await?;
        let (parts, mut codelist) = parse_dsd(&xml, &self.namespaces)?;

        if codelist.is_empty() {
            let referenced: BTreeSet<(&str, &str)> = parts
                .dimensions
                .iter()
                .chain(&parts.attributes)
                .filter_map(|c| {
                    let owner = c.codelist_agency.as_deref().unwrap_or(agency);
                    c.codelist.as_deref().map(|list_id| (owner, list_id))
                })
                .collect();

            debug!(dsd_id, count = referenced.len(), "DSD embeds no codelists, fetching individually");

            for (owner, list_id) in referenced {
                let url = format!("{root_url}/codelist/{owner}/{list_id}");
                let xml = self.fetch_xml(&url, "codelist").await?;
                codelist.extend(parse_codelists(&xml, &self.namespaces)?);
            }
        }

        let dsd = finish(parts, codelist, dsd_id)?;
        info!(
            dsd_id,
            dimensions = dsd.dimensions.len(),
            attributes = dsd.attributes.len(),
            codes = dsd.codelist.len(),
            "Resolved data structure"
        );
        Ok(dsd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(version: ProtocolVersion) -> Namespaces {
        Namespaces::resolve(version, "TEST", NamespaceKind::Structure)
    }

    const V21_DATAFLOW: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<mes:Structure xmlns:mes="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message"
               xmlns:str="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/structure"
               xmlns:com="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/common">
  <mes:Structures>
    <str:Dataflows>
      <str:Dataflow id="FLOW" agencyID="TEST" version="1.0">
        <com:Name xml:lang="fr">Flux</com:Name>
        <com:Name xml:lang="en">Flow</com:Name>
        <str:Structure><Ref id="DSD_FLOW" agencyID="OTHER" class="DataStructure"/></str:Structure>
      </str:Dataflow>
    </str:Dataflows>
  </mes:Structures>
</mes:Structure>"#;

    #[test]
    fn test_v21_dataflow() {
        let flows = parse_dataflows(V21_DATAFLOW, &ns(ProtocolVersion::V2_1)).unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].id, "FLOW");
        assert_eq!(flows[0].name, "Flow");
        assert_eq!(flows[0].structure.id, "DSD_FLOW");
        assert_eq!(flows[0].structure.agency_id, "OTHER");
    }

    #[test]
    fn test_v21_dataflow_without_structure_fails() {
        let xml = V21_DATAFLOW.replace(
            r#"<str:Structure><Ref id="DSD_FLOW" agencyID="OTHER" class="DataStructure"/></str:Structure>"#,
            "",
        );
        assert!(matches!(
            parse_dataflows(&xml, &ns(ProtocolVersion::V2_1)),
            Err(CollectorError::Structural(_))
        ));
    }

    #[test]
    fn test_dialect_is_chosen_by_tag() {
        // A 2.1 document read with the legacy dialect finds nothing it knows.
        let flows = parse_dataflows(V21_DATAFLOW, &ns(ProtocolVersion::Legacy)).unwrap();
        assert!(flows.is_empty());
    }

    const V21_DSD: &str = r#"<mes:Structure xmlns:mes="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message"
               xmlns:str="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/structure"
               xmlns:com="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/common">
  <mes:Structures>
    <str:Codelists>
      <str:Codelist id="CL_AGE"><str:Code id="00"><com:Name xml:lang="en">All</com:Name></str:Code></str:Codelist>
    </str:Codelists>
    <str:DataStructures>
      <str:DataStructure id="DSD">
        <str:DataStructureComponents>
          <str:DimensionList>
            <str:Dimension id="AGE"><str:LocalRepresentation><str:Enumeration><Ref id="CL_AGE"/></str:Enumeration></str:LocalRepresentation></str:Dimension>
            <str:TimeDimension id="TIME_PERIOD"/>
          </str:DimensionList>
          <str:AttributeList><str:Attribute id="COMMENT"/></str:AttributeList>
          <str:MeasureList><str:PrimaryMeasure id="OBS_VALUE"/></str:MeasureList>
        </str:DataStructureComponents>
      </str:DataStructure>
    </str:DataStructures>
  </mes:Structures>
</mes:Structure>"#;

    #[test]
    fn test_v21_dsd_with_embedded_codelist() {
        let dsd = parse_dsd_with_codelists(V21_DSD, &ns(ProtocolVersion::V2_1), "DSD").unwrap();
        assert_eq!(dsd.dimensions, vec![Component::new("AGE", Some("CL_AGE"))]);
        assert_eq!(dsd.attributes, vec![Component::new("COMMENT", None)]);
        assert_eq!(dsd.time_dimension, "TIME_PERIOD");
        assert_eq!(dsd.primary_measure, "OBS_VALUE");
        assert_eq!(dsd.codelist, vec![CodelistEntry::new("CL_AGE", "00", "All")]);
    }

    #[test]
    fn test_v21_codelist_ref_keeps_agency() {
        let xml = V21_DSD.replace(
            r#"<Ref id="CL_AGE"/>"#,
            r#"<Ref id="CL_AGE" agencyID="SDMX" class="Codelist"/>"#,
        );
        let dsd = parse_dsd_with_codelists(&xml, &ns(ProtocolVersion::V2_1), "DSD").unwrap();
        assert_eq!(
            dsd.dimensions,
            vec![Component::new("AGE", Some("CL_AGE")).owned_by(Some("SDMX"))]
        );
    }

    #[test]
    fn test_v21_measure_dimension_keeps_its_position() {
        let xml = V21_DSD.replace(
            r#"<str:TimeDimension id="TIME_PERIOD"/>"#,
            r#"<str:MeasureDimension id="MEASURE"><str:LocalRepresentation><str:Enumeration><Ref id="CS_MEASURES" agencyID="TEST" class="ConceptScheme"/></str:Enumeration></str:LocalRepresentation></str:MeasureDimension>
            <str:Dimension id="UNIT"/>
            <str:TimeDimension id="TIME_PERIOD"/>"#,
        );
        let dsd = parse_dsd_with_codelists(&xml, &ns(ProtocolVersion::V2_1), "DSD").unwrap();
        let ids: Vec<_> = dsd.dimensions.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["AGE", "MEASURE", "UNIT"]);
        // A concept scheme is not a codelist
        assert_eq!(dsd.dimensions[1], Component::new("MEASURE", None));

        let keys = std::collections::BTreeMap::from([("UNIT".to_string(), "PC".to_string())]);
        assert_eq!(crate::query::build_query(&dsd.dimensions, &keys), "..PC");
    }

    #[test]
    fn test_missing_primary_measure_is_fatal() {
        let xml = V21_DSD.replace(r#"<str:PrimaryMeasure id="OBS_VALUE"/>"#, "");
        let err = parse_dsd_with_codelists(&xml, &ns(ProtocolVersion::V2_1), "DSD").unwrap_err();
        assert!(err.to_string().contains("primary measure"));
    }

    #[test]
    fn test_missing_time_dimension_is_fatal() {
        let xml = V21_DSD.replace(r#"<str:TimeDimension id="TIME_PERIOD"/>"#, "");
        let err = parse_dsd_with_codelists(&xml, &ns(ProtocolVersion::V2_1), "DSD").unwrap_err();
        assert!(err.to_string().contains("time dimension"));
    }

    const LEGACY_DSD: &str = r#"<Structure xmlns="http://www.SDMX.org/resources/SDMXML/schemas/v2_0/message"
           xmlns:structure="http://www.SDMX.org/resources/SDMXML/schemas/v2_0/structure">
  <CodeLists>
    <structure:CodeList id="CL_SEX" agencyID="ILO">
      <structure:Code value="SEX_T"><structure:Description xml:lang="en">Total</structure:Description></structure:Code>
      <structure:Code value="SEX_F"><structure:Description xml:lang="en">Female</structure:Description></structure:Code>
    </structure:CodeList>
  </CodeLists>
  <KeyFamilies>
    <structure:KeyFamily id="KF" agencyID="ILO">
      <structure:Components>
        <structure:Dimension conceptRef="SEX" codelist="CL_SEX" codelistAgency="ILO"/>
        <structure:TimeDimension conceptRef="TIME_PERIOD"/>
        <structure:PrimaryMeasure conceptRef="OBS_VALUE"/>
        <structure:Attribute conceptRef="OBS_STATUS" attachmentLevel="Observation"/>
      </structure:Components>
    </structure:KeyFamily>
  </KeyFamilies>
</Structure>"#;

    #[test]
    fn test_legacy_dsd_uses_value_for_codes() {
        let dsd = parse_dsd_with_codelists(LEGACY_DSD, &ns(ProtocolVersion::Legacy), "KF").unwrap();
        assert_eq!(
            dsd.dimensions,
            vec![Component::new("SEX", Some("CL_SEX")).owned_by(Some("ILO"))]
        );
        assert_eq!(dsd.attributes, vec![Component::new("OBS_STATUS", None)]);
        assert_eq!(dsd.time_dimension, "TIME_PERIOD");
        let codes: Vec<_> = dsd.codes("CL_SEX").map(|c| (c.code.as_str(), c.label.as_str())).collect();
        assert_eq!(codes, vec![("SEX_T", "Total"), ("SEX_F", "Female")]);
    }

    #[test]
    fn test_legacy_dsd_missing_key_family() {
        let err = parse_dsd_with_codelists(V21_DSD, &ns(ProtocolVersion::Legacy), "KF").unwrap_err();
        assert!(matches!(err, CollectorError::Structural(_)));
    }
}
