//! One SDMX session: dataflow -> DSD -> query -> observations

use crate::error::{CollectorError, Result};
use crate::fetcher::WireFetcher;
use crate::model::{Dataflow, Dsd};
use crate::namespaces::{MessageKind, ProtocolVersion};
use crate::observations::{ObservationExtractor, Observations};
use crate::query::build_query;
use crate::structure::StructuralExtractor;
use std::collections::BTreeMap;
use tracing::info;

/// Everything fetched for one registered source in one cycle
#[derive(Debug)]
pub struct SdmxDataset {
    pub dataflow: Dataflow,
    pub dsd: Dsd,
    pub query: String,
    pub observations: Observations,
}

/// Facade over the structural and observation extractors for one
/// `(root_url, agency)` pair
#[derive(Debug, Clone)]
pub struct SdmxSource {
    root_url: String,
    agency_id: String,
    structure: StructuralExtractor,
    data: ObservationExtractor,
}

impl SdmxSource {
    pub fn new(
        fetcher: WireFetcher,
        root_url: &str,
        agency_id: &str,
        version: ProtocolVersion,
        kind: MessageKind,
    ) -> Self {
        Self {
            root_url: root_url.trim_end_matches('/').to_string(),
            agency_id: agency_id.to_string(),
            structure: StructuralExtractor::new(fetcher.clone(), version, agency_id),
            data: ObservationExtractor::new(fetcher, version, agency_id, kind),
        }
    }

    pub async fn dataflows(&self) -> Result<Vec<Dataflow>> {
        self.structure.list_dataflows(&self.root_url, &self.agency_id).await
    }

    pub async fn dataflow(&self, resource_id: &str) -> Result<Option<Dataflow>> {
        self.structure
            .get_dataflow(&self.root_url, &self.agency_id, resource_id)
            .await
    }

    /// Resolve the dataflow and its DSD, then fetch the observations
    /// selected by `keys`.
    pub async fn get_sdmx(
        &self,
        resource_id: &str,
        keys: &BTreeMap<String, String>,
    ) -> Result<SdmxDataset> {
        let dataflow = self.dataflow(resource_id).await?.ok_or_else(|| {
            CollectorError::structural(format!(
                "dataflow {resource_id} not found at {}",
                self.root_url
            ))
        })?;

        let dsd_agency = match dataflow.structure.agency_id.as_str() {
            "" => self.agency_id.as_str(),
            agency => agency,
        };
        let dsd = self
            .structure
            .get_dsd(&self.root_url, dsd_agency, &dataflow.structure.id)
            .await?;

        let query = build_query(&dsd.dimensions, keys);
        info!(resource_id, query = %query, "Fetching observations");

        let observations = self
            .data
            .extract(&self.root_url, resource_id, &dsd, &query)
            .await?;

        Ok(SdmxDataset {
            dataflow,
            dsd,
            query,
            observations,
        })
    }
}
