//! Ingestion orchestrator
//!
//! Registers feeds, runs poll cycles over every registration, publishes one
//! dataset per feed, and commits checksums once the loader acknowledges
//! them. Checksums are never committed at publish time.

use crate::change::ChangeDetector;
use crate::channel::{Channel, TOPIC_ALL_INPUTS, TOPIC_ALL_NOTIFICATIONS};
use crate::error::{CollectorError, Result};
use crate::fetcher::WireFetcher;
use crate::messages::{
    ConfigEvent, DatastoreEntry, Entity, LoadAck, Meta, Notification, PublishedDataset,
    Referential, SOURCE_TAG,
};
use crate::namespaces::{MessageKind, ProtocolVersion};
use crate::registry::{RegistryStore, SourceRegistration};
use crate::schema::derive_schema;
use crate::source::SdmxSource;
use futures::stream::{self, StreamExt};
use sdmx_common::checksum::ChecksumMode;
use sdmx_common::ident::clean;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

const NEW_FEED_NOTICE: &str = "A new SDMX feed has been added.";

/// Tuning knobs of the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Rows per loader chunk
    pub chunk_size: usize,
    /// Sources processed concurrently within a cycle
    pub max_concurrent_sources: usize,
    pub checksum_mode: ChecksumMode,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            max_concurrent_sources: 1,
            checksum_mode: ChecksumMode::Ordered,
        }
    }
}

/// Outcome of one poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub published: usize,
    pub failed: usize,
    /// The cycle did not run because another one was in progress
    pub skipped: bool,
}

pub struct IngestionOrchestrator {
    fetcher: WireFetcher,
    registry: Arc<dyn RegistryStore>,
    channel: Arc<dyn Channel>,
    detector: ChangeDetector,
    options: OrchestratorOptions,
    cycle: Mutex<()>,
    pending: Mutex<BTreeMap<String, String>>,
}

impl IngestionOrchestrator {
    pub fn new(
        fetcher: WireFetcher,
        registry: Arc<dyn RegistryStore>,
        channel: Arc<dyn Channel>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            fetcher,
            registry,
            channel,
            detector: ChangeDetector::new(options.checksum_mode),
            options,
            cycle: Mutex::new(()),
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<dyn RegistryStore> {
        &self.registry
    }

    /// Validate a feed with one dataflow lookup and store it.
    ///
    /// Nothing is persisted when the lookup fails. Returns the source id.
    #[instrument(skip(self, keys))]
    pub async fn register(
        &self,
        root_url: &str,
        agency: &str,
        resource: &str,
        version: ProtocolVersion,
        kind: MessageKind,
        keys: BTreeMap<String, String>,
    ) -> Result<String> {
        let source = SdmxSource::new(self.fetcher.clone(), root_url, agency, version, kind);

        let resolved = match source.dataflow(resource).await {
            Ok(Some(flow)) => Ok(flow),
            Ok(None) => Err(CollectorError::structural(format!(
                "dataflow {resource} not found"
            ))),
            Err(e) => Err(e),
        };
        let dataflow = resolved.map_err(|e| CollectorError::Registration {
            agency: agency.to_string(),
            resource: resource.to_string(),
            source: Box::new(e),
        })?;

        let registration = SourceRegistration::new(root_url, agency, resource, version, kind, keys);
        let id = registration.id.clone();
        self.registry.upsert(registration).await?;

        info!(source_id = %id, name = %dataflow.name, "Registered SDMX feed");
        Ok(id)
    }

    /// Fetch, normalize and classify one registration's current content.
    pub async fn build_dataset(&self, registration: &SourceRegistration) -> Result<PublishedDataset> {
        let source = SdmxSource::new(
            self.fetcher.clone(),
            &registration.root_url,
            &registration.agency,
            registration.version,
            registration.kind,
        );
        let sdmx = source.get_sdmx(&registration.resource, &registration.keys).await?;

        let schema = derive_schema(&sdmx.dsd, &registration.id, &sdmx.query, self.options.chunk_size);
        let records = sdmx
            .observations
            .map(|record| record.map(|r| schema.coerce_record(&r, &sdmx.query)))
            .collect::<Result<Vec<Map<String, Value>>>>()?;

        let (checksum, status) = self
            .detector
            .detect(registration.last_checksum.as_deref(), &records)?;

        info!(
            source_id = %registration.id,
            records = records.len(),
            status = %status,
            checksum = %checksum,
            "Built dataset"
        );

        Ok(PublishedDataset {
            referential: Referential {
                entities: vec![Entity::dataset(&registration.id, &sdmx.dataflow.name)],
            },
            datastore: vec![DatastoreEntry { schema, records }],
            checksum,
            id: registration.id.clone(),
            status,
            meta: Meta {
                kind: clean(&registration.agency).to_lowercase(),
                source: SOURCE_TAG.to_string(),
            },
        })
    }

    async fn poll_source(&self, registration: &SourceRegistration) -> Result<()> {
        info!(
            agency = %registration.agency,
            resource = %registration.resource,
            "Downloading dataset"
        );
        let dataset = self.build_dataset(registration).await?;
        let payload = serde_json::to_vec(&dataset)?;

        // Recorded before publishing: the ack may arrive before `publish` returns
        let previous = self
            .pending
            .lock()
            .await
            .insert(dataset.id.clone(), dataset.checksum.clone());

        if let Err(e) = self.channel.publish(TOPIC_ALL_INPUTS, payload).await {
            let mut pending = self.pending.lock().await;
            if pending.get(&dataset.id) == Some(&dataset.checksum) {
                match previous {
                    Some(checksum) => pending.insert(dataset.id.clone(), checksum),
                    None => pending.remove(&dataset.id),
                };
            }
            return Err(e);
        }

        info!(source_id = %dataset.id, status = %dataset.status, "Published dataset");
        Ok(())
    }

    async fn run_cycle(&self) -> Result<PollSummary> {
        let registrations = self.registry.list().await?;
        info!(sources = registrations.len(), "Starting poll cycle");

        let outcomes: Vec<_> = stream::iter(registrations)
            .map(|registration| async move {
                let outcome = self.poll_source(&registration).await;
                (registration, outcome)
            })
            .buffer_unordered(self.options.max_concurrent_sources.max(1))
            .collect()
            .await;

        let mut summary = PollSummary::default();
        for (registration, outcome) in outcomes {
            match outcome {
                Ok(()) => summary.published += 1,
                Err(e) => {
                    error!(
                        agency = %registration.agency,
                        resource = %registration.resource,
                        error = %e,
                        "Cannot handle dataset"
                    );
                    summary.failed += 1;
                },
            }
        }

        info!(published = summary.published, failed = summary.failed, "Poll cycle completed");
        Ok(summary)
    }

    /// Run one cycle over every registration, unless a cycle is already
    /// running, in which case this one is skipped.
    ///
    /// A source that fails is logged and counted; the others still publish.
    #[instrument(skip(self))]
    pub async fn poll_all(&self) -> Result<PollSummary> {
        let Ok(_guard) = self.cycle.try_lock() else {
            warn!("Previous poll cycle still running, skipping");
            return Ok(PollSummary {
                skipped: true,
                ..PollSummary::default()
            });
        };
        self.run_cycle().await
    }

    /// Run one cycle, waiting for a running one to finish first.
    pub async fn poll_all_after_current(&self) -> Result<PollSummary> {
        let _guard = self.cycle.lock().await;
        self.run_cycle().await
    }

    /// Published checksums not yet acknowledged, by source id
    pub async fn pending_acks(&self) -> BTreeMap<String, String> {
        self.pending.lock().await.clone()
    }

    /// Commit the acknowledged checksum and notify.
    ///
    /// Returns `false` when the message is not ours, incomplete, or names an
    /// unknown source.
    #[instrument(skip(self, ack), fields(source_id = ack.id.as_deref().unwrap_or_default()))]
    pub async fn on_load_ack(&self, ack: LoadAck) -> Result<bool> {
        let Some(meta) = ack.meta.filter(|m| m.is_ours()) else {
            return Ok(false);
        };
        let Some(checksum) = ack.checksum.filter(|c| !c.is_empty()) else {
            return Ok(false);
        };
        let Some(id) = ack.id else {
            warn!("Acknowledgment without id, ignoring");
            return Ok(false);
        };

        if let Some(pending) = self.pending.lock().await.remove(&id) {
            if pending != checksum {
                warn!(pending = %pending, acked = %checksum, "Acknowledged checksum differs from last published one");
            }
        }

        info!(checksum = %checksum, "Acknowledging dataset");
        if !self.registry.commit_checksum(&id, &checksum).await? {
            warn!("Acknowledgment for unknown source, ignoring");
            return Ok(false);
        }

        let notification = Notification {
            content: id.clone(),
            id,
            source: SOURCE_TAG.to_string(),
            kind: meta.kind.unwrap_or_default(),
        };
        self.channel
            .publish(TOPIC_ALL_NOTIFICATIONS, serde_json::to_vec(&notification)?)
            .await?;
        Ok(true)
    }

    /// Register the feed described by a config event, notify, and poll.
    ///
    /// Events from other sources or with missing fields are dropped and
    /// yield `None`.
    #[instrument(skip(self, event))]
    pub async fn on_config_added(&self, event: ConfigEvent) -> Result<Option<String>> {
        if !event.meta.as_ref().is_some_and(|m| m.is_ours()) {
            return Ok(None);
        }
        info!("Received a related input config");

        let Some(config) = event.config else {
            warn!("No config within the message, ignoring");
            return Ok(None);
        };
        let (Some(root_url), Some(agency), Some(resource), Some(version)) =
            (config.root_url, config.agency, config.resource, config.version)
        else {
            warn!("One of root_url, agency, resource or version is missing within config, ignoring");
            return Ok(None);
        };

        let version = match version.parse::<ProtocolVersion>() {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Invalid version within config, ignoring");
                return Ok(None);
            },
        };
        let kind = match config.kind.as_deref().map(str::parse::<MessageKind>).transpose() {
            Ok(kind) => kind.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Invalid kind within config, ignoring");
                return Ok(None);
            },
        };

        let id = self
            .register(&root_url, &agency, &resource, version, kind, config.keys)
            .await?;

        let notification = Notification {
            id: id.clone(),
            source: SOURCE_TAG.to_string(),
            kind: String::new(),
            content: NEW_FEED_NOTICE.to_string(),
        };
        self.channel
            .publish(TOPIC_ALL_NOTIFICATIONS, serde_json::to_vec(&notification)?)
            .await?;

        let summary = self.poll_all_after_current().await?;
        info!(source_id = %id, published = summary.published, failed = summary.failed, "Polled after registration");
        Ok(Some(id))
    }
}
