//! Persisted source registrations
//!
//! Registrations are keyed by `(agency, resource)`; `id` is a secondary
//! index derived from that pair. Only `last_checksum` changes after
//! creation, and only through [`RegistryStore::commit_checksum`].

use crate::error::{CollectorError, Result};
use crate::namespaces::{MessageKind, ProtocolVersion};
use async_trait::async_trait;
use sdmx_common::ident::table_name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Connection parameters of one SDMX feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRegistration {
    pub agency: String,
    pub resource: String,
    pub id: String,
    pub version: ProtocolVersion,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub keys: BTreeMap<String, String>,
    pub root_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checksum: Option<String>,
}

impl SourceRegistration {
    pub fn new(
        root_url: &str,
        agency: &str,
        resource: &str,
        version: ProtocolVersion,
        kind: MessageKind,
        keys: BTreeMap<String, String>,
    ) -> Self {
        Self {
            agency: agency.to_string(),
            resource: resource.to_string(),
            id: table_name(agency, resource),
            version,
            kind,
            keys,
            root_url: root_url.to_string(),
            last_checksum: None,
        }
    }

    fn same_source(&self, other: &SourceRegistration) -> bool {
        self.agency == other.agency && self.resource == other.resource
    }
}

/// Document store holding registrations
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn get(&self, agency: &str, resource: &str) -> Result<Option<SourceRegistration>>;

    async fn find(&self, id: &str) -> Result<Option<SourceRegistration>>;

    async fn list(&self) -> Result<Vec<SourceRegistration>>;

    /// Insert, or replace the connection parameters of an existing entry
    /// while keeping its committed checksum.
    async fn upsert(&self, registration: SourceRegistration) -> Result<()>;

    /// Record `checksum` as committed for `id`. Returns `false` when no
    /// registration has that id.
    async fn commit_checksum(&self, id: &str, checksum: &str) -> Result<bool>;
}

fn apply_upsert(entries: &mut Vec<SourceRegistration>, mut registration: SourceRegistration) {
    match entries.iter_mut().find(|e| e.same_source(&registration)) {
        Some(existing) => {
            registration.last_checksum = existing.last_checksum.take();
            *existing = registration;
        },
        None => entries.push(registration),
    }
}

fn apply_commit(entries: &mut [SourceRegistration], id: &str, checksum: &str) -> bool {
    let mut found = false;
    for entry in entries.iter_mut().filter(|e| e.id == id) {
        entry.last_checksum = Some(checksum.to_string());
        found = true;
    }
    found
}

/// Process-local registry
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    entries: RwLock<Vec<SourceRegistration>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistry {
    async fn get(&self, agency: &str, resource: &str) -> Result<Option<SourceRegistration>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .find(|e| e.agency == agency && e.resource == resource)
            .cloned())
    }

    async fn find(&self, id: &str) -> Result<Option<SourceRegistration>> {
        Ok(self.entries.read().await.iter().find(|e| e.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<SourceRegistration>> {
        Ok(self.entries.read().await.clone())
    }

    async fn upsert(&self, registration: SourceRegistration) -> Result<()> {
        apply_upsert(&mut *self.entries.write().await, registration);
        Ok(())
    }

    async fn commit_checksum(&self, id: &str, checksum: &str) -> Result<bool> {
        Ok(apply_commit(&mut self.entries.write().await, id, checksum))
    }
}

/// Registry persisted as one JSON document.
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename; writers are serialized by an internal lock.
#[derive(Debug)]
pub struct JsonFileRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<SourceRegistration>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                CollectorError::Store(format!("corrupt registry {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, entries: &[SourceRegistration]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(entries)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), entries = entries.len(), "Saved registry");
        Ok(())
    }
}

#[async_trait]
impl RegistryStore for JsonFileRegistry {
    async fn get(&self, agency: &str, resource: &str) -> Result<Option<SourceRegistration>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .load()
            .await?
            .into_iter()
            .find(|e| e.agency == agency && e.resource == resource))
    }

    async fn find(&self, id: &str) -> Result<Option<SourceRegistration>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.into_iter().find(|e| e.id == id))
    }

    async fn list(&self) -> Result<Vec<SourceRegistration>> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    async fn upsert(&self, registration: SourceRegistration) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        apply_upsert(&mut entries, registration);
        self.save(&entries).await
    }

    async fn commit_checksum(&self, id: &str, checksum: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        if !apply_commit(&mut entries, id, checksum) {
            return Ok(false);
        }
        self.save(&entries).await?;
        Ok(true)
    }
}
