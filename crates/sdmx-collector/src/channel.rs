//! Topic-based publish channels

use crate::error::{CollectorError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

/// Published datasets, one per source per cycle
pub const TOPIC_ALL_INPUTS: &str = "all_inputs";
/// Registration and load notifications
pub const TOPIC_ALL_NOTIFICATIONS: &str = "all_notifications";
/// Inbound load acknowledgments
pub const TOPIC_INPUT_LOADED: &str = "input_loaded";
/// Inbound source configuration events
pub const TOPIC_INPUT_CONFIG: &str = "input_config";

/// Publish side of the message bus
#[async_trait]
pub trait Channel: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// Keeps every published message in memory
#[derive(Debug, Default)]
pub struct MemoryChannel {
    messages: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages published so far, in order
    pub async fn messages(&self) -> Vec<(String, Vec<u8>)> {
        self.messages.lock().await.clone()
    }

    /// Messages of one topic decoded as JSON
    pub async fn json(&self, topic: &str) -> Result<Vec<serde_json::Value>> {
        self.messages
            .lock()
            .await
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| Ok(serde_json::from_slice(payload)?))
            .collect()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.messages.lock().await.push((topic.to_string(), payload));
        Ok(())
    }
}

/// POSTs each message to `{bus_url}/{topic}`
#[derive(Debug, Clone)]
pub struct HttpChannel {
    client: Client,
    bus_url: String,
}

impl HttpChannel {
    pub fn new(bus_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            bus_url: bus_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Channel for HttpChannel {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let url = format!("{}/{topic}", self.bus_url);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollectorError::Channel(format!(
                "publish to {url} failed with status {status}: {body}"
            )));
        }
        Ok(())
    }
}

/// Logs a one-line summary of each message and drops it
#[derive(Debug, Clone, Copy, Default)]
pub struct LogChannel;

#[async_trait]
impl Channel for LogChannel {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        info!(topic, bytes = payload.len(), "Message published");
        Ok(())
    }
}
