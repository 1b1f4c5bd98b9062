//! Timer and inbound-event driver around the orchestrator

use crate::channel::{TOPIC_INPUT_CONFIG, TOPIC_INPUT_LOADED};
use crate::error::Result;
use crate::messages::{ConfigEvent, LoadAck};
use crate::orchestrator::IngestionOrchestrator;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// A message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Route one inbound message to its handler.
pub async fn dispatch(orchestrator: &IngestionOrchestrator, event: &InboundEvent) -> Result<()> {
    match event.topic.as_str() {
        TOPIC_INPUT_LOADED => {
            let ack: LoadAck = serde_json::from_slice(&event.payload)?;
            orchestrator.on_load_ack(ack).await?;
        },
        TOPIC_INPUT_CONFIG => {
            let config: ConfigEvent = serde_json::from_slice(&event.payload)?;
            orchestrator.on_config_added(config).await?;
        },
        other => debug!(topic = other, "No handler for topic, ignoring"),
    }
    Ok(())
}

#[derive(Deserialize)]
struct Line {
    topic: String,
    payload: serde_json::Value,
}

/// Forward `{"topic": ..., "payload": {...}}` lines from `reader` as events.
///
/// Malformed lines are logged and skipped. Returns when the reader is
/// exhausted or the receiver is gone.
pub async fn forward_lines<R>(reader: R, events: mpsc::Sender<InboundEvent>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let parsed: Line = match serde_json::from_str(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Malformed event line, skipping");
                continue;
            },
        };
        let event = InboundEvent {
            topic: parsed.topic,
            payload: serde_json::to_vec(&parsed.payload)?,
        };
        if events.send(event).await.is_err() {
            break;
        }
    }
    Ok(())
}

/// Runs poll cycles on a fixed interval and handles inbound events
pub struct PollScheduler {
    orchestrator: Arc<IngestionOrchestrator>,
    interval: Duration,
}

impl PollScheduler {
    pub fn new(orchestrator: Arc<IngestionOrchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    fn spawn_cycle(&self) {
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            match orchestrator.poll_all().await {
                Ok(summary) if summary.skipped => {},
                Ok(summary) => info!(
                    published = summary.published,
                    failed = summary.failed,
                    "Scheduled poll finished"
                ),
                Err(e) => error!(error = %e, "Scheduled poll failed"),
            }
        });
    }

    /// Drive the orchestrator until `shutdown` resolves.
    ///
    /// The first tick fires one interval after start. Cycles run in the
    /// background; a tick that lands while a cycle is running is skipped.
    /// Events are handled one at a time, in arrival order.
    pub async fn run<F>(self, mut events: mpsc::Receiver<InboundEvent>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut events_open = true;
        info!(interval_secs = self.interval.as_secs(), "Scheduler started");

        loop {
            tokio::select! {
                biased;

                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        if let Err(e) = dispatch(&self.orchestrator, &event).await {
                            error!(topic = %event.topic, error = %e, "Cannot handle event");
                        }
                    },
                    None => {
                        debug!("Event stream closed");
                        events_open = false;
                    },
                },
                _ = ticker.tick() => self.spawn_cycle(),
                () = &mut shutdown => {
                    info!("Scheduler stopping");
                    return Ok(());
                },
            }
        }
    }
}
