//! SDMX Collector Library
//!
//! Polls statistical data sources published under SDMX, normalizes their
//! structure and observations into tables, detects content changes, and
//! publishes datasets to a message bus. Checksums are committed only when
//! the downstream loader acknowledges a dataset.
//!
//! # Supported Dialects
//!
//! - **SDMX-ML 2.1**: `Dataflow` / `DataStructure` / `Codelist`
//! - **Legacy (2.0)**: `KeyFamily` / `CodeList`, as served by the old ILOSTAT API
//!
//! Only structure-specific data messages are read.
//!
//! # Example
//!
//! ```no_run
//! use sdmx_collector::channel::LogChannel;
//! use sdmx_collector::fetcher::{FetchConfig, WireFetcher};
//! use sdmx_collector::namespaces::{MessageKind, ProtocolVersion};
//! use sdmx_collector::orchestrator::{IngestionOrchestrator, OrchestratorOptions};
//! use sdmx_collector::registry::MemoryRegistry;
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> sdmx_collector::Result<()> {
//!     let orchestrator = IngestionOrchestrator::new(
//!         WireFetcher::new(&FetchConfig::default())?,
//!         Arc::new(MemoryRegistry::new()),
//!         Arc::new(LogChannel),
//!         OrchestratorOptions::default(),
//!     );
//!
//!     orchestrator
//!         .register(
//!             "https://bdm.insee.fr/series/sdmx",
//!             "FR1",
//!             "CHOMAGE-TRIM-NATIONAL",
//!             ProtocolVersion::V2_1,
//!             MessageKind::Specific,
//!             BTreeMap::new(),
//!         )
//!         .await?;
//!     orchestrator.poll_all().await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod change;
pub mod channel;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod messages;
pub mod model;
pub mod namespaces;
pub mod observations;
pub mod orchestrator;
pub mod query;
pub mod registry;
pub mod scheduler;
pub mod schema;
pub mod source;
pub mod structure;

pub use error::{CollectorError, Result};
