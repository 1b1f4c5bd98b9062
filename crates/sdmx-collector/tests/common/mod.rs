//! Shared helpers for collector integration tests

#![allow(dead_code)]

use sdmx_collector::channel::MemoryChannel;
use sdmx_collector::fetcher::{FetchConfig, WireFetcher};
use sdmx_collector::orchestrator::{IngestionOrchestrator, OrchestratorOptions};
use sdmx_collector::registry::MemoryRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const STRUCTURE_CT: &str = "application/vnd.sdmx.structure+xml; version=2.1";
pub const DATA_CT: &str = "application/vnd.sdmx.structurespecificdata+xml; version=2.1";

pub fn fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("fixture {}: {e}", path.display()))
}

pub fn xml(body: impl Into<Vec<u8>>, content_type: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.into(), content_type)
}

/// Mount `fixture` on GET `route`, expecting exactly `times` calls.
pub async fn serve(server: &MockServer, route: &str, fixture_name: &str, content_type: &str, times: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(xml(fixture(fixture_name), content_type))
        .expect(times)
        .mount(server)
        .await;
}

/// Mount the INSEE (FR1) 2.1 structure messages.
pub async fn mount_fr1_structure(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/dataflow/FR1/CHOMAGE-TRIM-NATIONAL"))
        .respond_with(xml(fixture("fr1_dataflow.xml"), STRUCTURE_CT))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/datastructure/FR1/CHOMAGE-TRIM-NATIONAL"))
        .respond_with(xml(fixture("fr1_datastructure.xml"), STRUCTURE_CT))
        .mount(server)
        .await;
}

pub fn fetcher() -> WireFetcher {
    WireFetcher::new(&FetchConfig {
        timeout: Duration::from_secs(5),
        ..FetchConfig::default()
    })
    .unwrap()
}

pub struct Harness {
    pub orchestrator: IngestionOrchestrator,
    pub registry: Arc<MemoryRegistry>,
    pub channel: Arc<MemoryChannel>,
}

pub fn harness(options: OrchestratorOptions) -> Harness {
    let registry = Arc::new(MemoryRegistry::new());
    let channel = Arc::new(MemoryChannel::new());
    let orchestrator =
        IngestionOrchestrator::new(fetcher(), registry.clone(), channel.clone(), options);
    Harness {
        orchestrator,
        registry,
        channel,
    }
}
