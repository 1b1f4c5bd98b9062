//! SDMX Collector - feed polling service and operator CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sdmx_collector::channel::{Channel, HttpChannel, LogChannel};
use sdmx_collector::config::CollectorConfig;
use sdmx_collector::fetcher::WireFetcher;
use sdmx_collector::messages::{InboundMeta, LoadAck, SOURCE_TAG};
use sdmx_collector::namespaces::{MessageKind, ProtocolVersion};
use sdmx_collector::orchestrator::IngestionOrchestrator;
use sdmx_collector::registry::{JsonFileRegistry, MemoryRegistry, RegistryStore};
use sdmx_collector::scheduler::{forward_lines, PollScheduler};
use sdmx_collector::source::SdmxSource;
use sdmx_common::logging::{init_logging, LogConfig, LogLevel};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "sdmx-collector")]
#[command(author, version, about = "SDMX feed collector")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll on a timer and handle events read as JSON lines on stdin
    Serve,

    /// Run one poll cycle over every registered feed
    Poll,

    /// Validate and register a feed
    Register {
        /// Root URL of the SDMX web service
        #[arg(long)]
        root_url: String,

        /// Agency id (e.g. FR1, ESTAT, ILO)
        #[arg(long)]
        agency: String,

        /// Dataflow id
        #[arg(long)]
        resource: String,

        /// Protocol version: 2.1 or legacy
        #[arg(long, default_value = "2.1")]
        version: ProtocolVersion,

        /// Data message kind
        #[arg(long, default_value = "specific")]
        kind: MessageKind,

        /// Dimension filter, repeatable: --key INDICATEUR=XY
        #[arg(long = "key", value_parser = parse_key)]
        keys: Vec<(String, String)>,
    },

    /// List the dataflows an agency publishes
    Dataflows {
        #[arg(long)]
        root_url: String,

        #[arg(long)]
        agency: String,

        #[arg(long, default_value = "2.1")]
        version: ProtocolVersion,
    },

    /// Acknowledge a loaded dataset by hand
    Ack {
        /// Source id
        id: String,

        /// Checksum that was loaded
        checksum: String,
    },
}

fn parse_key(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
        _ => Err(format!("expected DIMENSION=VALUE, got '{raw}'")),
    }
}

fn build_orchestrator(config: &CollectorConfig, fetcher: WireFetcher) -> Result<IngestionOrchestrator> {
    let registry: Arc<dyn RegistryStore> = match &config.registry_path {
        Some(path) => Arc::new(JsonFileRegistry::new(path)),
        None => {
            warn!("COLLECTOR_REGISTRY_PATH not set, registrations are kept in memory");
            Arc::new(MemoryRegistry::new())
        },
    };

    let channel: Arc<dyn Channel> = match &config.bus_url {
        Some(url) => Arc::new(HttpChannel::new(url, config.fetch_config().timeout)?),
        None => Arc::new(LogChannel),
    };

    Ok(IngestionOrchestrator::new(
        fetcher,
        registry,
        channel,
        config.orchestrator_options(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("sdmx-collector")
        .build()
        .merge_env()?;
    init_logging(&log_config)?;

    let config = CollectorConfig::from_env().context("invalid collector configuration")?;
    let fetcher = WireFetcher::new(&config.fetch_config())?;

    match cli.command {
        Command::Serve => {
            let orchestrator = Arc::new(build_orchestrator(&config, fetcher)?);
            let (tx, rx) = mpsc::channel(64);

            tokio::spawn(async move {
                if let Err(e) = forward_lines(BufReader::new(tokio::io::stdin()), tx).await {
                    error!(error = %e, "Event reader stopped");
                }
            });

            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Cannot listen for ctrl-c");
                }
            };
            PollScheduler::new(orchestrator, config.poll_interval())
                .run(rx, shutdown)
                .await?;
        },
        Command::Poll => {
            let orchestrator = build_orchestrator(&config, fetcher)?;
            let summary = orchestrator.poll_all().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        },
        Command::Register {
            root_url,
            agency,
            resource,
            version,
            kind,
            keys,
        } => {
            let orchestrator = build_orchestrator(&config, fetcher)?;
            let keys: BTreeMap<String, String> = keys.into_iter().collect();
            let id = orchestrator
                .register(&root_url, &agency, &resource, version, kind, keys)
                .await?;
            println!("{id}");
        },
        Command::Dataflows {
            root_url,
            agency,
            version,
        } => {
            let source = SdmxSource::new(fetcher, &root_url, &agency, version, MessageKind::Specific);
            for flow in source.dataflows().await? {
                println!("{}\t{}", flow.id, flow.name);
            }
        },
        Command::Ack { id, checksum } => {
            let orchestrator = build_orchestrator(&config, fetcher)?;
            let kind = orchestrator
                .registry()
                .find(&id)
                .await?
                .map(|r| sdmx_common::ident::clean(&r.agency).to_lowercase());
            let ack = LoadAck {
                id: Some(id.clone()),
                checksum: Some(checksum),
                meta: Some(InboundMeta {
                    source: Some(SOURCE_TAG.to_string()),
                    kind,
                }),
            };
            if !orchestrator.on_load_ack(ack).await? {
                anyhow::bail!("no registered source with id {id}");
            }
        },
    }

    info!("Done");
    Ok(())
}
