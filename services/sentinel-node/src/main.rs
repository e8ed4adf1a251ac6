use anyhow::{bail, Context, Result};
use sentinel_alert::{MeshPort, SentinelNode};
use sentinel_core::{logging, Config};
use sentinel_mesh::{MeshTransport, TransportConfig, PROTOCOL_VERSION};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

const NODE_RUNTIME_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    runtime_version: u32,
    protocol_version: u8,
}

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    debug: bool,
    version_json: bool,
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;

    if args.version_json {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            runtime_version: NODE_RUNTIME_VERSION,
            protocol_version: PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };
    if args.debug {
        config.system.log_level = "debug".to_string();
    }

    if args.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    logging::init_from_config(&config.system);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Sentinel Edge-AI Wildfire Detection System"
    );
    if args.config.is_none() {
        tracing::warn!("No --config given, running with built-in defaults");
    }

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Sentinel node failed");
        return Err(e);
    }
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let link = sentinel_radio::from_config(&config).context("failed to set up radio link")?;
    let mesh = Arc::new(
        MeshTransport::initialize(TransportConfig::from_config(&config), link)
            .context("failed to initialize mesh network")?,
    );
    mesh.set_detection_callback(|node_id, detected| {
        tracing::debug!(node_id, detected, "Mesh detection");
    });

    let port: Arc<dyn MeshPort> = mesh.clone();
    let mut node = SentinelNode::from_config(&config, port)
        .context("failed to build detection loop")?;
    if config.sources.is_empty() {
        tracing::warn!("No detection sources configured; node will only relay peers");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received shutdown signal"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
        let _ = shutdown_tx.send(true);
    });

    node.run(shutdown_rx).await;

    tracing::info!("Shutting down Sentinel Core...");
    mesh.shutdown().await;
    tracing::info!(status = ?mesh.status(), "Shutdown complete");
    Ok(())
}

fn parse_args<I>(args: I) -> Result<Args>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = Args::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => match args.next() {
                Some(path) => parsed.config = Some(PathBuf::from(path)),
                None => bail!("--config was provided without a path"),
            },
            "--debug" => parsed.debug = true,
            "--version-json" => parsed.version_json = true,
            "--print-config" => parsed.print_config = true,
            other => bail!(
                "unknown argument {:?} (expected --config <path>, --debug, --version-json, --print-config)",
                other
            ),
        }
    }
    Ok(parsed)
}
