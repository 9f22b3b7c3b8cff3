//! CLI entry point for the netwatch discovery and monitoring engine.

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use netwatch_core::types::parse_subnet;
use netwatch_daemon::{Engine, NetwatchConfig, Transports};
use netwatch_store::Store;

#[derive(Parser)]
#[command(name = "netwatch")]
#[command(about = "Network discovery and device monitoring engine")]
struct Cli {
    /// Subnet to scan in --once mode (CIDR notation, e.g., 192.168.1.0/24).
    #[arg(short, long)]
    target: Option<String>,

    /// Run a single scan, print the result as JSON, and exit.
    #[arg(long)]
    once: bool,

    /// Run scheduled discovery and monitoring until interrupted.
    #[arg(long)]
    daemon: bool,

    /// Config file prefix (default: netwatch).
    #[arg(short, long, default_value = "netwatch")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let config = NetwatchConfig::load(&cli.config)?;
    let engine = Engine::build(&config, Transports::system(&config.monitor))?;

    if cli.once {
        let target = cli
            .target
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--target is required in --once mode"))?;
        let subnet = parse_subnet(target)?;

        let run = engine.orchestrator().run_scan(Uuid::new_v4(), subnet).await?;
        let devices: Vec<_> = engine
            .tracker()
            .store()
            .list_active_devices()
            .await?
            .into_iter()
            .filter(|d| subnet.contains(&d.address))
            .collect();

        let report = serde_json::json!({ "scan": run, "devices": devices });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if cli.daemon {
        let running = engine.start();
        tracing::info!("netwatch running, press ctrl-c to stop");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutting down");
        running.shutdown().await;
    } else {
        anyhow::bail!("Specify --once (one-shot scan) or --daemon (scheduled monitoring)");
    }

    Ok(())
}
