//! pvestats agent - one-shot Proxmox stats publisher
//!
//! Meant to be run from cron or a systemd timer: every invocation reads the
//! node once, publishes retained metrics and exits. Exit code is non-zero on
//! any failure.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use pvestats_agent::api::ProxmoxClient;
use pvestats_agent::mqtt::MqttBus;
use pvestats_agent::remote::SshCommand;
use pvestats_agent::{Agent, AgentConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pvestats-agent")]
#[command(about = "Publishes Proxmox host, guest and storage stats to MQTT")]
#[command(version)]
struct Args {
    /// Also publish Home Assistant discovery configs for every metric
    #[arg(long)]
    publish_discovery: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // .env is optional, real environment wins
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pvestats_agent=info")),
        )
        .init();

    info!("Starting pvestats agent v{}", env!("CARGO_PKG_VERSION"));

    let config = AgentConfig::from_env().context("Failed to load configuration")?;
    info!(
        "Monitoring node {} on {} ({} SSH targets)",
        config.proxmox.node,
        config.proxmox.host,
        config.ssh.len()
    );

    let api = ProxmoxClient::new(&config.proxmox).context("Failed to create Proxmox API client")?;
    let bus = MqttBus::connect(&config.mqtt)
        .await
        .context("Failed to connect to MQTT broker")?;

    let summary = Agent::new(&config, &api, &SshCommand, &bus)
        .run(args.publish_discovery, Utc::now())
        .await
        .context("Stats run failed")?;

    info!(
        "Run complete: {} resources, {} metrics{}",
        summary.resources,
        summary.metrics,
        summary
            .discovery_configs
            .map(|n| format!(", {n} discovery configs"))
            .unwrap_or_default()
    );

    Ok(())
}
