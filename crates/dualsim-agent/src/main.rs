//! dualsim agent
//!
//! Runs the failover engine on a dual-SIM host.
//!
//! - `monitor` watches the active link and fails over until Ctrl-C
//! - `switch`, `quality`, `info`, `status`, `rooted` are one-shot queries
//!   and actions that print JSON
//! - With `--simulate`, everything runs against an in-memory device driven
//!   by a seeded link-quality scenario

mod config;
mod events;
mod host;
mod simulate;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use dualsim_failover::Controller;
use dualsim_failover::platform::EventSink;

use crate::config::AgentConfig;
use crate::events::JsonLinesSink;
use crate::simulate::SimulatedHost;

/// Dual-SIM data-link failover agent.
#[derive(Parser, Debug)]
#[command(name = "dualsim-agent", about = "Dual-SIM automatic data failover")]
struct Cli {
    /// TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run against a simulated device instead of the host.
    #[arg(long, global = true, default_value_t = false)]
    simulate: bool,

    /// Scenario seed for `--simulate`.
    #[arg(long, global = true, default_value_t = 1)]
    seed: u64,

    /// Serve Prometheus metrics on this address while monitoring.
    #[arg(long, global = true)]
    metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Monitor the active link and fail over automatically.
    Monitor {
        #[arg(long, default_value_t = 0)]
        primary: u8,
        #[arg(long, default_value_t = 1)]
        fallback: u8,
    },
    /// Move mobile data to a slot.
    Switch { slot: u8 },
    /// Print the fused quality of the active link.
    Quality,
    /// Print a network info snapshot.
    Info,
    /// Print the monitor status snapshot.
    Status,
    /// Report whether elevated access is available.
    Rooted,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };

    let events: Arc<dyn EventSink> = match &config.platform.events_path {
        Some(path) => Arc::new(JsonLinesSink::open(path)?),
        None => Arc::new(JsonLinesSink::stdout()),
    };

    // Keeps the scenario thread alive for the lifetime of the controller.
    let mut simulated = None;
    let platform = if cli.simulate {
        let sim = SimulatedHost::start(cli.seed, Duration::from_secs(1));
        let platform = sim.platform(events);
        simulated = Some(sim);
        platform
    } else {
        host::platform(&config, events)?
    };

    tracing::info!(
        simulate = cli.simulate,
        command = ?cli.command,
        "dualsim-agent starting"
    );

    let mut controller = Controller::new(config.failover.clone(), platform);
    let result = run(&cli, &mut controller);
    controller.shutdown();
    drop(simulated);
    result
}

fn run(cli: &Cli, controller: &mut Controller) -> anyhow::Result<()> {
    match cli.command {
        Command::Monitor { primary, fallback } => monitor(cli, controller, primary, fallback),
        Command::Switch { slot } => {
            let success = controller.switch_to(slot).map_err(report)?;
            print_json(&serde_json::json!({
                "slot": success.target,
                "previous": success.previous,
                "strategy": success.strategy,
                "attempts": success.attempts.len(),
                "noop": success.was_noop(),
            }))
        }
        Command::Quality => print_json(&serde_json::json!({
            "quality": controller.network_quality(),
        })),
        Command::Info => print_json(&controller.network_info().map_err(report)?),
        Command::Status => print_json(&controller.status().map_err(report)?),
        Command::Rooted => print_json(&serde_json::json!({
            "rooted": controller.is_elevated(),
            "canSwitch": controller.can_switch(),
        })),
    }
}

fn monitor(
    cli: &Cli,
    controller: &mut Controller,
    primary: u8,
    fallback: u8,
) -> anyhow::Result<()> {
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("installing Ctrl-C handler")?;

    if let Some(addr) = cli.metrics_addr {
        let bound = controller
            .start_metrics_server(addr)
            .with_context(|| format!("binding metrics server on {addr}"))?;
        tracing::info!(addr = %bound, "serving metrics");
    }

    controller
        .start_monitoring(primary, fallback)
        .map_err(report)?;
    tracing::info!(primary, fallback, "monitoring; press Ctrl-C to stop");

    let _ = stop_rx.recv();
    tracing::info!("received SIGINT, stopping");

    controller.stop_monitoring().map_err(report)?;
    let status = controller.status().map_err(report)?;
    tracing::info!(
        current = ?status.current_slot,
        detector = %status.detector_state,
        "monitoring stopped"
    );
    Ok(())
}

/// Log the stable error code before handing the error to anyhow.
fn report(err: dualsim_failover::FailoverError) -> anyhow::Error {
    tracing::error!(code = err.code(), "{err}");
    anyhow::Error::new(err)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
