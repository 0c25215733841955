//! Knobs GW
//!
//! Binds the knobs declared in the configuration to a DJ TechTools Midi
//! Fighter Twister and keeps both sides in sync until Ctrl+C.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use knobs_gw::config::AppConfig;
use knobs_gw::controller::{Controller, ControllerDirectory, WorkerPool};
use knobs_gw::knob::{KnobActor, KnobEvent, KnobHandle};
use knobs_gw::transport;
use knobs_gw::twister::{TwisterDriver, TwisterRegistry};

/// Knobs GW - Drive rotary knob models from a Midi Fighter Twister
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "knobs.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,

    /// Run against an in-memory device instead of MIDI hardware
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level)?;

    if args.list_ports {
        list_ports_formatted()?;
        return Ok(());
    }

    info!("Starting Knobs GW...");
    info!("Configuration file: {}", args.config);

    let config = AppConfig::load(&args.config).await?;
    info!("Configuration loaded: {} knob(s)", config.knobs.len());

    run_app(config, args.offline, shutdown_signal()).await?;

    info!("Knobs GW shutdown complete");
    Ok(())
}

async fn run_app(
    config: AppConfig,
    offline: bool,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let device = &config.device;
    let pool = Arc::new(WorkerPool::new(device.workers));
    let driver = TwisterDriver::new(device.timing(), Handle::current());

    let registry = if offline {
        info!("Offline mode: device traffic stays in memory");
        TwisterRegistry::open_in_memory(driver, pool.clone()).0
    } else {
        TwisterRegistry::open_midi(driver, pool.clone(), &device.name, device.port_match)
    };
    let identifier = registry.identifier().to_string();

    let mut directory = ControllerDirectory::new();
    if device.reset_on_start {
        directory.register(registry);
    } else {
        directory.register_without_reset(registry);
    }

    let mut knobs = Vec::with_capacity(config.knobs.len());
    for knob_config in &config.knobs {
        let knob = KnobActor::spawn(knob_config.name.as_str(), knob_config.state());
        follow_commits(&knob);

        match directory.assign(&knob, None, Some(identifier.as_str())).await {
            Ok(()) => info!(
                "Knob '{}' on encoder {} ({})",
                knob_config.name, knob_config.channel, knob_config.mode
            ),
            Err(e) => warn!("Knob '{}' not bound: {}", knob_config.name, e),
        }
        knobs.push(knob);
    }

    info!("Knobs GW running, press Ctrl+C to stop");
    shutdown.await;

    directory.dispose_all();
    for knob in &knobs {
        knob.shutdown();
    }
    pool.shutdown();

    Ok(())
}

/// Log every committed target and take it as the new current value
fn follow_commits(knob: &KnobHandle) {
    let model = knob.clone();
    knob.subscribe(Arc::new(move |event: &KnobEvent| {
        if let KnobEvent::TargetCommitted { value, .. } = event {
            info!("{} -> {}", model.name(), value);
            model.set_current_value(*value);
        }
    }));
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

fn list_ports_formatted() -> Result<()> {
    use colored::*;

    let (inputs, outputs) = transport::list_ports()?;

    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());

    for (title, ports) in [("Input Ports:", inputs), ("Output Ports:", outputs)] {
        println!("\n{}", title.bold());
        if ports.is_empty() {
            println!("  {}", "No ports found".dimmed());
        }
        for port in ports {
            println!("  {}", port);
        }
    }

    println!();
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}
