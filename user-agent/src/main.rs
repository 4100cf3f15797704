// user-agent/src/main.rs
// Entropy Shield - ransomware write-entropy kill switch

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use shield_kernel::{start_simulation, EbpfLoader};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod event_loop;
mod response;
mod shutdown;
mod threat_classifier;

use config::Config;
use event_loop::EventLoop;
use response::ResponseHandler;
use shutdown::{ShutdownCoordinator, ShutdownOutcome};
use threat_classifier::ThreatClassifier;

const SIMULATION_INTERVAL: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let matches = Command::new("entropy-shield")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Kills processes that write encrypted-looking data")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Configuration file path")
                .default_value("entropy-shield.toml"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Detect and log, never send signals")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("simulate")
                .long("simulate")
                .help("Feed synthetic writes instead of attaching the kernel probe (implies --dry-run)")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("entropy-shield.toml");
    let simulate = matches.get_flag("simulate");

    let mut config = Config::load(config_path)?;
    if simulate || matches.get_flag("dry-run") {
        config.response.enable_process_kill = false;
    }
    config.validate().context("invalid configuration")?;

    run(config, simulate).await
}

async fn run(config: Config, simulate: bool) -> Result<()> {
    let layout = config.ebpf.layout()?;
    let classifier = ThreatClassifier::new(&config.detection)?;

    if classifier.threshold() >= layout.max_sample_entropy() {
        warn!(
            "Entropy threshold {:.2} is unreachable with {}-byte samples (max {:.2}); nothing will be flagged",
            classifier.threshold(),
            layout.sample_len(),
            layout.max_sample_entropy()
        );
    }

    let (source, producer) = if simulate {
        start_simulation(&config.ebpf, SIMULATION_INTERVAL).context("failed to start simulated producer")?
    } else {
        EbpfLoader::with_config(config.ebpf.clone())
            .initialize()
            .await
            .context("failed to start kernel write probe")?
    };

    let requests = shutdown::termination_requests()?;
    let coordinator = ShutdownCoordinator::new(producer.closer());
    tokio::spawn(async move {
        if coordinator.run(requests).await == ShutdownOutcome::Forced {
            std::process::exit(0);
        }
    });

    let response = ResponseHandler::new(&config.response);
    let stats = EventLoop::new(source, layout, classifier, response).run().await;
    producer.shutdown().await;

    info!("📈 Summary:");
    info!("   • Records processed: {}", stats.records_processed);
    info!("   • Malformed records: {}", stats.malformed_records);
    info!("   • Read errors: {}", stats.read_errors);
    info!("   • Threats detected: {}", stats.threats_detected);
    info!("   • Processes killed: {}", stats.processes_killed);
    info!("   • Failed kills: {}", stats.kill_failures);

    Ok(())
}
