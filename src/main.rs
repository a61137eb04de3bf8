// src/main.rs
//! Canary Guardian entry point
//! Runs the contract monitoring loop, or replays a fixture offline.
use anyhow::{Context, Result};
use canary_guardian::anomaly_detection::{rule_descriptions, DetectorRegistry, EscalationTracker};
use canary_guardian::blockchain::{CanisterClient, InMemoryBackend};
use canary_guardian::cli::{Cli, Commands};
use canary_guardian::core::config::GuardianConfig;
use canary_guardian::monitoring::{Clock, ManualClock, MonitorMetrics, MonitoringScheduler, SystemClock};
use canary_guardian::notification::{LogNotifier, WebhookNotifier};
use clap::Parser;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config = load_config(config)?;
            init_logging(&config.log_level)?;
            run(config).await
        }
        Commands::Check { fixture, cycles, now, config } => {
            let config = load_config(config)?;
            init_logging(&config.log_level)?;
            check(&config, &fixture, cycles, now).await
        }
        Commands::Rules { config } => {
            let config = load_config(config)?;
            for rule in rule_descriptions(&config.detection) {
                println!(
                    "{:>2}  {:<28} {:<8} {:<8} {}",
                    rule.id,
                    rule.name,
                    rule.severity.as_str(),
                    if rule.enabled { "enabled" } else { "disabled" },
                    rule.description
                );
            }
            Ok(())
        }
        Commands::Status { config } => {
            let config = load_config(config)?;
            init_logging(&config.log_level)?;
            let backend = Arc::new(CanisterClient::new(&config.backend)?);
            let scheduler =
                MonitoringScheduler::from_config(&config, backend.clone(), backend, Arc::new(LogNotifier::new()))?;
            let summary = scheduler.status_summary().await.context("Error retrieving contract status")?;
            println!("{}", summary);
            Ok(())
        }
    }
}

fn init_logging(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{},hyper=info,reqwest=info", default_level)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// `--config`, else `CONFIG_PATH`, else defaults; environment overrides always apply.
fn load_config(path: Option<PathBuf>) -> Result<GuardianConfig> {
    let path = path.or_else(|| std::env::var("CONFIG_PATH").ok().map(PathBuf::from));
    GuardianConfig::load(path.as_deref()).context("Failed to load configuration")
}

async fn run(config: GuardianConfig) -> Result<()> {
    info!("Starting Canary Guardian v{}", env!("CARGO_PKG_VERSION"));

    if config.notification.webhook_url.is_none() {
        warn!("DISCORD_WEBHOOK_URL not configured; alerts are logged only");
    }

    let backend = Arc::new(CanisterClient::new(&config.backend)?);
    let notifier = Arc::new(WebhookNotifier::new(&config.notification)?);
    info!(endpoint = backend.endpoint(), "Using contract backend");

    let scheduler = Arc::new(MonitoringScheduler::from_config(&config, backend.clone(), backend, notifier)?);
    scheduler.start();

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    scheduler.shutdown().await;

    Ok(())
}

async fn check(config: &GuardianConfig, fixture: &Path, cycles: u32, now: Option<i64>) -> Result<()> {
    let backend = Arc::new(
        InMemoryBackend::from_fixture_file(fixture)
            .with_context(|| format!("Failed to load fixture {}", fixture.display()))?,
    );
    let clock = Arc::new(ManualClock::new(now.unwrap_or_else(|| SystemClock.now())));

    let scheduler = MonitoringScheduler::new(
        config.scheduler.clone(),
        DetectorRegistry::with_thresholds(&config.detection),
        EscalationTracker::new(config.escalation.freeze_threshold, config.escalation.eviction_grace_cycles),
        backend.clone(),
        backend.clone(),
        Arc::new(LogNotifier::new()),
        clock,
        Arc::new(MonitorMetrics::new()?),
    );

    let mut reports = Vec::with_capacity(cycles as usize);
    for _ in 0..cycles.max(1) {
        reports.push(scheduler.run_cycle().await?);
    }

    let output = json!({
        "cycles": reports,
        "alerts": backend.alerts(),
        "pauses": backend.pauses(),
        "contracts": backend.contracts(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
