//! # Vigil - CLI Entry Point
//!
//! Command-line interface for the Vigil daemon.
//!
//! Commands:
//! - `start`        - Start the monitoring pipeline
//! - `init-config`  - Generate a default configuration file
//! - `check-config` - Validate a configuration file without starting

use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use vigil::classifier::ThreatClassifier;
use vigil::monitor::ProactiveMonitor;
use vigil::response::ResponseEngine;
use vigil::sinks::{AllowAll, LogAuditSink, LogNotifier, Notifier, WebhookNotifier};
use vigil::tracker::SourceTracker;
use vigil::{VigilConfig, VigilError, VigilResult};

/// Vigil - real-time threat detection and response daemon.
///
/// Inspects inbound requests, classifies attacks, blocks offending
/// sources for a cooldown, and keeps health metrics on the whole
/// pipeline.
#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "vigil.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the monitoring pipeline.
    Start,

    /// Generate a default configuration file.
    InitConfig,

    /// Validate a configuration file without starting.
    CheckConfig,
}

#[tokio::main]
async fn main() -> VigilResult<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => cmd_start(&cli.config).await,
        Commands::InitConfig => cmd_init_config(&cli.config),
        Commands::CheckConfig => cmd_check_config(&cli.config),
    }
}

/// Start the pipeline and run until a shutdown signal arrives.
async fn cmd_start(config_path: &Path) -> VigilResult<()> {
    info!("Vigil starting...");

    let config = load_config(config_path)?;
    let monitor = build_pipeline(&config)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!("Could not install signal handler: {}. Use kill to stop.", e);
    }

    monitor.start();
    info!("Pipeline online");

    let mut last_report = std::time::Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;

        if last_report.elapsed().as_secs() >= 60 {
            let dashboard = monitor.get_dashboard();
            match &dashboard.current {
                Some(current) => info!(
                    "Status: {} | {} requests/h, {} threats/h, {} sources blocked",
                    dashboard.status,
                    current.total_requests,
                    current.threats_detected,
                    current.blocked_source_count
                ),
                None => info!("Status: {}", dashboard.status),
            }
            last_report = std::time::Instant::now();
        }
    }

    info!("Shutdown signal received");
    monitor.stop();
    // Give the loops one wake-up to observe the signal.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    info!("Vigil stopped");
    Ok(())
}

/// Generate a default configuration file. Refuses to overwrite.
fn cmd_init_config(config_path: &Path) -> VigilResult<()> {
    if config_path.exists() {
        return Err(VigilError::Config(format!(
            "{} already exists, not overwriting",
            config_path.display()
        )));
    }
    VigilConfig::write_default(config_path)?;
    info!("Default configuration written to {}", config_path.display());
    Ok(())
}

/// Load a configuration file and run full startup validation against it.
fn cmd_check_config(config_path: &Path) -> VigilResult<()> {
    let config = VigilConfig::from_file(config_path)?;
    // Constructing the pipeline exercises rule resolution and signature
    // compilation, the two places bad configuration can hide.
    build_pipeline(&config)?;
    info!("{} is valid", config_path.display());
    Ok(())
}

fn load_config(config_path: &Path) -> VigilResult<VigilConfig> {
    if config_path.exists() {
        info!("Loading configuration from {}", config_path.display());
        VigilConfig::from_file(config_path)
    } else {
        info!("No config file found, using defaults. Run 'init-config' to generate one.");
        Ok(VigilConfig::default())
    }
}

fn build_pipeline(config: &VigilConfig) -> VigilResult<Arc<ProactiveMonitor>> {
    let tracker = Arc::new(SourceTracker::new(&config.tracker));
    let classifier = Arc::new(ThreatClassifier::new(&config.detection, tracker.clone())?);

    let notifier: Arc<dyn Notifier> = match &config.monitor.alert_webhook_url {
        Some(url) => {
            info!("Alerts will be delivered to {}", url);
            Arc::new(WebhookNotifier::new(url))
        }
        None => Arc::new(LogNotifier),
    };
    let audit = Arc::new(LogAuditSink);

    let engine = Arc::new(ResponseEngine::new(
        &config.response,
        audit.clone(),
        notifier.clone(),
    )?);

    Ok(Arc::new(ProactiveMonitor::new(
        config,
        tracker,
        classifier,
        engine,
        audit,
        notifier,
        Arc::new(AllowAll),
    )))
}
