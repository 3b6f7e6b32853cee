//! certpilot - operator CLI
//!
//! Inspects configuration and stored certificates. The engine itself is
//! embedded by an application that supplies a CA client and challenge
//! provider.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use certpilot::acme::{Certificate, CertificateStore, FileCertificateStore};
use certpilot_config::{lint_config, Config};

/// certpilot - certificate lifecycle engine
#[derive(Parser, Debug)]
#[command(name = "certpilot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "CERTPILOT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file and exit
    CheckConfig,
    /// List stored certificates
    List,
    /// Show which certificates the next sweep would queue for renewal
    Due,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::CheckConfig => check_config(&config),
        Commands::List => list(&config).await,
        Commands::Due => due(&config).await,
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Validate configuration and report lint findings
fn check_config(config: &Config) -> Result<()> {
    let warnings = lint_config(config);
    for warning in &warnings {
        warn!("{}", warning);
    }

    info!("Configuration test successful:");
    info!(
        "  - dispatcher: {} worker(s), issue queue {}, renew queue {}",
        config.dispatcher.workers,
        config.dispatcher.issue_queue_capacity,
        config.dispatcher.renew_queue_capacity
    );
    info!(
        "  - scanner: every {}s, default threshold {} day(s)",
        config.scanner.period_secs, config.scanner.default_renew_at_days
    );
    info!("  - exchange timeout: {}s", config.exchange.timeout_secs);
    info!("  - storage: {}", config.storage.path.display());
    if !warnings.is_empty() {
        info!("  - {} warning(s)", warnings.len());
    }
    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<FileCertificateStore>> {
    let store = FileCertificateStore::new(&config.storage.path).with_context(|| {
        format!(
            "Failed to open certificate storage at {}",
            config.storage.path.display()
        )
    })?;
    Ok(Arc::new(store))
}

async fn list(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let mut certs = store
        .all_certs()
        .await
        .context("Failed to load certificates")?;
    certs.sort_by(|a, b| a.common_name.cmp(&b.common_name));

    let now = Utc::now();
    println!(
        "{:<36}  {:<32}  {:<6}  {:>9}  ERROR",
        "ID", "COMMON NAME", "ISSUED", "DAYS LEFT"
    );
    for cert in &certs {
        println!(
            "{:<36}  {:<32}  {:<6}  {:>9}  {}",
            cert.id,
            cert.common_name,
            if cert.issued { "yes" } else { "no" },
            days_left_label(cert, now),
            cert.last_error.as_deref().unwrap_or("-")
        );
    }
    info!(count = certs.len(), "Listed certificates");
    Ok(())
}

async fn due(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let certs = store
        .all_certs()
        .await
        .context("Failed to load certificates")?;

    let now = Utc::now();
    let due: Vec<&Certificate> = certs.iter().filter(|c| c.needs_renewal(now)).collect();

    for cert in &due {
        println!(
            "{}  {}  {} day(s) left, threshold {}",
            cert.id,
            cert.common_name,
            days_left_label(cert, now),
            cert.renew_at
        );
    }
    info!(
        scanned = certs.len(),
        due = due.len(),
        "Dry-run sweep complete"
    );
    Ok(())
}

fn days_left_label(cert: &Certificate, now: chrono::DateTime<Utc>) -> String {
    cert.days_left(now)
        .map(|days| days.to_string())
        .unwrap_or_else(|| "-".to_string())
}
