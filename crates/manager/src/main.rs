//! CDN certificate manager - main entry point

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cdn_cert_manager::{logging, App};
use cdn_cert_manager_config::{load_env_file, LogFormat, Settings};

/// Optional env file read from the working directory
const ENV_FILE: &str = ".env";

/// Keeps Tencent Cloud CDN domains covered by Let's Encrypt certificates
#[derive(Parser, Debug)]
#[command(name = "cdn-cert-manager")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the certificate scheduler (default)
    Run,
    /// Validate configuration and exit
    Check,
    /// Run a single cycle for every domain and exit
    Once,
    /// List stored certificates for the configured CA
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Before logging, so the file can set RUST_LOG and the log format
    let env_file = load_env_file(Path::new(ENV_FILE));
    let settings = Settings::from_env();
    let format = settings
        .as_ref()
        .map(|s| s.log_format)
        .unwrap_or(LogFormat::Text);
    logging::init(format, cli.verbose);

    if env_file.as_ref().is_ok_and(|loaded| *loaded) {
        info!(path = ENV_FILE, "Loaded env file");
    }
    env_file.context("Failed to load env file")?;
    let settings = settings.context("Failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Check => check(&settings),
        Commands::Status => status(settings),
        Commands::Once => runtime()?.block_on(once(settings)),
        Commands::Run => runtime()?.block_on(run(settings)),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
}

/// Print a configuration summary
fn check(settings: &Settings) -> Result<()> {
    info!("Configuration test successful:");
    info!("  - email: {}", settings.email);
    info!("  - {} domain(s): {}", settings.domains.len(), settings.domains.join(", "));
    info!("  - schedule: {}", settings.schedule);
    info!("  - renew before: {} day(s)", settings.renew_before_days);
    info!("  - CA directory: {}", settings.ca_directory_url);
    info!("  - DNS provider: {}", settings.dns.provider.name());
    info!("  - CDN region: {}", settings.cdn.region);

    if settings.is_staging() {
        warn!("CA directory is a staging endpoint");
    }

    println!("cdn-cert-manager: configuration is valid");
    Ok(())
}

fn status(settings: Settings) -> Result<()> {
    let app = App::new(settings).context("Failed to initialise")?;
    let stored = app
        .stored_certificates()
        .context("Failed to read stored certificates")?;

    println!("CA endpoint: {}", app.endpoint());
    if stored.is_empty() {
        println!("no stored certificates");
    }
    for certificate in stored {
        let path = certificate
            .certificate_path
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        match certificate.expires_at {
            Some(expires_at) => println!("{}  expires {}  {}", certificate.domain, expires_at, path),
            None => println!("{}  unreadable certificate  {}", certificate.domain, path),
        }
    }
    Ok(())
}

async fn once(settings: Settings) -> Result<()> {
    let app = App::new(settings).context("Failed to initialise")?;
    app.verify_cdn_credentials()
        .await
        .context("CDN credential check failed")?;

    let cancel = shutdown_token();
    let reports = app.manager().run_once_until(cancel).await;

    let failed: Vec<&str> = reports
        .iter()
        .filter(|report| report.result.is_err())
        .map(|report| report.domain.as_str())
        .collect();
    if !failed.is_empty() {
        anyhow::bail!("certificate cycle failed for: {}", failed.join(", "));
    }

    info!(domains = reports.len(), "All certificate cycles completed");
    Ok(())
}

async fn run(settings: Settings) -> Result<()> {
    let app = App::new(settings).context("Failed to initialise")?;
    app.verify_cdn_credentials()
        .await
        .context("CDN credential check failed")?;

    let cancel = shutdown_token();
    app.manager().run(cancel).await;

    info!("Shutdown complete");
    Ok(())
}

/// Token cancelled on SIGINT or SIGTERM
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal, initiating graceful shutdown");
        trigger.cancel();
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
}
