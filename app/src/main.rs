use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use exposure_app::commands::{scan, subscribers};
use exposure_app::AppState;
use exposure_core::AppConfig;
use exposure_scanner::CancellationToken;
use serde::Serialize;
use tracing::info;

#[derive(Parser)]
#[command(name = "exposure", version, about = "Free data broker exposure scans")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a subscriber
    Subscribe {
        subject: String,
        email: String,
        /// Existing provider profile id
        #[arg(long)]
        profile: Option<i64>,
    },
    /// Attach a provider profile to a subscriber
    LinkProfile { subject: String, profile: i64 },
    /// Run the free scan for a subject and wait until it ends
    Scan { subject: String },
    /// Start a new scan for a subject whose last scan never finished
    Retrigger { subject: String },
    /// Print the stored scan status
    Status { subject: String },
    /// Print the latest scan data as JSON
    Results { subject: String },
    /// Mark a scan result as resolved
    Resolve {
        remote_job_id: i64,
        external_record_id: i64,
        /// Clear the flag instead of setting it
        #[arg(long)]
        undo: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    let Some(path) = path else {
        return AppConfig::load_with_env().context("failed to load configuration");
    };
    let mut config = AppConfig::load_from(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    config.apply_env();
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping at the next tick");
            token.cancel();
        }
    });
}

async fn wait_for_scan(state: &AppState, subject: &str) -> Result<()> {
    let subject_id = exposure_core::SubjectId::new(subject)?;
    let Some(handle) = state.take_scan(&subject_id) else {
        return Ok(());
    };
    cancel_on_interrupt(handle.cancellation_token());
    print_json(&handle.wait().await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    exposure_app::init_tracing();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    info!("Starting exposure v{}", exposure_app::version());
    let state = AppState::open(config).await?;

    match cli.command {
        Command::Subscribe {
            subject,
            email,
            profile,
        } => print_json(&subscribers::register_subscriber(&state, subject, email, profile).await?)?,
        Command::LinkProfile { subject, profile } => {
            subscribers::link_profile(&state, subject, profile).await?;
        }
        Command::Scan { subject } => {
            let token = CancellationToken::new();
            cancel_on_interrupt(token.clone());
            print_json(&scan::run_scan(&state, subject, token).await?)?;
        }
        Command::Retrigger { subject } => {
            print_json(&scan::retrigger_scan(&state, subject.clone()).await?)?;
            wait_for_scan(&state, &subject).await?;
        }
        Command::Status { subject } => print_json(&scan::get_scan_status(&state, subject).await?)?,
        Command::Results { subject } => {
            print_json(&scan::get_latest_scan_data(&state, subject).await?)?;
        }
        Command::Resolve {
            remote_job_id,
            external_record_id,
            undo,
        } => {
            scan::set_result_resolved(&state, remote_job_id, external_record_id, !undo).await?;
        }
    }

    state.db.pool().close().await;
    Ok(())
}
