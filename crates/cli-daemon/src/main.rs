//! CLI entry point for the livecast daemon.
//!
//! Parses command line arguments, loads configuration, and runs the
//! supervisor. Exits 0 on a clean scheduled or operator-requested stop and
//! non-zero on configuration errors or reconnect exhaustion.

use clap::Parser;
use livecast_daemon::{wait_for_shutdown_signal, Config, Supervisor};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Livecast Daemon - keeps a scheduled daily RTMP broadcast alive
#[derive(Parser, Debug)]
#[command(name = "livecast-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Broadcast window start time (HH:MM); overrides the config file
    start: Option<String>,

    /// Broadcast window end time (HH:MM); overrides the config file
    end: Option<String>,

    /// Path to the configuration file (defaults apply if absent)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Stream generated silence instead of probing audio capture devices
    #[arg(long, default_value = "false")]
    no_audio: bool,

    /// Override the session rotation interval, in minutes
    #[arg(long)]
    session_minutes: Option<u64>,

    /// Override the status server port
    #[arg(long)]
    status_port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, path = %args.config.display(), "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    if let Some(start) = args.start {
        config.schedule.start = start;
    }
    if let Some(end) = args.end {
        config.schedule.end = end;
    }
    if args.no_audio {
        config.capture.audio_enabled = false;
    }
    if let Some(minutes) = args.session_minutes {
        config.session.max_duration_secs = minutes * 60;
    }
    if let Some(port) = args.status_port {
        config.status_server.port = port;
    }

    // Reject malformed times before any scheduling begins.
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration");
        return ExitCode::FAILURE;
    }

    let mut supervisor = match Supervisor::new(config) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize daemon");
            return ExitCode::FAILURE;
        }
    };

    // The signal handler only sets the token; the supervisor observes it at
    // every wait point and tears the encoder down itself.
    let cancel = supervisor.cancel_token();
    tokio::spawn(async move {
        if wait_for_shutdown_signal().await.is_ok() {
            tracing::warn!("shutdown signal received, stopping");
            cancel.cancel();
        }
    });

    match supervisor.run_with_status_server().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "daemon failed");
            ExitCode::FAILURE
        }
    }
}
