//! Preflight checks run before the supervisor starts.
//!
//! Verifies the encoder binary is actually invocable so a misconfigured host
//! fails at startup instead of on the first launch attempt inside the
//! broadcast window.

use std::process::Command;
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("ffmpeg not available: {0}")]
    FfmpegUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Extract the version banner line from `ffmpeg -version` output.
pub fn parse_ffmpeg_banner(version_output: &str) -> Option<String> {
    version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))
        .map(|line| line.trim().to_string())
}

/// Check that `ffmpeg -version` executes successfully.
///
/// Returns the version banner for the startup log.
pub fn check_ffmpeg_available() -> Result<String, StartupError> {
    let output = Command::new("ffmpeg").arg("-version").output().map_err(|e| {
        StartupError::FfmpegUnavailable(format!(
            "ffmpeg -version failed; is ffmpeg installed and in PATH? Error: {}",
            e
        ))
    })?;

    if !output.status.success() {
        return Err(StartupError::FfmpegUnavailable(
            "ffmpeg -version exited with an error".to_string(),
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_ffmpeg_banner(&stdout).unwrap_or_else(|| "ffmpeg (unknown version)".to_string()))
}

/// Run all startup checks in order.
pub fn run_startup_checks() -> Result<(), StartupError> {
    let banner = check_ffmpeg_available()?;
    tracing::info!(encoder = %banner, "startup checks passed");
    Ok(())
}
