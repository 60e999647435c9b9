//! Encoder launch sequence.
//!
//! Builds one session's encoder invocation: verifies the capture device is
//! present, probes audio and overlay capability with short bounded trial
//! runs, spawns the encoder with its diagnostic stream captured, and
//! verifies the process survives a startup grace period. Probing runs on
//! every launch so a session restart picks up changed hardware state.

use crate::monitor::{drain_pending, spawn_diag_reader};
use crate::stream::{build_ffmpeg_command, AudioSource, IngestUrl, StreamParams};
use livecast_daemon_config::Config;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Error type for launch operations. Every variant maps to a
/// `StartupFailed` outcome at the supervisor level.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The capture device node does not exist; nothing was spawned.
    #[error("capture device {0} not present")]
    DeviceMissing(String),

    /// Spawning or wiring up the encoder process failed.
    #[error("failed to start encoder: {0}")]
    Spawn(#[from] std::io::Error),

    /// The encoder exited during the startup grace period.
    #[error("encoder exited during startup grace (code {code:?}): {stderr_tail}")]
    EncoderExited {
        code: Option<i32>,
        stderr_tail: String,
    },
}

/// One live run of the encoder, from launch to termination confirmation.
///
/// Owned exclusively by the supervisor; exactly one exists at a time.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub child: Child,
    pub started_at: Instant,
    /// 1-based attempt index this session was launched under.
    pub attempt: u32,
    /// Bounded channel fed by the diagnostic reader task.
    pub diag_rx: mpsc::Receiver<String>,
    pub reader: JoinHandle<()>,
}

/// Audio capture candidates tried in order; first working source wins.
pub const AUDIO_CANDIDATES: &[(&str, &str)] =
    &[("alsa", "default"), ("alsa", "hw:0,0"), ("pulse", "default")];

/// Font files tried in order for the overlay filter.
const OVERLAY_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
];

/// Hard cap on one probe trial; trials that hang are killed and reaped.
const TRIAL_TIMEOUT: Duration = Duration::from_secs(8);

/// Builds and starts the encoder process for one attempt.
#[derive(Debug)]
pub struct Launcher {
    config: Config,
    destination: IngestUrl,
}

impl Launcher {
    pub fn new(config: Config, destination: IngestUrl) -> Self {
        Self {
            config,
            destination,
        }
    }

    /// Run the full launch sequence and return a live session.
    ///
    /// Spawns exactly one long-lived process on success; every probing trial
    /// run is short-lived and fully reaped before the main spawn.
    pub async fn launch(&self, attempt: u32) -> Result<Session, LaunchError> {
        let device = &self.config.capture.video_device;
        if !Path::new(device).exists() {
            return Err(LaunchError::DeviceMissing(device.clone()));
        }

        let audio = if self.config.capture.audio_enabled {
            probe_audio_source(AUDIO_CANDIDATES).await
        } else {
            info!("audio capture disabled, streaming silence");
            AudioSource::Silence
        };

        let overlay = probe_overlay_filter().await;
        let video_filter = compose_filter(self.config.stream.crop.as_deref(), overlay.as_deref());

        let params = StreamParams {
            video_device: device.clone(),
            input_format: self.config.capture.input_format.clone(),
            framerate: self.config.stream.framerate,
            video_size: self.config.stream.video_size.clone(),
            video_bitrate_kbps: self.config.stream.video_bitrate_kbps,
            keyframe_interval: self.config.stream.keyframe_interval,
            audio_bitrate_kbps: self.config.stream.audio_bitrate_kbps,
            audio,
            video_filter,
            extra_output_args: self.config.stream.extra_output_args.clone(),
            destination: self.destination.clone(),
        };

        let mut cmd = build_ffmpeg_command(&params);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stderr = child.stderr.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "encoder stderr not captured")
        })?;
        let (mut diag_rx, reader) = spawn_diag_reader(stderr);

        info!(
            pid = ?child.id(),
            attempt,
            audio = %params.audio,
            destination = %params.destination,
            "encoder process started"
        );

        // Grace period: a process that dies this early never connected.
        let grace = Duration::from_secs(self.config.session.startup_grace_secs);
        tokio::time::sleep(grace).await;

        match child.try_wait()? {
            Some(exit) => {
                // Give the reader a moment to flush the final output.
                tokio::time::sleep(Duration::from_millis(200)).await;
                let pending = drain_pending(&mut diag_rx);
                let stderr_tail = tail_of(&pending, 15);
                let _ = reader.await;
                let _ = child.wait().await;
                Err(LaunchError::EncoderExited {
                    code: exit.code(),
                    stderr_tail,
                })
            }
            None => {
                info!(
                    grace_secs = grace.as_secs(),
                    "encoder survived startup grace period"
                );
                Ok(Session {
                    id: Uuid::new_v4(),
                    child,
                    started_at: Instant::now(),
                    attempt,
                    diag_rx,
                    reader,
                })
            }
        }
    }
}

/// Join the last `n` diagnostic lines into one tail string.
fn tail_of(lines: &[String], n: usize) -> String {
    let start = lines.len().saturating_sub(n);
    lines[start..].join(" | ")
}

/// Combine the configured crop and the probed overlay into one filter chain.
pub fn compose_filter(crop: Option<&str>, overlay: Option<&str>) -> Option<String> {
    match (crop, overlay) {
        (Some(c), Some(o)) => Some(format!("{},{}", c, o)),
        (Some(c), None) => Some(c.to_string()),
        (None, Some(o)) => Some(o.to_string()),
        (None, None) => None,
    }
}

/// Run one bounded probe trial; hung trials are killed and reaped.
async fn run_trial(cmd: &mut Command) -> bool {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            debug!(error = %e, "probe trial failed to spawn");
            return false;
        }
    };

    match tokio::time::timeout(TRIAL_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            debug!(error = %e, "probe trial wait failed");
            false
        }
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            false
        }
    }
}

/// Trial command validating one audio capture candidate.
fn audio_trial_command(format: &str, device: &str) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner")
        .arg("-f")
        .arg(format)
        .arg("-i")
        .arg(device)
        .arg("-t")
        .arg("0.5")
        .arg("-f")
        .arg("null")
        .arg("-");
    cmd
}

/// Resolve an audio source by trying each candidate with a short recording
/// trial. Falls back to generated silence rather than failing the launch.
pub async fn probe_audio_source(candidates: &[(&str, &str)]) -> AudioSource {
    for &(format, device) in candidates {
        let mut cmd = audio_trial_command(format, device);
        if run_trial(&mut cmd).await {
            info!(format, device, "audio source resolved");
            return AudioSource::Device {
                format: format.to_string(),
                device: device.to_string(),
            };
        }
        debug!(format, device, "audio candidate rejected");
    }
    warn!("no usable audio capture source, falling back to silence");
    AudioSource::Silence
}

/// Clock overlay filter for a given font file.
fn drawtext_filter(font: &str) -> String {
    format!(
        "drawtext=fontfile={}:text='%{{localtime}}':fontcolor=white:fontsize=24:x=8:y=8",
        font
    )
}

/// Trial command validating one overlay filter variant against a generated
/// one-frame source.
fn overlay_trial_command(filter: &str) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner")
        .arg("-f")
        .arg("lavfi")
        .arg("-i")
        .arg("color=c=black:s=320x240:r=1")
        .arg("-vf")
        .arg(filter)
        .arg("-frames:v")
        .arg("1")
        .arg("-f")
        .arg("null")
        .arg("-");
    cmd
}

/// Resolve a text-overlay filter, if the host can render one. Failure is
/// non-fatal; the launch proceeds without overlay.
pub async fn probe_overlay_filter() -> Option<String> {
    for &font in OVERLAY_FONTS {
        if !Path::new(font).exists() {
            continue;
        }
        let filter = drawtext_filter(font);
        let mut cmd = overlay_trial_command(&filter);
        if run_trial(&mut cmd).await {
            info!(font, "overlay filter resolved");
            return Some(filter);
        }
        debug!(font, "overlay variant rejected");
    }
    info!("no overlay capability, streaming without overlay");
    None
}
