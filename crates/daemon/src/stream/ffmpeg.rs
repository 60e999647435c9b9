//! ffmpeg command builder for the RTMP push pipeline.
//!
//! Composes capture input, audio source, filter chain and CBR x264 output
//! settings into one argument list. The ingest URL embeds the stream key and
//! is the only secret in the process; [`IngestUrl`] keeps it out of every
//! log line and debug dump.

use std::fmt;
use tokio::process::Command;

/// Resolved audio input for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// A probed hardware capture source.
    Device { format: String, device: String },
    /// Generated silence; used when no hardware source survives probing or
    /// audio capture is disabled.
    Silence,
}

impl fmt::Display for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioSource::Device { format, device } => write!(f, "{}:{}", format, device),
            AudioSource::Silence => write!(f, "silence"),
        }
    }
}

/// RTMP destination with the embedded stream key.
///
/// `Display` and `Debug` both render the redacted form; the full URL is only
/// reachable through [`IngestUrl::as_str`], which exists solely to hand the
/// destination to the encoder command.
#[derive(Clone, PartialEq, Eq)]
pub struct IngestUrl {
    url: String,
    redacted: String,
}

impl IngestUrl {
    /// Build from the ingest base URL and the secret stream key.
    pub fn new(base: &str, key: &str) -> Self {
        let base = base.trim_end_matches('/');
        let prefix: String = key.chars().take(4).collect();
        Self {
            url: format!("{}/{}", base, key),
            redacted: format!("{}/{}...", base, prefix),
        }
    }

    /// The full URL including the secret key. Never log this.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Safe-to-display form with the key truncated to a short prefix.
    pub fn redacted(&self) -> &str {
        &self.redacted
    }
}

impl fmt::Display for IngestUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted)
    }
}

impl fmt::Debug for IngestUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted)
    }
}

/// Everything needed to compose one encoder invocation.
#[derive(Debug, Clone)]
pub struct StreamParams {
    /// Video4Linux device node.
    pub video_device: String,
    /// Input format requested from the device (e.g. "mjpeg").
    pub input_format: String,
    pub framerate: u32,
    /// Capture size, WxH.
    pub video_size: String,
    /// CBR video bitrate in kbit/s.
    pub video_bitrate_kbps: u32,
    /// Keyframe interval in frames.
    pub keyframe_interval: u32,
    pub audio_bitrate_kbps: u32,
    pub audio: AudioSource,
    /// Combined video filter chain (crop and/or overlay), if any.
    pub video_filter: Option<String>,
    /// Extra output arguments appended verbatim before the destination.
    pub extra_output_args: Vec<String>,
    pub destination: IngestUrl,
}

/// Build the ffmpeg command for one session.
///
/// The output leg is x264 ultrafast/zerolatency CBR with a pinned VBV buffer
/// of twice the bitrate plus AAC audio in an FLV container, which is what
/// the endpoint accepts for continuous live ingestion.
pub fn build_ffmpeg_command(params: &StreamParams) -> Command {
    let mut cmd = Command::new("ffmpeg");

    cmd.arg("-hide_banner");

    // Video capture input
    cmd.arg("-f").arg("v4l2");
    cmd.arg("-input_format").arg(&params.input_format);
    cmd.arg("-framerate").arg(params.framerate.to_string());
    cmd.arg("-video_size").arg(&params.video_size);
    cmd.arg("-i").arg(&params.video_device);

    // Audio input
    match &params.audio {
        AudioSource::Device { format, device } => {
            cmd.arg("-f").arg(format);
            cmd.arg("-i").arg(device);
        }
        AudioSource::Silence => {
            cmd.arg("-f").arg("lavfi");
            cmd.arg("-i")
                .arg("anullsrc=channel_layout=stereo:sample_rate=44100");
        }
    }

    if let Some(filter) = &params.video_filter {
        cmd.arg("-filter:v").arg(filter);
    }

    // Video encode: constant-bitrate x264 tuned for live latency
    let bitrate = params.video_bitrate_kbps;
    cmd.arg("-c:v").arg("libx264");
    cmd.arg("-preset").arg("ultrafast");
    cmd.arg("-tune").arg("zerolatency");
    cmd.arg("-x264-params").arg(format!(
        "bitrate={}:vbv-maxrate={}:vbv-bufsize={}:nal-hrd=cbr",
        bitrate,
        bitrate,
        bitrate * 2
    ));
    cmd.arg("-g").arg(params.keyframe_interval.to_string());
    cmd.arg("-pix_fmt").arg("yuv420p");

    // Audio encode
    cmd.arg("-c:a").arg("aac");
    cmd.arg("-b:a").arg(format!("{}k", params.audio_bitrate_kbps));
    cmd.arg("-ar").arg("44100");

    cmd.arg("-loglevel").arg("info");
    cmd.arg("-stats");

    for extra in &params.extra_output_args {
        cmd.arg(extra);
    }

    cmd.arg("-f").arg("flv");
    cmd.arg(params.destination.as_str());

    cmd
}
