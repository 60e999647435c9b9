//! Encoder command construction.
//!
//! Builds the exact ffmpeg invocation for one capture-and-push session.

mod ffmpeg;

pub use ffmpeg::{build_ffmpeg_command, AudioSource, IngestUrl, StreamParams};
