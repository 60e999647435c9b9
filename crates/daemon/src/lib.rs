//! Livecast Daemon
//!
//! Background service that keeps a scheduled daily RTMP broadcast alive:
//! schedules the window, launches and monitors the external encoder,
//! classifies its diagnostic output, and reconnects through transient
//! failures up to a bounded attempt ceiling.

pub mod classify;
pub mod launch;
pub mod lifecycle;
pub mod metrics;
pub mod monitor;
pub mod policy;
pub mod schedule;
pub mod shutdown;
pub mod startup;
pub mod status_server;
pub mod stream;
pub mod supervisor;

pub use livecast_daemon_config as config;
pub use livecast_daemon_config::{Config, ConfigError};

pub use classify::{elapsed_hint, match_rule, DiagClassifier, DiagnosticEvent, RuleKind};
pub use launch::{probe_audio_source, probe_overlay_filter, LaunchError, Launcher, Session};
pub use lifecycle::LifecycleController;
pub use metrics::{
    collect_system_metrics, new_shared_status, SharedStatus, StatusSnapshot, SystemMetrics,
};
pub use monitor::{drain_pending, spawn_diag_reader, RunOutcome, SessionMonitor};
pub use policy::{Decision, ReconnectPolicy};
pub use schedule::{resolve, ScheduleWindow, WindowStatus};
pub use shutdown::wait_for_shutdown_signal;
pub use startup::{check_ffmpeg_available, run_startup_checks, StartupError};
pub use status_server::{create_status_router, run_status_server, ServerError};
pub use stream::{build_ffmpeg_command, AudioSource, IngestUrl, StreamParams};
pub use supervisor::{CumulativeStats, DaemonError, Supervisor};
