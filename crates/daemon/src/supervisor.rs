//! Top-level supervision loop.
//!
//! Composes the schedule, launcher, monitor, reconnect policy and lifecycle
//! controller: waits for the broadcast window, launches the encoder, runs one
//! session at a time, and decides after each outcome whether to retry,
//! rotate or stop. An external stop is a cancellation token observed at
//! every wait point; the signal handler only sets the token and returns.

use crate::launch::{Launcher, Session};
use crate::lifecycle::LifecycleController;
use crate::metrics::{
    collect_system_metrics, new_shared_status, unix_timestamp_ms, SharedStatus, StatusSnapshot,
};
use crate::monitor::{RunOutcome, SessionMonitor};
use crate::policy::{Decision, ReconnectPolicy};
use crate::schedule::{self, ScheduleWindow};
use crate::startup::{run_startup_checks, StartupError};
use crate::status_server::run_status_server;
use crate::stream::IngestUrl;
use chrono::{Local, NaiveDateTime};
use livecast_daemon_config::{Config, ConfigError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// The reconnect attempt ceiling was exhausted
    #[error("giving up after {attempts} failed reconnect attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Stream time accumulated across sessions for the lifetime of one
/// supervisor run; reset only on program restart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CumulativeStats {
    pub total_stream_time: Duration,
    pub sessions_completed: u64,
}

/// Upper bound on one slice of schedule waiting, so cancellation and clock
/// changes are observed promptly rather than only at hour-long boundaries.
const WAIT_CHUNK: Duration = Duration::from_secs(30);

/// How one broadcast day ended.
enum DayEnd {
    WindowClosed,
    Cancelled,
}

/// Supervisor state containing all runtime components
#[derive(Debug)]
pub struct Supervisor {
    config: Config,
    window: ScheduleWindow,
    launcher: Launcher,
    monitor: SessionMonitor,
    policy: ReconnectPolicy,
    lifecycle: LifecycleController,
    cancel: CancellationToken,
    status: SharedStatus,
    stats: CumulativeStats,
}

impl Supervisor {
    /// Initialize the supervisor with a loaded configuration.
    ///
    /// Resolves the stream key (environment first, config file second) and
    /// runs preflight checks; any failure here exits the process before a
    /// single encoder launch is attempted.
    pub fn new(config: Config) -> Result<Self, DaemonError> {
        config.validate()?;
        let key = config.resolve_stream_key()?;
        run_startup_checks()?;

        let destination = IngestUrl::new(&config.stream.rtmp_base, &key);
        let window = ScheduleWindow::new(
            config.schedule.start_time()?,
            config.schedule.end_time()?,
        );
        let monitor = SessionMonitor::new(
            Duration::from_secs(config.session.max_duration_secs),
            config.session.error_ceiling,
        );
        let policy = ReconnectPolicy::new(
            config.session.max_reconnect_attempts,
            Duration::from_secs(config.session.reconnect_delay_secs),
        );
        let launcher = Launcher::new(config.clone(), destination.clone());

        info!(window = %window, destination = %destination, "supervisor configured");

        Ok(Self {
            config,
            window,
            launcher,
            monitor,
            policy,
            lifecycle: LifecycleController::default(),
            cancel: CancellationToken::new(),
            status: new_shared_status(),
            stats: CumulativeStats::default(),
        })
    }

    /// Token observed by every wait point. The external-signal entry point
    /// cancels it and returns promptly.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Get the shared status state
    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    /// Start the status HTTP server, if enabled in the configuration.
    pub fn start_status_server(&self) -> Option<JoinHandle<()>> {
        if !self.config.status_server.enabled {
            return None;
        }
        let status = self.status.clone();
        let port = self.config.status_server.port;
        Some(tokio::spawn(async move {
            if let Err(e) = run_status_server(status, port).await {
                error!(error = %e, "status server error");
            }
        }))
    }

    /// Start the background task refreshing host metrics in the snapshot.
    pub fn start_status_updater(&self) -> JoinHandle<()> {
        let status = self.status.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {
                        let metrics = collect_system_metrics();
                        let mut snapshot = status.write().await;
                        snapshot.system = metrics;
                        snapshot.timestamp_unix_ms = unix_timestamp_ms();
                    }
                }
            }
        })
    }

    /// Run the supervisor with the status server and updater started.
    pub async fn run_with_status_server(&mut self) -> Result<(), DaemonError> {
        let _server_handle = self.start_status_server();
        let _updater_handle = self.start_status_updater();
        self.run().await
    }

    /// Run the supervisor loop until cancellation or a terminal failure.
    pub async fn run(&mut self) -> Result<(), DaemonError> {
        {
            let mut snapshot = self.status.write().await;
            snapshot.window_start = self.window.start.format("%H:%M").to_string();
            snapshot.window_end = self.window.end.format("%H:%M").to_string();
        }

        let result = self.supervise().await;

        info!(
            total_stream_secs = self.stats.total_stream_time.as_secs(),
            sessions = self.stats.sessions_completed,
            "supervisor stopped"
        );
        self.publish(|s| {
            s.state = "stopped".to_string();
            s.session_id = None;
        })
        .await;

        result
    }

    async fn supervise(&mut self) -> Result<(), DaemonError> {
        let mut was_waiting = false;

        loop {
            if self.cancel.is_cancelled() {
                info!("stop requested, exiting supervisor loop");
                return Ok(());
            }

            // Re-resolve on every wake rather than trusting one precomputed
            // boundary; tolerates clock changes and interrupted sleeps.
            let now = Local::now().naive_local();
            let window_status = schedule::resolve(now, &self.window);

            if !window_status.active_now {
                if !was_waiting {
                    let wait = window_status.next_boundary - now;
                    info!(
                        next_start = %window_status.next_boundary,
                        wait_hours = wait.num_seconds() as f64 / 3600.0,
                        "outside broadcast window, waiting"
                    );
                    self.publish(|s| {
                        s.state = "waiting".to_string();
                        s.session_id = None;
                    })
                    .await;
                    was_waiting = true;
                }
                let until = (window_status.next_boundary - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if self.idle(until.min(WAIT_CHUNK)).await {
                    return Ok(());
                }
                continue;
            }

            was_waiting = false;
            match self.run_broadcast_day(window_status.next_boundary).await? {
                DayEnd::Cancelled => return Ok(()),
                DayEnd::WindowClosed => continue,
            }
        }
    }

    /// Launch-and-monitor cycle for one open broadcast window.
    async fn run_broadcast_day(
        &mut self,
        window_end: NaiveDateTime,
    ) -> Result<DayEnd, DaemonError> {
        info!(until = %window_end, "broadcast window open");

        loop {
            if self.cancel.is_cancelled() {
                return Ok(DayEnd::Cancelled);
            }
            if Local::now().naive_local() >= window_end {
                self.close_day();
                return Ok(DayEnd::WindowClosed);
            }

            let attempt = self.policy.attempts() + 1;
            let attempts_so_far = self.policy.attempts();
            self.publish(move |s| {
                s.state = "launching".to_string();
                s.attempt = attempts_so_far;
            })
            .await;
            info!(
                attempt,
                max = self.policy.max_attempts() + 1,
                "launching encoder"
            );

            let outcome = match self.launcher.launch(attempt).await {
                Ok(session) => match self.run_session(session, window_end).await {
                    Some(outcome) => outcome,
                    None => return Ok(DayEnd::Cancelled),
                },
                Err(e) => {
                    warn!(error = %e, attempt, "encoder launch failed");
                    RunOutcome::StartupFailed
                }
            };

            info!(outcome = outcome.as_str(), "session ended");
            self.publish(move |s| {
                s.last_outcome = Some(outcome.as_str().to_string());
                s.session_id = None;
            })
            .await;

            match self.policy.decide(&outcome) {
                Decision::RotateSession => {
                    info!("rotating into a fresh session");
                    continue;
                }
                Decision::Retry(delay) => {
                    let attempts = self.policy.attempts();
                    warn!(
                        attempts,
                        max_attempts = self.policy.max_attempts(),
                        delay_secs = delay.as_secs(),
                        "session failed, retrying after delay"
                    );
                    self.publish(move |s| {
                        s.state = "reconnecting".to_string();
                        s.attempt = attempts;
                    })
                    .await;
                    if self.idle(delay).await {
                        return Ok(DayEnd::Cancelled);
                    }
                    continue;
                }
                Decision::StopPermanently => {
                    if outcome == RunOutcome::EndTimeReached {
                        self.close_day();
                        return Ok(DayEnd::WindowClosed);
                    }
                    let attempts = self.policy.attempts();
                    error!(attempts, "reconnect attempts exhausted, giving up");
                    return Err(DaemonError::RetriesExhausted { attempts });
                }
            }
        }
    }

    /// Monitor one live session to its end, always terminating through the
    /// lifecycle controller. Returns `None` when cancelled externally; the
    /// session is already fully stopped in that case.
    async fn run_session(
        &mut self,
        session: Session,
        window_end: NaiveDateTime,
    ) -> Option<RunOutcome> {
        let session_id = session.id;
        let started_at = session.started_at;
        self.publish(move |s| {
            s.state = "streaming".to_string();
            s.session_id = Some(session_id.to_string());
        })
        .await;

        let mut session = session;
        let outcome = {
            let monitor_run = self.monitor.run(&mut session, window_end, &self.status);
            tokio::pin!(monitor_run);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(session = %session_id, "stop requested, terminating live session");
                    None
                }
                outcome = &mut monitor_run => Some(outcome),
            }
        };

        // Exactly one session is ever live: the next launch only happens
        // after this one is confirmed fully stopped.
        let mut slot = Some(session);
        self.lifecycle.terminate(&mut slot).await;

        self.stats.total_stream_time += started_at.elapsed();
        self.stats.sessions_completed += 1;
        let total_secs = self.stats.total_stream_time.as_secs();
        let sessions = self.stats.sessions_completed;
        self.publish(move |s| {
            s.total_stream_secs = total_secs;
            s.sessions_completed = sessions;
        })
        .await;

        outcome
    }

    fn close_day(&mut self) {
        info!(
            total_stream_hours = self.stats.total_stream_time.as_secs_f64() / 3600.0,
            sessions = self.stats.sessions_completed,
            "broadcast day closed cleanly"
        );
    }

    /// Interruptible sleep; returns true when cancelled.
    async fn idle(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    async fn publish<F: FnOnce(&mut StatusSnapshot)>(&self, update: F) {
        let mut snapshot = self.status.write().await;
        update(&mut snapshot);
        snapshot.timestamp_unix_ms = unix_timestamp_ms();
    }

    /// Cumulative statistics for this supervisor run.
    pub fn stats(&self) -> CumulativeStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_missing_stream_key_fails_before_startup_checks() {
        let _guard = ENV_MUTEX.lock().unwrap();
        std::env::remove_var("STREAM_KEY");

        let config = Config::default();
        let err = Supervisor::new(config).unwrap_err();
        assert!(matches!(
            err,
            DaemonError::Config(ConfigError::MissingStreamKey)
        ));
    }

    #[test]
    fn test_invalid_schedule_fails_before_startup_checks() {
        let _guard = ENV_MUTEX.lock().unwrap();
        std::env::remove_var("STREAM_KEY");

        let mut config = Config::default();
        config.schedule.start = "26:00".to_string();
        config.stream.stream_key = Some("k".repeat(16));

        let err = Supervisor::new(config).unwrap_err();
        assert!(matches!(
            err,
            DaemonError::Config(ConfigError::InvalidTime { .. })
        ));
    }

    #[test]
    fn test_cumulative_stats_default() {
        let stats = CumulativeStats::default();
        assert_eq!(stats.total_stream_time, Duration::ZERO);
        assert_eq!(stats.sessions_completed, 0);
    }

    #[test]
    fn test_retries_exhausted_message_carries_count() {
        let err = DaemonError::RetriesExhausted { attempts: 6 };
        assert!(err.to_string().contains('6'));
    }
}
