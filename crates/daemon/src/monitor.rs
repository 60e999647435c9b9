//! Single-session monitoring loop.
//!
//! Drives one run of the encoder: watches for process exit, enforces the
//! maximum session duration (proactive rotation) and the scheduled end time,
//! classifies diagnostic output, and samples host resources on a fixed
//! cadence. A dedicated reader task drains the encoder's stderr into a
//! bounded channel so the loop itself never blocks on I/O.

use crate::classify::{match_rule, DiagClassifier, DiagnosticEvent, RuleKind};
use crate::launch::Session;
use crate::metrics::{collect_system_metrics, SharedStatus};
use chrono::{Local, NaiveDateTime};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Why a session ended. Produced exactly once per monitor run and consumed
/// by the reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The session hit its maximum duration; rotate proactively.
    SessionTimeout,
    /// The broadcast window closed.
    EndTimeReached,
    /// The encoder reported losing its connection to the endpoint.
    ConnectionLost,
    /// The per-session error ceiling was reached.
    TooManyErrors,
    /// The encoder exited on its own with the given code.
    ProcessDied(Option<i32>),
    /// The encoder never survived its startup grace period.
    StartupFailed,
}

impl RunOutcome {
    /// Clean outcomes are expected session ends, not failures.
    pub fn is_clean(&self) -> bool {
        matches!(self, RunOutcome::SessionTimeout | RunOutcome::EndTimeReached)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::SessionTimeout => "session_timeout",
            RunOutcome::EndTimeReached => "end_time_reached",
            RunOutcome::ConnectionLost => "connection_lost",
            RunOutcome::TooManyErrors => "too_many_errors",
            RunOutcome::ProcessDied(_) => "process_died",
            RunOutcome::StartupFailed => "startup_failed",
        }
    }
}

/// Capacity of the diagnostic line channel. Large enough to absorb a burst
/// of encoder output between two monitor polls.
pub const DIAG_CHANNEL_CAPACITY: usize = 256;

/// Spawn the reader task draining the encoder's stderr.
///
/// Splits on both newlines and carriage returns, since the encoder rewrites
/// its progress line with bare `\r`, and forwards non-empty trimmed lines into
/// a bounded channel. The task ends on stream EOF or when the receiver is
/// dropped; it only observes the stream and never touches the process
/// handle's lifecycle.
pub fn spawn_diag_reader(stderr: ChildStderr) -> (mpsc::Receiver<String>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(DIAG_CHANNEL_CAPACITY);
    let handle = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        'outer: while let Ok(Some(raw)) = lines.next_line().await {
            for piece in raw.split('\r') {
                let line = piece.trim();
                if line.is_empty() {
                    continue;
                }
                if tx.send(line.to_string()).await.is_err() {
                    break 'outer;
                }
            }
        }
        debug!("diagnostic reader finished");
    });
    (rx, handle)
}

/// Drain whatever lines are currently buffered without waiting.
pub fn drain_pending(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(line) = rx.try_recv() {
        lines.push(line);
    }
    lines
}

/// Outcome for a process that exited on its own, reclassifying deaths whose
/// buffered output carries a connection-loss signature.
pub fn died_outcome(code: Option<i32>, pending: &[String]) -> RunOutcome {
    let lost = pending
        .iter()
        .any(|line| matches!(match_rule(line), Some(RuleKind::ConnectionLost)));
    if lost {
        RunOutcome::ConnectionLost
    } else {
        RunOutcome::ProcessDied(code)
    }
}

/// Per-session monitoring loop configuration and driver.
#[derive(Debug, Clone)]
pub struct SessionMonitor {
    /// Maximum session duration before proactive rotation.
    pub max_session_duration: Duration,
    /// Error-line count at which the session is abandoned.
    pub error_ceiling: u32,
    /// Host resource sampling cadence.
    pub resource_log_interval: Duration,
    /// Sleep between loop iterations.
    pub poll_interval: Duration,
}

impl SessionMonitor {
    pub fn new(max_session_duration: Duration, error_ceiling: u32) -> Self {
        Self {
            max_session_duration,
            error_ceiling,
            resource_log_interval: Duration::from_secs(600),
            poll_interval: Duration::from_millis(250),
        }
    }

    /// Run the loop until the session ends, returning exactly one outcome.
    pub async fn run(
        &self,
        session: &mut Session,
        window_end: NaiveDateTime,
        status: &SharedStatus,
    ) -> RunOutcome {
        let mut classifier = DiagClassifier::new();
        let mut last_resource_at = Instant::now();

        loop {
            // Process exit beats every other condition; inspect whatever
            // output is still buffered before deciding what the death means.
            match session.child.try_wait() {
                Ok(Some(exit)) => {
                    let pending = drain_pending(&mut session.diag_rx);
                    let outcome = died_outcome(exit.code(), &pending);
                    match outcome {
                        RunOutcome::ConnectionLost => warn!(
                            code = ?exit.code(),
                            "encoder died with a connection-loss signature in its final output"
                        ),
                        _ => warn!(code = ?exit.code(), "encoder process exited unexpectedly"),
                    }
                    for line in pending.iter().rev().take(10).rev() {
                        debug!(line = %line, "final encoder output");
                    }
                    return outcome;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "failed to poll encoder process state");
                    return RunOutcome::ProcessDied(None);
                }
            }

            let elapsed = session.started_at.elapsed();
            if elapsed >= self.max_session_duration {
                info!(
                    elapsed_secs = elapsed.as_secs(),
                    "maximum session duration reached, rotating session"
                );
                return RunOutcome::SessionTimeout;
            }

            if Local::now().naive_local() >= window_end {
                info!("broadcast window end reached, stopping session");
                return RunOutcome::EndTimeReached;
            }

            if let Ok(line) = session.diag_rx.try_recv() {
                match classifier.classify(&line) {
                    DiagnosticEvent::ConnectionLost => {
                        warn!(line = %line, "encoder reported connection loss");
                        return RunOutcome::ConnectionLost;
                    }
                    DiagnosticEvent::Error(count) => {
                        warn!(count, line = %line, "encoder error");
                        if count >= self.error_ceiling {
                            error!(
                                count,
                                ceiling = self.error_ceiling,
                                "error ceiling reached, abandoning session"
                            );
                            return RunOutcome::TooManyErrors;
                        }
                    }
                    DiagnosticEvent::TimestampWarning(occurrences) => {
                        warn!(occurrences, "encoder timestamp-ordering warnings continue");
                    }
                    DiagnosticEvent::Progress(hint) => {
                        info!(elapsed = hint.as_deref().unwrap_or("?"), "stream progress");
                    }
                    DiagnosticEvent::Unclassified => trace!(line = %line, "encoder output"),
                }
            }

            if last_resource_at.elapsed() >= self.resource_log_interval {
                last_resource_at = Instant::now();
                let metrics = collect_system_metrics();
                info!(
                    cpu = metrics.cpu_usage_percent,
                    mem = metrics.mem_usage_percent,
                    disk = metrics.disk_usage_percent,
                    temp = ?metrics.temperature_c,
                    "host resources"
                );
                status.write().await.system = metrics;
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::Session;
    use crate::metrics::new_shared_status;
    use chrono::Duration as ChronoDuration;
    use std::process::Stdio;
    use tokio::process::Command;
    use uuid::Uuid;

    /// Spawn a shell command standing in for the encoder.
    fn spawn_fake(script: &str) -> Session {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().expect("spawn fake encoder");
        let stderr = child.stderr.take().expect("stderr piped");
        let (diag_rx, reader) = spawn_diag_reader(stderr);
        Session {
            id: Uuid::new_v4(),
            child,
            started_at: Instant::now(),
            attempt: 1,
            diag_rx,
            reader,
        }
    }

    fn monitor() -> SessionMonitor {
        let mut m = SessionMonitor::new(Duration::from_secs(3600), 50);
        m.poll_interval = Duration::from_millis(20);
        m
    }

    fn far_window_end() -> NaiveDateTime {
        Local::now().naive_local() + ChronoDuration::hours(2)
    }

    #[tokio::test]
    async fn test_connection_loss_line_ends_session() {
        let mut session = spawn_fake("echo 'Broken pipe detected, error' 1>&2; sleep 30");
        let outcome = monitor()
            .run(&mut session, far_window_end(), &new_shared_status())
            .await;
        assert_eq!(outcome, RunOutcome::ConnectionLost);
        let _ = session.child.start_kill();
        let _ = session.child.wait().await;
    }

    #[tokio::test]
    async fn test_process_exit_reports_code() {
        let mut session = spawn_fake("exit 3");
        let outcome = monitor()
            .run(&mut session, far_window_end(), &new_shared_status())
            .await;
        assert_eq!(outcome, RunOutcome::ProcessDied(Some(3)));
    }

    #[tokio::test]
    async fn test_death_with_buffered_loss_reclassifies() {
        // The encoder prints the loss and dies before the monitor reads it.
        let mut session = spawn_fake("echo 'Connection reset by peer' 1>&2; exit 1");
        // Let the process die and the reader flush before the first poll.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let outcome = monitor()
            .run(&mut session, far_window_end(), &new_shared_status())
            .await;
        assert_eq!(outcome, RunOutcome::ConnectionLost);
    }

    #[tokio::test]
    async fn test_session_timeout_rotates() {
        let mut session = spawn_fake("sleep 30");
        let mut m = monitor();
        m.max_session_duration = Duration::from_millis(50);
        let outcome = m
            .run(&mut session, far_window_end(), &new_shared_status())
            .await;
        assert_eq!(outcome, RunOutcome::SessionTimeout);
        let _ = session.child.start_kill();
        let _ = session.child.wait().await;
    }

    #[tokio::test]
    async fn test_window_end_stops_session() {
        let mut session = spawn_fake("sleep 30");
        let past_end = Local::now().naive_local() - ChronoDuration::minutes(1);
        let outcome = monitor()
            .run(&mut session, past_end, &new_shared_status())
            .await;
        assert_eq!(outcome, RunOutcome::EndTimeReached);
        let _ = session.child.start_kill();
        let _ = session.child.wait().await;
    }

    #[tokio::test]
    async fn test_error_ceiling_abandons_session() {
        let mut session =
            spawn_fake("for i in 1 2 3; do echo \"error $i\" 1>&2; done; sleep 30");
        let mut m = monitor();
        m.error_ceiling = 3;
        let outcome = m
            .run(&mut session, far_window_end(), &new_shared_status())
            .await;
        assert_eq!(outcome, RunOutcome::TooManyErrors);
        let _ = session.child.start_kill();
        let _ = session.child.wait().await;
    }

    #[tokio::test]
    async fn test_reader_splits_carriage_returns() {
        let mut session = spawn_fake(
            "printf 'frame= 1 time=00:00:01\\rframe= 2 time=00:00:02\\n' 1>&2; sleep 5",
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        let lines = drain_pending(&mut session.diag_rx);
        assert_eq!(
            lines,
            vec![
                "frame= 1 time=00:00:01".to_string(),
                "frame= 2 time=00:00:02".to_string()
            ]
        );
        let _ = session.child.start_kill();
        let _ = session.child.wait().await;
    }

    #[test]
    fn test_died_outcome_reclassification() {
        let clean: Vec<String> = vec!["muxing overhead: 0.5%".to_string()];
        assert_eq!(died_outcome(Some(0), &clean), RunOutcome::ProcessDied(Some(0)));

        let lost = vec!["av_interleaved_write_frame(): Broken pipe".to_string()];
        assert_eq!(died_outcome(Some(1), &lost), RunOutcome::ConnectionLost);

        assert_eq!(died_outcome(None, &[]), RunOutcome::ProcessDied(None));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(RunOutcome::SessionTimeout.as_str(), "session_timeout");
        assert_eq!(RunOutcome::ProcessDied(Some(1)).as_str(), "process_died");
        assert!(RunOutcome::SessionTimeout.is_clean());
        assert!(RunOutcome::EndTimeReached.is_clean());
        assert!(!RunOutcome::ConnectionLost.is_clean());
        assert!(!RunOutcome::StartupFailed.is_clean());
    }
}
