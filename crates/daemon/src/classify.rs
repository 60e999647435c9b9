//! Classifier for the encoder's diagnostic stream.
//!
//! The encoder reports connection failures and progress statistics alike as
//! free text on its error channel. This module maps each line to a small set
//! of event categories using an ordered rule table of case-insensitive
//! substring patterns; the first matching rule wins.

use std::time::{Duration, Instant};

/// Timestamp-ordering warnings are only surfaced every Nth occurrence to
/// bound logging volume; the encoder can emit thousands per hour.
const TIMESTAMP_WARNING_EVERY: u64 = 100;

/// Minimum wall-time gap between surfaced progress reports.
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Event category produced for one diagnostic line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticEvent {
    /// The encoder lost its connection to the streaming endpoint.
    ConnectionLost,
    /// A generic error line; carries the running per-session error count.
    Error(u32),
    /// Every Nth timestamp-ordering warning; carries the occurrence count.
    TimestampWarning(u64),
    /// A rate-limited progress report, with the elapsed-time hint if the
    /// line carried one.
    Progress(Option<String>),
    /// Anything else; not logged at normal verbosity.
    Unclassified,
}

/// Category a raw pattern rule maps to, before session-state bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    ConnectionLost,
    TimestampWarning,
    GenericError,
    Progress,
}

/// Ordered rule table; earlier rules take precedence. A line containing both
/// "broken pipe" and "error" therefore classifies as a connection loss, not
/// a generic error.
const RULES: &[(&str, RuleKind)] = &[
    ("broken pipe", RuleKind::ConnectionLost),
    ("connection reset", RuleKind::ConnectionLost),
    ("non-monotonous", RuleKind::TimestampWarning),
    ("error", RuleKind::GenericError),
    ("frame=", RuleKind::Progress),
];

/// Match a line against the rule table. Pure; extracted from the stateful
/// classifier for direct testing.
pub fn match_rule(line: &str) -> Option<RuleKind> {
    let lower = line.to_lowercase();
    RULES
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(_, kind)| *kind)
}

/// Extract the `time=` elapsed hint from an encoder progress line.
pub fn elapsed_hint(line: &str) -> Option<String> {
    let rest = line.split("time=").nth(1)?;
    let hint = rest.split_whitespace().next()?;
    if hint.is_empty() {
        None
    } else {
        Some(hint.to_string())
    }
}

/// Stateful per-session classifier.
///
/// Stateless per line apart from two counters scoped to the current session
/// and the progress rate-limit clock. A fresh classifier is created for every
/// session so counts never leak across restarts.
#[derive(Debug)]
pub struct DiagClassifier {
    error_count: u32,
    timestamp_warning_count: u64,
    last_progress_at: Option<Instant>,
}

impl Default for DiagClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagClassifier {
    pub fn new() -> Self {
        Self {
            error_count: 0,
            timestamp_warning_count: 0,
            last_progress_at: None,
        }
    }

    /// Generic error lines seen so far this session.
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Timestamp-ordering warnings seen so far this session.
    pub fn timestamp_warning_count(&self) -> u64 {
        self.timestamp_warning_count
    }

    /// Classify one diagnostic line.
    pub fn classify(&mut self, line: &str) -> DiagnosticEvent {
        self.classify_at(line, Instant::now())
    }

    /// Classify with an explicit clock, so rate limiting is testable.
    pub fn classify_at(&mut self, line: &str, now: Instant) -> DiagnosticEvent {
        match match_rule(line) {
            Some(RuleKind::ConnectionLost) => DiagnosticEvent::ConnectionLost,
            Some(RuleKind::TimestampWarning) => {
                self.timestamp_warning_count += 1;
                if self.timestamp_warning_count % TIMESTAMP_WARNING_EVERY == 0 {
                    DiagnosticEvent::TimestampWarning(self.timestamp_warning_count)
                } else {
                    DiagnosticEvent::Unclassified
                }
            }
            Some(RuleKind::GenericError) => {
                self.error_count += 1;
                DiagnosticEvent::Error(self.error_count)
            }
            Some(RuleKind::Progress) => {
                let due = self
                    .last_progress_at
                    .map_or(true, |at| now.duration_since(at) >= PROGRESS_LOG_INTERVAL);
                if due {
                    self.last_progress_at = Some(now);
                    DiagnosticEvent::Progress(elapsed_hint(line))
                } else {
                    DiagnosticEvent::Unclassified
                }
            }
            None => DiagnosticEvent::Unclassified,
        }
    }
}
