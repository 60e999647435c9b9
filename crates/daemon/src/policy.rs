//! Reconnect policy.
//!
//! Given the outcome of one encoder session, decides whether to retry after
//! a fixed delay, rotate straight into a fresh session, or stop for good.
//! The delay is deliberately fixed rather than exponential: the endpoint
//! recovers on a roughly constant timescale and backing off further only
//! extends the outage.

use crate::monitor::RunOutcome;
use std::time::Duration;

/// What the supervisor should do after a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Launch again after the given delay, counted against the attempt ceiling.
    Retry(Duration),
    /// Launch again immediately; expected rotation, not a failure.
    RotateSession,
    /// Stop launching. Clean when the outcome was a scheduled end, terminal
    /// failure when the attempt ceiling was exhausted.
    StopPermanently,
}

/// Attempt tracking plus the decision rules.
///
/// The attempt counter is mutated only inside [`ReconnectPolicy::decide`]:
/// it rises on non-clean outcomes and resets to zero whenever a session ends
/// cleanly (scheduled end or full-duration rotation), so failures on one
/// broadcast day never bleed into the next.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    base_delay: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            attempts: 0,
        }
    }

    /// Reconnect attempts counted since the last clean session end.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide what happens after `outcome`.
    pub fn decide(&mut self, outcome: &RunOutcome) -> Decision {
        match outcome {
            RunOutcome::EndTimeReached => {
                self.attempts = 0;
                Decision::StopPermanently
            }
            RunOutcome::SessionTimeout => {
                self.attempts = 0;
                Decision::RotateSession
            }
            RunOutcome::ConnectionLost
            | RunOutcome::TooManyErrors
            | RunOutcome::ProcessDied(_)
            | RunOutcome::StartupFailed => {
                self.attempts += 1;
                if self.attempts > self.max_attempts {
                    Decision::StopPermanently
                } else {
                    Decision::Retry(self.base_delay)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::new(5, Duration::from_secs(30))
    }

    #[test]
    fn test_end_time_reached_stops_cleanly_and_resets() {
        let mut p = policy();
        p.decide(&RunOutcome::ConnectionLost);
        p.decide(&RunOutcome::ConnectionLost);
        assert_eq!(p.attempts(), 2);

        assert_eq!(p.decide(&RunOutcome::EndTimeReached), Decision::StopPermanently);
        assert_eq!(p.attempts(), 0);
    }

    #[test]
    fn test_session_timeout_rotates_immediately_and_resets() {
        let mut p = policy();
        p.decide(&RunOutcome::ProcessDied(Some(1)));
        assert_eq!(p.attempts(), 1);

        assert_eq!(p.decide(&RunOutcome::SessionTimeout), Decision::RotateSession);
        assert_eq!(p.attempts(), 0);
    }

    #[test]
    fn test_clean_eight_hour_session_leaves_counter_at_zero() {
        let mut p = policy();
        assert_eq!(p.decide(&RunOutcome::SessionTimeout), Decision::RotateSession);
        assert_eq!(p.attempts(), 0);
    }

    #[test]
    fn test_sixth_connection_loss_stops_never_earlier() {
        let mut p = policy();
        for attempt in 1..=5 {
            let decision = p.decide(&RunOutcome::ConnectionLost);
            assert_eq!(
                decision,
                Decision::Retry(Duration::from_secs(30)),
                "attempt {} should still retry",
                attempt
            );
            assert_eq!(p.attempts(), attempt);
        }
        assert_eq!(p.decide(&RunOutcome::ConnectionLost), Decision::StopPermanently);
        assert_eq!(p.attempts(), 6);
    }

    #[test]
    fn test_startup_failure_counts_like_other_failures() {
        let mut p = policy();
        assert_eq!(
            p.decide(&RunOutcome::StartupFailed),
            Decision::Retry(Duration::from_secs(30))
        );
        assert_eq!(p.attempts(), 1);
    }

    #[test]
    fn test_retry_delay_is_fixed() {
        let mut p = ReconnectPolicy::new(10, Duration::from_secs(7));
        for _ in 0..5 {
            assert_eq!(
                p.decide(&RunOutcome::TooManyErrors),
                Decision::Retry(Duration::from_secs(7))
            );
        }
    }

    fn outcome_strategy() -> impl Strategy<Value = RunOutcome> {
        prop_oneof![
            Just(RunOutcome::SessionTimeout),
            Just(RunOutcome::EndTimeReached),
            Just(RunOutcome::ConnectionLost),
            Just(RunOutcome::TooManyErrors),
            Just(RunOutcome::ProcessDied(Some(1))),
            Just(RunOutcome::ProcessDied(None)),
            Just(RunOutcome::StartupFailed),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        // The counter strictly increases only on non-clean outcomes and is
        // zero right after any clean one.
        #[test]
        fn prop_counter_moves_as_specified(
            outcomes in prop::collection::vec(outcome_strategy(), 0..40),
        ) {
            let mut p = ReconnectPolicy::new(5, Duration::from_secs(30));
            for outcome in &outcomes {
                let before = p.attempts();
                p.decide(outcome);
                match outcome {
                    RunOutcome::EndTimeReached | RunOutcome::SessionTimeout => {
                        prop_assert_eq!(p.attempts(), 0);
                    }
                    _ => prop_assert_eq!(p.attempts(), before + 1),
                }
            }
        }

        // Retry is only ever produced while at or below the ceiling.
        #[test]
        fn prop_retry_respects_ceiling(
            outcomes in prop::collection::vec(outcome_strategy(), 0..40),
            max_attempts in 1u32..8,
        ) {
            let mut p = ReconnectPolicy::new(max_attempts, Duration::from_secs(1));
            for outcome in &outcomes {
                match p.decide(outcome) {
                    Decision::Retry(_) => prop_assert!(p.attempts() <= max_attempts),
                    Decision::StopPermanently | Decision::RotateSession => {}
                }
            }
        }
    }
}
