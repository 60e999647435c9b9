//! Broadcast window scheduling.
//!
//! Pure time-of-day computation deciding whether the encoder should be live
//! right now and when the next start/stop boundary occurs. Windows may cross
//! midnight (`start > end`), and `start == end` denotes a 24-hour window.

use chrono::{Duration, NaiveDateTime, NaiveTime};

/// Daily broadcast window, immutable once built for a broadcast day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ScheduleWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Whether the window crosses midnight.
    pub fn is_overnight(&self) -> bool {
        self.start > self.end
    }
}

impl std::fmt::Display for ScheduleWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

/// Result of resolving a window against the current wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStatus {
    /// Whether the encoder should be live right now.
    pub active_now: bool,
    /// Nearest future instant at which the activity state flips. For a
    /// 24-hour window (which never flips) this is the next occurrence of
    /// `start`, so callers never compute a zero-length wait.
    pub next_boundary: NaiveDateTime,
}

/// Resolve the window against `now`.
///
/// - `start < end`: active on `[start, end)` of the same day.
/// - `start > end`: active on `[start, 24:00) ∪ [00:00, end)`.
/// - `start == end`: always active.
///
/// If `now` falls exactly on a boundary, the *next* distinct boundary is
/// returned. Callers should re-resolve after every wake rather than trusting
/// one precomputed boundary, to tolerate clock changes and interrupted sleeps.
pub fn resolve(now: NaiveDateTime, window: &ScheduleWindow) -> WindowStatus {
    let t = now.time();

    let active_now = if window.start < window.end {
        window.start <= t && t < window.end
    } else if window.start > window.end {
        t >= window.start || t < window.end
    } else {
        true
    };

    let boundary_time = if window.start == window.end {
        window.start
    } else if active_now {
        window.end
    } else {
        window.start
    };

    WindowStatus {
        active_now,
        next_boundary: next_occurrence(now, boundary_time),
    }
}

/// Nearest strictly-future occurrence of a time of day.
fn next_occurrence(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let candidate = now.date().and_time(at);
    if candidate > now {
        candidate
    } else {
        candidate + Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn dt(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_time(t(h, m))
    }

    #[test]
    fn test_same_day_window_waits_until_start() {
        // Window 04:00-20:00, now 03:00: inactive, boundary one hour away.
        let window = ScheduleWindow::new(t(4, 0), t(20, 0));
        let status = resolve(dt(3, 0), &window);

        assert!(!status.active_now);
        assert_eq!(status.next_boundary, dt(4, 0));
        assert_eq!((status.next_boundary - dt(3, 0)).num_seconds(), 3600);
    }

    #[test]
    fn test_overnight_window_active_with_next_day_end() {
        // Window 22:00-02:00, now 23:00: active, end boundary is next-day 02:00.
        let window = ScheduleWindow::new(t(22, 0), t(2, 0));
        let status = resolve(dt(23, 0), &window);

        assert!(status.active_now);
        assert_eq!(
            status.next_boundary,
            NaiveDate::from_ymd_opt(2024, 6, 16).unwrap().and_time(t(2, 0))
        );
    }

    #[test]
    fn test_overnight_window_active_before_end() {
        let window = ScheduleWindow::new(t(22, 0), t(2, 0));
        let status = resolve(dt(1, 30), &window);

        assert!(status.active_now);
        assert_eq!(status.next_boundary, dt(2, 0));
    }

    #[test]
    fn test_overnight_window_inactive_midday() {
        let window = ScheduleWindow::new(t(22, 0), t(2, 0));
        let status = resolve(dt(12, 0), &window);

        assert!(!status.active_now);
        assert_eq!(status.next_boundary, dt(22, 0));
    }

    #[test]
    fn test_active_at_start_inactive_at_end() {
        let window = ScheduleWindow::new(t(4, 0), t(20, 0));
        assert!(resolve(dt(4, 0), &window).active_now);
        assert!(!resolve(dt(20, 0), &window).active_now);
    }

    #[test]
    fn test_boundary_equality_yields_next_distinct_boundary() {
        // Exactly at start: the reported boundary is the end, not "now".
        let window = ScheduleWindow::new(t(4, 0), t(20, 0));
        let status = resolve(dt(4, 0), &window);
        assert_eq!(status.next_boundary, dt(20, 0));

        // Exactly at end: 04:00 of the same day has passed, so the boundary
        // is the next-day start.
        let status = resolve(dt(20, 0), &window);
        assert_eq!(
            status.next_boundary,
            NaiveDate::from_ymd_opt(2024, 6, 16).unwrap().and_time(t(4, 0))
        );
    }

    #[test]
    fn test_equal_start_end_is_always_active() {
        let window = ScheduleWindow::new(t(7, 0), t(7, 0));
        for hour in 0..24 {
            let status = resolve(dt(hour, 30), &window);
            assert!(status.active_now, "hour {} should be active", hour);
            assert!(status.next_boundary > dt(hour, 30));
        }
    }

    #[test]
    fn test_display_format() {
        let window = ScheduleWindow::new(t(5, 0), t(20, 30));
        assert_eq!(window.to_string(), "05:00-20:30");
    }

    prop_compose! {
        fn time_strategy()(h in 0u32..24, m in 0u32..60) -> NaiveTime {
            NaiveTime::from_hms_opt(h, m, 0).unwrap()
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        // Same-day windows are active exactly on [start, end).
        #[test]
        fn prop_same_day_activity(
            start in time_strategy(),
            end in time_strategy(),
            now in time_strategy(),
        ) {
            prop_assume!(start < end);
            let window = ScheduleWindow::new(start, end);
            let now_dt = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap().and_time(now);
            let status = resolve(now_dt, &window);
            prop_assert_eq!(status.active_now, start <= now && now < end);
        }

        // Overnight windows are active exactly on [start, 24:00) ∪ [00:00, end).
        #[test]
        fn prop_overnight_activity(
            start in time_strategy(),
            end in time_strategy(),
            now in time_strategy(),
        ) {
            prop_assume!(start > end);
            let window = ScheduleWindow::new(start, end);
            let now_dt = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap().and_time(now);
            let status = resolve(now_dt, &window);
            prop_assert_eq!(status.active_now, now >= start || now < end);
        }

        // The boundary is strictly in the future and no more than 24h away,
        // and re-resolving at the boundary flips or re-arms, never loops on
        // the same instant.
        #[test]
        fn prop_boundary_strictly_future(
            start in time_strategy(),
            end in time_strategy(),
            now in time_strategy(),
        ) {
            let window = ScheduleWindow::new(start, end);
            let now_dt = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap().and_time(now);
            let status = resolve(now_dt, &window);

            prop_assert!(status.next_boundary > now_dt);
            prop_assert!(status.next_boundary - now_dt <= Duration::days(1));

            let at_boundary = resolve(status.next_boundary, &window);
            prop_assert!(at_boundary.next_boundary > status.next_boundary);
        }

        // At the reported boundary of a non-degenerate window the activity
        // state has actually flipped.
        #[test]
        fn prop_boundary_flips_state(
            start in time_strategy(),
            end in time_strategy(),
            now in time_strategy(),
        ) {
            prop_assume!(start != end);
            let window = ScheduleWindow::new(start, end);
            let now_dt = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap().and_time(now);
            let status = resolve(now_dt, &window);
            let flipped = resolve(status.next_boundary, &window);
            prop_assert_ne!(status.active_now, flipped.active_now);
        }
    }
}
