//! Host resource sampling and the shared status snapshot.
//!
//! The supervisor and monitor publish their state here; the status server
//! serves it as JSON. Resource sampling failures degrade to zeroed fields
//! and are never fatal.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One host resource sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub disk_usage_percent: f32,
    /// Hottest reported sensor, if the host exposes any.
    pub temperature_c: Option<f32>,
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self {
            cpu_usage_percent: 0.0,
            mem_usage_percent: 0.0,
            disk_usage_percent: 0.0,
            temperature_c: None,
        }
    }
}

/// Complete status snapshot served by the local status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    pub timestamp_unix_ms: i64,
    /// Supervisor state: "starting", "waiting", "launching", "streaming",
    /// "reconnecting" or "stopped".
    pub state: String,
    /// Id of the live session, if one is running.
    pub session_id: Option<String>,
    /// Reconnect attempts since the last clean session end.
    pub attempt: u32,
    pub sessions_completed: u64,
    pub total_stream_secs: u64,
    pub last_outcome: Option<String>,
    pub window_start: String,
    pub window_end: String,
    pub system: SystemMetrics,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            timestamp_unix_ms: 0,
            state: "starting".to_string(),
            session_id: None,
            attempt: 0,
            sessions_completed: 0,
            total_stream_secs: 0,
            last_outcome: None,
            window_start: String::new(),
            window_end: String::new(),
            system: SystemMetrics::default(),
        }
    }
}

/// Shared status state for concurrent access across daemon components.
pub type SharedStatus = Arc<RwLock<StatusSnapshot>>;

/// Creates a new SharedStatus instance with default values.
pub fn new_shared_status() -> SharedStatus {
    Arc::new(RwLock::new(StatusSnapshot::default()))
}

/// Current timestamp in milliseconds since the Unix epoch.
pub fn unix_timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Collects one host resource sample using sysinfo.
pub fn collect_system_metrics() -> SystemMetrics {
    use sysinfo::{Components, Disks, System};

    let mut sys = System::new();
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let cpu_usage = sys.global_cpu_usage();
    let total_memory = sys.total_memory();
    let used_memory = sys.used_memory();
    let mem_usage = if total_memory > 0 {
        (used_memory as f64 / total_memory as f64 * 100.0) as f32
    } else {
        0.0
    };

    let disks = Disks::new_with_refreshed_list();
    let disk_usage = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == std::path::Path::new("/"))
        .or_else(|| disks.list().first())
        .map(|d| {
            let total = d.total_space();
            if total > 0 {
                let used = total.saturating_sub(d.available_space());
                (used as f64 / total as f64 * 100.0) as f32
            } else {
                0.0
            }
        })
        .unwrap_or(0.0);

    let components = Components::new_with_refreshed_list();
    let temperature = components
        .list()
        .iter()
        .map(|c| c.temperature())
        .filter(|t| t.is_finite() && *t > 0.0)
        .fold(None, |max: Option<f32>, t| {
            Some(max.map_or(t, |m| m.max(t)))
        });

    SystemMetrics {
        cpu_usage_percent: cpu_usage,
        mem_usage_percent: mem_usage,
        disk_usage_percent: disk_usage,
        temperature_c: temperature,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]
        #[test]
        fn prop_status_snapshot_round_trip(
            timestamp in any::<i64>(),
            attempt in 0u32..100,
            sessions_completed in any::<u64>(),
            total_stream_secs in any::<u64>(),
            cpu in 0.0f32..100.0,
            mem in 0.0f32..100.0,
            disk in 0.0f32..100.0,
            temp in proptest::option::of(10.0f32..110.0),
            has_session in proptest::bool::ANY,
        ) {
            let snapshot = StatusSnapshot {
                timestamp_unix_ms: timestamp,
                state: "streaming".to_string(),
                session_id: has_session.then(|| "3fa85f64-5717-4562-b3fc-2c963f66afa6".to_string()),
                attempt,
                sessions_completed,
                total_stream_secs,
                last_outcome: Some("session_timeout".to_string()),
                window_start: "05:00".to_string(),
                window_end: "20:00".to_string(),
                system: SystemMetrics {
                    cpu_usage_percent: cpu,
                    mem_usage_percent: mem,
                    disk_usage_percent: disk,
                    temperature_c: temp,
                },
            };

            let json = serde_json::to_string(&snapshot).expect("serialization should succeed");
            let deserialized: StatusSnapshot =
                serde_json::from_str(&json).expect("deserialization should succeed");

            prop_assert_eq!(snapshot, deserialized);
        }
    }

    #[test]
    fn test_default_snapshot_is_starting() {
        let snapshot = StatusSnapshot::default();
        assert_eq!(snapshot.state, "starting");
        assert_eq!(snapshot.attempt, 0);
        assert!(snapshot.session_id.is_none());
        assert!(snapshot.last_outcome.is_none());
    }

    #[test]
    fn test_unix_timestamp_is_reasonable() {
        let ts = unix_timestamp_ms();
        assert!(ts > 1577836800000); // Jan 1, 2020
    }

    #[test]
    fn test_collect_system_metrics_in_range() {
        let m = collect_system_metrics();
        assert!(m.mem_usage_percent >= 0.0 && m.mem_usage_percent <= 100.0);
        assert!(m.disk_usage_percent >= 0.0 && m.disk_usage_percent <= 100.0);
        if let Some(t) = m.temperature_c {
            assert!(t.is_finite());
        }
    }
}
