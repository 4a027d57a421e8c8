use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One sampled set of host metrics. Metric fields stay `None` when the
/// collector could not read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: i64,
    pub cpu_percent: Option<f64>,
    pub mem_percent: Option<f64>,
    pub disk_percent: Option<f64>,
    #[serde(default)]
    pub net_bytes_sent: Option<u64>,
    #[serde(default)]
    pub net_bytes_recv: Option<u64>,
}

impl Snapshot {
    #[cfg(test)]
    pub fn empty(timestamp: i64) -> Self {
        Self {
            timestamp,
            cpu_percent: None,
            mem_percent: None,
            disk_percent: None,
            net_bytes_sent: None,
            net_bytes_recv: None,
        }
    }

    pub fn humanize(&self) -> String {
        format!(
            "CPU: {} | MEM: {} | DISK: {} | NET_SENT: {} | NET_RECV: {}",
            fmt_percent(self.cpu_percent),
            fmt_percent(self.mem_percent),
            fmt_percent(self.disk_percent),
            fmt_count(self.net_bytes_sent),
            fmt_count(self.net_bytes_recv),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Cpu,
    Mem,
    Disk,
    LogPattern,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::Cpu => "cpu",
            AlertKind::Mem => "mem",
            AlertKind::Disk => "disk",
            AlertKind::LogPattern => "log_pattern",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub message: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_match: Option<LogLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub file: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotificationStatus {
    Sent { recipients: usize },
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub snapshot: Snapshot,
    pub alerts: Vec<AlertEvent>,
    pub lines_read: usize,
    pub notification: NotificationStatus,
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub fn format_unix(ts: i64) -> String {
    if ts <= 0 {
        return "-".to_string();
    }
    let time = UNIX_EPOCH + Duration::from_secs(ts as u64);
    humantime::format_rfc3339_seconds(time).to_string()
}

fn fmt_percent(v: Option<f64>) -> String {
    match v {
        Some(v) => format!("{v:.1}%"),
        None => "n/a".to_string(),
    }
}

fn fmt_count(v: Option<u64>) -> String {
    match v {
        Some(v) => v.to_string(),
        None => "n/a".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn humanize_marks_missing_metrics() {
        let snapshot = Snapshot {
            cpu_percent: Some(12.345),
            disk_percent: Some(50.0),
            ..Snapshot::empty(1)
        };
        assert_eq!(
            snapshot.humanize(),
            "CPU: 12.3% | MEM: n/a | DISK: 50.0% | NET_SENT: n/a | NET_RECV: n/a"
        );
    }

    #[test]
    fn alert_kind_serializes_snake_case() {
        let json = serde_json::to_string(&AlertKind::LogPattern).unwrap();
        assert_eq!(json, "\"log_pattern\"");
    }

    #[test]
    fn format_unix_renders_rfc3339() {
        assert_eq!(format_unix(0), "-");
        assert_eq!(format_unix(86_400), "1970-01-02T00:00:00Z");
    }
}
