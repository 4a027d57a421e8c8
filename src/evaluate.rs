use crate::config::Thresholds;
use crate::state::{AlertEvent, AlertKind, LogLine, Snapshot};

#[derive(Debug, Clone)]
pub struct AlertRules {
    pub thresholds: Thresholds,
    patterns: Vec<String>,
}

impl AlertRules {
    pub fn new(thresholds: Thresholds, patterns: &[String]) -> Self {
        Self {
            thresholds,
            patterns: patterns.iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// First pattern contained in `line`, ignoring case.
    pub fn matching_pattern(&self, line: &str) -> Option<&str> {
        let lowered = line.to_lowercase();
        self.patterns
            .iter()
            .find(|p| lowered.contains(p.as_str()))
            .map(String::as_str)
    }
}

pub fn evaluate(snapshot: &Snapshot, lines: &[LogLine], rules: &AlertRules) -> Vec<AlertEvent> {
    let mut events = Vec::new();

    let metrics = [
        (AlertKind::Cpu, "CPU", snapshot.cpu_percent, rules.thresholds.cpu_percent),
        (AlertKind::Mem, "Memory", snapshot.mem_percent, rules.thresholds.mem_percent),
        (AlertKind::Disk, "Disk", snapshot.disk_percent, rules.thresholds.disk_percent),
    ];
    for (kind, label, value, ceiling) in metrics {
        let Some(value) = value else { continue };
        if value > ceiling {
            events.push(AlertEvent {
                kind,
                message: format!("{label} usage high: {value:.1}% (threshold {ceiling:.1}%)"),
                timestamp: snapshot.timestamp,
                log_match: None,
            });
        }
    }

    for line in lines {
        if let Some(pattern) = rules.matching_pattern(&line.text) {
            events.push(AlertEvent {
                kind: AlertKind::LogPattern,
                message: format!("{} matched '{}': {}", line.file, pattern, line.text),
                timestamp: snapshot.timestamp,
                log_match: Some(line.clone()),
            });
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(cpu: f64) -> AlertRules {
        AlertRules::new(
            Thresholds {
                cpu_percent: cpu,
                mem_percent: 90.0,
                disk_percent: 90.0,
            },
            &["error".to_string(), "fail".to_string()],
        )
    }

    fn snapshot(cpu: f64) -> Snapshot {
        Snapshot {
            cpu_percent: Some(cpu),
            mem_percent: Some(40.0),
            disk_percent: Some(40.0),
            ..Snapshot::empty(100)
        }
    }

    fn line(text: &str) -> LogLine {
        LogLine {
            file: "/var/log/syslog".to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn cpu_above_ceiling_fires_once() {
        let events = evaluate(&snapshot(85.0), &[], &rules(80.0));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertKind::Cpu);
        assert_eq!(events[0].timestamp, 100);
    }

    #[test]
    fn cpu_below_or_at_ceiling_is_quiet() {
        assert!(evaluate(&snapshot(79.0), &[], &rules(80.0)).is_empty());
        assert!(evaluate(&snapshot(80.0), &[], &rules(80.0)).is_empty());
    }

    #[test]
    fn missing_metrics_never_fire() {
        let empty = Snapshot::empty(1);
        assert!(evaluate(&empty, &[], &rules(0.0)).is_empty());
    }

    #[test]
    fn log_lines_match_case_insensitively_once_per_line() {
        let lines = vec![
            line("kernel: disk ERROR, write FAILED"),
            line("all good"),
            line("sshd: auth failure"),
        ];
        let events = evaluate(&snapshot(10.0), &lines, &rules(80.0));
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == AlertKind::LogPattern));
        assert!(events[0].message.contains("'error'"));
        assert_eq!(events[1].log_match.as_ref().unwrap().text, "sshd: auth failure");
    }

    #[test]
    fn output_is_deterministic_and_ordered() {
        let mut snap = snapshot(95.0);
        snap.disk_percent = Some(99.0);
        let lines = vec![line("error one")];
        let first = evaluate(&snap, &lines, &rules(80.0));
        let second = evaluate(&snap, &lines, &rules(80.0));
        assert_eq!(first, second);
        let kinds: Vec<_> = first.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![AlertKind::Cpu, AlertKind::Disk, AlertKind::LogPattern]);
    }
}
