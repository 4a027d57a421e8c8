use crate::collectors::Sampler;
use crate::config::{Config, Thresholds};
use crate::evaluate::{evaluate, AlertRules};
use crate::metrics::Metrics;
use crate::notify::{DispatchOutcome, Dispatcher, SkipReason};
use crate::state::{AlertEvent, CycleReport, LogLine, NotificationStatus, Snapshot};
use crate::store::{StateStore, StoreError};
use crate::tail;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

const HISTORY_LEN: usize = 200;
const RECENT_ALERTS_LEN: usize = 50;

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to persist monitor state: {0}")]
    Store(#[from] StoreError),
}

pub struct Monitor {
    config: Arc<Config>,
    rules: AlertRules,
    sampler: Box<dyn Sampler>,
    store: Box<dyn StateStore>,
    dispatcher: Dispatcher,
    metrics: Arc<Metrics>,
    history: VecDeque<Snapshot>,
    recent_alerts: VecDeque<AlertEvent>,
    last_cycle_ts: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardState {
    pub last_snapshot: Option<Snapshot>,
    pub thresholds: Thresholds,
    pub offsets: BTreeMap<String, u64>,
    pub history: Vec<Snapshot>,
    pub recent_alerts: Vec<AlertEvent>,
    pub email_enabled: bool,
}

impl Monitor {
    pub fn new(
        config: Arc<Config>,
        sampler: Box<dyn Sampler>,
        store: Box<dyn StateStore>,
        dispatcher: Dispatcher,
        metrics: Arc<Metrics>,
    ) -> Self {
        let rules = AlertRules::new(config.thresholds, &config.log_patterns);
        let mut history = VecDeque::with_capacity(HISTORY_LEN);
        if let Some(last) = store.last_snapshot() {
            history.push_back(last);
        }
        Self {
            config,
            rules,
            sampler,
            store,
            dispatcher,
            metrics,
            history,
            recent_alerts: VecDeque::with_capacity(RECENT_ALERTS_LEN),
            last_cycle_ts: None,
        }
    }

    pub async fn run_cycle(&mut self, now_unix: i64) -> Result<CycleReport, CycleError> {
        // Reported timestamps never go backwards within a process. Cooldown
        // and the stored send time always use the wall clock.
        let timestamp = self.last_cycle_ts.map_or(now_unix, |prev| now_unix.max(prev));
        self.last_cycle_ts = Some(timestamp);

        let snapshot = self.sampler.sample(timestamp);
        for metric in self.sampler.failed_metrics() {
            self.metrics.inc_collect_error(metric);
        }
        info!(snapshot = %snapshot.humanize(), "snapshot");

        let lines = self.tail_logs();
        let alerts = evaluate(&snapshot, &lines, &self.rules);

        let notification = if alerts.is_empty() {
            info!("no thresholds breached and no log hits");
            NotificationStatus::Skipped {
                reason: "no alerts".to_string(),
            }
        } else {
            warn!(alerts = alerts.len(), "alerts triggered");
            let outcome = self
                .dispatcher
                .dispatch(&alerts, &snapshot, self.store.last_alert_sent_at(), now_unix)
                .await;
            self.record_outcome(outcome, now_unix)
        };

        self.metrics.update_from_snapshot(&snapshot);
        self.metrics.record_alerts(&alerts);
        self.remember(&snapshot, &alerts);

        self.store.set_last_snapshot(snapshot.clone());
        if let Err(err) = self.store.flush() {
            self.metrics.inc_cycle_error();
            return Err(err.into());
        }

        Ok(CycleReport {
            snapshot,
            alerts,
            lines_read: lines.len(),
            notification,
        })
    }

    fn tail_logs(&mut self) -> Vec<LogLine> {
        let mut out = Vec::new();
        for file in &self.config.log_files {
            let offset = self.store.offset(file).unwrap_or(0);
            let read = match tail::read_new_lines(Path::new(file), offset, self.config.max_read_bytes) {
                Ok(read) => read,
                Err(err) => {
                    warn!(file = %file, error = %err, "failed to read log file, skipping");
                    continue;
                }
            };
            if read.rotated {
                info!(file = %file, previous_offset = offset, "log file shrank, reading from start");
            }
            debug!(file = %file, lines = read.lines.len(), offset = read.offset, "log tailed");
            self.metrics.add_log_lines(file, read.lines.len());
            self.store.set_offset(file, read.offset);
            out.extend(read.lines.into_iter().map(|text| LogLine {
                file: file.clone(),
                text,
            }));
        }
        out
    }

    fn record_outcome(&mut self, outcome: DispatchOutcome, now_unix: i64) -> NotificationStatus {
        match outcome {
            DispatchOutcome::Sent { recipients } => {
                self.metrics.inc_email_sent();
                self.store.set_last_alert_sent_at(now_unix);
                NotificationStatus::Sent { recipients }
            }
            DispatchOutcome::Skipped(reason) => NotificationStatus::Skipped {
                reason: match reason {
                    SkipReason::NoAlerts => "no alerts".to_string(),
                    SkipReason::Disabled => "email disabled".to_string(),
                    SkipReason::Cooldown { remaining_secs } => {
                        format!("cooldown, {remaining_secs}s remaining")
                    }
                },
            },
            DispatchOutcome::Failed(err) => {
                self.metrics.inc_email_failure();
                NotificationStatus::Failed {
                    error: err.to_string(),
                }
            }
        }
    }

    fn remember(&mut self, snapshot: &Snapshot, alerts: &[AlertEvent]) {
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(snapshot.clone());
        for alert in alerts {
            if self.recent_alerts.len() == RECENT_ALERTS_LEN {
                self.recent_alerts.pop_front();
            }
            self.recent_alerts.push_back(alert.clone());
        }
    }

    pub fn dashboard_state(&self) -> DashboardState {
        DashboardState {
            last_snapshot: self.store.last_snapshot(),
            thresholds: self.config.thresholds,
            offsets: self.store.offsets(),
            history: self.history.iter().cloned().collect(),
            recent_alerts: self.recent_alerts.iter().rev().cloned().collect(),
            email_enabled: self.dispatcher.is_enabled(),
        }
    }

    pub fn log_tails(&self) -> BTreeMap<String, Vec<String>> {
        self.config
            .log_files
            .iter()
            .map(|file| {
                let lines = tail::last_lines(
                    Path::new(file),
                    self.config.dashboard_log_lines,
                    self.config.max_read_bytes,
                )
                .unwrap_or_else(|err| {
                    debug!(file = %file, error = %err, "log file not readable for dashboard");
                    Vec::new()
                });
                (file.clone(), lines)
            })
            .collect()
    }
}
