use crate::state::{AlertEvent, Snapshot};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub hostwatch_cpu_usage_percent: Gauge,
    pub hostwatch_mem_usage_percent: Gauge,
    pub hostwatch_disk_usage_percent: Gauge,
    pub hostwatch_last_cycle_timestamp_seconds: Gauge,
    pub hostwatch_cycles_total: Counter,
    pub hostwatch_cycle_errors_total: Counter,
    pub hostwatch_collect_errors_total: CounterVec,
    pub hostwatch_alerts_total: CounterVec,
    pub hostwatch_log_lines_read_total: CounterVec,
    pub hostwatch_emails_sent_total: Counter,
    pub hostwatch_email_failures_total: Counter,
    pub hostwatch_scrape_count_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let hostwatch_cpu_usage_percent = Gauge::with_opts(opts!(
            "hostwatch_cpu_usage_percent",
            "CPU usage from the last snapshot in percent (0..100)"
        ))?;
        let hostwatch_mem_usage_percent = Gauge::with_opts(opts!(
            "hostwatch_mem_usage_percent",
            "Memory usage from the last snapshot in percent"
        ))?;
        let hostwatch_disk_usage_percent = Gauge::with_opts(opts!(
            "hostwatch_disk_usage_percent",
            "Usage of the watched filesystem from the last snapshot in percent"
        ))?;
        let hostwatch_last_cycle_timestamp_seconds = Gauge::with_opts(opts!(
            "hostwatch_last_cycle_timestamp_seconds",
            "Unix time of the last completed alert cycle"
        ))?;
        let hostwatch_cycles_total = Counter::with_opts(opts!(
            "hostwatch_cycles_total",
            "Alert cycles run, scheduled and manual"
        ))?;
        let hostwatch_cycle_errors_total = Counter::with_opts(opts!(
            "hostwatch_cycle_errors_total",
            "Alert cycles that failed to persist state"
        ))?;
        let hostwatch_collect_errors_total = CounterVec::new(
            opts!(
                "hostwatch_collect_errors_total",
                "Metric collection failures by metric"
            ),
            &["metric"],
        )?;
        let hostwatch_alerts_total = CounterVec::new(
            opts!("hostwatch_alerts_total", "Alert events raised by kind"),
            &["kind"],
        )?;
        let hostwatch_log_lines_read_total = CounterVec::new(
            opts!(
                "hostwatch_log_lines_read_total",
                "Lines read from watched log files"
            ),
            &["file"],
        )?;
        let hostwatch_emails_sent_total = Counter::with_opts(opts!(
            "hostwatch_emails_sent_total",
            "Alert emails delivered to the SMTP server"
        ))?;
        let hostwatch_email_failures_total = Counter::with_opts(opts!(
            "hostwatch_email_failures_total",
            "Alert emails that failed to send"
        ))?;
        let hostwatch_scrape_count_total = Counter::with_opts(opts!(
            "hostwatch_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;

        register(&registry, &hostwatch_cpu_usage_percent)?;
        register(&registry, &hostwatch_mem_usage_percent)?;
        register(&registry, &hostwatch_disk_usage_percent)?;
        register(&registry, &hostwatch_last_cycle_timestamp_seconds)?;
        register(&registry, &hostwatch_cycles_total)?;
        register(&registry, &hostwatch_cycle_errors_total)?;
        register(&registry, &hostwatch_collect_errors_total)?;
        register(&registry, &hostwatch_alerts_total)?;
        register(&registry, &hostwatch_log_lines_read_total)?;
        register(&registry, &hostwatch_emails_sent_total)?;
        register(&registry, &hostwatch_email_failures_total)?;
        register(&registry, &hostwatch_scrape_count_total)?;

        Ok(Arc::new(Self {
            registry,
            hostwatch_cpu_usage_percent,
            hostwatch_mem_usage_percent,
            hostwatch_disk_usage_percent,
            hostwatch_last_cycle_timestamp_seconds,
            hostwatch_cycles_total,
            hostwatch_cycle_errors_total,
            hostwatch_collect_errors_total,
            hostwatch_alerts_total,
            hostwatch_log_lines_read_total,
            hostwatch_emails_sent_total,
            hostwatch_email_failures_total,
            hostwatch_scrape_count_total,
        }))
    }

    pub fn update_from_snapshot(&self, snapshot: &Snapshot) {
        self.hostwatch_cycles_total.inc();
        self.hostwatch_last_cycle_timestamp_seconds
            .set(snapshot.timestamp as f64);
        if let Some(v) = snapshot.cpu_percent {
            self.hostwatch_cpu_usage_percent.set(v);
        }
        if let Some(v) = snapshot.mem_percent {
            self.hostwatch_mem_usage_percent.set(v);
        }
        if let Some(v) = snapshot.disk_percent {
            self.hostwatch_disk_usage_percent.set(v);
        }
    }

    pub fn record_alerts(&self, alerts: &[AlertEvent]) {
        for alert in alerts {
            self.hostwatch_alerts_total
                .with_label_values(&[alert.kind.as_str()])
                .inc();
        }
    }

    pub fn add_log_lines(&self, file: &str, count: usize) {
        self.hostwatch_log_lines_read_total
            .with_label_values(&[file])
            .inc_by(count as f64);
    }

    pub fn inc_collect_error(&self, metric: &str) {
        self.hostwatch_collect_errors_total
            .with_label_values(&[metric])
            .inc();
    }

    pub fn inc_cycle_error(&self) {
        self.hostwatch_cycle_errors_total.inc();
    }

    pub fn inc_email_sent(&self) {
        self.hostwatch_emails_sent_total.inc();
    }

    pub fn inc_email_failure(&self) {
        self.hostwatch_email_failures_total.inc();
    }

    pub fn inc_scrape_count(&self) {
        self.hostwatch_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
