use crate::collectors::Sampler;
use crate::state::Snapshot;
use std::path::{Path, PathBuf};
use sysinfo::{CpuExt, DiskExt, NetworkExt, NetworksExt, System, SystemExt};
use tracing::{debug, warn};

/// Samples the local host through `sysinfo`. The `System` handle is kept
/// between cycles so CPU usage is measured over the time since the
/// previous sample.
pub struct SystemSampler {
    system: System,
    disk_path: PathBuf,
    failed: Vec<&'static str>,
}

impl SystemSampler {
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        // CPU usage needs two refreshes at least this far apart.
        std::thread::sleep(System::MINIMUM_CPU_UPDATE_INTERVAL);
        system.refresh_disks_list();
        system.refresh_networks_list();
        Self {
            system,
            disk_path: disk_path.into(),
            failed: Vec::new(),
        }
    }
}

impl Sampler for SystemSampler {
    fn sample(&mut self, timestamp: i64) -> Snapshot {
        let system = &mut self.system;
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_disks_list();
        system.refresh_disks();
        system.refresh_networks();

        let cpu_percent = if system.cpus().is_empty() {
            None
        } else {
            Some(system.global_cpu_info().cpu_usage() as f64)
        };

        let mem_percent = percent(system.used_memory(), system.total_memory());

        let disks: Vec<(PathBuf, u64, u64)> = system
            .disks()
            .iter()
            .map(|d| {
                (
                    d.mount_point().to_path_buf(),
                    d.total_space(),
                    d.available_space(),
                )
            })
            .collect();
        let disk_percent = disk_usage_for(&disks, &self.disk_path);

        let (net_bytes_sent, net_bytes_recv) = {
            let mut iter = system.networks().iter().peekable();
            if iter.peek().is_none() {
                (None, None)
            } else {
                let (tx, rx) = iter.fold((0_u64, 0_u64), |(tx, rx), (_, data)| {
                    (
                        tx.saturating_add(data.total_transmitted()),
                        rx.saturating_add(data.total_received()),
                    )
                });
                (Some(tx), Some(rx))
            }
        };

        let snapshot = Snapshot {
            timestamp,
            cpu_percent,
            mem_percent,
            disk_percent,
            net_bytes_sent,
            net_bytes_recv,
        };

        self.failed.clear();
        for (name, missing) in [
            ("cpu", snapshot.cpu_percent.is_none()),
            ("mem", snapshot.mem_percent.is_none()),
            ("disk", snapshot.disk_percent.is_none()),
            ("net", snapshot.net_bytes_sent.is_none()),
        ] {
            if missing {
                warn!(metric = name, "metric unavailable, snapshot is partial");
                self.failed.push(name);
            }
        }
        debug!(snapshot = %snapshot.humanize(), "host sampled");
        snapshot
    }

    fn failed_metrics(&self) -> &[&'static str] {
        &self.failed
    }
}

/// Usage of the filesystem holding `target`: the disk with the longest
/// mount point that is a prefix of the path.
fn disk_usage_for(disks: &[(PathBuf, u64, u64)], target: &Path) -> Option<f64> {
    disks
        .iter()
        .filter(|(mount, _, _)| target.starts_with(mount))
        .max_by_key(|(mount, _, _)| mount.components().count())
        .and_then(|(_, total, available)| percent(total.saturating_sub(*available), *total))
}

fn percent(used: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some((used as f64 / total as f64) * 100.0)
}
