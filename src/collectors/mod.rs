pub mod system;

use crate::state::Snapshot;

pub trait Sampler: Send {
    fn sample(&mut self, timestamp: i64) -> Snapshot;

    /// Names of metrics the last `sample` call could not read.
    fn failed_metrics(&self) -> &[&'static str] {
        &[]
    }
}

#[cfg(test)]
#[derive(Debug, Clone)]
pub struct FixedSampler {
    pub template: Snapshot,
}

#[cfg(test)]
impl Sampler for FixedSampler {
    fn sample(&mut self, timestamp: i64) -> Snapshot {
        Snapshot {
            timestamp,
            ..self.template.clone()
        }
    }
}
