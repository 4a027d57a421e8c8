use crate::state::Snapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write state file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait StateStore: Send {
    fn offset(&self, path: &str) -> Option<u64>;
    fn set_offset(&mut self, path: &str, offset: u64);
    fn offsets(&self) -> BTreeMap<String, u64>;
    fn last_snapshot(&self) -> Option<Snapshot>;
    fn set_last_snapshot(&mut self, snapshot: Snapshot);
    fn last_alert_sent_at(&self) -> Option<i64>;
    fn set_last_alert_sent_at(&mut self, ts: i64);
    fn flush(&mut self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub offsets: BTreeMap<String, u64>,
    #[serde(default)]
    pub last_snapshot: Option<Snapshot>,
    #[serde(default)]
    pub last_alert_sent_at: Option<i64>,
}

impl PersistedState {
    fn offset(&self, path: &str) -> Option<u64> {
        self.offsets.get(path).copied()
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: PersistedState,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl StateStore for MemoryStore {
    fn offset(&self, path: &str) -> Option<u64> {
        self.state.offset(path)
    }

    fn set_offset(&mut self, path: &str, offset: u64) {
        self.state.offsets.insert(path.to_string(), offset);
    }

    fn offsets(&self) -> BTreeMap<String, u64> {
        self.state.offsets.clone()
    }

    fn last_snapshot(&self) -> Option<Snapshot> {
        self.state.last_snapshot.clone()
    }

    fn set_last_snapshot(&mut self, snapshot: Snapshot) {
        self.state.last_snapshot = Some(snapshot);
    }

    fn last_alert_sent_at(&self) -> Option<i64> {
        self.state.last_alert_sent_at
    }

    fn set_last_alert_sent_at(&mut self, ts: i64) {
        self.state.last_alert_sent_at = Some(ts);
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: PersistedState,
}

impl JsonFileStore {
    /// Opens `path`, starting empty when the file is missing or unreadable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(state) => state,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "state file is corrupt, starting empty");
                    PersistedState::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "state file is unreadable, starting empty");
                PersistedState::default()
            }
        };
        Self { path, state }
    }
}

impl StateStore for JsonFileStore {
    fn offset(&self, path: &str) -> Option<u64> {
        self.state.offset(path)
    }

    fn set_offset(&mut self, path: &str, offset: u64) {
        self.state.offsets.insert(path.to_string(), offset);
    }

    fn offsets(&self) -> BTreeMap<String, u64> {
        self.state.offsets.clone()
    }

    fn last_snapshot(&self) -> Option<Snapshot> {
        self.state.last_snapshot.clone()
    }

    fn set_last_snapshot(&mut self, snapshot: Snapshot) {
        self.state.last_snapshot = Some(snapshot);
    }

    fn last_alert_sent_at(&self) -> Option<i64> {
        self.state.last_alert_sent_at
    }

    fn set_last_alert_sent_at(&mut self, ts: i64) {
        self.state.last_alert_sent_at = Some(ts);
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec_pretty(&self.state)?;
        let write_err = |source| StoreError::Write {
            path: self.path.display().to_string(),
            source,
        };

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, encoded).map_err(write_err)?;
        fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }
}
