use lettre::message::Mailbox;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    pub log_files: Vec<String>,
    #[serde(default = "default_log_patterns")]
    pub log_patterns: Vec<String>,
    #[serde(default = "default_max_read_bytes")]
    pub max_read_bytes: u64,
    #[serde(default = "default_disk_path")]
    pub disk_path: String,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    #[serde(default = "default_alert_cooldown_secs")]
    pub alert_cooldown_secs: u64,
    #[serde(default = "default_dashboard_log_lines")]
    pub dashboard_log_lines: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Thresholds {
    #[serde(default = "default_threshold_percent")]
    pub cpu_percent: f64,
    #[serde(default = "default_threshold_percent")]
    pub mem_percent: f64,
    #[serde(default = "default_threshold_percent")]
    pub disk_percent: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    /// Empty disables email, same as leaving the section out.
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_username_env")]
    pub username_env: String,
    #[serde(default = "default_password_env")]
    pub password_env: String,
    #[serde(default)]
    pub from: String,
    #[serde(default = "default_recipients")]
    pub to: Recipients,
    #[serde(default = "default_subject")]
    pub subject: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Recipients {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Recipients::One(addr) => vec![addr.clone()],
            Recipients::Many(addrs) => addrs.clone(),
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_percent: default_threshold_percent(),
            mem_percent: default_threshold_percent(),
            disk_percent: default_threshold_percent(),
        }
    }
}

impl SmtpConfig {
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(if self.use_tls { 587 } else { 25 })
    }

    /// Username from the environment if set, otherwise from the file.
    pub fn resolve_username(&self) -> Option<String> {
        resolve_secret(&self.username_env, self.username.as_deref())
    }

    pub fn resolve_password(&self) -> Option<String> {
        resolve_secret(&self.password_env, self.password.as_deref())
    }
}

fn resolve_secret(env_name: &str, from_file: Option<&str>) -> Option<String> {
    if let Ok(v) = std::env::var(env_name) {
        if !v.trim().is_empty() {
            return Some(v);
        }
    }
    from_file
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse JSON in {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;
        Self::from_json(&text).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path_display,
                source,
            },
            other => other,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let mut cfg: Config = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        if cfg
            .smtp
            .as_ref()
            .is_some_and(|smtp| smtp.server.trim().is_empty())
        {
            cfg.smtp = None;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "interval_secs must be >= 1".to_string(),
            ));
        }
        if self.state_file.trim().is_empty() {
            return Err(ConfigError::Validation(
                "state_file must not be empty".to_string(),
            ));
        }
        if self.log_files.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "log_files entries must not be empty".to_string(),
            ));
        }
        if self.log_patterns.iter().any(|p| p.is_empty()) {
            return Err(ConfigError::Validation(
                "log_patterns entries must not be empty".to_string(),
            ));
        }
        if self.max_read_bytes == 0 {
            return Err(ConfigError::Validation(
                "max_read_bytes must be > 0".to_string(),
            ));
        }

        validate_thresholds(&self.thresholds)?;
        if let Some(smtp) = &self.smtp {
            validate_smtp(smtp)?;
        }

        Ok(())
    }

    pub fn example_json() -> &'static str {
        include_str!("../config.json.example")
    }
}

fn validate_thresholds(t: &Thresholds) -> Result<(), ConfigError> {
    for (name, value) in [
        ("cpu_percent", t.cpu_percent),
        ("mem_percent", t.mem_percent),
        ("disk_percent", t.disk_percent),
    ] {
        if !(0.0..=100.0).contains(&value) {
            return Err(ConfigError::Validation(format!(
                "thresholds.{name} must be within 0..100"
            )));
        }
    }
    Ok(())
}

fn validate_smtp(cfg: &SmtpConfig) -> Result<(), ConfigError> {
    if cfg.port == Some(0) {
        return Err(ConfigError::Validation(
            "smtp.port must be within 1..65535".to_string(),
        ));
    }
    if cfg.from.parse::<Mailbox>().is_err() {
        return Err(ConfigError::Validation(format!(
            "smtp.from '{}' is not a valid address",
            cfg.from
        )));
    }
    let to = cfg.to.to_vec();
    if to.is_empty() {
        return Err(ConfigError::Validation(
            "smtp.to needs at least one recipient".to_string(),
        ));
    }
    for addr in &to {
        if addr.parse::<Mailbox>().is_err() {
            return Err(ConfigError::Validation(format!(
                "smtp.to '{addr}' is not a valid address"
            )));
        }
    }
    Ok(())
}

fn default_listen() -> String {
    "127.0.0.1:5000".to_string()
}

const fn default_interval_secs() -> u64 {
    60
}

fn default_state_file() -> String {
    "monitor_state.json".to_string()
}

fn default_log_patterns() -> Vec<String> {
    ["error", "fail", "critical", "unauthorized"]
        .into_iter()
        .map(String::from)
        .collect()
}

const fn default_max_read_bytes() -> u64 {
    200_000
}

fn default_disk_path() -> String {
    "/".to_string()
}

const fn default_threshold_percent() -> f64 {
    90.0
}

const fn default_use_tls() -> bool {
    true
}

fn default_username_env() -> String {
    "HOSTWATCH_SMTP_USERNAME".to_string()
}

fn default_password_env() -> String {
    "HOSTWATCH_SMTP_PASSWORD".to_string()
}

fn default_recipients() -> Recipients {
    Recipients::Many(Vec::new())
}

fn default_subject() -> String {
    "ALERT: Linux Monitor".to_string()
}

const fn default_alert_cooldown_secs() -> u64 {
    300
}

const fn default_dashboard_log_lines() -> usize {
    200
}
