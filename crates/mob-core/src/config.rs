use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration loaded from `<mobdir>/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub associates: AssociatesConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub soldati: SoldatiConfig,
    #[serde(default)]
    pub general: GeneralConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            associates: AssociatesConfig::default(),
            safety: SafetyConfig::default(),
            soldati: SoldatiConfig::default(),
            general: GeneralConfig::default(),
        }
    }
}

impl Config {
    /// Load config from `path`, falling back to defaults when the file does
    /// not exist.
    pub fn load_or_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            return Config::default();
        }
        match Self::load(&path) {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "failed to load config, using defaults");
                Config::default()
            }
        }
    }

    /// Load from a specific path, failing if the file is missing or malformed.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(cfg)
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn default_path(mob_dir: &std::path::Path) -> PathBuf {
        mob_dir.join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "human".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_boot_check_interval")]
    pub boot_check_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_stuck_timeout")]
    pub stuck_timeout: Duration,
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            boot_check_interval: default_boot_check_interval(),
            stuck_timeout: default_stuck_timeout(),
            max_concurrent_agents: default_max_concurrent_agents(),
        }
    }
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(2 * 60)
}
fn default_boot_check_interval() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_stuck_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}
fn default_max_concurrent_agents() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociatesConfig {
    #[serde(with = "humantime_serde", default = "default_associate_timeout")]
    pub timeout: Duration,
    #[serde(default = "default_max_per_soldati")]
    pub max_per_soldati: u32,
    #[serde(with = "humantime_serde", default = "default_grace_period")]
    pub grace_period: Duration,
    #[serde(with = "humantime_serde", default = "default_cleanup_ttl")]
    pub cleanup_ttl: Duration,
}

impl Default for AssociatesConfig {
    fn default() -> Self {
        Self {
            timeout: default_associate_timeout(),
            max_per_soldati: default_max_per_soldati(),
            grace_period: default_grace_period(),
            cleanup_ttl: default_cleanup_ttl(),
        }
    }
}

fn default_associate_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}
fn default_max_per_soldati() -> u32 {
    3
}
fn default_grace_period() -> Duration {
    Duration::from_secs(2 * 60)
}
fn default_cleanup_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    #[serde(default = "default_command_blacklist")]
    pub command_blacklist: Vec<String>,
    #[serde(default = "default_require_review")]
    pub require_review: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            branch_prefix: default_branch_prefix(),
            command_blacklist: default_command_blacklist(),
            require_review: default_require_review(),
        }
    }
}

fn default_branch_prefix() -> String {
    "mob/".into()
}
fn default_command_blacklist() -> Vec<String> {
    vec!["sudo".into(), "rm -rf".into()]
}
fn default_require_review() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoldatiConfig {
    #[serde(default = "default_auto_name")]
    pub auto_name: bool,
    #[serde(with = "humantime_serde", default = "default_soldati_timeout")]
    pub default_timeout: Duration,
}

impl Default for SoldatiConfig {
    fn default() -> Self {
        Self {
            auto_name: default_auto_name(),
            default_timeout: default_soldati_timeout(),
        }
    }
}

fn default_auto_name() -> bool {
    true
}
fn default_soldati_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = Config::default();
        let text = cfg.to_toml().expect("serialize");
        let parsed: Config = toml::from_str(&text).expect("parse");
        assert_eq!(parsed.daemon.max_concurrent_agents, cfg.daemon.max_concurrent_agents);
        assert_eq!(parsed.associates.max_per_soldati, 3);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let parsed: Config = toml::from_str("").expect("empty toml still parses");
        assert_eq!(parsed.daemon.heartbeat_interval, Duration::from_secs(120));
        assert_eq!(parsed.safety.branch_prefix, "mob/");
    }

    #[test]
    fn load_or_default_survives_missing_file() {
        let cfg = Config::load_or_default("/nonexistent/path/config.toml");
        assert!(cfg.soldati.auto_name);
    }
}
