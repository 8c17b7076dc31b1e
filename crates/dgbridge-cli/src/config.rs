//! Bridge settings – reads/writes `~/.dgbridge/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persisted settings stored in `~/.dgbridge/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Suffix appended to the registry names (`rosExport<suffix>` ...).
    #[serde(default)]
    pub suffix: String,

    /// Minimum spacing between two publications of one binding.
    #[serde(default = "default_publish_rate_ms")]
    pub publish_rate_ms: u64,

    /// Oldest transform the listener accepts before falling back.
    #[serde(default = "default_max_staleness_ms")]
    pub max_staleness_ms: u64,

    /// Period of the scheduler loop.
    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,

    /// Serve the bus to rosbridge clients.
    #[serde(default = "default_ws_enabled")]
    pub ws_enabled: bool,

    /// rosbridge WebSocket port.
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    /// Topic carrying stamped transforms for the transform buffer.
    #[serde(default = "default_tf_topic")]
    pub tf_topic: String,
}

fn default_publish_rate_ms() -> u64 {
    10
}
fn default_max_staleness_ms() -> u64 {
    500
}
fn default_tick_period_ms() -> u64 {
    10
}
fn default_ws_enabled() -> bool {
    true
}
fn default_ws_port() -> u16 {
    9090
}
fn default_tf_topic() -> String {
    "/tf".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            suffix: String::new(),
            publish_rate_ms: default_publish_rate_ms(),
            max_staleness_ms: default_max_staleness_ms(),
            tick_period_ms: default_tick_period_ms(),
            ws_enabled: default_ws_enabled(),
            ws_port: default_ws_port(),
            tf_topic: default_tf_topic(),
        }
    }
}

impl Config {
    pub fn publish_rate(&self) -> Duration {
        Duration::from_millis(self.publish_rate_ms)
    }

    pub fn max_staleness(&self) -> Duration {
        Duration::from_millis(self.max_staleness_ms)
    }

    /// Never zero, so the tick loop always sleeps.
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms.max(1))
    }

    pub fn ws_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.ws_port))
    }
}

/// Return the path to `~/.dgbridge/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".dgbridge").join("config.toml")
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Load the config, writing the defaults on first run.
pub fn load_or_init() -> Result<Config, String> {
    load_or_init_at(&config_path())
}

pub(crate) fn load_or_init_at(path: &Path) -> Result<Config, String> {
    if let Some(cfg) = load_from(path)? {
        return Ok(cfg);
    }
    let defaults = Config::default();
    save_to(&defaults, path)?;
    let mut cfg = defaults;
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Apply `DGBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `DGBRIDGE_PUBLISH_RATE_MS` | `publish_rate_ms` |
/// | `DGBRIDGE_MAX_STALENESS_MS` | `max_staleness_ms` |
/// | `DGBRIDGE_TICK_PERIOD_MS` | `tick_period_ms` |
/// | `DGBRIDGE_WS_PORT` | `ws_port` |
///
/// Unparsable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(ms) = env_parse("DGBRIDGE_PUBLISH_RATE_MS") {
        cfg.publish_rate_ms = ms;
    }
    if let Some(ms) = env_parse("DGBRIDGE_MAX_STALENESS_MS") {
        cfg.max_staleness_ms = ms;
    }
    if let Some(ms) = env_parse("DGBRIDGE_TICK_PERIOD_MS") {
        cfg.tick_period_ms = ms;
    }
    if let Some(port) = env_parse("DGBRIDGE_WS_PORT") {
        cfg.ws_port = port;
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|v| v.trim().parse().ok())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.max_staleness(), Duration::from_millis(500));
        assert_eq!(loaded.tf_topic, "/tf");
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "suffix = \"_left\"\nws_enabled = false\n").expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.suffix, "_left");
        assert!(!loaded.ws_enabled);
        assert_eq!(loaded.tick_period_ms, 10);
    }

    #[test]
    fn first_run_writes_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());

        load_or_init_at(&path).expect("init");
        assert!(path.exists());
        let written = std::fs::read_to_string(&path).expect("read");
        assert!(written.contains("publish_rate_ms = 10"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "publish_rate_ms = \"fast\"").expect("write");
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn config_path_points_to_dgbridge_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".dgbridge"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn zero_tick_period_is_clamped() {
        let cfg = Config {
            tick_period_ms: 0,
            ..Config::default()
        };
        assert_eq!(cfg.tick_period(), Duration::from_millis(1));
    }

    #[test]
    fn apply_env_overrides_changes_publish_rate() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("DGBRIDGE_PUBLISH_RATE_MS", "100") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.publish_rate_ms, 100);
        unsafe { std::env::remove_var("DGBRIDGE_PUBLISH_RATE_MS") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_port() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("DGBRIDGE_WS_PORT", "not-a-port") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.ws_port, 9090);
        unsafe { std::env::remove_var("DGBRIDGE_WS_PORT") };
    }
}
