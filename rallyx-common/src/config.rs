//! Bootstrap configuration loading
//!
//! Two-tier configuration:
//! 1. **TOML bootstrap**: database path, HTTP port, logging, device list,
//!    loop timings and scoring rule data. Read once at startup.
//! 2. **Database registry**: everything that changes while running (active
//!    event, desired device addresses, start/finish disable flags, ...).
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `RALLYX_CONFIG` environment variable
//! 3. `~/.config/rallyx/rallyx.toml`, then `/etc/rallyx/rallyx.toml`
//! 4. Built-in defaults (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "RALLYX_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Control API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub devices: DevicesConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub recalc: RecalcConfig,

    #[serde(default)]
    pub rules: RulesConfig,

    #[serde(default)]
    pub sounds: SoundsConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            http_port: default_http_port(),
            logging: LoggingConfig::default(),
            devices: DevicesConfig::default(),
            timing: TimingConfig::default(),
            recalc: RecalcConfig::default(),
            rules: RulesConfig::default(),
            sounds: SoundsConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides it
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Which pollers run in this process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesConfig {
    /// Enabled device names (`tag_heuer`, `rfid_reader`, `barcode_scanner`)
    #[serde(default = "default_devices")]
    pub enabled: Vec<String>,

    /// Frame barcode scans by read idle timeout instead of a NUL terminator
    #[serde(default)]
    pub barcode_idle_framing: bool,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            enabled: default_devices(),
            barcode_idle_framing: false,
        }
    }
}

/// Poller and watchdog loop timings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// How often a poller re-reads its desired address from the registry
    #[serde(default = "default_address_poll_ms")]
    pub address_poll_ms: u64,

    /// Timeout of a single link read
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Sleep after a read returned no data
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,

    /// Sleep between reopen attempts while closed
    #[serde(default = "default_reopen_sleep_ms")]
    pub reopen_sleep_ms: u64,

    /// Watchdog check interval
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,

    /// A poller that has not reported for this long counts as dead
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,

    /// Identical tag reads inside this window are ignored
    #[serde(default = "default_tag_repeat_ms")]
    pub tag_repeat_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            address_poll_ms: default_address_poll_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            idle_sleep_ms: default_idle_sleep_ms(),
            reopen_sleep_ms: default_reopen_sleep_ms(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
            tag_repeat_ms: default_tag_repeat_ms(),
        }
    }
}

/// Recalculation worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalcConfig {
    /// Safety sweep period for dirty rows nobody signalled
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RecalcConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Scoring rule data shared by every rule-set variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Seconds added per cone
    #[serde(default = "default_cone_penalty")]
    pub cone_penalty_s: i64,

    /// Seconds added per missed gate
    #[serde(default = "default_gate_penalty")]
    pub gate_penalty_s: i64,

    /// Seconds added to a substituted (bogey) time
    #[serde(default = "default_dnf_penalty")]
    pub dnf_penalty_s: i64,

    /// Valid car class codes
    #[serde(default = "default_car_classes")]
    pub car_classes: Vec<String>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            cone_penalty_s: default_cone_penalty(),
            gate_penalty_s: default_gate_penalty(),
            dnf_penalty_s: default_dnf_penalty(),
            car_classes: default_car_classes(),
        }
    }
}

/// Alert sound configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SoundsConfig {
    /// Directory holding `<cue>.wav` files; no sounds when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("rallyx").join("scoring.db"))
        .unwrap_or_else(|| PathBuf::from("./rallyx_data/scoring.db"))
}

fn default_http_port() -> u16 {
    5730
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_devices() -> Vec<String> {
    vec![
        "tag_heuer".to_string(),
        "rfid_reader".to_string(),
        "barcode_scanner".to_string(),
    ]
}

fn default_address_poll_ms() -> u64 {
    3000
}

fn default_read_timeout_ms() -> u64 {
    50
}

fn default_idle_sleep_ms() -> u64 {
    100
}

fn default_reopen_sleep_ms() -> u64 {
    1000
}

fn default_watchdog_interval_ms() -> u64 {
    1000
}

fn default_liveness_timeout_ms() -> u64 {
    5000
}

fn default_tag_repeat_ms() -> u64 {
    3000
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_cone_penalty() -> i64 {
    2
}

fn default_gate_penalty() -> i64 {
    10
}

fn default_dnf_penalty() -> i64 {
    10
}

fn default_car_classes() -> Vec<String> {
    ["TO", "SA", "PA", "MA", "SF", "PF", "MF", "SR", "PR", "MR"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

/// Resolve which config file to read, if any
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: user then system config file
    let user_config = dirs::config_dir().map(|d| d.join("rallyx").join("rallyx.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }
    let system_config = PathBuf::from("/etc/rallyx/rallyx.toml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Load bootstrap configuration, falling back to defaults when no file exists.
///
/// An explicitly named file that cannot be read or parsed is an error.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg) {
        Some(path) => {
            let config = read_toml_config(&path)?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => {
            info!("No configuration file found, using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Read and parse one TOML config file
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}
