//! Estimator configuration – reads/writes `~/.posest/config.toml`.
//!
//! ```toml
//! [noise]
//! process_noise = 0.01
//! gps_noise = 1.0
//! baro_noise = 0.5
//! ultra_noise = 0.05
//! use_gps_speed = true
//!
//! [estimator]
//! tick_hz = 100
//! # ultra_outlier_ratio = 10.0
//!
//! [sonar]
//! min_range = 0.2
//! max_range = 5.0
//! period_ms = 30
//! down_index = 0
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use posest_types::{NoiseConfig, PosestError, SonarConfig};

/// `[estimator]` section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Estimation rate.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,

    /// Enables the ultrasonic outlier gate with this ratio.  Absent means
    /// disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ultra_outlier_ratio: Option<f32>,
}

fn default_tick_hz() -> u32 {
    100
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            tick_hz: default_tick_hz(),
            ultra_outlier_ratio: None,
        }
    }
}

impl EstimatorConfig {
    /// Interval between ticks.  A zero rate is treated as 1 Hz.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz.max(1)))
    }
}

/// Persisted configuration stored in `~/.posest/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub noise: NoiseConfig,

    #[serde(default)]
    pub estimator: EstimatorConfig,

    #[serde(default)]
    pub sonar: SonarConfig,
}

/// Return the path to `~/.posest/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".posest").join("config.toml")
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, PosestError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        PosestError::Config(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| PosestError::Config(format!("Failed to parse config: {}", e)))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Load from `path`, falling back to defaults (plus environment overrides)
/// when the file is absent.
pub fn load_or_default(path: &Path) -> Result<Config, PosestError> {
    match load_from(path)? {
        Some(cfg) => Ok(cfg),
        None => {
            let mut cfg = Config::default();
            apply_env_overrides(&mut cfg);
            Ok(cfg)
        }
    }
}

/// Apply `POSEST_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `POSEST_PROCESS_NOISE` | `noise.process_noise` |
/// | `POSEST_GPS_NOISE` | `noise.gps_noise` |
/// | `POSEST_BARO_NOISE` | `noise.baro_noise` |
/// | `POSEST_ULTRA_NOISE` | `noise.ultra_noise` |
/// | `POSEST_USE_GPS_SPEED` | `noise.use_gps_speed` |
/// | `POSEST_TICK_HZ` | `estimator.tick_hz` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_with(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides_with(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let float = |key: &str| lookup(key).and_then(|v| v.trim().parse::<f32>().ok());

    if let Some(v) = float("POSEST_PROCESS_NOISE") {
        cfg.noise.process_noise = v;
    }
    if let Some(v) = float("POSEST_GPS_NOISE") {
        cfg.noise.gps_noise = v;
    }
    if let Some(v) = float("POSEST_BARO_NOISE") {
        cfg.noise.baro_noise = v;
    }
    if let Some(v) = float("POSEST_ULTRA_NOISE") {
        cfg.noise.ultra_noise = v;
    }
    if let Some(v) = lookup("POSEST_USE_GPS_SPEED").and_then(|v| parse_flag(&v)) {
        cfg.noise.use_gps_speed = v;
    }
    if let Some(v) = lookup("POSEST_TICK_HZ").and_then(|v| v.trim().parse::<u32>().ok()) {
        cfg.estimator.tick_hz = v;
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Save the config to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), PosestError> {
    let config_err = |what: &str, e: &dyn std::fmt::Display| {
        PosestError::Config(format!("Failed to {}: {}", what, e))
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| config_err("create config directory", &e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| config_err("set config directory permissions", &e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| config_err("serialize config", &e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| config_err(&format!("write {}", path.display()), &e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| config_err(&format!("write {}", path.display()), &e))?;
    Ok(())
}
