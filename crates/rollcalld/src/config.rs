use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use rollcall_core::{EngineParams, FallbackCutoffs};
use serde::Deserialize;
use thiserror::Error;

/// Default config file location when `ROLLCALL_CONFIG` is not set.
const SYSTEM_CONFIG_PATH: &str = "/etc/rollcall/config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("invalid config file {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
    #[error("invalid fallback cutoff for {shift:?}: {value:?} (expected HH:MM)")]
    BadCutoff { shift: String, value: String },
}

/// Daemon configuration. Defaults are overridden by the optional TOML file,
/// which is in turn overridden by `ROLLCALL_*` environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Fixed tick interval of the detection loop.
    pub detection_interval_ms: u64,
    /// Upper bound on one detector round trip; expiry counts as no detections.
    pub detector_timeout_ms: u64,
    /// Shift to start scanning for at boot, if any.
    pub autostart_shift: Option<String>,
    pub engine: EngineParams,
    pub fallback_cutoffs: FallbackCutoffs,
}

/// On-disk TOML shape.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    engine: EngineParams,
    driver: DriverFileConfig,
    /// Shift label → "HH:MM" cutoff used when no class schedule resolves.
    fallback_cutoffs: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DriverFileConfig {
    detection_interval_ms: Option<u64>,
    detector_timeout_ms: Option<u64>,
}

impl Config {
    /// Load configuration from the TOML file (if present) and `ROLLCALL_*`
    /// environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let file = load_file_config()?;

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let mut engine = file.engine;
        engine.dwell_ms = env_u64("ROLLCALL_DWELL_MS", engine.dwell_ms);
        engine.cooldown_ms = env_u64("ROLLCALL_COOLDOWN_MS", engine.cooldown_ms);
        engine.required_confidence =
            env_f32("ROLLCALL_REQUIRED_CONFIDENCE", engine.required_confidence);
        engine.min_face_size = env_f32("ROLLCALL_MIN_FACE_SIZE", engine.min_face_size);
        engine.max_face_size = env_f32("ROLLCALL_MAX_FACE_SIZE", engine.max_face_size);

        Ok(Self {
            db_path,
            detection_interval_ms: env_u64(
                "ROLLCALL_DETECTION_INTERVAL_MS",
                file.driver.detection_interval_ms.unwrap_or(1000),
            ),
            detector_timeout_ms: env_u64(
                "ROLLCALL_DETECTOR_TIMEOUT_MS",
                file.driver.detector_timeout_ms.unwrap_or(5000),
            ),
            autostart_shift: std::env::var("ROLLCALL_SHIFT").ok().filter(|s| !s.is_empty()),
            engine,
            fallback_cutoffs: parse_cutoffs(file.fallback_cutoffs)?,
        })
    }
}

fn load_file_config() -> Result<FileConfig, ConfigError> {
    let path = match std::env::var("ROLLCALL_CONFIG") {
        Ok(p) => PathBuf::from(p),
        Err(_) => {
            let system = Path::new(SYSTEM_CONFIG_PATH);
            if !system.exists() {
                return Ok(FileConfig::default());
            }
            system.to_path_buf()
        }
    };

    let display_path = path.to_string_lossy().into_owned();
    let raw = std::fs::read_to_string(&path)
        .map_err(|source| ConfigError::Io { path: display_path.clone(), source })?;
    let parsed = toml::from_str(&raw)
        .map_err(|source| ConfigError::Parse { path: display_path.clone(), source })?;
    tracing::info!(path = %display_path, "loaded config file");
    Ok(parsed)
}

fn parse_cutoffs(table: HashMap<String, String>) -> Result<FallbackCutoffs, ConfigError> {
    if table.is_empty() {
        return Ok(FallbackCutoffs::default());
    }
    let mut parsed = HashMap::new();
    for (shift, value) in table {
        let time = NaiveTime::parse_from_str(&value, "%H:%M")
            .map_err(|_| ConfigError::BadCutoff { shift: shift.clone(), value: value.clone() })?;
        parsed.insert(shift, time);
    }
    Ok(FallbackCutoffs::from_table(parsed))
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
