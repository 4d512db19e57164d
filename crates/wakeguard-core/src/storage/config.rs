//! TOML-based engine configuration.
//!
//! Holds the tunable constants of the engine:
//! - Heartbeat interval and the staleness multiplier used at relaunch
//! - Default volume ramp
//! - Per-kind consequence completion delays and the media watchdog
//! - Delayed recheck offset
//!
//! Configuration is stored at `<data_dir>/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::ConfigError;

/// Upper bound for every millisecond setting: one week.
const MAX_SPAN_MS: u64 = 7 * 24 * 60 * 60 * 1_000;
/// Upper bound for the recheck offset: one day.
const MAX_RECHECK_MIN: u64 = 24 * 60;

/// Keys holding an `Option`; the value `none` clears them.
const OPTIONAL_KEYS: &[&str] = &["consequences.default_media_uri"];

/// Heartbeat cadence while an alarm is ringing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,
    /// A heartbeat older than `interval_ms * stale_multiplier` at relaunch
    /// marks the session interrupted.
    #[serde(default = "default_stale_multiplier")]
    pub stale_multiplier: u32,
}

/// Default alarm volume ramp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RampConfigSection {
    #[serde(default = "default_ramp_min")]
    pub min_level: f64,
    #[serde(default = "default_ramp_max")]
    pub max_level: f64,
    #[serde(default = "default_ramp_duration_ms")]
    pub duration_ms: u64,
}

/// Consequence completion timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsequenceConfig {
    #[serde(default = "default_message_delay_ms")]
    pub message_delay_ms: u64,
    #[serde(default = "default_call_delay_ms")]
    pub call_delay_ms: u64,
    #[serde(default = "default_message_delay_ms")]
    pub mail_delay_ms: u64,
    /// Watchdog for media playback when no `finished` event arrives.
    #[serde(default = "default_media_timeout_ms")]
    pub media_timeout_ms: u64,
    /// Used when an alarm has no media uri of its own.
    #[serde(default)]
    pub default_media_uri: Option<String>,
}

/// Delayed wake-up verification after dismissal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecheckConfig {
    #[serde(default = "default_recheck_delay_min")]
    pub delay_min: u64,
}

/// Engine configuration.
///
/// Serialized to/from TOML at `<data_dir>/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub ramp: RampConfigSection,
    #[serde(default)]
    pub consequences: ConsequenceConfig,
    #[serde(default)]
    pub recheck: RecheckConfig,
}

// Default functions
fn default_heartbeat_interval_ms() -> u64 {
    5_000
}
fn default_stale_multiplier() -> u32 {
    3
}
fn default_ramp_min() -> f64 {
    0.2
}
fn default_ramp_max() -> f64 {
    1.0
}
fn default_ramp_duration_ms() -> u64 {
    60_000
}
fn default_message_delay_ms() -> u64 {
    3_000
}
fn default_call_delay_ms() -> u64 {
    10_000
}
fn default_media_timeout_ms() -> u64 {
    120_000
}
fn default_recheck_delay_min() -> u64 {
    5
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval_ms(),
            stale_multiplier: default_stale_multiplier(),
        }
    }
}

impl Default for RampConfigSection {
    fn default() -> Self {
        Self {
            min_level: default_ramp_min(),
            max_level: default_ramp_max(),
            duration_ms: default_ramp_duration_ms(),
        }
    }
}

impl Default for ConsequenceConfig {
    fn default() -> Self {
        Self {
            message_delay_ms: default_message_delay_ms(),
            call_delay_ms: default_call_delay_ms(),
            mail_delay_ms: default_message_delay_ms(),
            media_timeout_ms: default_media_timeout_ms(),
            default_media_uri: None,
        }
    }
}

impl Default for RecheckConfig {
    fn default() -> Self {
        Self {
            delay_min: default_recheck_delay_min(),
        }
    }
}

impl HeartbeatConfig {
    /// Age beyond which a heartbeat counts as stale.
    pub fn stale_threshold_ms(&self) -> u64 {
        self.interval_ms
            .saturating_mul(u64::from(self.stale_multiplier.max(1)))
    }
}

impl EngineConfig {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current
                    .as_object_mut()
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
                let existing = obj
                    .get(part)
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

                let new_value = match existing {
                    _ if value == "none" && OPTIONAL_KEYS.contains(&key) => serde_json::Value::Null,
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current
                .get_mut(part)
                .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        }

        Err(ConfigError::UnknownKey(key.to_string()))
    }

    fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the data directory or write and return the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from an explicit path, creating it with defaults when missing.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: EngineConfig =
                    toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    })?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(err) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: err.to_string(),
            }),
        }
    }

    /// Persist to the data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat.interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "heartbeat.interval_ms".into(),
                message: "must be greater than zero".into(),
            });
        }
        let spans = [
            ("heartbeat.interval_ms", self.heartbeat.interval_ms),
            ("ramp.duration_ms", self.ramp.duration_ms),
            ("consequences.message_delay_ms", self.consequences.message_delay_ms),
            ("consequences.call_delay_ms", self.consequences.call_delay_ms),
            ("consequences.mail_delay_ms", self.consequences.mail_delay_ms),
            ("consequences.media_timeout_ms", self.consequences.media_timeout_ms),
        ];
        if let Some((key, _)) = spans.iter().find(|(_, ms)| *ms > MAX_SPAN_MS) {
            return Err(ConfigError::InvalidValue {
                key: (*key).into(),
                message: format!("must be at most {MAX_SPAN_MS}"),
            });
        }
        if self.recheck.delay_min > MAX_RECHECK_MIN {
            return Err(ConfigError::InvalidValue {
                key: "recheck.delay_min".into(),
                message: format!("must be at most {MAX_RECHECK_MIN}"),
            });
        }
        let (min, max) = (self.ramp.min_level, self.ramp.max_level);
        if !(0.0..=1.0).contains(&min) || !(0.0..=1.0).contains(&max) || min > max {
            return Err(ConfigError::InvalidValue {
                key: "ramp".into(),
                message: format!("need 0 <= min_level <= max_level <= 1, got {min}..{max}"),
            });
        }
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key in memory. Returns error if the key is
    /// unknown or the result does not validate.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: EngineConfig =
            serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::warn!(error = %err, "falling back to default engine config");
                Self::default()
            }
        }
    }
}
