//! Core error types for wakeguard-core.
//!
//! Only [`SchedulingError`] is meant to reach the user as a value that
//! requires action. Every other kind is recorded on the item or session it
//! concerns and the surrounding state machine keeps going.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for wakeguard-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Alarm registration failed on every delivery mechanism
    #[error("Scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),

    /// Durable store errors
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Ringing session lifecycle misuse
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Alarm registration errors. These need user action (granting a
/// permission, enabling a facility) and are never retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    /// At least one mechanism refused for lack of permission
    #[error("Permission denied by {mechanism}")]
    PermissionDenied { mechanism: String },

    /// No mechanism could accept the registration
    #[error("No alarm delivery mechanism is available")]
    MechanismUnavailable,

    /// The alarm is switched off
    #[error("Alarm '{0}' is disabled")]
    AlarmDisabled(String),

    /// No resolvable local time in the coming week
    #[error("Alarm '{0}' has no upcoming trigger")]
    NoUpcomingTrigger(String),

    /// The alarm id is unknown to the store
    #[error("Alarm '{0}' not found")]
    UnknownAlarm(String),
}

/// Errors reported by a delivery mechanism.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FacilityError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("facility unavailable: {0}")]
    Unavailable(String),

    #[error("registration not found")]
    NotFound,

    #[error("{0}")]
    Other(String),
}

/// Consequence dispatch errors. Never fatal to the queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Target app or channel cannot be reached
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// The channel refused the request
    #[error("Dispatch rejected: {0}")]
    Rejected(String),
}

/// Durable store errors.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to read '{key}': {message}")]
    Read { key: String, message: String },

    #[error("Failed to write '{key}': {message}")]
    Write { key: String, message: String },

    /// Stored value exists but cannot be decoded
    #[error("Corrupt record at '{key}': {message}")]
    Corrupt { key: String, message: String },

    /// A write carried an older sequence than the stored record
    #[error("Stale write to '{key}': persisted sequence {persisted}, attempted {attempted}")]
    StaleWrite {
        key: String,
        persisted: u64,
        attempted: u64,
    },

    #[error("Failed to open store at {path}: {message}")]
    OpenFailed { path: PathBuf, message: String },

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Ringing session lifecycle errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A persisted unresolved session exists; run launch reconciliation first
    #[error("Alarm '{0}' already has an unresolved ringing session")]
    AlreadyActive(String),

    #[error("No ringing session is active for alarm '{0}'")]
    NotActive(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown dot-path key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to resolve the data directory
    #[error("Failed to access data directory: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Weekday {0} is out of range (0-6, 0 = Sunday)")]
    InvalidWeekday(u8),

    #[error("Invalid time of day {hour:02}:{minute:02}")]
    InvalidTimeOfDay { hour: u32, minute: u32 },

    #[error("Invalid ramp range: min {min}, max {max} (need 0 <= min <= max <= 1)")]
    InvalidRamp { min: f64, max: f64 },

    #[error("Unknown alarm '{0}'")]
    UnknownAlarm(String),

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _msg)
                if code.code == rusqlite::ErrorCode::DatabaseBusy
                    || code.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                PersistenceError::Backend(format!("database locked: {err}"))
            }
            _ => PersistenceError::Backend(err.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
