//! Interfaces the engine consumes from its host.
//!
//! The host resolves these once at startup. An optional native alarm
//! facility is passed as `Option<Box<dyn DeliveryMechanism>>`; nothing in
//! the engine probes for it again later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alarm::{ConsequenceKind, Penalty};
use crate::error::{DispatchError, FacilityError};

#[cfg(test)]
pub(crate) mod fakes;

/// Why a trigger was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Regular alarm occurrence
    Alarm,
    /// Delayed follow-up after a dismissal
    Recheck,
}

/// Data handed to a delivery mechanism and returned to the engine when the
/// registration fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerPayload {
    pub alarm_id: String,
    pub label: String,
    pub kind: TriggerKind,
    pub fire_at: DateTime<Utc>,
}

/// Opaque registration id issued by a mechanism.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityHandle(pub String);

/// A way of getting the OS to wake the app at a given instant.
///
/// Implemented by the native alarm facility and by the scheduled
/// notification fallback. Registrations are tagged with the alarm id and
/// trigger kind so they can be cancelled without the handle surviving a
/// restart.
pub trait DeliveryMechanism: Send {
    /// Short name used in logs and persisted handles.
    fn name(&self) -> &str;

    fn schedule_at(
        &mut self,
        at: DateTime<Utc>,
        payload: &TriggerPayload,
    ) -> Result<FacilityHandle, FacilityError>;

    /// Cancel the registrations of `kind` for `alarm_id`.
    /// `FacilityError::NotFound` is expected when nothing was registered.
    fn cancel(&mut self, alarm_id: &str, kind: TriggerKind) -> Result<(), FacilityError>;
}

/// Everything a capability needs to fire one consequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchContext {
    pub alarm_id: String,
    pub label: String,
    #[serde(default)]
    pub penalty: Option<Penalty>,
    #[serde(default)]
    pub media_uri: Option<String>,
}

/// Result of a dispatch attempt the channel accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The intent was fired.
    Sent,
    /// Nothing to fire (no contact or channel configured).
    NotApplicable,
}

/// Fires message, call and mail intents.
pub trait DispatchCapability: Send {
    fn dispatch(
        &mut self,
        kind: ConsequenceKind,
        ctx: &DispatchContext,
    ) -> Result<DispatchOutcome, DispatchError>;
}

/// Id of a running playback, echoed back when it finishes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaybackId(pub String);

/// Plays media and later reports completion through
/// [`ConsequenceExecutor::playback_finished`](crate::consequence::ConsequenceExecutor::playback_finished).
pub trait MediaPlaybackCapability: Send {
    fn play(&mut self, uri: &str) -> Result<PlaybackId, DispatchError>;

    fn stop(&mut self, _id: &PlaybackId) {}
}

/// Media backend with no completion events; the executor's watchdog
/// completes every playback.
#[derive(Debug, Default)]
pub struct SilentPlayback {
    started: u64,
}

impl MediaPlaybackCapability for SilentPlayback {
    fn play(&mut self, uri: &str) -> Result<PlaybackId, DispatchError> {
        if uri.is_empty() {
            return Err(DispatchError::ChannelUnavailable("no media uri".into()));
        }
        self.started += 1;
        Ok(PlaybackId(format!("silent-{}", self.started)))
    }
}
