use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alarm::ConsequenceKind;
use crate::capability::TriggerKind;
use crate::consequence::{ItemStatus, TerminalReport};
use crate::session::InterruptionReason;

/// Every state change in the engine produces an Event.
/// The host drains them from each call and forwards them to its UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    AlarmScheduled {
        alarm_id: String,
        kind: TriggerKind,
        mechanism: String,
        fire_at: DateTime<Utc>,
    },
    /// No delivery mechanism accepted the registration.
    SchedulingFailed {
        alarm_id: String,
        error: String,
        at: DateTime<Utc>,
    },
    /// A one-shot alarm fired and was switched off.
    AlarmDisabled {
        alarm_id: String,
        at: DateTime<Utc>,
    },
    SessionStarted {
        alarm_id: String,
        scheduled_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    /// A session found at launch with a fresh heartbeat was adopted again.
    SessionResumed {
        alarm_id: String,
        at: DateTime<Utc>,
    },
    SessionDismissed {
        alarm_id: String,
        at: DateTime<Utc>,
    },
    /// The user snoozed, backgrounded or otherwise escaped the alarm.
    SessionEvaded {
        alarm_id: String,
        reason: String,
        at: DateTime<Utc>,
    },
    SessionInterrupted {
        alarm_id: String,
        reason: InterruptionReason,
        at: DateTime<Utc>,
    },
    RampStopped {
        alarm_id: String,
        level: f64,
        at: DateTime<Utc>,
    },
    QueueStarted {
        alarm_id: String,
        items: Vec<ConsequenceKind>,
        resumed: bool,
        at: DateTime<Utc>,
    },
    ConsequenceStarted {
        alarm_id: String,
        index: usize,
        kind: ConsequenceKind,
        at: DateTime<Utc>,
    },
    ConsequenceFinished {
        alarm_id: String,
        index: usize,
        kind: ConsequenceKind,
        status: ItemStatus,
        at: DateTime<Utc>,
    },
    QueueCompleted {
        report: TerminalReport,
        at: DateTime<Utc>,
    },
}
