//! Ringing sessions and launch-time reconciliation.

mod monitor;

pub use monitor::{HeartbeatReport, LifecycleMonitor};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alarm::{AlarmDefinition, ConsequenceKind};
use crate::consequence::QueueSnapshot;

/// Durable record of an alarm currently demanding attention.
///
/// Rewritten on every mutation with a bumped `sequence`; the last durable
/// write is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingingSession {
    pub alarm_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub sequence: u64,
}

impl RingingSession {
    pub fn heartbeat_age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_heartbeat).num_milliseconds()
    }
}

/// Returned by `begin_session`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub alarm_id: String,
    pub started_at: DateTime<Utc>,
    /// False when the initial write failed; it is retried on the next
    /// heartbeat.
    pub persisted: bool,
}

/// Why a session was classified as interrupted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum InterruptionReason {
    /// Last heartbeat older than the staleness threshold.
    StaleHeartbeat { age_ms: i64, threshold_ms: u64 },
    /// Already flagged by an earlier reconciliation.
    MarkedInterrupted,
    /// Heartbeat data missing or inconsistent; interrupted by default.
    Ambiguous { detail: String },
}

/// An evaded session, with what the caller needs to start consequences.
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptedSession {
    pub alarm_id: String,
    pub label: String,
    pub consequences: Vec<ConsequenceKind>,
    pub reason: InterruptionReason,
    /// `None` when the stored record could not be decoded.
    pub session: Option<RingingSession>,
    /// `None` when the alarm was deleted after the session began.
    pub definition: Option<AlarmDefinition>,
}

/// One finding of launch reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// Route straight into consequence execution.
    Interrupted(InterruptedSession),
    /// Heartbeat is fresh: the alarm is still ringing and must be resumed.
    StillRinging(RingingSession),
    /// A consequence queue was mid-flight; resume its remaining items.
    ResumeQueue(QueueSnapshot),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationResult {
    pub outcomes: Vec<Reconciliation>,
}

impl ReconciliationResult {
    /// Nothing was left behind by the previous process.
    pub fn is_clean(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn interrupted(&self) -> impl Iterator<Item = &InterruptedSession> {
        self.outcomes.iter().filter_map(|o| match o {
            Reconciliation::Interrupted(s) => Some(s),
            _ => None,
        })
    }
}
