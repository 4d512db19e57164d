use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alarm::ConsequenceKind;
use crate::capability::{DispatchContext, PlaybackId};
use crate::clock;
use crate::storage::ConsequenceConfig;

/// Lifecycle of one queued consequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Executing,
    Done,
    Skipped,
    /// Dispatch was attempted but never confirmed.
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Skipped | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Done => "done",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// How an executing item decides it is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Complete a fixed time after the dispatch attempt.
    FixedDelay { delay_ms: u64 },
    /// Complete on an external signal, or when the watchdog expires.
    ExternalEvent { timeout_ms: u64 },
}

impl CompletionPolicy {
    pub fn for_kind(kind: ConsequenceKind, config: &ConsequenceConfig) -> Self {
        match kind {
            ConsequenceKind::Message => Self::FixedDelay {
                delay_ms: config.message_delay_ms,
            },
            ConsequenceKind::Call => Self::FixedDelay {
                delay_ms: config.call_delay_ms,
            },
            ConsequenceKind::Mail => Self::FixedDelay {
                delay_ms: config.mail_delay_ms,
            },
            ConsequenceKind::MediaPlayback => Self::ExternalEvent {
                timeout_ms: config.media_timeout_ms,
            },
        }
    }

    /// Instant at which an item started at `started_at` completes without
    /// any external signal.
    pub fn deadline(self, started_at: DateTime<Utc>) -> DateTime<Utc> {
        let ms = match self {
            Self::FixedDelay { delay_ms } => delay_ms,
            Self::ExternalEvent { timeout_ms } => timeout_ms,
        };
        clock::after(started_at, clock::millis(ms))
    }

    pub fn is_external(self) -> bool {
        matches!(self, Self::ExternalEvent { .. })
    }
}

/// What finished a `Done` item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletedBy {
    Delay,
    Event,
    Watchdog,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsequenceItem {
    pub kind: ConsequenceKind,
    pub policy: CompletionPolicy,
    pub status: ItemStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// The capability was invoked for the current `Executing` attempt.
    #[serde(default)]
    pub attempted: bool,
    #[serde(default)]
    pub completed_by: Option<CompletedBy>,
    #[serde(default)]
    pub detail: Option<String>,
    /// Only meaningful within the process that started the playback.
    #[serde(default)]
    pub playback: Option<PlaybackId>,
}

impl ConsequenceItem {
    pub fn new(kind: ConsequenceKind, policy: CompletionPolicy) -> Self {
        Self {
            kind,
            policy,
            status: ItemStatus::Pending,
            started_at: None,
            finished_at: None,
            attempted: false,
            completed_by: None,
            detail: None,
            playback: None,
        }
    }
}

/// Durable state of one consequence queue.
///
/// Written before each dispatch and after each completion, so a relaunch
/// resumes at `cursor` without repeating finished items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub alarm_id: String,
    pub context: DispatchContext,
    pub items: Vec<ConsequenceItem>,
    pub cursor: usize,
    #[serde(default)]
    pub sequence: u64,
}

impl QueueSnapshot {
    pub fn new(context: DispatchContext, kinds: &[ConsequenceKind], config: &ConsequenceConfig) -> Self {
        let items = kinds
            .iter()
            .map(|&kind| ConsequenceItem::new(kind, CompletionPolicy::for_kind(kind, config)))
            .collect();
        Self {
            alarm_id: context.alarm_id.clone(),
            context,
            items,
            cursor: 0,
            sequence: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.items.len()
    }

    pub fn current(&self) -> Option<&ConsequenceItem> {
        self.items.get(self.cursor)
    }

    pub fn kinds(&self) -> Vec<ConsequenceKind> {
        self.items.iter().map(|i| i.kind).collect()
    }

    /// Number of items currently `Executing`. At most one in a healthy queue.
    pub fn executing_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status == ItemStatus::Executing)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ctx() -> DispatchContext {
        DispatchContext {
            alarm_id: "a1".into(),
            label: "Wake".into(),
            penalty: None,
            media_uri: None,
        }
    }

    #[test]
    fn policies_follow_kind() {
        let config = ConsequenceConfig::default();
        assert_eq!(
            CompletionPolicy::for_kind(ConsequenceKind::Call, &config),
            CompletionPolicy::FixedDelay {
                delay_ms: config.call_delay_ms
            }
        );
        assert!(CompletionPolicy::for_kind(ConsequenceKind::MediaPlayback, &config).is_external());
    }

    #[test]
    fn deadline_adds_delay() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 7, 0, 0).unwrap();
        let p = CompletionPolicy::FixedDelay { delay_ms: 2_500 };
        assert_eq!(p.deadline(start), start + Duration::milliseconds(2_500));
    }

    #[test]
    fn new_snapshot_is_all_pending() {
        let snap = QueueSnapshot::new(
            ctx(),
            &[ConsequenceKind::Message, ConsequenceKind::Mail],
            &ConsequenceConfig::default(),
        );
        assert_eq!(snap.alarm_id, "a1");
        assert_eq!(snap.cursor, 0);
        assert!(snap.items.iter().all(|i| i.status == ItemStatus::Pending));
        assert!(!snap.is_finished());
        assert_eq!(snap.executing_count(), 0);
    }

    #[test]
    fn snapshot_tolerates_missing_optional_fields() {
        let json = r#"{
            "alarm_id": "a1",
            "context": {"alarm_id": "a1", "label": "Wake"},
            "items": [{"kind": "call", "policy": {"policy": "fixed_delay", "delay_ms": 10}, "status": "pending"}],
            "cursor": 0
        }"#;
        let snap: QueueSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.items[0].kind, ConsequenceKind::Call);
        assert_eq!(snap.sequence, 0);
        assert!(!snap.items[0].attempted);
    }
}
