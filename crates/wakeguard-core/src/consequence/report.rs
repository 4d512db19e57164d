//! Terminal report of a finished consequence queue.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::item::{CompletedBy, ItemStatus, QueueSnapshot};
use crate::alarm::ConsequenceKind;

/// Outcome of one consequence, in queue order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub kind: ConsequenceKind,
    pub status: ItemStatus,
    pub completed_by: Option<CompletedBy>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ReportEntry {
    /// User-facing wording. A failure is never shown as success: the intent
    /// may or may not have reached its target.
    pub fn outcome_label(&self) -> &'static str {
        match self.status {
            ItemStatus::Done => "done",
            ItemStatus::Skipped => "skipped",
            ItemStatus::Failed => "attempted, not confirmed",
            ItemStatus::Pending | ItemStatus::Executing => "not run",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalReport {
    pub alarm_id: String,
    pub label: String,
    pub entries: Vec<ReportEntry>,
    #[serde(default)]
    pub dry_run: bool,
}

impl TerminalReport {
    pub fn from_snapshot(snapshot: &QueueSnapshot, dry_run: bool) -> Self {
        Self {
            alarm_id: snapshot.alarm_id.clone(),
            label: snapshot.context.label.clone(),
            entries: snapshot
                .items
                .iter()
                .map(|item| ReportEntry {
                    kind: item.kind,
                    status: item.status,
                    completed_by: item.completed_by,
                    detail: item.detail.clone(),
                })
                .collect(),
            dry_run,
        }
    }

    pub fn done_count(&self) -> usize {
        self.count(ItemStatus::Done)
    }

    pub fn failed_count(&self) -> usize {
        self.count(ItemStatus::Failed)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(ItemStatus::Skipped)
    }

    fn count(&self, status: ItemStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }
}

impl fmt::Display for TerminalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Consequences for {}", self.label)?;
        if self.dry_run {
            write!(f, " (dry run)")?;
        }
        if self.entries.is_empty() {
            return write!(f, ": none");
        }
        for (i, entry) in self.entries.iter().enumerate() {
            write!(f, "\n  {}. {}: {}", i + 1, entry.kind.as_str(), entry.outcome_label())?;
            if let Some(detail) = &entry.detail {
                write!(f, " ({detail})")?;
            }
        }
        Ok(())
    }
}
