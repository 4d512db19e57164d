//! Consequences executed when an alarm is evaded.
//!
//! An evaded alarm turns into a [`QueueSnapshot`]: the alarm's consequence
//! kinds in order, each with a completion policy. The
//! [`ConsequenceExecutor`] runs them strictly one after another and keeps
//! the snapshot in the store until the last item is terminal.

mod executor;
mod item;
mod report;

pub use executor::{ConsequenceExecutor, ExecutorState, Transition};
pub use item::{CompletedBy, CompletionPolicy, ConsequenceItem, ItemStatus, QueueSnapshot};
pub use report::{ReportEntry, TerminalReport};
