mod definition;
mod recurrence;
mod scheduler;

pub use definition::{AlarmDefinition, ConsequenceKind, Penalty, WeekdaySet};
pub use recurrence::next_trigger;
pub use scheduler::{AlarmScheduler, FiredOutcome, TriggerHandle};
