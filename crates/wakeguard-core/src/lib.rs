//! # Wakeguard Core Library
//!
//! This library provides the alarm enforcement engine behind Wakeguard: an
//! alarm that keeps demanding attention until it is legitimately dismissed,
//! and that runs a sequence of consequences when the user evades it by
//! snoozing, backgrounding or killing the app.
//!
//! ## Architecture
//!
//! - **Scheduling**: next-occurrence computation and tiered registration with
//!   the host's delivery mechanisms
//! - **Lifecycle monitor**: heartbeat-backed ringing sessions, reconciled at
//!   every launch to detect interruptions
//! - **Consequences**: a crash-safe sequential executor over host
//!   capabilities
//! - **Storage**: SQLite-backed key-value store and TOML-based configuration
//!
//! All operations take the current time as an argument; nothing here reads
//! the clock or spawns threads. The host calls [`AlarmEngine::tick`]
//! periodically while an alarm rings or consequences run.
//!
//! ## Key Components
//!
//! - [`AlarmEngine`]: Facade owning every component below
//! - [`AlarmScheduler`]: Registration and recurrence
//! - [`LifecycleMonitor`]: Sessions, heartbeats and launch reconciliation
//! - [`ConsequenceExecutor`]: Sequential consequence runs
//! - [`RampController`]: Alarm volume ramp
//! - [`Database`]: Persistent key-value storage

pub mod alarm;
pub mod capability;
mod clock;
pub mod consequence;
pub mod engine;
pub mod error;
pub mod events;
pub mod ramp;
pub mod session;
pub mod storage;

pub use alarm::{AlarmDefinition, AlarmScheduler, ConsequenceKind, Penalty, TriggerHandle, WeekdaySet};
pub use capability::{
    DeliveryMechanism, DispatchCapability, DispatchContext, MediaPlaybackCapability, TriggerKind,
    TriggerPayload,
};
pub use consequence::{ConsequenceExecutor, ItemStatus, QueueSnapshot, TerminalReport};
pub use engine::{AlarmEngine, Capabilities, EngineTick};
pub use error::{
    ConfigError, CoreError, DispatchError, FacilityError, PersistenceError, SchedulingError,
    SessionError, ValidationError,
};
pub use events::Event;
pub use ramp::{RampConfig, RampController};
pub use session::{LifecycleMonitor, RingingSession};
pub use storage::{Database, EngineConfig, KvStore, MemoryStore, ScheduleStore};
