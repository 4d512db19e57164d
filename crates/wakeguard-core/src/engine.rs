//! Alarm engine.
//!
//! Ties the scheduler, lifecycle monitor, consequence executor and the
//! per-alarm volume ramps together. Like the rest of the crate it has no
//! threads or timers of its own: the host passes `now` into every call and
//! drives `tick()` on an interval while anything is ringing or executing.
//!
//! ## Session flow
//!
//! ```text
//! trigger -> Ringing --dismiss--> (recheck scheduled)
//!               |
//!               +--evade / killed--> consequence queue -> report
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let mut engine = AlarmEngine::new(store, config, capabilities, Local);
//! let events = engine.launch(Utc::now())?;
//! // In a loop:
//! let tick = engine.tick(Utc::now());
//! ```

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeZone, Utc};

use crate::alarm::{AlarmDefinition, AlarmScheduler, FiredOutcome, TriggerHandle};
use crate::capability::{
    DeliveryMechanism, DispatchCapability, DispatchContext, MediaPlaybackCapability, PlaybackId,
    TriggerKind, TriggerPayload,
};
use crate::clock;
use crate::consequence::ConsequenceExecutor;
use crate::error::{CoreError, SchedulingError, SessionError, ValidationError};
use crate::events::Event;
use crate::ramp::{RampConfig, RampController};
use crate::session::{InterruptedSession, LifecycleMonitor, Reconciliation, RingingSession};
use crate::storage::{EngineConfig, ScheduleStore};

/// Host capabilities, resolved once at startup.
pub struct Capabilities {
    /// `None` when the platform has no native alarm facility.
    pub native: Option<Box<dyn DeliveryMechanism>>,
    pub notification: Box<dyn DeliveryMechanism>,
    pub dispatcher: Box<dyn DispatchCapability>,
    pub media: Box<dyn MediaPlaybackCapability>,
}

/// Output of one `tick`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineTick {
    pub events: Vec<Event>,
    /// Current ramp level per ringing alarm.
    pub levels: Vec<(String, f64)>,
}

pub struct AlarmEngine<Tz: TimeZone = Utc> {
    store: ScheduleStore,
    config: EngineConfig,
    scheduler: AlarmScheduler<Tz>,
    monitor: LifecycleMonitor,
    executor: ConsequenceExecutor,
    ramps: BTreeMap<String, RampController>,
    /// Sessions started by a recheck trigger; dismissing them does not
    /// schedule another recheck.
    recheck_sessions: BTreeSet<String>,
}

impl<Tz: TimeZone> AlarmEngine<Tz> {
    pub fn new(store: ScheduleStore, config: EngineConfig, caps: Capabilities, tz: Tz) -> Self {
        let scheduler = AlarmScheduler::new(store.clone(), caps.native, caps.notification, tz);
        let monitor = LifecycleMonitor::new(store.clone(), config.heartbeat.clone());
        let executor = ConsequenceExecutor::new(
            store.clone(),
            config.consequences.clone(),
            caps.dispatcher,
            caps.media,
        );
        Self {
            store,
            config,
            scheduler,
            monitor,
            executor,
            ramps: BTreeMap::new(),
            recheck_sessions: BTreeSet::new(),
        }
    }

    /// Consequences are recorded as skipped instead of dispatched.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.executor = self.executor.with_dry_run(dry_run);
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &AlarmScheduler<Tz> {
        &self.scheduler
    }

    pub fn monitor(&self) -> &LifecycleMonitor {
        &self.monitor
    }

    pub fn executor(&self) -> &ConsequenceExecutor {
        &self.executor
    }

    /// `None` when the alarm is not ringing.
    pub fn ramp_level(&self, alarm_id: &str, now: DateTime<Utc>) -> Option<f64> {
        self.ramps.get(alarm_id).map(|r| r.current_level(now))
    }

    pub fn is_ringing(&self, alarm_id: &str) -> bool {
        self.monitor.active_session(alarm_id).is_some()
    }

    /// Whether the host should keep ticking.
    pub fn is_active(&self) -> bool {
        self.monitor.is_ringing() || self.executor.is_busy()
    }

    // ── Alarm management ─────────────────────────────────────────────

    /// Store `def` and register its next occurrence. Returns `None` for a
    /// disabled alarm, whose registration is cancelled instead.
    ///
    /// # Errors
    /// The definition is stored even when registration fails; the
    /// scheduling error is returned for the user to act on.
    pub fn save_alarm(
        &mut self,
        def: &AlarmDefinition,
        now: DateTime<Utc>,
    ) -> Result<Option<TriggerHandle>, CoreError> {
        def.validate()?;
        self.store.save_alarm(def)?;
        match self.scheduler.schedule(def, now) {
            Ok(handle) => Ok(Some(handle)),
            Err(SchedulingError::AlarmDisabled(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Cancel every registration and delete the definition. Returns false
    /// when the alarm did not exist.
    pub fn remove_alarm(&mut self, alarm_id: &str) -> Result<bool, CoreError> {
        let existed = self.store.alarm(alarm_id)?.is_some();
        self.scheduler.cancel(alarm_id);
        for kind in [TriggerKind::Alarm, TriggerKind::Recheck] {
            self.store.delete_trigger(kind, alarm_id)?;
        }
        self.store.delete_alarm(alarm_id)?;
        Ok(existed)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Reconcile what the previous process left behind, route it, and
    /// re-register every enabled alarm.
    pub fn launch(&mut self, now: DateTime<Utc>) -> Result<Vec<Event>, CoreError> {
        let mut events = Vec::new();
        let result = self.monitor.on_launch(now)?;
        if result.is_clean() {
            tracing::info!("clean launch");
        }

        for outcome in result.outcomes {
            match outcome {
                Reconciliation::Interrupted(found) => {
                    events.extend(self.route_interrupted(found, now));
                }
                Reconciliation::StillRinging(session) => {
                    events.extend(self.adopt(session, now));
                }
                Reconciliation::ResumeQueue(snapshot) => {
                    events.extend(self.executor.resume(snapshot, now));
                }
            }
        }

        for (alarm_id, result) in self.scheduler.reschedule_all(now)? {
            events.push(match result {
                Ok(handle) => handle.scheduled_event(),
                Err(err) => Event::SchedulingFailed {
                    alarm_id,
                    error: err.to_string(),
                    at: now,
                },
            });
        }
        Ok(events)
    }

    /// A registration fired. Starts the ringing session and ramp, then
    /// registers the following occurrence.
    ///
    /// Duplicate deliveries of a trigger that is already ringing are
    /// ignored.
    pub fn trigger(&mut self, payload: &TriggerPayload, now: DateTime<Utc>) -> Result<Vec<Event>, CoreError> {
        let mut events = Vec::new();
        let Some(def) = self.store.alarm(&payload.alarm_id)? else {
            self.after_fired(payload, now, &mut events);
            return Ok(events);
        };
        if !def.enabled && payload.kind == TriggerKind::Alarm {
            tracing::warn!(alarm_id = %def.id, "ignoring trigger for disabled alarm");
            return Ok(events);
        }

        if !self.start_ringing(&def, payload, now, &mut events)? {
            return Ok(events);
        }
        self.after_fired(payload, now, &mut events);
        Ok(events)
    }

    /// Ring an alarm on demand. The alarm's registrations are left alone,
    /// so a one-shot alarm stays armed.
    ///
    /// # Errors
    /// `ValidationError` for an unknown alarm, `SessionError::AlreadyActive`
    /// when it already rings.
    pub fn ring_now(&mut self, alarm_id: &str, now: DateTime<Utc>) -> Result<Vec<Event>, CoreError> {
        let def = self
            .store
            .alarm(alarm_id)?
            .ok_or_else(|| ValidationError::UnknownAlarm(alarm_id.to_string()))?;
        if self.is_ringing(alarm_id) {
            return Err(SessionError::AlreadyActive(alarm_id.to_string()).into());
        }
        let payload = TriggerPayload {
            alarm_id: def.id.clone(),
            label: def.display_label(),
            kind: TriggerKind::Alarm,
            fire_at: now,
        };
        let mut events = Vec::new();
        self.start_ringing(&def, &payload, now, &mut events)?;
        Ok(events)
    }

    /// Heartbeat if due, advance consequences, report ramp levels.
    pub fn tick(&mut self, now: DateTime<Utc>) -> EngineTick {
        if self.monitor.heartbeat_due(now) {
            let report = self.monitor.heartbeat(now);
            if report.deferred > 0 {
                tracing::debug!(deferred = report.deferred, "heartbeat writes deferred");
            }
        }
        let events = self.executor.tick(now);
        let levels = self
            .ramps
            .iter()
            .map(|(id, ramp)| (id.clone(), ramp.current_level(now)))
            .collect();
        EngineTick { events, levels }
    }

    /// The user legitimately silenced the alarm.
    ///
    /// # Errors
    /// `SessionError::NotActive` when the alarm is not ringing.
    pub fn dismiss(&mut self, alarm_id: &str, now: DateTime<Utc>) -> Result<Vec<Event>, CoreError> {
        if !self.is_ringing(alarm_id) {
            return Err(SessionError::NotActive(alarm_id.to_string()).into());
        }
        let mut events = Vec::new();
        self.stop_ramp(alarm_id, now, &mut events);
        self.monitor.end_session(alarm_id);
        events.push(Event::SessionDismissed {
            alarm_id: alarm_id.to_string(),
            at: now,
        });
        tracing::info!(%alarm_id, "alarm dismissed");

        let from_recheck = self.recheck_sessions.remove(alarm_id);
        if let Some(def) = self.store.alarm(alarm_id)? {
            if def.delayed_recheck_enabled && !from_recheck {
                let at = clock::after(now, clock::minutes(self.config.recheck.delay_min));
                events.push(match self.scheduler.schedule_recheck(&def, at) {
                    Ok(handle) => handle.scheduled_event(),
                    Err(err) => Event::SchedulingFailed {
                        alarm_id: alarm_id.to_string(),
                        error: err.to_string(),
                        at: now,
                    },
                });
            }
        }
        Ok(events)
    }

    /// The user escaped the alarm (snooze, backgrounding, wrong answer).
    /// The consequence queue is durable before the session is cleared.
    ///
    /// # Errors
    /// `SessionError::NotActive` when the alarm is not ringing.
    pub fn evade(&mut self, alarm_id: &str, reason: &str, now: DateTime<Utc>) -> Result<Vec<Event>, CoreError> {
        if !self.is_ringing(alarm_id) {
            return Err(SessionError::NotActive(alarm_id.to_string()).into());
        }
        let mut events = vec![Event::SessionEvaded {
            alarm_id: alarm_id.to_string(),
            reason: reason.to_string(),
            at: now,
        }];
        tracing::warn!(%alarm_id, %reason, "alarm evaded");
        self.stop_ramp(alarm_id, now, &mut events);
        self.recheck_sessions.remove(alarm_id);

        let def = self.store.alarm(alarm_id)?;
        let (context, kinds) = match &def {
            Some(def) => (dispatch_context(def), def.consequences.clone()),
            None => (bare_context(alarm_id), Vec::new()),
        };
        events.extend(self.executor.start(context, &kinds, now));
        self.monitor.end_session(alarm_id);
        Ok(events)
    }

    pub fn playback_finished(&mut self, id: &PlaybackId, now: DateTime<Utc>) -> Vec<Event> {
        self.executor.playback_finished(id, now)
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn route_interrupted(&mut self, found: InterruptedSession, now: DateTime<Utc>) -> Vec<Event> {
        let mut events = vec![Event::SessionInterrupted {
            alarm_id: found.alarm_id.clone(),
            reason: found.reason.clone(),
            at: now,
        }];
        let context = match &found.definition {
            Some(def) => dispatch_context(def),
            None => bare_context(&found.alarm_id),
        };
        events.extend(self.executor.start(context, &found.consequences, now));
        self.monitor.end_session(&found.alarm_id);
        events
    }

    fn adopt(&mut self, session: RingingSession, now: DateTime<Utc>) -> Vec<Event> {
        match self.store.alarm(&session.alarm_id) {
            Ok(Some(def)) => self.start_ramp(&def, now),
            Ok(None) => {
                tracing::warn!(alarm_id = %session.alarm_id, "ringing alarm no longer exists");
                self.start_flat_ramp(&session.alarm_id, now);
            }
            Err(err) => {
                tracing::warn!(alarm_id = %session.alarm_id, error = %err, "alarm definition unreadable");
                self.start_flat_ramp(&session.alarm_id, now);
            }
        }
        vec![Event::SessionResumed {
            alarm_id: session.alarm_id,
            at: now,
        }]
    }

    fn after_fired(&mut self, payload: &TriggerPayload, now: DateTime<Utc>, events: &mut Vec<Event>) {
        match self.scheduler.on_fired(payload, now) {
            Ok(FiredOutcome::Rescheduled(handle)) => events.push(handle.scheduled_event()),
            Ok(FiredOutcome::Disabled) => events.push(Event::AlarmDisabled {
                alarm_id: payload.alarm_id.clone(),
                at: now,
            }),
            Ok(FiredOutcome::Consumed) => {}
            Err(CoreError::Scheduling(err)) => events.push(Event::SchedulingFailed {
                alarm_id: payload.alarm_id.clone(),
                error: err.to_string(),
                at: now,
            }),
            Err(err) => {
                tracing::warn!(alarm_id = %payload.alarm_id, error = %err, "post-trigger bookkeeping failed");
            }
        }
    }

    /// Begin the session and ramp. False for a duplicate delivery.
    fn start_ringing(
        &mut self,
        def: &AlarmDefinition,
        payload: &TriggerPayload,
        now: DateTime<Utc>,
        events: &mut Vec<Event>,
    ) -> Result<bool, CoreError> {
        match self.monitor.begin_session(&def.id, payload.fire_at, now) {
            Ok(_) => {}
            Err(SessionError::AlreadyActive(_)) if self.is_ringing(&def.id) => {
                tracing::debug!(alarm_id = %def.id, "duplicate trigger delivery");
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        }
        if payload.kind == TriggerKind::Recheck {
            self.recheck_sessions.insert(def.id.clone());
        }
        self.start_ramp(def, now);
        events.push(Event::SessionStarted {
            alarm_id: def.id.clone(),
            scheduled_at: payload.fire_at,
            at: now,
        });
        Ok(true)
    }

    fn start_ramp(&mut self, def: &AlarmDefinition, now: DateTime<Utc>) {
        let section = &self.config.ramp;
        let config = if def.ramp_enabled {
            RampConfig::new(section.min_level, section.max_level, section.duration_ms)
        } else {
            Ok(RampConfig::flat(section.max_level))
        };
        let started = config.and_then(|config| {
            self.ramps
                .entry(def.id.clone())
                .or_default()
                .start(config, now)
        });
        if let Err(err) = started {
            tracing::warn!(alarm_id = %def.id, error = %err, "invalid ramp settings, ringing at full level");
            self.start_flat_ramp(&def.id, now);
        }
    }

    fn start_flat_ramp(&mut self, alarm_id: &str, now: DateTime<Utc>) {
        let ramp = self.ramps.entry(alarm_id.to_string()).or_default();
        if let Err(err) = ramp.start(RampConfig::flat(1.0), now) {
            tracing::warn!(%alarm_id, error = %err, "could not start ramp");
        }
    }

    fn stop_ramp(&mut self, alarm_id: &str, now: DateTime<Utc>, events: &mut Vec<Event>) {
        if let Some(mut ramp) = self.ramps.remove(alarm_id) {
            if let Some(level) = ramp.stop_at(now) {
                events.push(Event::RampStopped {
                    alarm_id: alarm_id.to_string(),
                    level,
                    at: now,
                });
            }
        }
    }
}

fn dispatch_context(def: &AlarmDefinition) -> DispatchContext {
    DispatchContext {
        alarm_id: def.id.clone(),
        label: def.display_label(),
        penalty: def.penalty.clone(),
        media_uri: def.media_uri.clone(),
    }
}

fn bare_context(alarm_id: &str) -> DispatchContext {
    DispatchContext {
        alarm_id: alarm_id.to_string(),
        label: alarm_id.to_string(),
        penalty: None,
        media_uri: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::{ConsequenceKind, WeekdaySet};
    use chrono::Duration;
    use crate::capability::fakes::{FakeDispatcher, FakeMechanism, FakeMedia};
    use crate::consequence::ItemStatus;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        // Wednesday
        Utc.with_ymd_and_hms(2024, 1, 3, 6, 0, 0).unwrap()
    }

    struct Harness {
        mem: MemoryStore,
        store: ScheduleStore,
        notification: FakeMechanism,
        dispatcher: FakeDispatcher,
    }

    impl Harness {
        fn new() -> Self {
            let mem = MemoryStore::new();
            Self {
                store: ScheduleStore::new(Arc::new(mem.clone())),
                mem,
                notification: FakeMechanism::new("notification"),
                dispatcher: FakeDispatcher::default(),
            }
        }

        fn engine(&self) -> AlarmEngine {
            self.engine_with(EngineConfig::default())
        }

        fn engine_with(&self, config: EngineConfig) -> AlarmEngine {
            AlarmEngine::new(
                self.store.clone(),
                config,
                Capabilities {
                    native: None,
                    notification: Box::new(self.notification.clone()),
                    dispatcher: Box::new(self.dispatcher.clone()),
                    media: Box::new(FakeMedia::default()),
                },
                Utc,
            )
        }
    }

    fn alarm() -> AlarmDefinition {
        AlarmDefinition::new("a1", 7, 0, WeekdaySet::from_days(&[1, 3, 5]).unwrap())
            .unwrap()
            .with_consequences(vec![ConsequenceKind::Message, ConsequenceKind::Call])
    }

    fn payload(kind: TriggerKind, fire_at: DateTime<Utc>) -> TriggerPayload {
        TriggerPayload {
            alarm_id: "a1".into(),
            label: "Alarm 07:00".into(),
            kind,
            fire_at,
        }
    }

    fn seven() -> DateTime<Utc> {
        t0() + Duration::hours(1)
    }

    #[test]
    fn save_alarm_registers_next_occurrence() {
        let h = Harness::new();
        let mut engine = h.engine();
        let handle = engine.save_alarm(&alarm(), t0()).unwrap().unwrap();
        assert_eq!(handle.fire_at, seven());
        assert_eq!(handle.mechanism, "notification");
    }

    #[test]
    fn trigger_starts_session_and_reschedules() {
        let h = Harness::new();
        let mut engine = h.engine();
        engine.save_alarm(&alarm(), t0()).unwrap();
        let events = engine.trigger(&payload(TriggerKind::Alarm, seven()), seven()).unwrap();

        assert!(matches!(events[0], Event::SessionStarted { .. }));
        assert!(matches!(
            events[1],
            Event::AlarmScheduled { fire_at, .. } if fire_at == seven() + Duration::days(2)
        ));
        assert!(engine.is_ringing("a1"));
        assert_eq!(engine.ramp_level("a1", seven()), Some(engine.config().ramp.min_level));

        // Second delivery of the same trigger is ignored.
        assert!(engine.trigger(&payload(TriggerKind::Alarm, seven()), seven()).unwrap().is_empty());
    }

    #[test]
    fn dismiss_stops_ramp_before_clearing_session() {
        let h = Harness::new();
        let mut engine = h.engine();
        engine.save_alarm(&alarm(), t0()).unwrap();
        engine.trigger(&payload(TriggerKind::Alarm, seven()), seven()).unwrap();

        let events = engine.dismiss("a1", seven() + Duration::seconds(30)).unwrap();
        assert!(matches!(events[0], Event::RampStopped { .. }));
        assert!(matches!(events[1], Event::SessionDismissed { .. }));
        assert!(engine.ramp_level("a1", seven()).is_none());
        assert!(h.store.session("a1").unwrap().is_none());
        // Default alarm has rechecks off.
        assert_eq!(events.len(), 2);
        assert!(matches!(
            engine.dismiss("a1", seven()),
            Err(CoreError::Session(SessionError::NotActive(_)))
        ));
    }

    #[test]
    fn dismiss_schedules_single_recheck() {
        let h = Harness::new();
        let mut engine = h.engine();
        let mut def = alarm();
        def.delayed_recheck_enabled = true;
        engine.save_alarm(&def, t0()).unwrap();
        engine.trigger(&payload(TriggerKind::Alarm, seven()), seven()).unwrap();

        let events = engine.dismiss("a1", seven()).unwrap();
        let recheck_at = seven() + Duration::minutes(5);
        assert!(matches!(
            events.last(),
            Some(Event::AlarmScheduled { kind: TriggerKind::Recheck, fire_at, .. }) if *fire_at == recheck_at
        ));

        // The recheck rings, is dismissed, and does not chain another one.
        engine.trigger(&payload(TriggerKind::Recheck, recheck_at), recheck_at).unwrap();
        let events = engine.dismiss("a1", recheck_at).unwrap();
        assert!(!events
            .iter()
            .any(|e| matches!(e, Event::AlarmScheduled { kind: TriggerKind::Recheck, .. })));
    }

    #[test]
    fn ring_now_leaves_one_shot_alarm_armed() {
        let h = Harness::new();
        let mut engine = h.engine();
        let once = AlarmDefinition::new("a1", 7, 0, WeekdaySet::from_days(&[]).unwrap()).unwrap();
        engine.save_alarm(&once, t0()).unwrap();

        let events = engine.ring_now("a1", t0()).unwrap();
        assert!(matches!(events.as_slice(), [Event::SessionStarted { .. }]));
        assert!(engine.is_ringing("a1"));
        assert!(matches!(
            engine.ring_now("a1", t0()),
            Err(CoreError::Session(SessionError::AlreadyActive(_)))
        ));
        engine.dismiss("a1", t0() + Duration::seconds(5)).unwrap();

        assert!(h.store.alarm("a1").unwrap().unwrap().enabled);
        let handle = h.store.trigger(TriggerKind::Alarm, "a1").unwrap().unwrap();
        assert_eq!(handle.fire_at, seven());
        assert!(matches!(
            engine.ring_now("missing", t0()),
            Err(CoreError::Validation(ValidationError::UnknownAlarm(_)))
        ));
    }

    #[test]
    fn oversized_config_spans_saturate() {
        let h = Harness::new();
        let mut config = EngineConfig::default();
        config.heartbeat.interval_ms = u64::MAX;
        config.consequences.message_delay_ms = i64::MAX as u64;
        config.recheck.delay_min = u64::MAX;
        let mut engine = h.engine_with(config);
        let mut def = alarm();
        def.delayed_recheck_enabled = true;
        engine.save_alarm(&def, t0()).unwrap();

        engine.trigger(&payload(TriggerKind::Alarm, seven()), seven()).unwrap();
        engine.tick(seven() + Duration::hours(1));
        let events = engine.dismiss("a1", seven() + Duration::hours(1)).unwrap();
        assert!(matches!(
            events.last(),
            Some(Event::AlarmScheduled { kind: TriggerKind::Recheck, .. } | Event::SchedulingFailed { .. })
        ));

        let friday = seven() + Duration::days(2);
        engine.trigger(&payload(TriggerKind::Alarm, friday), friday).unwrap();
        engine.evade("a1", "snooze", friday).unwrap();
        engine.tick(friday + Duration::days(365));
        assert_eq!(h.dispatcher.fired(), vec![ConsequenceKind::Message]);
        assert!(engine.executor().is_busy());
    }

    #[test]
    fn evade_persists_queue_before_clearing_session() {
        let h = Harness::new();
        let mut engine = h.engine();
        engine.save_alarm(&alarm(), t0()).unwrap();
        engine.trigger(&payload(TriggerKind::Alarm, seven()), seven()).unwrap();

        let events = engine.evade("a1", "snooze", seven()).unwrap();
        assert!(matches!(events[0], Event::SessionEvaded { .. }));
        assert!(matches!(events[1], Event::RampStopped { .. }));
        assert!(h.store.session("a1").unwrap().is_none());
        let queue = h.store.queue("a1").unwrap().unwrap();
        assert_eq!(queue.items[0].status, ItemStatus::Executing);
        assert_eq!(h.dispatcher.fired(), vec![ConsequenceKind::Message]);
    }

    #[test]
    fn killed_while_ringing_runs_consequences_on_relaunch() {
        let h = Harness::new();
        let mut engine = h.engine();
        engine.save_alarm(&alarm(), t0()).unwrap();
        engine.trigger(&payload(TriggerKind::Alarm, seven()), seven()).unwrap();
        drop(engine);

        let mut engine = h.engine();
        let later = seven() + Duration::minutes(2);
        let events = engine.launch(later).unwrap();
        assert!(matches!(events[0], Event::SessionInterrupted { .. }));
        assert!(matches!(events[1], Event::QueueStarted { resumed: false, .. }));
        assert!(h.store.session("a1").unwrap().is_none());
        assert_eq!(h.dispatcher.fired(), vec![ConsequenceKind::Message]);
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::AlarmScheduled { kind: TriggerKind::Alarm, .. })));
    }

    #[test]
    fn relaunch_with_fresh_heartbeat_keeps_ringing() {
        let h = Harness::new();
        let mut engine = h.engine();
        engine.save_alarm(&alarm(), t0()).unwrap();
        engine.trigger(&payload(TriggerKind::Alarm, seven()), seven()).unwrap();
        drop(engine);

        let mut engine = h.engine();
        let events = engine.launch(seven() + Duration::seconds(3)).unwrap();
        assert!(matches!(events[0], Event::SessionResumed { .. }));
        assert!(engine.is_ringing("a1"));
        assert!(engine.ramp_level("a1", seven()).is_some());
        assert!(h.dispatcher.fired().is_empty());
    }

    #[test]
    fn tick_heartbeats_and_reports_levels() {
        let h = Harness::new();
        let mut engine = h.engine();
        engine.save_alarm(&alarm(), t0()).unwrap();
        engine.trigger(&payload(TriggerKind::Alarm, seven()), seven()).unwrap();

        let at = seven() + Duration::seconds(6);
        let tick = engine.tick(at);
        assert_eq!(tick.levels.len(), 1);
        assert!(tick.levels[0].1 > engine.config().ramp.min_level);
        let stored = match h.store.session("a1").unwrap() {
            Some(crate::storage::schedule_store::Stored::Valid(s)) => s,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(stored.last_heartbeat, at);
    }

    #[test]
    fn remove_alarm_cancels_registrations() {
        let h = Harness::new();
        let mut engine = h.engine();
        engine.save_alarm(&alarm(), t0()).unwrap();
        assert!(engine.remove_alarm("a1").unwrap());
        assert!(h.notification.scheduled().is_empty());
        assert!(h.store.alarm("a1").unwrap().is_none());
        assert!(!engine.remove_alarm("a1").unwrap());
        assert!(h.mem.is_empty());
    }
}
