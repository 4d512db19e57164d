//! Tiered alarm delivery.
//!
//! Registration walks the mechanisms from most to least reliable:
//!
//! ```text
//! native alarm facility (if present) -> scheduled notification
//! ```
//!
//! The first one that accepts wins. If none does the caller gets a
//! [`SchedulingError`] to surface to the user; nothing is retried here.
//! Cancellation always goes to every mechanism.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::definition::AlarmDefinition;
use super::recurrence::next_trigger;
use crate::capability::{DeliveryMechanism, FacilityHandle, TriggerKind, TriggerPayload};
use crate::error::{CoreError, FacilityError, PersistenceError, SchedulingError};
use crate::events::Event;
use crate::storage::ScheduleStore;

/// A live registration, persisted so it can be cancelled after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerHandle {
    pub alarm_id: String,
    pub kind: TriggerKind,
    pub fire_at: DateTime<Utc>,
    /// Name of the mechanism that accepted the registration.
    pub mechanism: String,
    pub facility_handle: FacilityHandle,
}

impl TriggerHandle {
    pub fn scheduled_event(&self) -> Event {
        Event::AlarmScheduled {
            alarm_id: self.alarm_id.clone(),
            kind: self.kind,
            mechanism: self.mechanism.clone(),
            fire_at: self.fire_at,
        }
    }
}

/// What happened to an alarm after one of its triggers fired.
#[derive(Debug, Clone, PartialEq)]
pub enum FiredOutcome {
    /// Recurring alarm registered for its following occurrence.
    Rescheduled(TriggerHandle),
    /// One-shot alarm switched off.
    Disabled,
    /// Recheck consumed, or the alarm no longer exists.
    Consumed,
}

pub struct AlarmScheduler<Tz: TimeZone = Utc> {
    store: ScheduleStore,
    native: Option<Box<dyn DeliveryMechanism>>,
    notification: Box<dyn DeliveryMechanism>,
    tz: Tz,
}

impl<Tz: TimeZone> AlarmScheduler<Tz> {
    /// `native` is resolved once by the host: `None` when the platform has
    /// no alarm facility.
    pub fn new(
        store: ScheduleStore,
        native: Option<Box<dyn DeliveryMechanism>>,
        notification: Box<dyn DeliveryMechanism>,
        tz: Tz,
    ) -> Self {
        Self {
            store,
            native,
            notification,
            tz,
        }
    }

    pub fn has_native_facility(&self) -> bool {
        self.native.is_some()
    }

    /// Next trigger instant for `def` after `now`, evaluated in the
    /// scheduler's time zone.
    pub fn next_trigger(&self, def: &AlarmDefinition, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        next_trigger(def, &now.with_timezone(&self.tz)).map(|t| t.with_timezone(&Utc))
    }

    /// Register the next occurrence of `def`, replacing any previous
    /// registration.
    ///
    /// # Errors
    /// `AlarmDisabled` for a switched-off alarm (its stale registration is
    /// cancelled first), `PermissionDenied` or `MechanismUnavailable` when no
    /// mechanism accepts.
    pub fn schedule(
        &mut self,
        def: &AlarmDefinition,
        now: DateTime<Utc>,
    ) -> Result<TriggerHandle, SchedulingError> {
        if !def.enabled {
            self.cancel_kind(&def.id, TriggerKind::Alarm);
            return Err(SchedulingError::AlarmDisabled(def.id.clone()));
        }
        let fire_at = self
            .next_trigger(def, now)
            .ok_or_else(|| SchedulingError::NoUpcomingTrigger(def.id.clone()))?;

        self.cancel_kind(&def.id, TriggerKind::Alarm);
        self.register(TriggerPayload {
            alarm_id: def.id.clone(),
            label: def.display_label(),
            kind: TriggerKind::Alarm,
            fire_at,
        })
    }

    /// Register a one-shot follow-up that re-rings `def` at `at`.
    pub fn schedule_recheck(
        &mut self,
        def: &AlarmDefinition,
        at: DateTime<Utc>,
    ) -> Result<TriggerHandle, SchedulingError> {
        self.cancel_kind(&def.id, TriggerKind::Recheck);
        self.register(TriggerPayload {
            alarm_id: def.id.clone(),
            label: def.display_label(),
            kind: TriggerKind::Recheck,
            fire_at: at,
        })
    }

    /// Cancel every registration of the alarm on every mechanism.
    /// Idempotent.
    pub fn cancel(&mut self, alarm_id: &str) {
        self.cancel_kind(alarm_id, TriggerKind::Alarm);
        self.cancel_kind(alarm_id, TriggerKind::Recheck);
    }

    /// Bookkeeping after a trigger fired.
    ///
    /// Recurring alarms are rescheduled from the later of `now` and the
    /// planned fire time, so an early delivery cannot re-select the same
    /// occurrence.
    pub fn on_fired(
        &mut self,
        payload: &TriggerPayload,
        now: DateTime<Utc>,
    ) -> Result<FiredOutcome, CoreError> {
        if payload.kind == TriggerKind::Recheck {
            self.forget(TriggerKind::Recheck, &payload.alarm_id);
            return Ok(FiredOutcome::Consumed);
        }

        let Some(mut def) = self.store.alarm(&payload.alarm_id)? else {
            tracing::warn!(alarm_id = %payload.alarm_id, "fired alarm no longer exists");
            self.cancel(&payload.alarm_id);
            return Ok(FiredOutcome::Consumed);
        };

        if !def.is_recurring() {
            def.enabled = false;
            self.store.save_alarm(&def)?;
            self.forget(TriggerKind::Alarm, &def.id);
            tracing::info!(alarm_id = %def.id, "one-shot alarm fired, disabled");
            return Ok(FiredOutcome::Disabled);
        }

        let base = if payload.fire_at > now { payload.fire_at } else { now };
        let handle = self.schedule(&def, base)?;
        Ok(FiredOutcome::Rescheduled(handle))
    }

    /// Re-register every enabled alarm. A failure for one alarm does not
    /// stop the others.
    pub fn reschedule_all(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, Result<TriggerHandle, SchedulingError>)>, PersistenceError> {
        let alarms = self.store.alarms()?;
        Ok(alarms
            .into_iter()
            .filter(|def| def.enabled)
            .map(|def| {
                let result = self.schedule(&def, now);
                if let Err(err) = &result {
                    tracing::warn!(alarm_id = %def.id, error = %err, "failed to reschedule alarm");
                }
                (def.id, result)
            })
            .collect())
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn register(&mut self, payload: TriggerPayload) -> Result<TriggerHandle, SchedulingError> {
        let mut denied_by: Option<String> = None;
        let mechanisms = self
            .native
            .iter_mut()
            .map(|m| m.as_mut())
            .chain(std::iter::once(self.notification.as_mut()));

        for mechanism in mechanisms {
            match mechanism.schedule_at(payload.fire_at, &payload) {
                Ok(facility_handle) => {
                    let handle = TriggerHandle {
                        alarm_id: payload.alarm_id.clone(),
                        kind: payload.kind,
                        fire_at: payload.fire_at,
                        mechanism: mechanism.name().to_string(),
                        facility_handle,
                    };
                    if let Err(err) = self.store.save_trigger(&handle) {
                        // The registration stands; only restart-time
                        // cancellation loses its record.
                        tracing::warn!(alarm_id = %handle.alarm_id, error = %err, "failed to persist trigger handle");
                    }
                    tracing::info!(
                        alarm_id = %handle.alarm_id,
                        kind = ?handle.kind,
                        mechanism = %handle.mechanism,
                        fire_at = %handle.fire_at,
                        "alarm registered"
                    );
                    return Ok(handle);
                }
                Err(FacilityError::PermissionDenied) => {
                    tracing::warn!(mechanism = mechanism.name(), alarm_id = %payload.alarm_id, "delivery permission denied");
                    if denied_by.is_none() {
                        denied_by = Some(mechanism.name().to_string());
                    }
                }
                Err(err) => {
                    tracing::warn!(mechanism = mechanism.name(), alarm_id = %payload.alarm_id, error = %err, "delivery mechanism rejected registration");
                }
            }
        }

        Err(match denied_by {
            Some(mechanism) => SchedulingError::PermissionDenied { mechanism },
            None => SchedulingError::MechanismUnavailable,
        })
    }

    fn cancel_kind(&mut self, alarm_id: &str, kind: TriggerKind) {
        let mechanisms = self
            .native
            .iter_mut()
            .map(|m| m.as_mut())
            .chain(std::iter::once(self.notification.as_mut()));
        for mechanism in mechanisms {
            match mechanism.cancel(alarm_id, kind) {
                Ok(()) | Err(FacilityError::NotFound) => {}
                Err(err) => {
                    tracing::warn!(mechanism = mechanism.name(), %alarm_id, error = %err, "cancel failed");
                }
            }
        }
        self.forget(kind, alarm_id);
    }

    fn forget(&self, kind: TriggerKind, alarm_id: &str) {
        if let Err(err) = self.store.delete_trigger(kind, alarm_id) {
            tracing::warn!(%alarm_id, error = %err, "failed to remove trigger handle");
        }
    }
}
