//! Heartbeat-driven lifecycle monitor.
//!
//! While an alarm rings the host calls `heartbeat()` on a fixed interval.
//! Each beat is written through to the store, so the only way a relaunch
//! can find a fresh session is if the previous process was alive and
//! ringing until moments ago. Anything older is an interruption.
//!
//! ## Launch reconciliation
//!
//! ```text
//! queue snapshot present        -> ResumeQueue (leftover session cleared)
//! session flagged interrupted   -> Interrupted(MarkedInterrupted)
//! heartbeat inconsistent/corrupt-> Interrupted(Ambiguous)
//! heartbeat older than threshold-> Interrupted(StaleHeartbeat)
//! otherwise                     -> StillRinging (session adopted)
//! ```

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use super::{
    InterruptedSession, InterruptionReason, Reconciliation, ReconciliationResult,
    RingingSession, SessionHandle,
};
use crate::clock;
use crate::error::{PersistenceError, SessionError};
use crate::storage::schedule_store::Stored;
use crate::storage::{HeartbeatConfig, ScheduleStore};

/// Summary of one heartbeat tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub persisted: usize,
    /// Writes that failed and will be retried next tick.
    pub deferred: usize,
}

#[derive(Debug, Clone)]
struct ActiveSession {
    session: RingingSession,
    /// In-memory state is ahead of the store.
    dirty: bool,
}

pub struct LifecycleMonitor {
    store: ScheduleStore,
    config: HeartbeatConfig,
    active: BTreeMap<String, ActiveSession>,
    /// Sessions ended in memory whose persisted record could not be removed.
    pending_clears: BTreeSet<String>,
    last_beat_at: Option<DateTime<Utc>>,
}

impl LifecycleMonitor {
    pub fn new(store: ScheduleStore, config: HeartbeatConfig) -> Self {
        Self {
            store,
            config,
            active: BTreeMap::new(),
            pending_clears: BTreeSet::new(),
            last_beat_at: None,
        }
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    pub fn active_session(&self, alarm_id: &str) -> Option<&RingingSession> {
        self.active.get(alarm_id).map(|a| &a.session)
    }

    pub fn active_sessions(&self) -> impl Iterator<Item = &RingingSession> {
        self.active.values().map(|a| &a.session)
    }

    pub fn is_ringing(&self) -> bool {
        !self.active.is_empty()
    }

    /// Open and persist a ringing session.
    ///
    /// A failed initial write does not stop the alarm from ringing; the
    /// session is marked for rewrite on the next heartbeat.
    ///
    /// # Errors
    /// `AlreadyActive` if the alarm has an unresolved session in memory or
    /// in the store. Run [`on_launch`](Self::on_launch) first.
    pub fn begin_session(
        &mut self,
        alarm_id: &str,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SessionHandle, SessionError> {
        if self.active.contains_key(alarm_id) {
            return Err(SessionError::AlreadyActive(alarm_id.to_string()));
        }
        // The new session must outrank a record whose clear failed.
        let mut sequence = 1;
        match self.store.session(alarm_id) {
            Ok(Some(_)) if !self.pending_clears.contains(alarm_id) => {
                return Err(SessionError::AlreadyActive(alarm_id.to_string()));
            }
            Ok(Some(Stored::Valid(leftover))) => sequence = leftover.sequence + 1,
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(%alarm_id, error = %err, "could not check for an unresolved session");
            }
        }
        self.pending_clears.remove(alarm_id);

        let mut session = RingingSession {
            alarm_id: alarm_id.to_string(),
            scheduled_at,
            started_at: now,
            last_heartbeat: now,
            interrupted: false,
            sequence,
        };
        let persisted = self.write(&mut session);
        tracing::info!(%alarm_id, %scheduled_at, persisted, "ringing session started");
        self.active.insert(
            alarm_id.to_string(),
            ActiveSession {
                session,
                dirty: !persisted,
            },
        );
        self.last_beat_at = Some(now);
        Ok(SessionHandle {
            alarm_id: alarm_id.to_string(),
            started_at: now,
            persisted,
        })
    }

    /// Whether a heartbeat interval has elapsed since the last beat.
    pub fn heartbeat_due(&self, now: DateTime<Utc>) -> bool {
        if self.active.is_empty() && self.pending_clears.is_empty() {
            return false;
        }
        match self.last_beat_at {
            None => true,
            Some(last) => now - last >= clock::millis(self.config.interval_ms),
        }
    }

    /// Record that every active session is still alive at `now`.
    ///
    /// Write failures are logged and retried on the next call; they never
    /// end the session.
    pub fn heartbeat(&mut self, now: DateTime<Utc>) -> HeartbeatReport {
        self.retry_pending_clears();
        let mut report = HeartbeatReport::default();

        let ids: Vec<String> = self.active.keys().cloned().collect();
        for id in ids {
            let Some(entry) = self.active.get_mut(&id) else {
                continue;
            };
            // Never move the heartbeat backwards.
            if now > entry.session.last_heartbeat {
                entry.session.last_heartbeat = now;
            }
            entry.session.sequence += 1;
            let mut session = entry.session.clone();

            let persisted = self.write(&mut session);
            if let Some(entry) = self.active.get_mut(&id) {
                entry.session.sequence = session.sequence;
                entry.dirty = !persisted;
            }
            if persisted {
                report.persisted += 1;
                tracing::debug!(alarm_id = %id, sequence = session.sequence, "heartbeat");
            } else {
                report.deferred += 1;
            }
        }
        self.last_beat_at = Some(now);
        report
    }

    /// Clear the session. Called on every legitimate exit: dismissal, or
    /// after the consequence queue has been persisted.
    ///
    /// Idempotent. If the store refuses the delete it is retried on later
    /// heartbeats and before the next `begin_session`.
    pub fn end_session(&mut self, alarm_id: &str) -> Option<RingingSession> {
        let ended = self.active.remove(alarm_id).map(|a| a.session);
        match self.store.delete_session(alarm_id) {
            Ok(()) => {
                self.pending_clears.remove(alarm_id);
            }
            Err(err) => {
                tracing::warn!(%alarm_id, error = %err, "failed to clear ringing session, will retry");
                self.pending_clears.insert(alarm_id.to_string());
            }
        }
        if ended.is_some() {
            tracing::info!(%alarm_id, "ringing session ended");
        }
        if self.active.is_empty() {
            self.last_beat_at = None;
        }
        ended
    }

    /// Inspect what the previous process left behind. Run once at start,
    /// before anything is shown to the user.
    ///
    /// Sessions classified as interrupted are durably flagged before this
    /// returns, so a crash during the caller's handoff is still detected.
    pub fn on_launch(&mut self, now: DateTime<Utc>) -> Result<ReconciliationResult, PersistenceError> {
        let mut result = ReconciliationResult::default();
        let mut queued_alarms = BTreeSet::new();

        for record in self.store.queues()? {
            match record {
                Stored::Valid(snapshot) => {
                    queued_alarms.insert(snapshot.alarm_id.clone());
                    tracing::info!(alarm_id = %snapshot.alarm_id, cursor = snapshot.cursor, "found unfinished consequence queue");
                    result.outcomes.push(Reconciliation::ResumeQueue(snapshot));
                }
                Stored::Corrupt { key, message } => {
                    let alarm_id = ScheduleStore::alarm_id_from_key(&key).to_string();
                    tracing::warn!(%key, %message, "corrupt consequence queue, rebuilding from alarm");
                    if let Err(err) = self.store.delete_queue(&alarm_id) {
                        tracing::warn!(%alarm_id, error = %err, "failed to drop corrupt queue");
                    }
                    queued_alarms.insert(alarm_id.clone());
                    result.outcomes.push(Reconciliation::Interrupted(self.interrupted(
                        &alarm_id,
                        None,
                        InterruptionReason::Ambiguous {
                            detail: format!("queue snapshot unreadable: {message}"),
                        },
                    )));
                }
            }
        }

        for record in self.store.sessions()? {
            let (alarm_id, decoded) = match record {
                Stored::Valid(session) => (session.alarm_id.clone(), Ok(session)),
                Stored::Corrupt { key, message } => {
                    (ScheduleStore::alarm_id_from_key(&key).to_string(), Err(message))
                }
            };

            if queued_alarms.contains(&alarm_id) {
                // Queue was persisted before the session was cleared.
                if let Err(err) = self.store.delete_session(&alarm_id) {
                    tracing::warn!(%alarm_id, error = %err, "failed to clear handed-off session");
                }
                continue;
            }

            let outcome = match decoded {
                Ok(session) => match self.classify(&session, now) {
                    None => {
                        tracing::info!(%alarm_id, "session still ringing, adopting");
                        self.active.insert(
                            alarm_id.clone(),
                            ActiveSession {
                                session: session.clone(),
                                dirty: false,
                            },
                        );
                        self.last_beat_at = Some(session.last_heartbeat);
                        Reconciliation::StillRinging(session)
                    }
                    Some(reason) => {
                        let mut flagged = session;
                        if !flagged.interrupted {
                            flagged.interrupted = true;
                            flagged.sequence += 1;
                            self.write(&mut flagged);
                        }
                        Reconciliation::Interrupted(self.interrupted(&alarm_id, Some(flagged), reason))
                    }
                },
                Err(message) => Reconciliation::Interrupted(self.interrupted(
                    &alarm_id,
                    None,
                    InterruptionReason::Ambiguous {
                        detail: format!("session record unreadable: {message}"),
                    },
                )),
            };
            if let Reconciliation::Interrupted(found) = &outcome {
                tracing::warn!(%alarm_id, reason = ?found.reason, "ringing session was interrupted");
            }
            result.outcomes.push(outcome);
        }

        Ok(result)
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// `None` when the session is healthy.
    fn classify(&self, session: &RingingSession, now: DateTime<Utc>) -> Option<InterruptionReason> {
        if session.interrupted {
            return Some(InterruptionReason::MarkedInterrupted);
        }
        let threshold_ms = self.config.stale_threshold_ms();
        if session.last_heartbeat < session.started_at {
            return Some(InterruptionReason::Ambiguous {
                detail: "heartbeat precedes session start".into(),
            });
        }
        let age_ms = session.heartbeat_age_ms(now);
        if age_ms < -(threshold_ms as i64) {
            return Some(InterruptionReason::Ambiguous {
                detail: format!("heartbeat {}ms in the future", -age_ms),
            });
        }
        if age_ms > threshold_ms as i64 {
            return Some(InterruptionReason::StaleHeartbeat {
                age_ms,
                threshold_ms,
            });
        }
        None
    }

    fn interrupted(
        &self,
        alarm_id: &str,
        session: Option<RingingSession>,
        reason: InterruptionReason,
    ) -> InterruptedSession {
        let definition = match self.store.alarm(alarm_id) {
            Ok(def) => def,
            Err(err) => {
                tracing::warn!(%alarm_id, error = %err, "alarm definition unreadable");
                None
            }
        };
        if definition.is_none() {
            tracing::warn!(%alarm_id, "interrupted session has no alarm definition; no consequences to run");
        }
        InterruptedSession {
            alarm_id: alarm_id.to_string(),
            label: definition
                .as_ref()
                .map(|d| d.display_label())
                .unwrap_or_else(|| alarm_id.to_string()),
            consequences: definition
                .as_ref()
                .map(|d| d.consequences.clone())
                .unwrap_or_default(),
            reason,
            session,
            definition,
        }
    }

    /// True when the store holds this version of the session.
    ///
    /// A newer record for the same session counts as persisted. A newer
    /// record from a different session is superseded by bumping the
    /// sequence past it.
    fn write(&self, session: &mut RingingSession) -> bool {
        match self.store.save_session(session) {
            Ok(()) => true,
            Err(PersistenceError::StaleWrite { persisted, attempted, .. }) => {
                if self.stored_matches(session) {
                    tracing::debug!(alarm_id = %session.alarm_id, persisted, attempted, "ignored stale session write");
                    return true;
                }
                tracing::warn!(alarm_id = %session.alarm_id, persisted, attempted, "superseding leftover session record");
                session.sequence = persisted + 1;
                match self.store.save_session(session) {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::warn!(alarm_id = %session.alarm_id, error = %err, "failed to persist ringing session");
                        false
                    }
                }
            }
            Err(err) => {
                tracing::warn!(alarm_id = %session.alarm_id, error = %err, "failed to persist ringing session");
                false
            }
        }
    }

    fn stored_matches(&self, session: &RingingSession) -> bool {
        matches!(
            self.store.session(&session.alarm_id),
            Ok(Some(Stored::Valid(stored))) if stored.started_at == session.started_at
        )
    }

    fn retry_pending_clears(&mut self) {
        let pending: Vec<String> = self.pending_clears.iter().cloned().collect();
        for alarm_id in pending {
            if self.store.delete_session(&alarm_id).is_ok() {
                self.pending_clears.remove(&alarm_id);
            }
        }
    }
}
