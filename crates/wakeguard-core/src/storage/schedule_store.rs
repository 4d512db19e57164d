//! Typed records on top of a [`KvStore`].
//!
//! Key layout:
//!
//! ```text
//! alarm:<id>     AlarmDefinition
//! trigger:<id>   TriggerHandle of the next regular occurrence
//! recheck:<id>   TriggerHandle of a pending delayed recheck
//! session:<id>   RingingSession
//! queue:<id>     QueueSnapshot
//! ```
//!
//! Sessions and queue snapshots carry a sequence number; a write with a
//! lower sequence than the persisted record is refused.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::KvStore;
use crate::alarm::{AlarmDefinition, TriggerHandle};
use crate::capability::TriggerKind;
use crate::consequence::QueueSnapshot;
use crate::error::PersistenceError;
use crate::session::RingingSession;

const ALARM_PREFIX: &str = "alarm:";
const TRIGGER_PREFIX: &str = "trigger:";
const RECHECK_PREFIX: &str = "recheck:";
const SESSION_PREFIX: &str = "session:";
const QUEUE_PREFIX: &str = "queue:";

/// A persisted record that may fail to decode.
#[derive(Debug, Clone)]
pub enum Stored<T> {
    Valid(T),
    Corrupt { key: String, message: String },
}

/// Shared handle to the engine's durable state. Cheap to clone.
#[derive(Clone)]
pub struct ScheduleStore {
    kv: Arc<dyn KvStore>,
}

impl ScheduleStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &dyn KvStore {
        self.kv.as_ref()
    }

    // ── Alarms ───────────────────────────────────────────────────────

    pub fn save_alarm(&self, def: &AlarmDefinition) -> Result<(), PersistenceError> {
        self.put_json(&format!("{ALARM_PREFIX}{}", def.id), def)
    }

    pub fn alarm(&self, id: &str) -> Result<Option<AlarmDefinition>, PersistenceError> {
        self.get_json(&format!("{ALARM_PREFIX}{id}"))
    }

    /// All decodable alarms. Corrupt definitions are logged and skipped.
    pub fn alarms(&self) -> Result<Vec<AlarmDefinition>, PersistenceError> {
        Ok(self
            .scan::<AlarmDefinition>(ALARM_PREFIX)?
            .into_iter()
            .filter_map(|record| match record {
                Stored::Valid(def) => Some(def),
                Stored::Corrupt { key, message } => {
                    tracing::warn!(%key, %message, "skipping corrupt alarm definition");
                    None
                }
            })
            .collect())
    }

    pub fn delete_alarm(&self, id: &str) -> Result<(), PersistenceError> {
        self.kv.delete(&format!("{ALARM_PREFIX}{id}"))
    }

    // ── Trigger registrations ────────────────────────────────────────

    fn trigger_key(kind: TriggerKind, alarm_id: &str) -> String {
        match kind {
            TriggerKind::Alarm => format!("{TRIGGER_PREFIX}{alarm_id}"),
            TriggerKind::Recheck => format!("{RECHECK_PREFIX}{alarm_id}"),
        }
    }

    pub fn save_trigger(&self, handle: &TriggerHandle) -> Result<(), PersistenceError> {
        self.put_json(&Self::trigger_key(handle.kind, &handle.alarm_id), handle)
    }

    pub fn trigger(
        &self,
        kind: TriggerKind,
        alarm_id: &str,
    ) -> Result<Option<TriggerHandle>, PersistenceError> {
        self.get_json(&Self::trigger_key(kind, alarm_id))
    }

    pub fn delete_trigger(&self, kind: TriggerKind, alarm_id: &str) -> Result<(), PersistenceError> {
        self.kv.delete(&Self::trigger_key(kind, alarm_id))
    }

    // ── Ringing sessions ─────────────────────────────────────────────

    /// Persist a session unless a newer one is already stored.
    pub fn save_session(&self, session: &RingingSession) -> Result<(), PersistenceError> {
        let key = format!("{SESSION_PREFIX}{}", session.alarm_id);
        self.put_sequenced(&key, session, session.sequence, |s: &RingingSession| s.sequence)
    }

    pub fn session(&self, alarm_id: &str) -> Result<Option<Stored<RingingSession>>, PersistenceError> {
        let key = format!("{SESSION_PREFIX}{alarm_id}");
        Ok(self.kv.get(&key)?.map(|raw| decode(&key, &raw)))
    }

    pub fn sessions(&self) -> Result<Vec<Stored<RingingSession>>, PersistenceError> {
        self.scan(SESSION_PREFIX)
    }

    pub fn delete_session(&self, alarm_id: &str) -> Result<(), PersistenceError> {
        self.kv.delete(&format!("{SESSION_PREFIX}{alarm_id}"))
    }

    /// Alarm id encoded in a session or queue key.
    pub fn alarm_id_from_key(key: &str) -> &str {
        key.split_once(':').map(|(_, id)| id).unwrap_or(key)
    }

    // ── Consequence queues ───────────────────────────────────────────

    pub fn save_queue(&self, snapshot: &QueueSnapshot) -> Result<(), PersistenceError> {
        let key = format!("{QUEUE_PREFIX}{}", snapshot.alarm_id);
        self.put_sequenced(&key, snapshot, snapshot.sequence, |s: &QueueSnapshot| s.sequence)
    }

    pub fn queue(&self, alarm_id: &str) -> Result<Option<QueueSnapshot>, PersistenceError> {
        self.get_json(&format!("{QUEUE_PREFIX}{alarm_id}"))
    }

    pub fn queues(&self) -> Result<Vec<Stored<QueueSnapshot>>, PersistenceError> {
        self.scan(QUEUE_PREFIX)
    }

    pub fn delete_queue(&self, alarm_id: &str) -> Result<(), PersistenceError> {
        self.kv.delete(&format!("{QUEUE_PREFIX}{alarm_id}"))
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(value).map_err(|e| PersistenceError::Write {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.kv.put(key, &json)
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, PersistenceError> {
        match self.kv.get(key)? {
            None => Ok(None),
            Some(raw) => match decode(key, &raw) {
                Stored::Valid(v) => Ok(Some(v)),
                Stored::Corrupt { key, message } => Err(PersistenceError::Corrupt { key, message }),
            },
        }
    }

    fn scan<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<Stored<T>>, PersistenceError> {
        Ok(self
            .kv
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(key, raw)| decode(&key, &raw))
            .collect())
    }

    fn put_sequenced<T, F>(
        &self,
        key: &str,
        value: &T,
        sequence: u64,
        sequence_of: F,
    ) -> Result<(), PersistenceError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(&T) -> u64,
    {
        if let Some(raw) = self.kv.get(key)? {
            // A corrupt record is simply replaced.
            if let Stored::Valid(existing) = decode::<T>(key, &raw) {
                let persisted = sequence_of(&existing);
                if persisted > sequence {
                    return Err(PersistenceError::StaleWrite {
                        key: key.to_string(),
                        persisted,
                        attempted: sequence,
                    });
                }
            }
        }
        self.put_json(key, value)
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Stored<T> {
    match serde_json::from_str(raw) {
        Ok(v) => Stored::Valid(v),
        Err(e) => Stored::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        },
    }
}
