//! Host capabilities for the command-line shell.
//!
//! The CLI has no OS alarm facility. Registrations are written to the same
//! key-value store as everything else and fired by `launch` once due.

use std::error::Error;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use wakeguard_core::capability::{
    DeliveryMechanism, DispatchCapability, DispatchContext, DispatchOutcome, FacilityHandle,
    SilentPlayback, TriggerKind, TriggerPayload,
};
use wakeguard_core::{
    AlarmEngine, Capabilities, ConsequenceKind, Database, DispatchError, EngineConfig, Event,
    FacilityError, KvStore, PersistenceError, ScheduleStore,
};

const NOTIFICATION_PREFIX: &str = "notification:";

/// Scheduled notifications kept in the kv store.
#[derive(Clone)]
pub struct KvNotificationFacility {
    kv: Arc<dyn KvStore>,
}

impl KvNotificationFacility {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn key(alarm_id: &str, kind: TriggerKind) -> String {
        let kind = match kind {
            TriggerKind::Alarm => "alarm",
            TriggerKind::Recheck => "recheck",
        };
        format!("{NOTIFICATION_PREFIX}{kind}:{alarm_id}")
    }

    /// Remove and return every registration due at `now`, earliest first.
    pub fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<TriggerPayload>, PersistenceError> {
        let mut due = Vec::new();
        for (key, value) in self.kv.scan_prefix(NOTIFICATION_PREFIX)? {
            let payload: TriggerPayload = match serde_json::from_str(&value) {
                Ok(p) => p,
                Err(err) => {
                    tracing::warn!(%key, error = %err, "dropping unreadable notification");
                    self.kv.delete(&key)?;
                    continue;
                }
            };
            if payload.fire_at <= now {
                self.kv.delete(&key)?;
                due.push(payload);
            }
        }
        due.sort_by_key(|p| p.fire_at);
        Ok(due)
    }
}

impl DeliveryMechanism for KvNotificationFacility {
    fn name(&self) -> &str {
        "notification"
    }

    fn schedule_at(
        &mut self,
        at: DateTime<Utc>,
        payload: &TriggerPayload,
    ) -> Result<FacilityHandle, FacilityError> {
        let key = Self::key(&payload.alarm_id, payload.kind);
        let payload = TriggerPayload {
            fire_at: at,
            ..payload.clone()
        };
        let json = serde_json::to_string(&payload).map_err(|e| FacilityError::Other(e.to_string()))?;
        self.kv
            .put(&key, &json)
            .map_err(|e| FacilityError::Unavailable(e.to_string()))?;
        Ok(FacilityHandle(key))
    }

    fn cancel(&mut self, alarm_id: &str, kind: TriggerKind) -> Result<(), FacilityError> {
        let key = Self::key(alarm_id, kind);
        match self.kv.get(&key) {
            Ok(None) => Err(FacilityError::NotFound),
            Ok(Some(_)) => self
                .kv
                .delete(&key)
                .map_err(|e| FacilityError::Other(e.to_string())),
            Err(e) => Err(FacilityError::Other(e.to_string())),
        }
    }
}

/// Logs every consequence instead of contacting anyone.
pub struct LogDispatcher;

impl DispatchCapability for LogDispatcher {
    fn dispatch(
        &mut self,
        kind: ConsequenceKind,
        ctx: &DispatchContext,
    ) -> Result<DispatchOutcome, DispatchError> {
        tracing::info!(
            alarm_id = %ctx.alarm_id,
            label = %ctx.label,
            kind = kind.as_str(),
            penalty = ?ctx.penalty,
            "consequence fired"
        );
        Ok(DispatchOutcome::Sent)
    }
}

pub struct Host {
    pub engine: AlarmEngine<Local>,
    pub notifications: KvNotificationFacility,
}

/// Open the database in the data directory and wire the engine to it.
pub fn open(dry_run: bool) -> Result<Host, Box<dyn Error>> {
    let kv: Arc<dyn KvStore> = Arc::new(Database::open()?);
    let config = EngineConfig::load_or_default();
    let notifications = KvNotificationFacility::new(kv.clone());
    let caps = Capabilities {
        native: None,
        notification: Box::new(notifications.clone()),
        dispatcher: Box::new(LogDispatcher),
        media: Box::new(SilentPlayback::default()),
    };
    let engine = AlarmEngine::new(ScheduleStore::new(kv), config, caps, Local).with_dry_run(dry_run);
    Ok(Host {
        engine,
        notifications,
    })
}

/// Print events to stdout, one JSON object per line.
pub fn emit(events: &[Event]) -> Result<(), Box<dyn Error>> {
    for event in events {
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(())
}
