//! Recording doubles for unit tests.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::*;

/// Delivery mechanism that records calls and fails on demand.
#[derive(Clone)]
pub struct FakeMechanism {
    pub name: &'static str,
    pub fail_with: Option<FacilityError>,
    pub scheduled: Arc<Mutex<Vec<(DateTime<Utc>, TriggerPayload)>>>,
    pub cancelled: Arc<Mutex<Vec<(String, TriggerKind)>>>,
}

impl FakeMechanism {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fail_with: None,
            scheduled: Arc::default(),
            cancelled: Arc::default(),
        }
    }

    pub fn failing(name: &'static str, err: FacilityError) -> Self {
        Self {
            fail_with: Some(err),
            ..Self::new(name)
        }
    }

    pub fn scheduled(&self) -> Vec<(DateTime<Utc>, TriggerPayload)> {
        self.scheduled.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<(String, TriggerKind)> {
        self.cancelled.lock().unwrap().clone()
    }
}

impl DeliveryMechanism for FakeMechanism {
    fn name(&self) -> &str {
        self.name
    }

    fn schedule_at(
        &mut self,
        at: DateTime<Utc>,
        payload: &TriggerPayload,
    ) -> Result<FacilityHandle, FacilityError> {
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        let mut scheduled = self.scheduled.lock().unwrap();
        scheduled.push((at, payload.clone()));
        Ok(FacilityHandle(format!("{}-{}", self.name, scheduled.len())))
    }

    fn cancel(&mut self, alarm_id: &str, kind: TriggerKind) -> Result<(), FacilityError> {
        self.cancelled
            .lock()
            .unwrap()
            .push((alarm_id.to_string(), kind));
        let mut scheduled = self.scheduled.lock().unwrap();
        let before = scheduled.len();
        scheduled.retain(|(_, p)| !(p.alarm_id == alarm_id && p.kind == kind));
        if scheduled.len() == before {
            Err(FacilityError::NotFound)
        } else {
            Ok(())
        }
    }
}

/// Dispatcher recording every fired kind; kinds listed in `failing` error.
#[derive(Clone, Default)]
pub struct FakeDispatcher {
    pub fired: Arc<Mutex<Vec<ConsequenceKind>>>,
    pub failing: Vec<ConsequenceKind>,
    pub not_applicable: Vec<ConsequenceKind>,
}

impl FakeDispatcher {
    pub fn fired(&self) -> Vec<ConsequenceKind> {
        self.fired.lock().unwrap().clone()
    }
}

impl DispatchCapability for FakeDispatcher {
    fn dispatch(
        &mut self,
        kind: ConsequenceKind,
        _ctx: &DispatchContext,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.fired.lock().unwrap().push(kind);
        if self.failing.contains(&kind) {
            return Err(DispatchError::ChannelUnavailable(kind.as_str().into()));
        }
        if self.not_applicable.contains(&kind) {
            return Ok(DispatchOutcome::NotApplicable);
        }
        Ok(DispatchOutcome::Sent)
    }
}

/// Media backend recording started uris and stopped ids.
#[derive(Clone, Default)]
pub struct FakeMedia {
    pub played: Arc<Mutex<Vec<String>>>,
    pub stopped: Arc<Mutex<Vec<PlaybackId>>>,
    pub fail: bool,
}

impl FakeMedia {
    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }

    pub fn last_id(&self) -> PlaybackId {
        PlaybackId(format!("play-{}", self.played.lock().unwrap().len()))
    }
}

impl MediaPlaybackCapability for FakeMedia {
    fn play(&mut self, uri: &str) -> Result<PlaybackId, DispatchError> {
        if self.fail {
            return Err(DispatchError::Rejected("player crashed".into()));
        }
        let mut played = self.played.lock().unwrap();
        played.push(uri.to_string());
        Ok(PlaybackId(format!("play-{}", played.len())))
    }

    fn stop(&mut self, id: &PlaybackId) {
        self.stopped.lock().unwrap().push(id.clone());
    }
}
