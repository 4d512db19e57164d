//! Sequential consequence execution.
//!
//! Runs one queue at a time, one item at a time. The host drives it with
//! `tick(now)` and forwards playback completions; every call returns the
//! events it produced.
//!
//! ## Durability
//!
//! ```text
//! persist(Executing, attempted=false) -> invoke capability
//!   -> persist(Executing, attempted=true)
//!   -> ... completion ...
//!   -> persist(terminal status, cursor+1)
//! ```
//!
//! On resume, an attempted fixed-delay item is not invoked again; it only
//! waits out its remaining delay. Media playback never survives the
//! process, so an executing media item is played again.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::item::{CompletedBy, ItemStatus, QueueSnapshot};
use super::report::TerminalReport;
use crate::alarm::ConsequenceKind;
use crate::capability::{
    DispatchCapability, DispatchContext, DispatchOutcome, MediaPlaybackCapability, PlaybackId,
};
use crate::error::{DispatchError, PersistenceError};
use crate::events::Event;
use crate::storage::{ConsequenceConfig, ScheduleStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorState {
    /// Nothing has been submitted yet.
    Idle,
    Executing { alarm_id: String, index: usize },
    /// The last queue finished and nothing is backlogged.
    Complete,
}

/// One status change of one item, kept for auditing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub alarm_id: String,
    pub index: usize,
    pub kind: ConsequenceKind,
    pub from: ItemStatus,
    pub to: ItemStatus,
    pub at: DateTime<Utc>,
}

enum Attempt {
    Started(Option<PlaybackId>),
    NotApplicable,
}

pub struct ConsequenceExecutor {
    store: ScheduleStore,
    config: ConsequenceConfig,
    dispatcher: Box<dyn DispatchCapability>,
    media: Box<dyn MediaPlaybackCapability>,
    dry_run: bool,
    current: Option<QueueSnapshot>,
    /// Queued runs with their `resumed` flag, in submission order.
    backlog: VecDeque<(QueueSnapshot, bool)>,
    transitions: Vec<Transition>,
    reports: Vec<TerminalReport>,
}

impl ConsequenceExecutor {
    pub fn new(
        store: ScheduleStore,
        config: ConsequenceConfig,
        dispatcher: Box<dyn DispatchCapability>,
        media: Box<dyn MediaPlaybackCapability>,
    ) -> Self {
        Self {
            store,
            config,
            dispatcher,
            media,
            dry_run: false,
            current: None,
            backlog: VecDeque::new(),
            transitions: Vec::new(),
            reports: Vec::new(),
        }
    }

    /// Mark every item skipped instead of invoking capabilities.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> ExecutorState {
        match &self.current {
            Some(snapshot) => ExecutorState::Executing {
                alarm_id: snapshot.alarm_id.clone(),
                index: snapshot.cursor,
            },
            None if self.reports.is_empty() => ExecutorState::Idle,
            None => ExecutorState::Complete,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.current.is_some()
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn current(&self) -> Option<&QueueSnapshot> {
        self.current.as_ref()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Whether a queue for `alarm_id` is running or backlogged.
    pub fn is_queued(&self, alarm_id: &str) -> bool {
        self.current.as_ref().is_some_and(|s| s.alarm_id == alarm_id)
            || self.backlog.iter().any(|(s, _)| s.alarm_id == alarm_id)
    }

    pub fn transition_log(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn reports(&self) -> &[TerminalReport] {
        &self.reports
    }

    pub fn last_report(&self) -> Option<&TerminalReport> {
        self.reports.last()
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Submit a new queue. The snapshot is durable when this returns.
    pub fn start(
        &mut self,
        context: DispatchContext,
        kinds: &[ConsequenceKind],
        now: DateTime<Utc>,
    ) -> Vec<Event> {
        let mut snapshot = QueueSnapshot::new(context, kinds, &self.config);
        // A finished queue whose record could not be removed must not
        // outrank the new one.
        match self.store.queue(&snapshot.alarm_id) {
            Ok(Some(leftover)) if !self.is_queued(&snapshot.alarm_id) => {
                tracing::warn!(alarm_id = %snapshot.alarm_id, sequence = leftover.sequence, "replacing leftover queue record");
                snapshot.sequence = leftover.sequence;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(alarm_id = %snapshot.alarm_id, error = %err, "could not read previous queue record");
            }
        }
        self.submit(snapshot, false, now)
    }

    /// Continue a queue found in the store at launch.
    pub fn resume(&mut self, mut snapshot: QueueSnapshot, now: DateTime<Utc>) -> Vec<Event> {
        let cursor = snapshot.cursor;
        if let Some(item) = snapshot.items.get_mut(cursor) {
            if item.status == ItemStatus::Executing && item.policy.is_external() {
                item.attempted = false;
                item.playback = None;
            }
        }
        self.submit(snapshot, true, now)
    }

    /// Complete whatever is due at `now` and dispatch what follows.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let mut events = Vec::new();
        self.drive(now, &mut events);
        events
    }

    /// Completion signal from the media backend. Unknown ids are ignored.
    pub fn playback_finished(&mut self, id: &PlaybackId, now: DateTime<Utc>) -> Vec<Event> {
        let mut events = Vec::new();
        let matches = self
            .current
            .as_ref()
            .and_then(QueueSnapshot::current)
            .is_some_and(|item| {
                item.status == ItemStatus::Executing && item.playback.as_ref() == Some(id)
            });
        if !matches {
            tracing::debug!(playback = %id.0, "ignoring completion for unknown playback");
            return events;
        }
        if let Some(mut snapshot) = self.current.take() {
            self.complete(&mut snapshot, ItemStatus::Done, Some(CompletedBy::Event), None, now, &mut events);
            self.current = Some(snapshot);
        }
        self.drive(now, &mut events);
        events
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn submit(&mut self, mut snapshot: QueueSnapshot, resumed: bool, now: DateTime<Utc>) -> Vec<Event> {
        let mut events = Vec::new();
        if self.is_queued(&snapshot.alarm_id) {
            tracing::warn!(alarm_id = %snapshot.alarm_id, "consequence queue already submitted");
            return events;
        }
        if snapshot.items.is_empty() {
            events.push(started_event(&snapshot, resumed, now));
            self.finish(snapshot, now, &mut events);
            return events;
        }

        self.persist(&mut snapshot);
        if self.current.is_some() {
            tracing::info!(alarm_id = %snapshot.alarm_id, backlog = self.backlog.len() + 1, "consequence queue backlogged");
            self.backlog.push_back((snapshot, resumed));
            return events;
        }

        tracing::info!(alarm_id = %snapshot.alarm_id, items = snapshot.items.len(), resumed, "consequence queue started");
        events.push(started_event(&snapshot, resumed, now));
        self.current = Some(snapshot);
        self.drive(now, &mut events);
        events
    }

    fn drive(&mut self, now: DateTime<Utc>, events: &mut Vec<Event>) {
        loop {
            let Some(mut snapshot) = self.current.take() else {
                match self.backlog.pop_front() {
                    Some((next, resumed)) => {
                        tracing::info!(alarm_id = %next.alarm_id, "starting backlogged consequence queue");
                        events.push(started_event(&next, resumed, now));
                        self.current = Some(next);
                        continue;
                    }
                    None => return,
                }
            };

            if snapshot.is_finished() {
                self.finish(snapshot, now, events);
                continue;
            }

            self.step(&mut snapshot, now, events);
            let waiting = snapshot.current().is_some_and(|item| {
                item.status == ItemStatus::Executing
                    && item.attempted
                    && now < item.policy.deadline(item.started_at.unwrap_or(now))
            });
            self.current = Some(snapshot);
            if waiting {
                return;
            }
        }
    }

    /// Advance the cursor item by one state.
    fn step(&mut self, snapshot: &mut QueueSnapshot, now: DateTime<Utc>, events: &mut Vec<Event>) {
        let Some(item) = snapshot.current() else {
            return;
        };
        match (item.status, item.attempted) {
            (ItemStatus::Pending, _) | (ItemStatus::Executing, false) => {
                self.dispatch(snapshot, now, events);
            }
            (ItemStatus::Executing, true) => {
                let started = item.started_at.unwrap_or(now);
                if now < item.policy.deadline(started) {
                    return;
                }
                let by = if item.policy.is_external() {
                    if let Some(id) = &item.playback {
                        self.media.stop(id);
                    }
                    tracing::warn!(alarm_id = %snapshot.alarm_id, index = snapshot.cursor, "media playback watchdog expired");
                    CompletedBy::Watchdog
                } else {
                    CompletedBy::Delay
                };
                self.complete(snapshot, ItemStatus::Done, Some(by), None, now, events);
            }
            // Terminal item left under the cursor.
            _ => {
                snapshot.cursor += 1;
                self.persist(snapshot);
            }
        }
    }

    fn dispatch(&mut self, snapshot: &mut QueueSnapshot, now: DateTime<Utc>, events: &mut Vec<Event>) {
        if self.dry_run {
            self.complete(snapshot, ItemStatus::Skipped, None, Some("dry run".into()), now, events);
            return;
        }

        let index = snapshot.cursor;
        let Some(item) = snapshot.items.get_mut(index) else {
            return;
        };
        let kind = item.kind;
        let from = item.status;
        item.status = ItemStatus::Executing;
        item.started_at = Some(now);
        item.attempted = false;
        item.playback = None;
        item.detail = None;
        if from != ItemStatus::Executing {
            self.log(&snapshot.alarm_id, index, kind, from, ItemStatus::Executing, now);
        }
        events.push(Event::ConsequenceStarted {
            alarm_id: snapshot.alarm_id.clone(),
            index,
            kind,
            at: now,
        });
        self.persist(snapshot);

        let attempt = match kind {
            ConsequenceKind::MediaPlayback => self.play(&snapshot.context),
            _ => self
                .dispatcher
                .dispatch(kind, &snapshot.context)
                .map(|outcome| match outcome {
                    DispatchOutcome::Sent => Attempt::Started(None),
                    DispatchOutcome::NotApplicable => Attempt::NotApplicable,
                }),
        };

        match attempt {
            Ok(Attempt::Started(playback)) => {
                if let Some(item) = snapshot.items.get_mut(index) {
                    item.attempted = true;
                    item.playback = playback;
                }
                self.persist(snapshot);
                tracing::info!(alarm_id = %snapshot.alarm_id, index, kind = kind.as_str(), "consequence dispatched");
            }
            Ok(Attempt::NotApplicable) => {
                tracing::info!(alarm_id = %snapshot.alarm_id, index, kind = kind.as_str(), "no channel configured, skipping");
                self.complete(snapshot, ItemStatus::Skipped, None, Some("no channel configured".into()), now, events);
            }
            Err(err) => {
                tracing::warn!(alarm_id = %snapshot.alarm_id, index, kind = kind.as_str(), error = %err, "consequence dispatch failed");
                if let Some(item) = snapshot.items.get_mut(index) {
                    item.attempted = true;
                }
                self.complete(snapshot, ItemStatus::Failed, None, Some(err.to_string()), now, events);
            }
        }
    }

    fn play(&mut self, context: &DispatchContext) -> Result<Attempt, DispatchError> {
        let uri = context
            .media_uri
            .clone()
            .or_else(|| self.config.default_media_uri.clone());
        match uri {
            Some(uri) => self.media.play(&uri).map(|id| Attempt::Started(Some(id))),
            None => Ok(Attempt::NotApplicable),
        }
    }

    /// Record the cursor item's terminal status and advance in one write.
    fn complete(
        &mut self,
        snapshot: &mut QueueSnapshot,
        status: ItemStatus,
        completed_by: Option<CompletedBy>,
        detail: Option<String>,
        now: DateTime<Utc>,
        events: &mut Vec<Event>,
    ) {
        let index = snapshot.cursor;
        let Some(item) = snapshot.items.get_mut(index) else {
            return;
        };
        let from = item.status;
        let kind = item.kind;
        item.status = status;
        item.finished_at = Some(now);
        item.completed_by = completed_by;
        item.playback = None;
        if detail.is_some() {
            item.detail = detail;
        }
        self.log(&snapshot.alarm_id, index, kind, from, status, now);
        events.push(Event::ConsequenceFinished {
            alarm_id: snapshot.alarm_id.clone(),
            index,
            kind,
            status,
            at: now,
        });
        snapshot.cursor += 1;
        self.persist(snapshot);
    }

    fn finish(&mut self, snapshot: QueueSnapshot, now: DateTime<Utc>, events: &mut Vec<Event>) {
        if let Err(err) = self.store.delete_queue(&snapshot.alarm_id) {
            tracing::warn!(alarm_id = %snapshot.alarm_id, error = %err, "failed to remove finished queue");
        }
        let report = TerminalReport::from_snapshot(&snapshot, self.dry_run);
        tracing::info!(
            alarm_id = %report.alarm_id,
            done = report.done_count(),
            failed = report.failed_count(),
            skipped = report.skipped_count(),
            "consequence queue complete"
        );
        events.push(Event::QueueCompleted {
            report: report.clone(),
            at: now,
        });
        self.reports.push(report);
    }

    fn persist(&self, snapshot: &mut QueueSnapshot) -> bool {
        snapshot.sequence += 1;
        match self.store.save_queue(snapshot) {
            Ok(()) => true,
            Err(PersistenceError::StaleWrite { persisted, attempted, .. }) => {
                // The in-memory queue is the live one; move past the record.
                tracing::warn!(alarm_id = %snapshot.alarm_id, persisted, attempted, "queue record ahead of memory, superseding");
                snapshot.sequence = persisted + 1;
                self.save(snapshot)
            }
            Err(err) => {
                tracing::warn!(alarm_id = %snapshot.alarm_id, error = %err, "failed to persist consequence queue");
                false
            }
        }
    }

    fn save(&self, snapshot: &QueueSnapshot) -> bool {
        match self.store.save_queue(snapshot) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(alarm_id = %snapshot.alarm_id, error = %err, "failed to persist consequence queue");
                false
            }
        }
    }

    fn log(
        &mut self,
        alarm_id: &str,
        index: usize,
        kind: ConsequenceKind,
        from: ItemStatus,
        to: ItemStatus,
        at: DateTime<Utc>,
    ) {
        self.transitions.push(Transition {
            alarm_id: alarm_id.to_string(),
            index,
            kind,
            from,
            to,
            at,
        });
    }
}

fn started_event(snapshot: &QueueSnapshot, resumed: bool, now: DateTime<Utc>) -> Event {
    Event::QueueStarted {
        alarm_id: snapshot.alarm_id.clone(),
        items: snapshot.kinds(),
        resumed,
        at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::fakes::{FakeDispatcher, FakeMedia};
    use crate::storage::MemoryStore;
    use chrono::{Duration, TimeZone};
    use std::sync::{Arc, Mutex};

    use crate::alarm::ConsequenceKind::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 3, 7, 5, 0).unwrap()
    }

    fn ms(n: i64) -> DateTime<Utc> {
        t0() + Duration::milliseconds(n)
    }

    fn config() -> ConsequenceConfig {
        ConsequenceConfig {
            message_delay_ms: 1_000,
            call_delay_ms: 2_000,
            mail_delay_ms: 1_000,
            media_timeout_ms: 5_000,
            default_media_uri: Some("file:///alarm.ogg".into()),
        }
    }

    fn ctx(alarm_id: &str) -> DispatchContext {
        DispatchContext {
            alarm_id: alarm_id.into(),
            label: "Wake".into(),
            penalty: None,
            media_uri: None,
        }
    }

    struct Harness {
        mem: MemoryStore,
        store: ScheduleStore,
        dispatcher: FakeDispatcher,
        media: FakeMedia,
    }

    impl Harness {
        fn new() -> Self {
            let mem = MemoryStore::new();
            Self {
                store: ScheduleStore::new(Arc::new(mem.clone())),
                mem,
                dispatcher: FakeDispatcher::default(),
                media: FakeMedia::default(),
            }
        }

        fn executor(&self) -> ConsequenceExecutor {
            ConsequenceExecutor::new(
                self.store.clone(),
                config(),
                Box::new(self.dispatcher.clone()),
                Box::new(self.media.clone()),
            )
        }
    }

    fn statuses(ex: &ConsequenceExecutor) -> Vec<ItemStatus> {
        ex.current()
            .map(|s| s.items.iter().map(|i| i.status).collect())
            .unwrap_or_default()
    }

    #[test]
    fn runs_fixed_delay_items_in_order() {
        let h = Harness::new();
        let mut ex = h.executor();
        ex.start(ctx("a1"), &[Message, Call, Mail], t0());
        assert_eq!(h.dispatcher.fired(), vec![Message]);
        assert_eq!(statuses(&ex), vec![ItemStatus::Executing, ItemStatus::Pending, ItemStatus::Pending]);

        assert!(ex.tick(ms(999)).is_empty());
        ex.tick(ms(1_000));
        assert_eq!(h.dispatcher.fired(), vec![Message, Call]);

        ex.tick(ms(2_999));
        assert_eq!(h.dispatcher.fired(), vec![Message, Call]);
        ex.tick(ms(3_000));
        assert_eq!(h.dispatcher.fired(), vec![Message, Call, Mail]);

        let events = ex.tick(ms(4_000));
        assert!(matches!(events.last(), Some(Event::QueueCompleted { .. })));
        assert_eq!(ex.state(), ExecutorState::Complete);

        let report = ex.last_report().unwrap();
        assert_eq!(report.entries.len(), 3);
        assert!(report
            .entries
            .iter()
            .all(|e| e.status == ItemStatus::Done && e.completed_by == Some(CompletedBy::Delay)));
        assert!(h.store.queue("a1").unwrap().is_none());
    }

    #[test]
    fn transition_log_never_overlaps_items() {
        let h = Harness::new();
        let mut ex = h.executor();
        ex.start(ctx("a1"), &[Message, Call], t0());
        ex.tick(ms(1_000));
        ex.tick(ms(3_000));

        let log: Vec<_> = ex
            .transition_log()
            .iter()
            .map(|t| (t.index, t.from, t.to))
            .collect();
        assert_eq!(
            log,
            vec![
                (0, ItemStatus::Pending, ItemStatus::Executing),
                (0, ItemStatus::Executing, ItemStatus::Done),
                (1, ItemStatus::Pending, ItemStatus::Executing),
                (1, ItemStatus::Executing, ItemStatus::Done),
            ]
        );
    }

    #[test]
    fn media_completes_on_matching_event() {
        let h = Harness::new();
        let mut ex = h.executor();
        ex.start(ctx("a1"), &[MediaPlayback, Message], t0());
        assert_eq!(h.media.played(), vec!["file:///alarm.ogg".to_string()]);

        assert!(ex.playback_finished(&PlaybackId("other".into()), ms(10)).is_empty());
        assert_eq!(statuses(&ex)[0], ItemStatus::Executing);

        ex.playback_finished(&h.media.last_id(), ms(500));
        assert_eq!(h.dispatcher.fired(), vec![Message]);
        let item = &ex.current().unwrap().items[0];
        assert_eq!(item.completed_by, Some(CompletedBy::Event));
        assert_eq!(item.finished_at, Some(ms(500)));
    }

    #[test]
    fn media_watchdog_completes_silent_playback() {
        let h = Harness::new();
        let mut ex = h.executor();
        ex.start(ctx("a1"), &[MediaPlayback], t0());
        ex.tick(ms(4_999));
        assert!(ex.is_busy());
        ex.tick(ms(5_000));
        let report = ex.last_report().unwrap();
        assert_eq!(report.entries[0].completed_by, Some(CompletedBy::Watchdog));
        assert_eq!(h.media.stopped.lock().unwrap().len(), 1);
    }

    #[test]
    fn failed_dispatch_advances_immediately() {
        let mut h = Harness::new();
        h.dispatcher.failing = vec![Call];
        let mut ex = h.executor();
        ex.start(ctx("a1"), &[Call, Message], t0());
        // Call failed, Message dispatched in the same call.
        assert_eq!(h.dispatcher.fired(), vec![Call, Message]);
        ex.tick(ms(1_000));
        let report = ex.last_report().unwrap();
        assert_eq!(report.entries[0].status, ItemStatus::Failed);
        assert_eq!(report.entries[0].outcome_label(), "attempted, not confirmed");
        assert_eq!(report.entries[1].status, ItemStatus::Done);
    }

    #[test]
    fn playback_start_failure_is_failed() {
        let mut h = Harness::new();
        h.media.fail = true;
        let mut ex = h.executor();
        ex.start(ctx("a1"), &[MediaPlayback], t0());
        assert_eq!(ex.last_report().unwrap().entries[0].status, ItemStatus::Failed);
    }

    #[test]
    fn not_applicable_is_skipped() {
        let mut h = Harness::new();
        h.dispatcher.not_applicable = vec![Mail];
        let mut ex = h.executor();
        ex.start(ctx("a1"), &[Mail], t0());
        let report = ex.last_report().unwrap();
        assert_eq!(report.entries[0].status, ItemStatus::Skipped);
    }

    #[test]
    fn dry_run_skips_everything() {
        let h = Harness::new();
        let mut ex = h.executor().with_dry_run(true);
        ex.start(ctx("a1"), &[Message, MediaPlayback, Call], t0());
        assert!(h.dispatcher.fired().is_empty());
        assert!(h.media.played().is_empty());
        let report = ex.last_report().unwrap();
        assert!(report.dry_run);
        assert_eq!(report.skipped_count(), 3);
    }

    #[test]
    fn empty_queue_completes_with_empty_report() {
        let h = Harness::new();
        let mut ex = h.executor();
        let events = ex.start(ctx("a1"), &[], t0());
        assert!(matches!(events.last(), Some(Event::QueueCompleted { report, .. }) if report.entries.is_empty()));
        assert_eq!(ex.state(), ExecutorState::Complete);
        assert!(h.mem.is_empty());
    }

    #[test]
    fn attempted_fixed_delay_item_is_not_redispatched_on_resume() {
        let h = Harness::new();
        let mut ex = h.executor();
        ex.start(ctx("a1"), &[Message, Call], t0());
        ex.tick(ms(1_000));
        assert_eq!(h.dispatcher.fired(), vec![Message, Call]);
        drop(ex); // killed while the call is in its delay

        let snapshot = h.store.queue("a1").unwrap().unwrap();
        assert_eq!(snapshot.cursor, 1);
        assert!(snapshot.items[1].attempted);

        let mut ex = h.executor();
        ex.resume(snapshot, ms(1_500));
        assert_eq!(h.dispatcher.fired(), vec![Message, Call]);
        ex.tick(ms(2_999));
        assert!(ex.is_busy());
        ex.tick(ms(3_000));
        assert_eq!(ex.state(), ExecutorState::Complete);
        let report = ex.last_report().unwrap();
        assert_eq!(report.done_count(), 2);
    }

    #[test]
    fn unattempted_item_is_dispatched_on_resume() {
        let h = Harness::new();
        let mut snapshot = QueueSnapshot::new(ctx("a1"), &[Message, Call], &config());
        snapshot.items[0].status = ItemStatus::Done;
        snapshot.cursor = 1;
        snapshot.items[1].status = ItemStatus::Executing;
        snapshot.items[1].started_at = Some(t0());

        let mut ex = h.executor();
        ex.resume(snapshot, ms(100));
        assert_eq!(h.dispatcher.fired(), vec![Call]);
    }

    #[test]
    fn media_is_replayed_on_resume() {
        let h = Harness::new();
        let mut ex = h.executor();
        ex.start(ctx("a1"), &[MediaPlayback], t0());
        drop(ex);

        let snapshot = h.store.queue("a1").unwrap().unwrap();
        let mut ex = h.executor();
        let events = ex.resume(snapshot, ms(1_000));
        assert!(matches!(events[0], Event::QueueStarted { resumed: true, .. }));
        assert_eq!(h.media.played().len(), 2);
    }

    #[test]
    fn later_queues_are_backlogged_in_order() {
        let h = Harness::new();
        let mut ex = h.executor();
        ex.start(ctx("a1"), &[Message], t0());
        ex.start(ctx("a2"), &[Call], t0());
        ex.start(ctx("a3"), &[Mail], t0());
        assert_eq!(ex.backlog_len(), 2);
        // Backlogged queues are durable too.
        assert!(h.store.queue("a3").unwrap().is_some());

        ex.tick(ms(1_000));
        assert_eq!(h.dispatcher.fired(), vec![Message, Call]);
        ex.tick(ms(3_000));
        ex.tick(ms(4_000));
        let order: Vec<_> = ex.reports().iter().map(|r| r.alarm_id.as_str()).collect();
        assert_eq!(order, vec!["a1", "a2", "a3"]);
    }

    #[test]
    fn duplicate_submission_is_ignored() {
        let h = Harness::new();
        let mut ex = h.executor();
        ex.start(ctx("a1"), &[Message], t0());
        assert!(ex.start(ctx("a1"), &[Message], t0()).is_empty());
        assert_eq!(ex.backlog_len(), 0);
    }

    #[test]
    fn persistence_failure_does_not_stop_execution() {
        let h = Harness::new();
        h.mem.set_fail_writes(true);
        let mut ex = h.executor();
        ex.start(ctx("a1"), &[Message, Call], t0());
        ex.tick(ms(1_000));
        ex.tick(ms(3_000));
        assert_eq!(ex.last_report().unwrap().done_count(), 2);
    }

    #[test]
    fn new_queue_replaces_record_left_by_failed_cleanup() {
        let h = Harness::new();
        let mut ex = h.executor();
        ex.start(ctx("a1"), &[Message, Call], t0());
        ex.tick(ms(1_000));
        h.mem.set_fail_writes(true);
        ex.tick(ms(3_000));
        h.mem.set_fail_writes(false);
        assert_eq!(ex.state(), ExecutorState::Complete);
        let leftover = h.store.queue("a1").unwrap().unwrap();

        ex.start(ctx("a1"), &[Mail], ms(10_000));
        let stored = h.store.queue("a1").unwrap().unwrap();
        assert_eq!(stored.kinds(), vec![Mail]);
        assert!(stored.sequence > leftover.sequence);
        assert_eq!(stored.items[0].status, ItemStatus::Executing);
        assert!(stored.items[0].attempted);
    }

    #[test]
    fn stale_queue_record_is_superseded() {
        let h = Harness::new();
        let mut ahead = QueueSnapshot::new(ctx("a1"), &[Call], &config());
        ahead.sequence = 50;
        h.store.save_queue(&ahead).unwrap();

        let mut ex = h.executor();
        ex.resume(QueueSnapshot::new(ctx("a1"), &[Message], &config()), t0());
        let stored = h.store.queue("a1").unwrap().unwrap();
        assert_eq!(stored.kinds(), vec![Message]);
        assert!(stored.sequence > 50);
    }

    /// Observes the stored snapshot at the moment the capability runs.
    struct Observer {
        store: ScheduleStore,
        seen: Arc<Mutex<Vec<(ItemStatus, bool)>>>,
    }

    impl DispatchCapability for Observer {
        fn dispatch(&mut self, _kind: ConsequenceKind, ctx: &DispatchContext) -> Result<DispatchOutcome, DispatchError> {
            let snap = self.store.queue(&ctx.alarm_id).unwrap().unwrap();
            let item = &snap.items[snap.cursor];
            self.seen.lock().unwrap().push((item.status, item.attempted));
            Ok(DispatchOutcome::Sent)
        }
    }

    #[test]
    fn item_is_persisted_executing_before_dispatch() {
        let h = Harness::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut ex = ConsequenceExecutor::new(
            h.store.clone(),
            config(),
            Box::new(Observer {
                store: h.store.clone(),
                seen: seen.clone(),
            }),
            Box::new(FakeMedia::default()),
        );
        ex.start(ctx("a1"), &[Message], t0());
        assert_eq!(*seen.lock().unwrap(), vec![(ItemStatus::Executing, false)]);
        let stored = h.store.queue("a1").unwrap().unwrap();
        assert!(stored.items[0].attempted);
    }
}
