//! Start/stop work timer.
//!
//! A task's total is `timer` (closed sessions) plus, while `startTime` is
//! set, the whole seconds elapsed since it. Stopping folds the open session
//! into `timer` and clears `startTime`; starting only sets `startTime`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::{self, TimerPatch};
use crate::clock::Clock;
use crate::models::Task;
use crate::notify::Notifier;
use crate::store::RecordStore;
use crate::{Error, Result};

/// Whole seconds from `start` to `now`. Negative spans count as zero.
pub fn whole_seconds_between(start: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (now - start).num_milliseconds();
    if millis <= 0 { 0 } else { (millis / 1000) as u64 }
}

/// Accumulated plus open-session seconds as of `now`.
pub fn live_elapsed(task: &Task, now: DateTime<Utc>) -> u64 {
    match task.start_time {
        Some(start) => task.timer.saturating_add(whole_seconds_between(start, now)),
        None => task.timer,
    }
}

/// The next timer state of a task.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerTransition {
    pub timer: u64,
    pub start_time: Option<DateTime<Utc>>,
}

impl TimerTransition {
    /// Plan a toggle at `now`.
    pub fn plan(task: &Task, now: DateTime<Utc>) -> Self {
        match task.start_time {
            None => Self {
                timer: task.timer,
                start_time: Some(now),
            },
            Some(start) => Self {
                timer: task.timer.saturating_add(whole_seconds_between(start, now)),
                start_time: None,
            },
        }
    }

    pub fn is_start(&self) -> bool {
        self.start_time.is_some()
    }

    pub fn patch(&self) -> TimerPatch {
        match self.start_time {
            Some(at) => TimerPatch::start(at),
            None => TimerPatch::stop(self.timer),
        }
    }

    /// `task` with this transition applied.
    pub fn apply(&self, task: &Task) -> Task {
        let mut next = task.clone();
        next.timer = self.timer;
        next.start_time = self.start_time;
        next
    }
}

/// Persists timer transitions and reports the outcome.
pub struct TimerController {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    notifier: Notifier,
    verify_before_toggle: bool,
}

impl TimerController {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, notifier: Notifier) -> Self {
        Self {
            store,
            clock,
            notifier,
            verify_before_toggle: false,
        }
    }

    /// Re-read the task before each toggle and refuse when its timer state
    /// changed since the caller loaded it.
    pub fn verify_before_toggle(mut self, on: bool) -> Self {
        self.verify_before_toggle = on;
        self
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Total seconds as of the controller's clock.
    pub fn live_elapsed(&self, task: &Task) -> u64 {
        live_elapsed(task, self.clock.now())
    }

    /// Toggle at the current time.
    pub async fn toggle(&self, task: &Task) -> Result<Task> {
        self.toggle_at(task, self.clock.now()).await
    }

    /// Start or stop the timer of `task` as of `now`.
    ///
    /// On success the stored task is returned and is authoritative. On
    /// failure the error carries the task to keep showing: the unchanged
    /// input for a failed persist, or the fresh copy for a conflict.
    pub async fn toggle_at(&self, task: &Task, now: DateTime<Utc>) -> Result<Task> {
        if self.verify_before_toggle {
            self.verify(task).await?;
        }

        let transition = TimerTransition::plan(task, now);
        tracing::debug!(
            task = %task.id,
            start = transition.is_start(),
            timer = transition.timer,
            "persisting timer"
        );

        match api::update_task_timer(&*self.store, &task.id, &transition.patch()).await {
            Ok(mut stored) => {
                if stored.expand.is_empty() {
                    stored.expand = task.expand.clone();
                }
                if transition.is_start() {
                    self.notifier.success("Timer started");
                } else {
                    self.notifier.success("Timer stopped");
                }
                Ok(stored)
            }
            Err(e) => {
                tracing::warn!(task = %task.id, error = %e, "timer persist failed, rolling back");
                self.notifier.error("Failed to update task timer");
                Err(Error::Persist {
                    what: "task timer".to_string(),
                    reason: e.to_string(),
                    rolled_back: Box::new(task.clone()),
                })
            }
        }
    }

    async fn verify(&self, task: &Task) -> Result<()> {
        let current = match api::fetch_task(&*self.store, &task.id).await {
            Ok(current) => current,
            Err(e) => {
                self.notifier.error("Failed to update task timer");
                return Err(Error::Persist {
                    what: "task timer".to_string(),
                    reason: e.to_string(),
                    rolled_back: Box::new(task.clone()),
                });
            }
        };
        if current.timer != task.timer || current.start_time != task.start_time {
            tracing::info!(task = %task.id, "timer changed elsewhere");
            self.notifier
                .warning("Timer was changed elsewhere; showing the latest state");
            return Err(Error::Conflict {
                id: task.id.clone(),
                current: Box::new(current),
            });
        }
        Ok(())
    }
}

/// The task shown in a detail view, updated optimistically on toggle.
///
/// Between dispatching a persist and receiving its response the view holds
/// the planned state; the response replaces it, a failure restores the
/// previous (or conflicting) state.
pub struct TimerView {
    controller: Arc<TimerController>,
    task: watch::Sender<Task>,
}

impl TimerView {
    pub fn new(controller: Arc<TimerController>, task: Task) -> Self {
        let (tx, _) = watch::channel(task);
        Self {
            controller,
            task: tx,
        }
    }

    /// Current copy of the task.
    pub fn task(&self) -> Task {
        self.task.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Task> {
        self.task.subscribe()
    }

    /// Replace the shown task, e.g. after a reload.
    pub fn replace(&self, task: Task) {
        self.task.send_replace(task);
    }

    pub fn live_elapsed(&self) -> u64 {
        self.controller.live_elapsed(&self.task.borrow())
    }

    pub async fn toggle(&self) -> Result<Task> {
        let before = self.task();
        let now = self.controller.clock.now();
        self.task
            .send_replace(TimerTransition::plan(&before, now).apply(&before));

        match self.controller.toggle_at(&before, now).await {
            Ok(stored) => {
                self.task.send_replace(stored.clone());
                Ok(stored)
            }
            Err(e) => {
                let shown = match &e {
                    Error::Persist { rolled_back, .. } => (**rolled_back).clone(),
                    Error::Conflict { current, .. } => (**current).clone(),
                    _ => before,
                };
                self.task.send_replace(shown);
                Err(e)
            }
        }
    }

    /// Start a display ticker over this view.
    pub fn ticker(&self, every: Duration) -> TimerTicker {
        TimerTicker::spawn(self.subscribe(), self.controller.clock(), every)
    }
}

/// Recomputes the displayed total on a fixed interval and whenever the task
/// changes. Stops when dropped.
pub struct TimerTicker {
    elapsed: watch::Receiver<u64>,
    handle: JoinHandle<()>,
}

impl TimerTicker {
    pub fn spawn(mut task: watch::Receiver<Task>, clock: Arc<dyn Clock>, every: Duration) -> Self {
        let initial = live_elapsed(&task.borrow(), clock.now());
        let (tx, rx) = watch::channel(initial);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    changed = task.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let value = live_elapsed(&task.borrow_and_update(), clock.now());
                tx.send_replace(value);
            }
        });
        Self {
            elapsed: rx,
            handle,
        }
    }

    /// Last computed total.
    pub fn elapsed(&self) -> u64 {
        *self.elapsed.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.elapsed.clone()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for TimerTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::TASK_COLLECTION;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + chrono::Duration::seconds(secs)
    }

    fn setup(timer: u64, start: Option<DateTime<Utc>>) -> (Arc<MemoryStore>, Arc<ManualClock>, Task) {
        let store = Arc::new(MemoryStore::new());
        let start_json = start
            .map(|s| json!(crate::models::timefmt::format_timestamp(&s)))
            .unwrap_or(json!(""));
        store
            .insert(
                TASK_COLLECTION,
                json!({"id": "t1", "title": "Work", "timer": timer, "startTime": start_json}),
            )
            .unwrap();
        let mut task = Task::new("t1", "Work");
        task.timer = timer;
        task.start_time = start;
        (store, Arc::new(ManualClock::new(t0())), task)
    }

    fn controller(store: &Arc<MemoryStore>, clock: &Arc<ManualClock>) -> TimerController {
        TimerController::new(store.clone(), clock.clone(), Notifier::new())
    }

    #[test]
    fn test_live_elapsed() {
        let mut task = Task::new("t", "x");
        task.timer = 100;
        assert_eq!(live_elapsed(&task, at(50)), 100);
        task.start_time = Some(t0());
        assert_eq!(live_elapsed(&task, at(30)), 130);
        assert_eq!(live_elapsed(&task, at(-5)), 100);
    }

    #[test]
    fn test_whole_seconds_floor() {
        let now = t0() + chrono::Duration::milliseconds(2999);
        assert_eq!(whole_seconds_between(t0(), now), 2);
    }

    #[tokio::test]
    async fn test_start_persists_start_time_only() {
        let (store, clock, task) = setup(100, None);
        let stored = controller(&store, &clock).toggle(&task).await.unwrap();
        assert_eq!(stored.timer, 100);
        assert_eq!(stored.start_time, Some(t0()));
    }

    #[tokio::test]
    async fn test_stop_folds_elapsed_into_timer() {
        let (store, clock, task) = setup(100, Some(t0()));
        clock.set(at(30));
        let stored = controller(&store, &clock).toggle(&task).await.unwrap();
        assert_eq!(stored.timer, 130);
        assert_eq!(stored.start_time, None);
    }

    #[tokio::test]
    async fn test_clock_skew_clamps_to_zero() {
        let (store, clock, task) = setup(100, Some(at(60)));
        let stored = controller(&store, &clock).toggle(&task).await.unwrap();
        assert_eq!(stored.timer, 100);
    }

    #[tokio::test]
    async fn test_round_trip_accumulates() {
        let (store, clock, task) = setup(0, None);
        let ctl = controller(&store, &clock);
        let running = ctl.toggle(&task).await.unwrap();
        clock.advance(chrono::Duration::seconds(45));
        let stopped = ctl.toggle(&running).await.unwrap();
        assert_eq!(stopped.timer, 45);
        assert!(!stopped.is_running());
    }

    #[tokio::test]
    async fn test_failed_persist_rolls_back() {
        let (store, clock, task) = setup(100, Some(t0()));
        store.fail_updates(1);
        clock.set(at(30));
        let notifier = Notifier::new();
        let ctl = TimerController::new(store.clone(), clock.clone(), notifier.clone());
        let view = TimerView::new(Arc::new(ctl), task.clone());

        let err = view.toggle().await.unwrap_err();
        match err {
            Error::Persist { rolled_back, .. } => assert_eq!(*rolled_back, task),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(view.task(), task);
        assert_eq!(notifier.latest().unwrap().message, "Failed to update task timer");
    }

    #[tokio::test]
    async fn test_view_applies_stored_state() {
        let (store, clock, task) = setup(0, None);
        let view = TimerView::new(Arc::new(controller(&store, &clock)), task);
        view.toggle().await.unwrap();
        assert!(view.task().is_running());
        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(view.live_elapsed(), 10);
    }

    #[tokio::test]
    async fn test_verify_detects_concurrent_change() {
        let (store, clock, task) = setup(0, None);
        store
            .update(TASK_COLLECTION, "t1", json!({"timer": 50}))
            .await
            .unwrap();
        let ctl = controller(&store, &clock).verify_before_toggle(true);
        let err = ctl.toggle(&task).await.unwrap_err();
        match err {
            Error::Conflict { current, .. } => assert_eq!(current.timer, 50),
            other => panic!("unexpected error: {:?}", other),
        }
        let fresh = api::fetch_task(&*store, "t1").await.unwrap();
        assert!(!fresh.is_running());
    }

    #[tokio::test]
    async fn test_ticker_follows_task_changes() {
        let (_, clock, task) = setup(5, None);
        let (tx, rx) = watch::channel(task.clone());
        let ticker = TimerTicker::spawn(rx, clock.clone(), Duration::from_millis(20));
        assert_eq!(ticker.elapsed(), 5);

        let mut running = task;
        running.start_time = Some(t0());
        clock.advance(chrono::Duration::seconds(7));
        tx.send_replace(running);

        let mut elapsed = ticker.subscribe();
        for _ in 0..50 {
            if *elapsed.borrow_and_update() == 12 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(ticker.elapsed(), 12);
    }

    /// Waits until the ticker task has released its sender, after which no
    /// value can ever be published again.
    async fn assert_closed(elapsed: &mut watch::Receiver<u64>) {
        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            while elapsed.changed().await.is_ok() {}
        })
        .await;
        assert!(closed.is_ok(), "ticker still publishing after shutdown");
    }

    #[tokio::test]
    async fn test_stopped_ticker_publishes_nothing() {
        let (_, clock, mut task) = setup(0, Some(t0()));
        let (tx, rx) = watch::channel(task.clone());
        let ticker = TimerTicker::spawn(rx, clock.clone(), Duration::from_millis(10));
        let mut elapsed = ticker.subscribe();

        ticker.stop();
        assert_closed(&mut elapsed).await;
        let last = *elapsed.borrow();

        clock.advance(chrono::Duration::seconds(30));
        task.timer = 100;
        tx.send_replace(task);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*elapsed.borrow(), last);
        assert!(elapsed.has_changed().is_err());
    }

    #[tokio::test]
    async fn test_dropped_ticker_publishes_nothing() {
        let (_, clock, task) = setup(0, Some(t0()));
        let (_tx, rx) = watch::channel(task);
        let ticker = TimerTicker::spawn(rx, clock.clone(), Duration::from_millis(10));
        let mut elapsed = ticker.subscribe();

        clock.advance(chrono::Duration::seconds(3));
        for _ in 0..50 {
            if *elapsed.borrow_and_update() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*elapsed.borrow(), 3);

        drop(ticker);
        assert_closed(&mut elapsed).await;
        clock.advance(chrono::Duration::seconds(30));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*elapsed.borrow(), 3);
    }
}
