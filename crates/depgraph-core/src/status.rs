//! Indexer progress state machine with throttled pub/sub notifications.
//!
//! State transitions notify every subscriber immediately. Progress updates are
//! throttled to one notification per interval, except the first update after a
//! transition, which always goes out. Each listener runs behind its own panic
//! boundary so one misbehaving subscriber cannot starve the others.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexerState {
    Idle,
    Counting,
    Indexing,
    Validating,
    Complete,
    Error,
}

impl fmt::Display for IndexerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexerState::Idle => "idle",
            IndexerState::Counting => "counting",
            IndexerState::Indexing => "indexing",
            IndexerState::Validating => "validating",
            IndexerState::Complete => "complete",
            IndexerState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Immutable view of the tracker handed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerStatusSnapshot {
    pub state: IndexerState,
    pub processed: usize,
    pub total: usize,
    pub percentage: f64,
    pub current_file: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub cancelled: bool,
    pub error_message: Option<String>,
    /// Milliseconds, available once at least one item was processed
    pub estimated_time_remaining: Option<u64>,
}

pub type StatusListener = Arc<dyn Fn(&IndexerStatusSnapshot) + Send + Sync>;

type ListenerList = Mutex<Vec<(u64, StatusListener)>>;

#[derive(Debug)]
struct TrackerState {
    state: IndexerState,
    processed: usize,
    total: usize,
    current_file: Option<String>,
    start_time: Option<DateTime<Utc>>,
    started_at: Option<Instant>,
    cancelled: bool,
    error_message: Option<String>,
    estimated_time_remaining: Option<u64>,
    last_progress_notify: Option<Instant>,
}

impl TrackerState {
    fn idle() -> Self {
        Self {
            state: IndexerState::Idle,
            processed: 0,
            total: 0,
            current_file: None,
            start_time: None,
            started_at: None,
            cancelled: false,
            error_message: None,
            estimated_time_remaining: None,
            last_progress_notify: None,
        }
    }

    fn snapshot(&self) -> IndexerStatusSnapshot {
        let percentage = if self.total == 0 {
            0.0
        } else {
            self.processed as f64 / self.total as f64 * 100.0
        };
        IndexerStatusSnapshot {
            state: self.state,
            processed: self.processed,
            total: self.total,
            percentage,
            current_file: self.current_file.clone(),
            start_time: self.start_time,
            cancelled: self.cancelled,
            error_message: self.error_message.clone(),
            estimated_time_remaining: self.estimated_time_remaining,
        }
    }
}

/// Handle returned by [`StatusTracker::subscribe`]
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

pub struct StatusTracker {
    state: Mutex<TrackerState>,
    listeners: Arc<ListenerList>,
    next_listener_id: AtomicU64,
    progress_interval: Duration,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_INTERVAL)
    }
}

impl StatusTracker {
    pub fn new(progress_interval: Duration) -> Self {
        Self {
            state: Mutex::new(TrackerState::idle()),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(1),
            progress_interval,
        }
    }

    pub fn snapshot(&self) -> IndexerStatusSnapshot {
        self.state.lock().snapshot()
    }

    pub fn state(&self) -> IndexerState {
        self.state.lock().state
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.state(),
            IndexerState::Counting | IndexerState::Indexing | IndexerState::Validating
        )
    }

    pub fn is_ready(&self) -> bool {
        self.state() == IndexerState::Complete
    }

    /// Polled by long indexing passes; the tracker never preempts work itself.
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Register `listener`; it immediately receives the current snapshot.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&IndexerStatusSnapshot) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let listener: StatusListener = Arc::new(listener);
        self.listeners.lock().push((id, listener.clone()));

        let snapshot = self.snapshot();
        Self::deliver(id, &listener, &snapshot);

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn start_counting(&self) {
        self.transition(|s| {
            *s = TrackerState::idle();
            s.state = IndexerState::Counting;
            s.start_time = Some(Utc::now());
            s.started_at = Some(Instant::now());
        });
    }

    pub fn set_total(&self, total: usize) {
        self.transition(|s| s.total = total);
    }

    pub fn start_indexing(&self) {
        self.transition(|s| {
            s.state = IndexerState::Indexing;
            if s.started_at.is_none() {
                s.start_time = Some(Utc::now());
                s.started_at = Some(Instant::now());
            }
        });
    }

    pub fn update_progress(&self, processed: usize, current_file: Option<&str>) {
        let snapshot = {
            let mut s = self.state.lock();
            s.processed = processed;
            if let Some(file) = current_file {
                s.current_file = Some(file.to_string());
            }
            let total = s.total;
            s.estimated_time_remaining = s
                .started_at
                .and_then(|started| estimate_remaining(started.elapsed(), processed, total));

            let now = Instant::now();
            let due = match s.last_progress_notify {
                None => true,
                Some(last) => now.duration_since(last) >= self.progress_interval,
            };
            if !due {
                return;
            }
            s.last_progress_notify = Some(now);
            s.snapshot()
        };
        self.notify(&snapshot);
    }

    pub fn start_validating(&self) {
        self.transition(|s| s.state = IndexerState::Validating);
    }

    pub fn complete(&self) {
        self.transition(|s| {
            s.state = IndexerState::Complete;
            s.current_file = None;
            s.estimated_time_remaining = None;
        });
    }

    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("Indexer entered error state: {}", message);
        self.transition(|s| {
            s.state = IndexerState::Error;
            s.current_file = None;
            s.error_message = Some(message);
        });
    }

    pub fn set_cancelled(&self) {
        self.transition(|s| {
            s.state = IndexerState::Idle;
            s.cancelled = true;
            s.current_file = None;
            s.estimated_time_remaining = None;
        });
    }

    pub fn reset(&self) {
        self.transition(|s| *s = TrackerState::idle());
    }

    fn transition<F>(&self, apply: F)
    where
        F: FnOnce(&mut TrackerState),
    {
        let snapshot = {
            let mut s = self.state.lock();
            let before = s.state;
            apply(&mut s);
            // the next progress update always notifies
            s.last_progress_notify = None;
            if before != s.state {
                debug!("Indexer status {} -> {}", before, s.state);
            }
            s.snapshot()
        };
        self.notify(&snapshot);
    }

    fn notify(&self, snapshot: &IndexerStatusSnapshot) {
        let listeners: Vec<(u64, StatusListener)> = self.listeners.lock().clone();
        for (id, listener) in &listeners {
            Self::deliver(*id, listener, snapshot);
        }
    }

    fn deliver(id: u64, listener: &StatusListener, snapshot: &IndexerStatusSnapshot) {
        if catch_unwind(AssertUnwindSafe(|| listener(snapshot))).is_err() {
            warn!("Status listener {} panicked; continuing with remaining listeners", id);
        }
    }
}

/// Milliseconds left at the average pace so far; `None` until something is processed.
fn estimate_remaining(elapsed: Duration, processed: usize, total: usize) -> Option<u64> {
    if processed == 0 {
        return None;
    }
    let remaining = total.saturating_sub(processed) as u128;
    let micros = elapsed.as_micros() * remaining / processed as u128;
    Some((micros / 1000) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(tracker: &StatusTracker) -> (Arc<Mutex<Vec<IndexerStatusSnapshot>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = tracker.subscribe(move |s| sink.lock().push(s.clone()));
        (seen, sub)
    }

    #[test]
    fn subscribe_delivers_current_snapshot() {
        let tracker = StatusTracker::default();
        let (seen, _sub) = recording(&tracker);
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].state, IndexerState::Idle);
    }

    #[test]
    fn percentage_is_zero_without_total() {
        let tracker = StatusTracker::default();
        tracker.start_indexing();
        tracker.update_progress(3, None);
        assert_eq!(tracker.snapshot().percentage, 0.0);

        tracker.set_total(4);
        tracker.update_progress(1, Some("/a.ts"));
        let snap = tracker.snapshot();
        assert_eq!(snap.percentage, 25.0);
        assert_eq!(snap.current_file.as_deref(), Some("/a.ts"));
        assert!(snap.estimated_time_remaining.is_some());
    }

    #[test]
    fn eta_scales_average_pace_by_remaining_items() {
        assert_eq!(estimate_remaining(Duration::from_millis(60), 0, 1000), None);
        assert_eq!(estimate_remaining(Duration::from_millis(60), 100, 1000), Some(540));
        // sub-millisecond pace per item still yields a non-zero estimate
        assert_eq!(estimate_remaining(Duration::from_millis(5), 100, 10_000), Some(495));
        assert_eq!(estimate_remaining(Duration::from_millis(60), 1000, 1000), Some(0));
    }

    #[test]
    fn eta_tracks_elapsed_time_during_indexing() {
        let tracker = StatusTracker::default();
        tracker.start_counting();
        tracker.set_total(1000);
        tracker.start_indexing();
        std::thread::sleep(Duration::from_millis(60));
        tracker.update_progress(100, None);

        let eta = tracker.snapshot().estimated_time_remaining.unwrap();
        // 60ms for 100 items leaves at least 540ms for the other 900
        assert!(eta >= 540, "eta was {}", eta);
        assert!(eta < 5_000, "eta was {}", eta);
    }

    #[test]
    fn lifecycle_flags() {
        let tracker = StatusTracker::default();
        assert!(!tracker.is_active());
        tracker.start_counting();
        assert!(tracker.is_active());
        tracker.start_indexing();
        tracker.start_validating();
        assert!(tracker.is_active());
        assert!(!tracker.is_ready());
        tracker.complete();
        assert!(tracker.is_ready());
        assert!(!tracker.is_active());
    }

    #[test]
    fn cancellation_returns_to_idle() {
        let tracker = StatusTracker::default();
        tracker.start_counting();
        tracker.start_indexing();
        tracker.update_progress(1, Some("/x.rs"));
        tracker.set_cancelled();

        let snap = tracker.snapshot();
        assert_eq!(snap.state, IndexerState::Idle);
        assert!(snap.cancelled);
        assert!(snap.current_file.is_none());

        tracker.reset();
        assert!(!tracker.snapshot().cancelled);
        assert!(tracker.snapshot().start_time.is_none());
    }

    #[test]
    fn error_clears_current_file() {
        let tracker = StatusTracker::default();
        tracker.start_indexing();
        tracker.update_progress(1, Some("/x.rs"));
        tracker.set_error("disk full");
        let snap = tracker.snapshot();
        assert_eq!(snap.state, IndexerState::Error);
        assert_eq!(snap.error_message.as_deref(), Some("disk full"));
        assert!(snap.current_file.is_none());
        assert!(!tracker.is_active());
    }

    #[test]
    fn progress_is_throttled_but_first_update_after_transition_fires() {
        let tracker = StatusTracker::new(Duration::from_secs(3600));
        let (seen, _sub) = recording(&tracker);
        tracker.start_indexing(); // 2 notifications so far
        tracker.update_progress(1, None); // first after transition: fires
        tracker.update_progress(2, None); // throttled
        tracker.update_progress(3, None); // throttled
        assert_eq!(seen.lock().len(), 3);

        tracker.start_validating(); // transition always fires
        tracker.update_progress(4, None); // first after transition: fires
        let seen = seen.lock();
        assert_eq!(seen.len(), 5);
        assert_eq!(seen.last().unwrap().processed, 4);
    }

    #[test]
    fn zero_interval_disables_throttling() {
        let tracker = StatusTracker::new(Duration::ZERO);
        let (seen, _sub) = recording(&tracker);
        tracker.start_indexing();
        for i in 1..=5 {
            tracker.update_progress(i, None);
        }
        assert_eq!(seen.lock().len(), 7);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let tracker = StatusTracker::default();
        let _bad = tracker.subscribe(|s| {
            if s.state == IndexerState::Counting {
                panic!("listener failure");
            }
        });
        let (seen, _sub) = recording(&tracker);
        tracker.start_counting();
        let seen = seen.lock();
        assert_eq!(seen.last().unwrap().state, IndexerState::Counting);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let tracker = StatusTracker::default();
        let (seen, sub) = recording(&tracker);
        assert_eq!(tracker.listener_count(), 1);
        sub.unsubscribe();
        assert_eq!(tracker.listener_count(), 0);
        tracker.start_counting();
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let tracker = StatusTracker::default();
        let json = serde_json::to_value(tracker.snapshot()).unwrap();
        assert_eq!(json["state"], "idle");
        assert!(json.get("estimatedTimeRemaining").is_some());
        assert!(json.get("currentFile").is_some());
    }
}
