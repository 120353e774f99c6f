use async_trait::async_trait;
use depgraph_core::{normalize_path, ChangeKind, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Receives settled file changes from a [`ChangeScheduler`].
#[async_trait]
pub trait ChangeHandler: Send + Sync + 'static {
    async fn process(&self, path: &str, kind: ChangeKind) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub enqueued: u64,
    /// Events folded into an already pending or in-flight change
    pub coalesced: u64,
    pub processed: u64,
    pub failed: u64,
    pub reruns: u64,
    pub pending: usize,
    pub in_flight: usize,
}

enum PathState {
    Debouncing {
        event: ChangeKind,
        generation: u64,
        timer: JoinHandle<()>,
    },
    Processing {
        rerun: Option<ChangeKind>,
    },
}

#[derive(Default)]
struct SchedulerState {
    paths: HashMap<String, PathState>,
    next_generation: u64,
    disposed: bool,
    stats: SchedulerStats,
}

struct Inner {
    debounce: Duration,
    handler: Arc<dyn ChangeHandler>,
    state: Mutex<SchedulerState>,
}

/// Debounces bursts of file events per path and hands each settled change to
/// the handler, never running two handler calls for the same path at once.
///
/// Must be used from within a Tokio runtime; timers are spawned tasks.
#[derive(Clone)]
pub struct ChangeScheduler {
    inner: Arc<Inner>,
}

impl ChangeScheduler {
    pub fn new(handler: Arc<dyn ChangeHandler>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                debounce,
                handler,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.inner.debounce
    }

    pub fn enqueue<P: AsRef<Path>>(&self, path: P, kind: ChangeKind) {
        let key = normalize_path(path);
        let mut state = self.inner.state.lock();
        if state.disposed {
            debug!("Ignoring {} for {}: scheduler disposed", kind, key);
            return;
        }
        state.stats.enqueued += 1;

        match state.paths.get_mut(&key) {
            None => {
                self.inner.schedule(&mut state, key, kind);
            }
            Some(PathState::Debouncing { event, timer, .. }) => {
                timer.abort();
                let merged = event.merge(kind);
                state.stats.coalesced += 1;
                self.inner.schedule(&mut state, key, merged);
            }
            Some(PathState::Processing { rerun }) => {
                *rerun = Some(rerun.map_or(kind, |pending| pending.merge(kind)));
                state.stats.coalesced += 1;
                debug!("{} is being processed, queued {} to run after", key, kind);
            }
        }
    }

    /// Cancel every pending timer. In-flight calls finish but nothing is
    /// rescheduled, and later enqueues are ignored.
    pub fn dispose(&self) {
        let mut state = self.inner.state.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;

        let mut cancelled = 0;
        state.paths.retain(|_, path_state| match path_state {
            PathState::Debouncing { timer, .. } => {
                timer.abort();
                cancelled += 1;
                false
            }
            PathState::Processing { rerun } => {
                *rerun = None;
                true
            }
        });
        info!("Change scheduler disposed ({} pending changes dropped)", cancelled);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    pub fn pending_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .paths
            .values()
            .filter(|s| matches!(s, PathState::Debouncing { .. }))
            .count()
    }

    pub fn is_pending<P: AsRef<Path>>(&self, path: P) -> bool {
        matches!(
            self.inner.state.lock().paths.get(&normalize_path(path)),
            Some(PathState::Debouncing { .. })
        )
    }

    pub fn is_processing<P: AsRef<Path>>(&self, path: P) -> bool {
        matches!(
            self.inner.state.lock().paths.get(&normalize_path(path)),
            Some(PathState::Processing { .. })
        )
    }

    /// Event currently waiting out its debounce for `path`
    pub fn pending_event<P: AsRef<Path>>(&self, path: P) -> Option<ChangeKind> {
        match self.inner.state.lock().paths.get(&normalize_path(path)) {
            Some(PathState::Debouncing { event, .. }) => Some(*event),
            _ => None,
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.inner.state.lock();
        let mut stats = state.stats.clone();
        for path_state in state.paths.values() {
            match path_state {
                PathState::Debouncing { .. } => stats.pending += 1,
                PathState::Processing { .. } => stats.in_flight += 1,
            }
        }
        stats
    }
}

impl Inner {
    fn schedule(self: &Arc<Self>, state: &mut SchedulerState, key: String, event: ChangeKind) {
        state.next_generation += 1;
        let generation = state.next_generation;

        let inner = Arc::clone(self);
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            inner.fire(timer_key, generation).await;
        });

        state.paths.insert(
            key,
            PathState::Debouncing {
                event,
                generation,
                timer,
            },
        );
    }

    fn fire(self: Arc<Self>, key: String, generation: u64) -> BoxFuture<'static, ()> {
        async move {
            let event = {
                let mut state = self.state.lock();
                let event = match state.paths.get(&key) {
                    Some(PathState::Debouncing {
                        event,
                        generation: current,
                        ..
                    }) if *current == generation => *event,
                    // superseded or cancelled
                    _ => return,
                };
                state
                    .paths
                    .insert(key.clone(), PathState::Processing { rerun: None });
                event
            };

            debug!("Processing {} for {}", event, key);
            let outcome = AssertUnwindSafe(self.handler.process(&key, event))
                .catch_unwind()
                .await;

            let mut state = self.state.lock();
            match outcome {
                Ok(Ok(())) => state.stats.processed += 1,
                Ok(Err(e)) => {
                    state.stats.failed += 1;
                    error!("Failed to process {} for {}: {}", event, key, e);
                }
                Err(_) => {
                    state.stats.failed += 1;
                    error!("Handler panicked while processing {} for {}", event, key);
                }
            }

            let rerun = match state.paths.remove(&key) {
                Some(PathState::Processing { rerun }) => rerun,
                _ => None,
            };
            if let Some(next) = rerun {
                if !state.disposed {
                    state.stats.reruns += 1;
                    debug!("Rescheduling {} for {} after in-flight run", next, key);
                    self.schedule(&mut state, key, next);
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl ChangeHandler for Noop {
        async fn process(&self, _path: &str, _kind: ChangeKind) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pending_state_is_introspectable() {
        let scheduler = ChangeScheduler::new(Arc::new(Noop), DEFAULT_DEBOUNCE);
        scheduler.enqueue("/ws/./a.ts", ChangeKind::Change);

        assert!(scheduler.is_pending("/ws/a.ts"));
        assert!(!scheduler.is_processing("/ws/a.ts"));
        assert_eq!(scheduler.pending_event("/ws/a.ts"), Some(ChangeKind::Change));
        assert_eq!(scheduler.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(scheduler.pending_count(), 0);
        let stats = scheduler.stats();
        assert_eq!((stats.enqueued, stats.processed), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_cancels_pending_and_ignores_later_events() {
        let scheduler = ChangeScheduler::new(Arc::new(Noop), DEFAULT_DEBOUNCE);
        scheduler.enqueue("/ws/a.ts", ChangeKind::Change);
        scheduler.dispose();
        scheduler.enqueue("/ws/b.ts", ChangeKind::Delete);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let stats = scheduler.stats();
        assert!(scheduler.is_disposed());
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.pending, 0);
    }
}
