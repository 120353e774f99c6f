pub mod engine;
pub mod scheduler;
pub mod watcher;

pub use engine::{Analyzer, FileAnalysis, IndexSummary, WorkspaceEngine};
pub use scheduler::{ChangeHandler, ChangeScheduler, SchedulerStats, DEFAULT_DEBOUNCE};
pub use watcher::{classify_event, FsWatcher, WatchFilter};
