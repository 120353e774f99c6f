use depgraph_core::{ChangeKind, DepGraphError, IndexConfig, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::scheduler::ChangeScheduler;

/// Decides which paths are worth scheduling.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    extensions: HashSet<String>,
    exclude_dirs: HashSet<String>,
}

impl WatchFilter {
    pub fn new<E, D>(extensions: E, exclude_dirs: D) -> Self
    where
        E: IntoIterator,
        E::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| {
                    let e: String = e.into();
                    e.trim_start_matches('.').to_lowercase()
                })
                .collect(),
            exclude_dirs: exclude_dirs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &IndexConfig) -> Self {
        Self::new(config.extensions.iter().cloned(), config.exclude_dirs.iter().cloned())
    }

    /// Every component is checked against the excluded directory names, so
    /// pass paths relative to the watched root.
    pub fn accepts(&self, path: &Path) -> bool {
        let excluded = path.components().any(|c| match c {
            Component::Normal(name) => name
                .to_str()
                .is_some_and(|name| self.exclude_dirs.contains(name)),
            _ => false,
        });
        !excluded && self.has_tracked_extension(path)
    }

    pub fn has_tracked_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.contains(&e.to_lowercase()))
    }

    pub fn is_excluded_dir(&self, name: &str) -> bool {
        self.exclude_dirs.contains(name)
    }
}

/// Translate a raw notify event into scheduler events.
pub fn classify_event(event: &Event) -> Vec<(PathBuf, ChangeKind)> {
    match &event.kind {
        EventKind::Remove(_) => with_kind(&event.paths, ChangeKind::Delete),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            with_kind(&event.paths, ChangeKind::Delete)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::with_capacity(2);
            if let Some(from) = event.paths.first() {
                out.push((from.clone(), ChangeKind::Delete));
            }
            if let Some(to) = event.paths.get(1) {
                out.push((to.clone(), ChangeKind::Change));
            }
            out
        }
        EventKind::Create(_) | EventKind::Modify(_) => with_kind(&event.paths, ChangeKind::Change),
        _ => Vec::new(),
    }
}

fn with_kind(paths: &[PathBuf], kind: ChangeKind) -> Vec<(PathBuf, ChangeKind)> {
    paths.iter().map(|p| (p.clone(), kind)).collect()
}

/// Bridges OS file notifications into a [`ChangeScheduler`].
///
/// notify delivers events on its own thread; they are forwarded over a
/// channel to a task on the runtime that owns the scheduler.
pub struct FsWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
    forwarder: JoinHandle<()>,
}

impl FsWatcher {
    pub fn start(root: &Path, filter: WatchFilter, scheduler: ChangeScheduler) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    // receiver gone means the watcher is shutting down
                    let _ = tx.send(event);
                }
                Err(e) => warn!("File watch error: {}", e),
            }
        })
        .map_err(|e| DepGraphError::Config(format!("failed to create watcher: {}", e)))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| {
                DepGraphError::Config(format!("failed to watch {}: {}", root.display(), e))
            })?;

        let watch_root = root.to_path_buf();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                for (path, kind) in classify_event(&event) {
                    let relative = path.strip_prefix(&watch_root).unwrap_or(&path);
                    if filter.accepts(relative) {
                        debug!("{} {}", kind, path.display());
                        scheduler.enqueue(&path, kind);
                    }
                }
            }
        });

        info!("Watching {} for changes", root.display());
        Ok(Self {
            root: root.to_path_buf(),
            _watcher: watcher,
            forwarder,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stop(self) {
        self.forwarder.abort();
        info!("Stopped watching {}", self.root.display());
    }
}
