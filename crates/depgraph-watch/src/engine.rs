use async_trait::async_trait;
use depgraph_cache::{AnalysisCacheOptions, CacheLookup, PersistentAnalysisCache};
use depgraph_core::{
    normalize_path, ChangeKind, DepGraphConfig, DepGraphError, FileHash, FileStatProvider,
    FsStat, Result, StatusTracker,
};
use depgraph_graph::{DependencyFact, ReverseIndex, SymbolReverseEntry};
use depgraph_parser::{ParserFactory, TreeSitterLoader};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::scheduler::{ChangeHandler, ChangeScheduler};
use crate::watcher::{FsWatcher, WatchFilter};

/// What the analyzer learned about one source file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileAnalysis {
    pub dependencies: Vec<DependencyFact>,
    pub hash: FileHash,
    /// Per-target "is unused" verdicts
    pub unused_targets: BTreeMap<String, bool>,
}

/// Extracts dependencies from a source file. Symbol extraction lives outside
/// this crate; implementations get the shared parser pool to work with.
#[async_trait]
pub trait Analyzer: Send + Sync + 'static {
    async fn analyze(
        &self,
        path: &Path,
        parsers: &ParserFactory<TreeSitterLoader>,
    ) -> Result<FileAnalysis>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSummary {
    pub total: usize,
    pub analyzed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Wires the scheduler, analyzer, reverse index, analysis cache and status
/// tracker together for one workspace root.
pub struct WorkspaceEngine<A: Analyzer> {
    root: PathBuf,
    config: DepGraphConfig,
    analyzer: A,
    parsers: Arc<ParserFactory<TreeSitterLoader>>,
    stat: Arc<dyn FileStatProvider>,
    index: Mutex<ReverseIndex>,
    cache: Mutex<PersistentAnalysisCache>,
    status: Arc<StatusTracker>,
}

impl<A: Analyzer> WorkspaceEngine<A> {
    /// Open the engine on the shared parser pool and the local filesystem.
    pub async fn open(root: &Path, config: DepGraphConfig, analyzer: A) -> Result<Self> {
        Self::open_with(root, config, analyzer, ParserFactory::shared(), Arc::new(FsStat)).await
    }

    pub async fn open_with(
        root: &Path,
        config: DepGraphConfig,
        analyzer: A,
        parsers: Arc<ParserFactory<TreeSitterLoader>>,
        stat: Arc<dyn FileStatProvider>,
    ) -> Result<Self> {
        parsers
            .init(config.parser.runtime_module_path.as_deref())
            .await?;

        let mut index = ReverseIndex::new(root);
        if config.index.persist {
            let index_file = config.index_file(root);
            if index.load(&index_file).await {
                debug!("Restored reverse index from {}", index_file.display());
            }
        }

        let cache_options = AnalysisCacheOptions::from_config(&config, root);
        let cache = PersistentAnalysisCache::open(cache_options, stat.clone()).await;
        let status = Arc::new(StatusTracker::new(Duration::from_millis(
            config.status.progress_interval_ms,
        )));

        info!("Workspace engine ready for {}", root.display());
        Ok(Self {
            root: root.to_path_buf(),
            config,
            analyzer,
            parsers,
            stat,
            index: Mutex::new(index),
            cache: Mutex::new(cache),
            status,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &DepGraphConfig {
        &self.config
    }

    pub fn analyzer(&self) -> &A {
        &self.analyzer
    }

    pub fn status(&self) -> Arc<StatusTracker> {
        self.status.clone()
    }

    pub fn parsers(&self) -> &Arc<ParserFactory<TreeSitterLoader>> {
        &self.parsers
    }

    pub fn index(&self) -> &Mutex<ReverseIndex> {
        &self.index
    }

    pub fn cache(&self) -> &Mutex<PersistentAnalysisCache> {
        &self.cache
    }

    pub async fn callers_of(&self, target_symbol_id: &str) -> Vec<SymbolReverseEntry> {
        self.index.lock().await.get_callers(target_symbol_id)
    }

    pub async fn cached_verdicts(&self, source_file: &Path, targets: &[&str]) -> CacheLookup {
        self.cache.lock().await.get(source_file, targets)
    }

    /// Re-analyze `path` if its fingerprint changed since it was last indexed.
    /// Returns whether the analyzer ran.
    pub async fn reanalyze(&self, path: &str) -> Result<bool> {
        let current = match self.stat.stat(Path::new(path)) {
            Ok(hash) => hash,
            Err(DepGraphError::Stat { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                debug!("{} disappeared before analysis, dropping it", path);
                self.remove_file(path).await;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if !self.index.lock().await.is_file_stale(path, &current) {
            debug!("{} unchanged, skipping analysis", path);
            return Ok(false);
        }

        let analysis = self.analyzer.analyze(Path::new(path), &self.parsers).await?;

        self.index
            .lock()
            .await
            .add_dependencies(path, &analysis.dependencies, Some(analysis.hash));
        self.cache.lock().await.set(path, analysis.unused_targets);
        Ok(true)
    }

    pub async fn remove_file(&self, path: &str) {
        let removed = self.index.lock().await.remove_dependencies_from_source(path);
        self.cache.lock().await.invalidate(&[path]);
        debug!("Dropped {} dependencies of deleted {}", removed, path);
    }

    /// Walk the workspace for files the configured extensions cover.
    pub async fn discover_files(&self) -> Result<Vec<PathBuf>> {
        let filter = WatchFilter::from_config(&self.config.index);
        let mut files = Vec::new();
        let mut dirs = vec![self.root.clone()];

        while let Some(dir) = dirs.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    let skip = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| filter.is_excluded_dir(n));
                    if !skip {
                        dirs.push(path);
                    }
                } else if file_type.is_file() && filter.has_tracked_extension(&path) {
                    files.push(path);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    /// Index every file in `files`, driving the status tracker and stopping
    /// early if the tracker is cancelled between files.
    pub async fn index_files(&self, files: Vec<PathBuf>) -> Result<IndexSummary> {
        let status = &self.status;
        status.start_counting();
        let files: Vec<String> = files.iter().map(normalize_path).collect();
        status.set_total(files.len());

        let mut summary = IndexSummary {
            total: files.len(),
            ..Default::default()
        };

        status.start_indexing();
        for (i, file) in files.iter().enumerate() {
            if status.is_cancelled() {
                info!("Indexing cancelled after {} of {} files", i, files.len());
                summary.cancelled = true;
                return Ok(summary);
            }

            match self.reanalyze(file).await {
                Ok(true) => summary.analyzed += 1,
                Ok(false) => summary.unchanged += 1,
                Err(e) => {
                    warn!("Failed to analyze {}: {}", file, e);
                    summary.failed += 1;
                }
            }
            status.update_progress(i + 1, Some(file.as_str()));
        }

        status.start_validating();
        if self.config.index.persist {
            if let Err(e) = self.persist().await {
                status.set_error(format!("failed to persist index: {}", e));
                return Err(e);
            }
        }
        status.complete();

        info!(
            "Indexed {} files ({} analyzed, {} unchanged, {} failed)",
            summary.total, summary.analyzed, summary.unchanged, summary.failed
        );
        Ok(summary)
    }

    /// Discover and index the whole workspace.
    pub async fn index_workspace(&self) -> Result<IndexSummary> {
        let files = match self.discover_files().await {
            Ok(files) => files,
            Err(e) => {
                self.status.set_error(format!("failed to scan workspace: {}", e));
                return Err(e);
            }
        };
        self.index_files(files).await
    }

    /// Write the reverse index and analysis cache to disk.
    pub async fn persist(&self) -> Result<()> {
        let index_file = self.config.index_file(&self.root);
        self.index.lock().await.save(&index_file).await?;
        self.cache.lock().await.flush().await?;
        Ok(())
    }
}

impl<A: Analyzer> WorkspaceEngine<A> {
    /// Scheduler whose settled events feed back into this engine.
    pub fn scheduler(self: &Arc<Self>) -> ChangeScheduler {
        ChangeScheduler::new(
            self.clone(),
            Duration::from_millis(self.config.scheduler.debounce_ms),
        )
    }

    /// Start watching the workspace root; events flow through a fresh scheduler.
    pub fn watch(self: &Arc<Self>) -> Result<(FsWatcher, ChangeScheduler)> {
        let scheduler = self.scheduler();
        let watcher = FsWatcher::start(
            &self.root,
            WatchFilter::from_config(&self.config.index),
            scheduler.clone(),
        )?;
        Ok((watcher, scheduler))
    }
}

#[async_trait]
impl<A: Analyzer> ChangeHandler for WorkspaceEngine<A> {
    async fn process(&self, path: &str, kind: ChangeKind) -> Result<()> {
        match kind {
            ChangeKind::Delete => {
                self.remove_file(path).await;
                Ok(())
            }
            ChangeKind::Change => self.reanalyze(path).await.map(|_| ()),
        }
    }
}
