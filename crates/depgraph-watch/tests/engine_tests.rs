use async_trait::async_trait;
use depgraph_cache::CacheLookup;
use depgraph_core::{
    ChangeKind, DepGraphConfig, FileStatProvider, FsStat, IndexerState, Result,
};
use depgraph_graph::DependencyFact;
use depgraph_parser::{ParserFactory, TreeSitterLoader};
use depgraph_watch::{Analyzer, ChangeHandler, FileAnalysis, WorkspaceEngine};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Treats every `// uses <symbol>` comment line as a dependency of `<file>#main`.
#[derive(Default)]
struct CommentAnalyzer {
    runs: AtomicUsize,
}

#[async_trait]
impl Analyzer for CommentAnalyzer {
    async fn analyze(
        &self,
        path: &Path,
        parsers: &ParserFactory<TreeSitterLoader>,
    ) -> Result<FileAnalysis> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let source = tokio::fs::read_to_string(path).await?;

        let engine = parsers.get_parser("typescript", None).await?;
        assert!(!engine.parse(&source)?.root_node().has_error());

        let caller = format!("{}#main", path.display());
        let dependencies: Vec<DependencyFact> = source
            .lines()
            .filter_map(|l| l.trim().strip_prefix("// uses "))
            .map(|target| DependencyFact::new(caller.clone(), target.trim()))
            .collect();
        let unused_targets: BTreeMap<String, bool> = dependencies
            .iter()
            .map(|d| (d.target_symbol_id.clone(), false))
            .collect();

        Ok(FileAnalysis {
            dependencies,
            hash: FsStat.stat(path)?,
            unused_targets,
        })
    }
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let ws = Self {
            dir: TempDir::new().unwrap(),
        };
        ws.write("src/a.ts", "// uses b#helper\n// uses c#util\nexport const a = 1;\n");
        ws.write("src/b.ts", "// uses c#util\nexport const b = 2;\n");
        ws.write("node_modules/pkg/index.ts", "// uses c#util\n");
        ws.write("README.md", "// uses c#util\n");
        ws
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn path(&self, rel: &str) -> String {
        depgraph_core::normalize_path(self.root().join(rel))
    }

    fn write(&self, rel: &str, contents: &str) {
        let path = self.root().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }
}

async fn open_engine(ws: &Workspace) -> Arc<WorkspaceEngine<CommentAnalyzer>> {
    let mut config = DepGraphConfig::default();
    config.scheduler.debounce_ms = 20;
    let engine = WorkspaceEngine::open_with(
        ws.root(),
        config,
        CommentAnalyzer::default(),
        Arc::new(ParserFactory::new(TreeSitterLoader::new())),
        Arc::new(FsStat),
    )
    .await
    .unwrap();
    Arc::new(engine)
}

#[tokio::test]
async fn full_index_populates_index_cache_and_status() {
    let ws = Workspace::new();
    let engine = open_engine(&ws).await;

    let summary = engine.index_workspace().await.unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.analyzed, 2);
    assert!(!summary.cancelled);

    let callers = engine.callers_of("c#util").await;
    assert_eq!(callers.len(), 2);
    assert_eq!(engine.callers_of("b#helper").await.len(), 1);

    let a = ws.path("src/a.ts");
    let lookup = engine.cached_verdicts(Path::new(&a), &["b#helper"]).await;
    assert_eq!(lookup.targets().map(|t| t.len()), Some(2));

    let status = engine.status().snapshot();
    assert_eq!(status.state, IndexerState::Complete);
    assert_eq!(status.processed, 2);
    assert_eq!(status.percentage, 100.0);
    assert!(ws.root().join(".depgraph/reverse-index.json").exists());
    assert!(ws.root().join(".depgraph/analysis-cache.json").exists());
}

#[tokio::test]
async fn unchanged_files_are_not_reanalyzed() {
    let ws = Workspace::new();
    let engine = open_engine(&ws).await;

    engine.index_workspace().await.unwrap();
    let again = engine.index_workspace().await.unwrap();
    assert_eq!(again.unchanged, 2);
    assert_eq!(engine.analyzer().runs.load(Ordering::SeqCst), 2);

    // a reopened engine restores fingerprints from disk
    drop(engine);
    let reopened = open_engine(&ws).await;
    let third = reopened.index_workspace().await.unwrap();
    assert_eq!(third.unchanged, 2);
    assert_eq!(reopened.analyzer().runs.load(Ordering::SeqCst), 0);
    assert_eq!(reopened.callers_of("c#util").await.len(), 2);
}

#[tokio::test]
async fn delete_and_change_events_update_the_index() {
    let ws = Workspace::new();
    let engine = open_engine(&ws).await;
    engine.index_workspace().await.unwrap();

    let a = ws.path("src/a.ts");
    engine.process(&a, ChangeKind::Delete).await.unwrap();
    assert!(engine.callers_of("b#helper").await.is_empty());
    assert_eq!(engine.callers_of("c#util").await.len(), 1);
    assert_eq!(
        engine.cached_verdicts(Path::new(&a), &["c#util"]).await,
        CacheLookup::NotFound
    );

    let b = ws.path("src/b.ts");
    ws.write("src/b.ts", "// uses d#fresh\nexport const b = 22;\n");
    engine.process(&b, ChangeKind::Change).await.unwrap();
    assert!(engine.callers_of("c#util").await.is_empty());
    assert_eq!(engine.callers_of("d#fresh").await[0].caller_file_path, b);
}

#[tokio::test]
async fn change_for_vanished_file_drops_it() {
    let ws = Workspace::new();
    let engine = open_engine(&ws).await;
    engine.index_workspace().await.unwrap();

    let b = ws.path("src/b.ts");
    std::fs::remove_file(&b).unwrap();
    engine.process(&b, ChangeKind::Change).await.unwrap();
    assert_eq!(engine.callers_of("c#util").await.len(), 1);
}

#[tokio::test]
async fn cancellation_stops_the_pass_between_files() {
    let ws = Workspace::new();
    ws.write("src/c.ts", "// uses b#helper\n");
    let engine = open_engine(&ws).await;

    let tracker = engine.status();
    let canceller = tracker.clone();
    let _sub = tracker.subscribe(move |snap| {
        if snap.state == IndexerState::Indexing && snap.processed >= 1 {
            canceller.set_cancelled();
        }
    });

    let summary = engine.index_workspace().await.unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.analyzed, 1);
    assert!(tracker.is_cancelled());
    assert_eq!(tracker.state(), IndexerState::Idle);
}

#[tokio::test]
async fn scheduler_feeds_settled_changes_into_the_engine() {
    let ws = Workspace::new();
    let engine = open_engine(&ws).await;
    engine.index_workspace().await.unwrap();

    let scheduler = engine.scheduler();
    let a = ws.path("src/a.ts");
    ws.write("src/a.ts", "// uses e#late\n");
    scheduler.enqueue(&a, ChangeKind::Change);
    scheduler.enqueue(&a, ChangeKind::Change);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(engine.callers_of("e#late").await.len(), 1);
    assert!(engine.callers_of("b#helper").await.is_empty());
    assert_eq!(scheduler.stats().processed, 1);
    scheduler.dispose();
}
