use async_trait::async_trait;
use dashmap::DashMap;
use depgraph_core::{DepGraphError, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::loader::TreeSitterLoader;

/// Loads the parser runtime and per-language engines.
///
/// Implementations may be slow (disk, compilation, native init); the factory
/// guarantees each is invoked at most once per successful load.
#[async_trait]
pub trait ModuleLoader: Send + Sync + 'static {
    type Engine: Send + Sync + 'static;

    async fn load_runtime(&self, runtime_module_path: Option<&Path>) -> Result<()>;

    async fn load_engine(&self, language: &str, grammar_path: Option<&Path>)
        -> Result<Self::Engine>;
}

/// Pool of parser engines, one per language, shared across the workspace.
pub struct ParserFactory<L: ModuleLoader> {
    loader: L,
    init: Mutex<Arc<OnceCell<()>>>,
    engines: DashMap<String, Arc<OnceCell<Arc<L::Engine>>>>,
}

impl<L: ModuleLoader> ParserFactory<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            init: Mutex::new(Arc::new(OnceCell::new())),
            engines: DashMap::new(),
        }
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Load the parser runtime. Concurrent callers share one in-flight load;
    /// once it has succeeded further calls return immediately. A failed load
    /// leaves the factory uninitialized so it can be retried.
    pub async fn init(&self, runtime_module_path: Option<&Path>) -> Result<()> {
        let cell = self.init.lock().clone();
        cell.get_or_try_init(|| async {
            self.loader.load_runtime(runtime_module_path).await?;
            info!("Parser runtime initialized");
            Ok::<(), DepGraphError>(())
        })
        .await?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.init.lock().initialized()
    }

    /// Engine for `language`, loading it on first request. Concurrent requests
    /// for the same language wait on a single load.
    pub async fn get_parser(
        &self,
        language: &str,
        grammar_path: Option<&Path>,
    ) -> Result<Arc<L::Engine>> {
        if !self.is_initialized() {
            return Err(DepGraphError::NotInitialized(format!(
                "call init() before requesting a {} parser",
                language
            )));
        }

        let cell = self
            .engines
            .entry(language.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        let engine = cell
            .get_or_try_init(|| async {
                let engine = self.loader.load_engine(language, grammar_path).await?;
                debug!("Loaded {} parser engine", language);
                Ok::<_, DepGraphError>(Arc::new(engine))
            })
            .await?;

        Ok(Arc::clone(engine))
    }

    /// Languages whose engine finished loading
    pub fn cached_languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self
            .engines
            .iter()
            .filter(|entry| entry.value().initialized())
            .map(|entry| entry.key().clone())
            .collect();
        languages.sort();
        languages
    }

    /// Drop every cached engine and the initialization flag.
    pub fn reset(&self) {
        *self.init.lock() = Arc::new(OnceCell::new());
        self.engines.clear();
        debug!("Parser factory reset");
    }
}

static SHARED: Lazy<Arc<ParserFactory<TreeSitterLoader>>> =
    Lazy::new(|| Arc::new(ParserFactory::new(TreeSitterLoader::new())));

impl ParserFactory<TreeSitterLoader> {
    /// Process-wide factory backed by the compiled-in tree-sitter grammars.
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED)
    }
}
