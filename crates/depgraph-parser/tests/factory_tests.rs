use async_trait::async_trait;
use depgraph_core::{DepGraphError, Result};
use depgraph_parser::{ModuleLoader, ParserFactory};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Loader that takes a while and can be told to fail the next runtime load.
#[derive(Default)]
struct SlowLoader {
    runtime_loads: AtomicUsize,
    engine_loads: AtomicUsize,
    fail_runtime: AtomicBool,
}

#[async_trait]
impl ModuleLoader for SlowLoader {
    type Engine = usize;

    async fn load_runtime(&self, _path: Option<&Path>) -> Result<()> {
        self.runtime_loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        if self.fail_runtime.swap(false, Ordering::SeqCst) {
            return Err(DepGraphError::Parse("runtime failed to load".into()));
        }
        Ok(())
    }

    async fn load_engine(&self, _language: &str, _path: Option<&Path>) -> Result<usize> {
        let n = self.engine_loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(n)
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_init_shares_one_load() {
    let factory = Arc::new(ParserFactory::new(SlowLoader::default()));

    let (a, b, c) = tokio::join!(factory.init(None), factory.init(None), factory.init(None));
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(factory.loader().runtime_loads.load(Ordering::SeqCst), 1);
    assert!(factory.is_initialized());
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_for_one_language_coalesce() {
    let factory = Arc::new(ParserFactory::new(SlowLoader::default()));
    factory.init(None).await.unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let factory = factory.clone();
            tokio::spawn(async move { factory.get_parser("typescript", None).await })
        })
        .collect();

    let engines: Vec<Arc<usize>> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(factory.loader().engine_loads.load(Ordering::SeqCst), 1);
    assert!(engines.iter().all(|e| Arc::ptr_eq(e, &engines[0])));
}

#[tokio::test(start_paused = true)]
async fn failed_init_can_be_retried() {
    let loader = SlowLoader::default();
    loader.fail_runtime.store(true, Ordering::SeqCst);
    let factory = ParserFactory::new(loader);

    assert!(factory.init(None).await.is_err());
    assert!(!factory.is_initialized());
    assert!(matches!(
        factory.get_parser("go", None).await,
        Err(DepGraphError::NotInitialized(_))
    ));

    factory.init(None).await.unwrap();
    assert!(factory.is_initialized());
    assert_eq!(factory.loader().runtime_loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn shared_factory_parses_with_compiled_grammars() {
    let shared = ParserFactory::shared();
    assert!(Arc::ptr_eq(&shared, &ParserFactory::shared()));

    shared.init(None).await.unwrap();
    let engine = shared.get_parser("python", None).await.unwrap();
    let tree = engine.parse("def f(x):\n    return x\n").unwrap();
    assert_eq!(tree.root_node().kind(), "module");
    assert!(shared.cached_languages().contains(&"python".to_string()));
}
