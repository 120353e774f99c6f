use chrono::Utc;
use depgraph_core::{
    normalize_path, DepGraphConfig, DepGraphError, FileHash, FileStatProvider, Result,
};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const ANALYSIS_CACHE_VERSION: u32 = 1;

/// Entries older than this are reported as expired even if the file is unchanged.
pub const ANALYSIS_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Effective capacity never drops below this many source files.
pub const MIN_CACHE_ENTRIES: usize = 10;

/// Cached verdicts for one source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisCacheEntry {
    pub source_file: String,
    pub targets: BTreeMap<String, bool>,
    pub file_hash: FileHash,
    /// Milliseconds since the epoch at which the entry was stored
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisCacheFile {
    version: u32,
    timestamp: i64,
    /// Least- to most-recently used
    entries: Vec<AnalysisCacheEntry>,
}

/// Outcome of a single [`PersistentAnalysisCache::get`] call
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Every requested target was cached; carries the full stored map
    Hit(BTreeMap<String, bool>),
    NotFound,
    Stale,
    Expired,
    Partial,
    Error,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    pub fn targets(&self) -> Option<&BTreeMap<String, bool>> {
        match self {
            CacheLookup::Hit(targets) => Some(targets),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLookup::Hit(_) => "hit",
            CacheLookup::NotFound => "not-found",
            CacheLookup::Stale => "stale",
            CacheLookup::Expired => "expired",
            CacheLookup::Partial => "partial",
            CacheLookup::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub not_found: u64,
    pub stale: u64,
    pub expired: u64,
    pub partial: u64,
    pub errors: u64,
    pub evictions: u64,
    pub entries: usize,
    pub max_entries: usize,
    pub hit_rate: f64,
    pub effective_hit_rate: f64,
}

#[derive(Debug, Clone)]
pub struct AnalysisCacheOptions {
    pub enabled: bool,
    pub max_entries: usize,
    pub cache_file: Option<PathBuf>,
}

impl AnalysisCacheOptions {
    pub fn from_config(config: &DepGraphConfig, workspace_root: &Path) -> Self {
        Self {
            enabled: config.cache.enabled,
            max_entries: config.cache.max_entries,
            cache_file: Some(config.cache_file(workspace_root)),
        }
    }

    /// In-memory only, nothing is ever written to disk
    pub fn in_memory(max_entries: usize) -> Self {
        Self {
            enabled: true,
            max_entries,
            cache_file: None,
        }
    }
}

impl Default for AnalysisCacheOptions {
    fn default() -> Self {
        Self::in_memory(1000)
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    not_found: u64,
    stale: u64,
    expired: u64,
    partial: u64,
    errors: u64,
    evictions: u64,
}

/// Disk-backed cache of per-file analysis verdicts (for example "is target X
/// unused"), validated against the live file fingerprint on every read.
pub struct PersistentAnalysisCache {
    entries: LruCache<String, AnalysisCacheEntry>,
    enabled: bool,
    max_entries: usize,
    cache_file: Option<PathBuf>,
    stat: Arc<dyn FileStatProvider>,
    counters: Counters,
}

impl PersistentAnalysisCache {
    pub fn new(options: AnalysisCacheOptions, stat: Arc<dyn FileStatProvider>) -> Self {
        let max_entries = options.max_entries.max(MIN_CACHE_ENTRIES);
        if max_entries != options.max_entries {
            debug!(
                "Analysis cache capacity {} raised to minimum of {}",
                options.max_entries, MIN_CACHE_ENTRIES
            );
        }

        Self {
            entries: LruCache::unbounded(),
            enabled: options.enabled,
            max_entries,
            cache_file: options.cache_file,
            stat,
            counters: Counters::default(),
        }
    }

    /// Create the cache and load any previously flushed entries.
    pub async fn open(options: AnalysisCacheOptions, stat: Arc<dyn FileStatProvider>) -> Self {
        let mut cache = Self::new(options, stat);
        cache.load().await;
        cache
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cache_file(&self) -> Option<&Path> {
        self.cache_file.as_deref()
    }

    /// Store verdicts for `source_file`, fingerprinted with its current stat.
    pub fn set<P, I>(&mut self, source_file: P, targets: I)
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = (String, bool)>,
    {
        if !self.enabled {
            return;
        }

        let key = normalize_path(source_file);
        let file_hash = match self.stat.stat(Path::new(&key)) {
            Ok(hash) => hash,
            Err(e) => {
                debug!("Not caching analysis for {}: {}", key, e);
                return;
            }
        };

        let targets = targets
            .into_iter()
            .map(|(target, unused)| (normalize_path(target), unused))
            .collect();

        if !self.entries.contains(&key) && self.entries.len() >= self.max_entries {
            if let Some((evicted, _)) = self.entries.pop_lru() {
                self.counters.evictions += 1;
                debug!("Evicted analysis cache entry for {}", evicted);
            }
        }

        let entry = AnalysisCacheEntry {
            source_file: key.clone(),
            targets,
            file_hash,
            timestamp: Utc::now().timestamp_millis(),
        };
        self.entries.put(key, entry);
    }

    /// Look up verdicts for `source_file`, requiring every one of
    /// `requested_targets` to be present for a hit.
    pub fn get<P, T>(&mut self, source_file: P, requested_targets: &[T]) -> CacheLookup
    where
        P: AsRef<Path>,
        T: AsRef<Path>,
    {
        if !self.enabled {
            return CacheLookup::NotFound;
        }

        let key = normalize_path(source_file);
        let (stored_hash, stored_at, complete) = match self.entries.peek(&key) {
            Some(entry) => (
                entry.file_hash,
                entry.timestamp,
                requested_targets
                    .iter()
                    .all(|t| entry.targets.contains_key(&normalize_path(t))),
            ),
            None => {
                self.counters.not_found += 1;
                return CacheLookup::NotFound;
            }
        };

        let live_hash = match self.stat.stat(Path::new(&key)) {
            Ok(hash) => hash,
            Err(e) => {
                self.counters.errors += 1;
                debug!("Cache staleness check failed for {}: {}", key, e);
                return CacheLookup::Error;
            }
        };

        if live_hash != stored_hash {
            self.counters.stale += 1;
            self.entries.pop(&key);
            return CacheLookup::Stale;
        }

        let age_ms = Utc::now().timestamp_millis() - stored_at;
        if age_ms > ANALYSIS_CACHE_TTL.as_millis() as i64 {
            self.counters.expired += 1;
            self.entries.pop(&key);
            return CacheLookup::Expired;
        }

        if !complete {
            self.counters.partial += 1;
            return CacheLookup::Partial;
        }

        self.counters.hits += 1;
        match self.entries.get(&key) {
            Some(entry) => CacheLookup::Hit(entry.targets.clone()),
            None => CacheLookup::NotFound,
        }
    }

    /// Drop cached entries for the given files; returns how many were present.
    pub fn invalidate<P: AsRef<Path>>(&mut self, files: &[P]) -> usize {
        files
            .iter()
            .filter(|f| self.entries.pop(&normalize_path(f)).is_some())
            .count()
    }

    /// Wipe every entry and all counters
    pub fn clear(&mut self) {
        self.entries.clear();
        self.counters = Counters::default();
    }

    pub fn get_stats(&self) -> AnalysisCacheStats {
        let c = &self.counters;
        let misses = c.stale + c.expired + c.partial + c.errors;
        let rate = if c.hits + misses == 0 {
            0.0
        } else {
            c.hits as f64 / (c.hits + misses) as f64
        };

        AnalysisCacheStats {
            hits: c.hits,
            misses,
            not_found: c.not_found,
            stale: c.stale,
            expired: c.expired,
            partial: c.partial,
            errors: c.errors,
            evictions: c.evictions,
            entries: self.entries.len(),
            max_entries: self.max_entries,
            hit_rate: rate,
            effective_hit_rate: rate,
        }
    }

    /// Entries from least- to most-recently used
    pub fn entries(&self) -> impl Iterator<Item = &AnalysisCacheEntry> + '_ {
        self.entries.iter().rev().map(|(_, entry)| entry)
    }

    /// Serialize the cache to its backing file. A cache without a backing
    /// file, or a disabled one, flushes as a no-op.
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = self.cache_file.as_ref() else {
            return Ok(());
        };
        if !self.enabled {
            return Ok(());
        }

        let file = AnalysisCacheFile {
            version: ANALYSIS_CACHE_VERSION,
            timestamp: Utc::now().timestamp_millis(),
            entries: self.entries().cloned().collect(),
        };
        let json = serde_json::to_string(&file)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;

        debug!("Flushed {} analysis cache entries to {}", file.entries.len(), path.display());
        Ok(())
    }

    /// Replace in-memory entries with the contents of the backing file.
    /// Any failure leaves the cache untouched and returns false.
    pub async fn load(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(path) = self.cache_file.clone() else {
            return false;
        };

        let file = match read_cache_file(&path).await {
            Ok(Some(file)) => file,
            Ok(None) => return false,
            Err(e) => {
                warn!("Ignoring analysis cache at {}: {}", path.display(), e);
                return false;
            }
        };

        self.entries.clear();
        for entry in file.entries {
            self.entries.put(entry.source_file.clone(), entry);
        }
        while self.entries.len() > self.max_entries {
            self.entries.pop_lru();
        }

        info!(
            "Loaded {} analysis cache entries from {}",
            self.entries.len(),
            path.display()
        );
        true
    }
}

async fn read_cache_file(path: &Path) -> Result<Option<AnalysisCacheFile>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let file: AnalysisCacheFile = serde_json::from_str(&raw)?;
    if file.version != ANALYSIS_CACHE_VERSION {
        return Err(DepGraphError::Validation(format!(
            "cache version {} does not match {}",
            file.version, ANALYSIS_CACHE_VERSION
        )));
    }
    Ok(Some(file))
}
