use chrono::{DateTime, TimeZone, Utc};
use depgraph_core::{normalize_path, DepGraphError, FileHash, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

pub const INDEX_SNAPSHOT_VERSION: u32 = 1;

/// One "caller depends on target" fact, stored under the target symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolReverseEntry {
    pub caller_symbol_id: String,
    pub caller_file_path: String,
    pub is_type_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// Analyzer output for a single dependency edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyFact {
    pub source_symbol_id: String,
    pub target_symbol_id: String,
    pub is_type_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl DependencyFact {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_symbol_id: source.into(),
            target_symbol_id: target.into(),
            is_type_only: false,
            line: None,
        }
    }

    pub fn type_only(mut self) -> Self {
        self.is_type_only = true;
        self
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

/// Versioned, serializable image of a [`ReverseIndex`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSnapshot {
    pub version: u32,
    pub timestamp: i64,
    pub root_dir: String,
    pub reverse_map: BTreeMap<String, Vec<SymbolReverseEntry>>,
    pub file_hashes: BTreeMap<String, FileHash>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub total_target_symbols: usize,
    pub total_caller_entries: usize,
    pub total_source_files: usize,
    pub last_updated: i64,
}

impl IndexStats {
    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        if self.last_updated == 0 {
            return None;
        }
        Utc.timestamp_millis_opt(self.last_updated).single()
    }
}

/// Reverse dependency index: for every target symbol, who depends on it.
///
/// A secondary `file -> targets` map records which buckets each source file
/// contributed to, so superseding or removing a file touches only its own
/// entries.
#[derive(Debug)]
pub struct ReverseIndex {
    root_dir: String,
    reverse_map: HashMap<String, BTreeMap<String, SymbolReverseEntry>>,
    file_hashes: HashMap<String, FileHash>,
    file_targets: HashMap<String, HashSet<String>>,
    last_updated: i64,
}

impl ReverseIndex {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            root_dir: normalize_path(root_dir),
            reverse_map: HashMap::new(),
            file_hashes: HashMap::new(),
            file_targets: HashMap::new(),
            last_updated: 0,
        }
    }

    pub fn root_dir(&self) -> &str {
        &self.root_dir
    }

    /// Replace every dependency previously recorded for `source_file` with `deps`.
    pub fn add_dependencies<P: AsRef<Path>>(
        &mut self,
        source_file: P,
        deps: &[DependencyFact],
        hash: Option<FileHash>,
    ) {
        let file = normalize_path(source_file);
        let removed = self.remove_entries_for(&file);

        let mut targets = HashSet::with_capacity(deps.len());
        for dep in deps {
            let entry = SymbolReverseEntry {
                caller_symbol_id: dep.source_symbol_id.clone(),
                caller_file_path: file.clone(),
                is_type_only: dep.is_type_only,
                line: dep.line,
            };
            self.reverse_map
                .entry(dep.target_symbol_id.clone())
                .or_default()
                .insert(dep.source_symbol_id.clone(), entry);
            targets.insert(dep.target_symbol_id.clone());
        }
        if !targets.is_empty() {
            self.file_targets.insert(file.clone(), targets);
        }

        if let Some(hash) = hash {
            self.file_hashes.insert(file.clone(), hash);
        }
        self.touch();

        debug!(
            "Indexed {} dependencies from {} (superseded {})",
            deps.len(),
            file,
            removed
        );
    }

    /// Forget everything `source_file` contributed, including its stored hash.
    pub fn remove_dependencies_from_source<P: AsRef<Path>>(&mut self, source_file: P) -> usize {
        let file = normalize_path(source_file);
        let removed = self.remove_entries_for(&file);
        self.file_hashes.remove(&file);
        self.touch();
        removed
    }

    fn remove_entries_for(&mut self, file: &str) -> usize {
        let Some(targets) = self.file_targets.remove(file) else {
            return 0;
        };

        let mut removed = 0;
        for target in targets {
            if let Some(bucket) = self.reverse_map.get_mut(&target) {
                let before = bucket.len();
                bucket.retain(|_, entry| entry.caller_file_path != file);
                removed += before - bucket.len();
                if bucket.is_empty() {
                    self.reverse_map.remove(&target);
                }
            }
        }
        removed
    }

    pub fn get_callers(&self, target_symbol_id: &str) -> Vec<SymbolReverseEntry> {
        self.callers_matching(target_symbol_id, |_| true)
    }

    /// Callers of `target_symbol_id`, dropping type-only references unless asked for.
    pub fn get_callers_filtered(
        &self,
        target_symbol_id: &str,
        include_type_only: bool,
    ) -> Vec<SymbolReverseEntry> {
        self.callers_matching(target_symbol_id, |e| include_type_only || !e.is_type_only)
    }

    pub fn get_runtime_callers(&self, target_symbol_id: &str) -> Vec<SymbolReverseEntry> {
        self.callers_matching(target_symbol_id, |e| !e.is_type_only)
    }

    pub fn get_type_only_callers(&self, target_symbol_id: &str) -> Vec<SymbolReverseEntry> {
        self.callers_matching(target_symbol_id, |e| e.is_type_only)
    }

    fn callers_matching<F>(&self, target_symbol_id: &str, keep: F) -> Vec<SymbolReverseEntry>
    where
        F: Fn(&SymbolReverseEntry) -> bool,
    {
        self.reverse_map
            .get(target_symbol_id)
            .map(|bucket| bucket.values().filter(|e| keep(e)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_callers(&self, target_symbol_id: &str) -> bool {
        self.reverse_map
            .get(target_symbol_id)
            .is_some_and(|bucket| !bucket.is_empty())
    }

    pub fn get_caller_count(&self, target_symbol_id: &str) -> usize {
        self.reverse_map
            .get(target_symbol_id)
            .map_or(0, |bucket| bucket.len())
    }

    /// Distinct files containing at least one caller of `target_symbol_id`
    pub fn get_caller_files(&self, target_symbol_id: &str) -> BTreeSet<String> {
        self.reverse_map
            .get(target_symbol_id)
            .map(|bucket| {
                bucket
                    .values()
                    .map(|e| e.caller_file_path.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True when the file was never indexed or its fingerprint differs.
    pub fn is_file_stale<P: AsRef<Path>>(&self, file_path: P, current_hash: &FileHash) -> bool {
        match self.file_hashes.get(&normalize_path(file_path)) {
            Some(stored) => stored != current_hash,
            None => true,
        }
    }

    pub fn file_hash<P: AsRef<Path>>(&self, file_path: P) -> Option<FileHash> {
        self.file_hashes.get(&normalize_path(file_path)).copied()
    }

    /// Target symbols `source_file` currently depends on
    pub fn targets_of<P: AsRef<Path>>(&self, source_file: P) -> BTreeSet<String> {
        self.file_targets
            .get(&normalize_path(source_file))
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_stats(&self) -> IndexStats {
        let total_source_files = self
            .file_hashes
            .keys()
            .chain(self.file_targets.keys())
            .collect::<HashSet<_>>()
            .len();

        IndexStats {
            total_target_symbols: self.reverse_map.len(),
            total_caller_entries: self.reverse_map.values().map(|b| b.len()).sum(),
            total_source_files,
            last_updated: self.last_updated,
        }
    }

    pub fn clear(&mut self) {
        self.reverse_map.clear();
        self.file_hashes.clear();
        self.file_targets.clear();
        self.last_updated = 0;
    }

    pub fn serialize(&self) -> IndexSnapshot {
        let reverse_map = self
            .reverse_map
            .iter()
            .map(|(target, bucket)| (target.clone(), bucket.values().cloned().collect()))
            .collect();
        let file_hashes = self
            .file_hashes
            .iter()
            .map(|(path, hash)| (path.clone(), *hash))
            .collect();

        IndexSnapshot {
            version: INDEX_SNAPSHOT_VERSION,
            timestamp: Utc::now().timestamp_millis(),
            root_dir: self.root_dir.clone(),
            reverse_map,
            file_hashes,
        }
    }

    /// Replace the index contents with `snapshot`. Nothing is modified unless
    /// the snapshot's version and root directory match this index.
    pub fn deserialize(&mut self, snapshot: IndexSnapshot) -> bool {
        if let Err(e) = self.validate_snapshot(&snapshot) {
            warn!("Rejected index snapshot: {}", e);
            return false;
        }

        self.clear();
        for (target, entries) in snapshot.reverse_map {
            for entry in entries {
                self.file_targets
                    .entry(entry.caller_file_path.clone())
                    .or_default()
                    .insert(target.clone());
                self.reverse_map
                    .entry(target.clone())
                    .or_default()
                    .insert(entry.caller_symbol_id.clone(), entry);
            }
        }
        self.file_hashes = snapshot.file_hashes.into_iter().collect();
        self.last_updated = snapshot.timestamp;
        true
    }

    fn validate_snapshot(&self, snapshot: &IndexSnapshot) -> Result<()> {
        if snapshot.version != INDEX_SNAPSHOT_VERSION {
            return Err(DepGraphError::Validation(format!(
                "snapshot version {} does not match {}",
                snapshot.version, INDEX_SNAPSHOT_VERSION
            )));
        }
        if normalize_path(&snapshot.root_dir) != self.root_dir {
            return Err(DepGraphError::Validation(format!(
                "snapshot root {} does not match {}",
                snapshot.root_dir, self.root_dir
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.serialize())?)
    }

    pub fn from_json(&mut self, json: &str) -> bool {
        match serde_json::from_str::<IndexSnapshot>(json) {
            Ok(snapshot) => self.deserialize(snapshot),
            Err(e) => {
                warn!("Failed to parse index snapshot: {}", e);
                false
            }
        }
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;

        info!(
            "Saved reverse index ({} targets) to {}",
            self.reverse_map.len(),
            path.display()
        );
        Ok(())
    }

    /// Load a snapshot saved by [`ReverseIndex::save`]. Missing, unreadable or
    /// mismatched files leave the index untouched and return false.
    pub async fn load<P: AsRef<Path>>(&mut self, path: P) -> bool {
        let path = path.as_ref();
        let json = match tokio::fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return false,
            Err(e) => {
                warn!("Failed to read index snapshot {}: {}", path.display(), e);
                return false;
            }
        };

        let loaded = self.from_json(&json);
        if loaded {
            info!(
                "Loaded reverse index ({} targets) from {}",
                self.reverse_map.len(),
                path.display()
            );
        }
        loaded
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now().timestamp_millis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(pairs: &[(&str, &str)]) -> Vec<DependencyFact> {
        pairs
            .iter()
            .map(|(src, tgt)| DependencyFact::new(*src, *tgt))
            .collect()
    }

    #[test]
    fn re_adding_supersedes_previous_facts() {
        let mut index = ReverseIndex::new("/ws");
        index.add_dependencies("/ws/a.ts", &facts(&[("a#f", "b#g"), ("a#f", "c#h")]), None);
        index.add_dependencies("/ws/a.ts", &facts(&[("a#f", "c#h")]), None);

        assert!(!index.has_callers("b#g"));
        assert_eq!(index.get_caller_count("c#h"), 1);
        assert_eq!(index.get_stats().total_target_symbols, 1);
    }

    #[test]
    fn re_indexing_is_idempotent() {
        let deps = facts(&[("a#f", "b#g"), ("a#k", "b#g")]);
        let mut index = ReverseIndex::new("/ws");
        index.add_dependencies("/ws/a.ts", &deps, Some(FileHash::new(1, 2)));
        let first = index.serialize();
        index.add_dependencies("/ws/a.ts", &deps, Some(FileHash::new(1, 2)));
        let second = index.serialize();

        assert_eq!(first.reverse_map, second.reverse_map);
        assert_eq!(first.file_hashes, second.file_hashes);
    }

    #[test]
    fn removal_leaves_other_files_alone() {
        let mut index = ReverseIndex::new("/ws");
        index.add_dependencies("/ws/a.ts", &facts(&[("a#f", "lib#x")]), Some(FileHash::new(1, 1)));
        index.add_dependencies("/ws/b.ts", &facts(&[("b#f", "lib#x")]), Some(FileHash::new(1, 1)));

        assert_eq!(index.remove_dependencies_from_source("/ws/a.ts"), 1);
        let callers = index.get_callers("lib#x");
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].caller_file_path, "/ws/b.ts");
        assert!(index.file_hash("/ws/a.ts").is_none());
        assert_eq!(index.get_stats().total_source_files, 1);
    }

    #[test]
    fn caller_filters() {
        let mut index = ReverseIndex::new("/ws");
        let deps = vec![
            DependencyFact::new("a#f", "t#T").at_line(3),
            DependencyFact::new("a#g", "t#T").type_only(),
        ];
        index.add_dependencies("/ws/a.ts", &deps, None);

        assert_eq!(index.get_callers("t#T").len(), 2);
        assert_eq!(index.get_callers_filtered("t#T", false).len(), 1);
        assert_eq!(index.get_runtime_callers("t#T")[0].line, Some(3));
        assert_eq!(index.get_type_only_callers("t#T")[0].caller_symbol_id, "a#g");
        assert!(index.get_callers("missing").is_empty());
        assert_eq!(index.get_caller_files("t#T").len(), 1);
    }

    #[test]
    fn staleness_by_mtime_and_size() {
        let mut index = ReverseIndex::new("/ws");
        let hash = FileHash::new(1000, 42);
        index.add_dependencies("/ws/a.ts", &[], Some(hash));

        assert!(!index.is_file_stale("/ws/a.ts", &hash));
        assert!(index.is_file_stale("/ws/a.ts", &FileHash::new(1001, 42)));
        assert!(index.is_file_stale("/ws/a.ts", &FileHash::new(1000, 43)));
        assert!(index.is_file_stale("/ws/never.ts", &hash));
    }

    #[test]
    fn paths_are_normalized() {
        let mut index = ReverseIndex::new("/ws/");
        index.add_dependencies("/ws/src/../a.ts", &facts(&[("a#f", "b#g")]), None);
        assert_eq!(index.get_callers("b#g")[0].caller_file_path, "/ws/a.ts");
        assert_eq!(index.remove_dependencies_from_source("/ws//a.ts"), 1);
        assert_eq!(index.root_dir(), "/ws");
    }

    #[test]
    fn last_write_wins_per_caller() {
        let mut index = ReverseIndex::new("/ws");
        let deps = vec![
            DependencyFact::new("a#f", "b#g").at_line(1),
            DependencyFact::new("a#f", "b#g").at_line(9),
        ];
        index.add_dependencies("/ws/a.ts", &deps, None);
        let callers = index.get_callers("b#g");
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].line, Some(9));
    }

    #[test]
    fn clear_resets_everything() {
        let mut index = ReverseIndex::new("/ws");
        index.add_dependencies("/ws/a.ts", &facts(&[("a#f", "b#g")]), Some(FileHash::new(1, 1)));
        assert!(index.get_stats().last_updated_at().is_some());

        index.clear();
        let stats = index.get_stats();
        assert_eq!(stats.total_target_symbols, 0);
        assert_eq!(stats.total_source_files, 0);
        assert_eq!(stats.last_updated, 0);
        assert!(index.targets_of("/ws/a.ts").is_empty());
    }
}
