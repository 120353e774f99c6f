use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::Metadata;
use std::str::FromStr;
use std::time::UNIX_EPOCH;

/// Cheap staleness fingerprint of a file: modification time (ms since the
/// epoch) and size in bytes. Two fingerprints describe the same version of a
/// file iff both fields match exactly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileHash {
    pub mtime: i64,
    pub size: u64,
}

impl FileHash {
    pub fn new(mtime: i64, size: u64) -> Self {
        Self { mtime, size }
    }

    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self {
            mtime,
            size: metadata.len(),
        }
    }
}

/// Kind of file change reported by a watcher or editor-save hook.
///
/// Variants are ordered by priority: a `Delete` always dominates a `Change`
/// when both are coalesced for the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Change,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Change => "change",
            ChangeKind::Delete => "delete",
        }
    }

    /// Combine a pending event with a newly arrived one, keeping the one with
    /// the higher priority.
    pub fn merge(self, other: ChangeKind) -> ChangeKind {
        if other >= self {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "change" | "changed" | "modified" | "created" => Ok(ChangeKind::Change),
            "delete" | "deleted" | "removed" => Ok(ChangeKind::Delete),
            other => Err(format!("unknown change kind: {}", other)),
        }
    }
}
