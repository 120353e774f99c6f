use crate::{DepGraphError, FileHash, Result};
use std::path::Path;

/// Filesystem collaborator used for staleness checks.
pub trait FileStatProvider: Send + Sync {
    fn stat(&self, path: &Path) -> Result<FileHash>;
}

/// Stats files on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStat;

impl FileStatProvider for FsStat {
    fn stat(&self, path: &Path) -> Result<FileHash> {
        std::fs::metadata(path)
            .map(|m| FileHash::from_metadata(&m))
            .map_err(|source| DepGraphError::Stat {
                path: path.to_path_buf(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn stat_reports_size_and_mtime() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.ts");
        std::fs::write(&file, "export const a = 1;\n").unwrap();

        let hash = FsStat.stat(&file).unwrap();
        assert_eq!(hash.size, 20);
        assert!(hash.mtime > 0);
    }

    #[test]
    fn stat_of_missing_file_is_a_stat_error() {
        let dir = TempDir::new().unwrap();
        let err = FsStat.stat(&dir.path().join("missing.rs")).unwrap_err();
        assert!(matches!(err, DepGraphError::Stat { .. }));
    }
}
