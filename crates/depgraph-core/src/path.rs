use std::path::Path;

/// Normalize a file path into the canonical string key used by every index
/// and cache: forward slashes, no duplicate separators, `.` segments dropped,
/// `..` resolved lexically and no trailing separator. The filesystem is never
/// consulted, so paths of deleted files normalize the same way as live ones.
pub fn normalize_path<P: AsRef<Path>>(path: P) -> String {
    let raw = path.as_ref().to_string_lossy().replace('\\', "/");
    let absolute = raw.starts_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(segments.last(), Some(last) if *last != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_separators_and_dots() {
        assert_eq!(normalize_path("/a//b/./c/"), "/a/b/c");
        assert_eq!(normalize_path("/a/b/../c.ts"), "/a/c.ts");
        assert_eq!(normalize_path("src\\lib\\mod.rs"), "src/lib/mod.rs");
    }

    #[test]
    fn keeps_leading_parent_segments_for_relative_paths() {
        assert_eq!(normalize_path("../x/y"), "../x/y");
        assert_eq!(normalize_path("a/../../b"), "../b");
        assert_eq!(normalize_path("./"), ".");
    }

    #[test]
    fn parent_of_root_stays_at_root() {
        assert_eq!(normalize_path("/../f.ts"), "/f.ts");
        assert_eq!(normalize_path("/"), "/");
    }
}
