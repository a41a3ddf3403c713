//! Security hardening for untrusted archives: entry-name neutralisation,
//! ZIP bomb protection and resource limits.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::error::SecurityError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityLimits {
    /// Maximum decompression ratio before flagging as ZIP bomb.
    pub max_compression_ratio: u64,
    /// Maximum number of entries allowed in an archive.
    pub max_file_count: u64,
    /// Maximum decompressed size of a single entry in bytes.
    pub max_resource_size_bytes: u64,
}

impl Default for SecurityLimits {
    fn default() -> Self {
        Self {
            max_compression_ratio: 100,
            max_file_count: 10_000,
            max_resource_size_bytes: 200 * 1024 * 1024, // 200 MB
        }
    }
}

/// Reduce an archive entry name to a relative path that cannot leave the
/// directory it is joined to.
///
/// Backslashes are treated as separators, drive prefixes and leading
/// separators are dropped, and `.`/`..` components are removed. Returns `None`
/// when nothing usable remains.
pub fn sanitize_entry_name(entry_name: &str) -> Option<PathBuf> {
    let unified = entry_name.replace('\\', "/");
    let mut out = PathBuf::new();
    for (i, part) in unified.split('/').enumerate() {
        // "C:" style drive prefixes only make sense as the first component
        if i == 0 && part.len() == 2 && part.as_bytes()[1] == b':' {
            continue;
        }
        match part {
            "" | "." | ".." => continue,
            other => out.push(other),
        }
    }
    let clean = out
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if out.as_os_str().is_empty() || !clean {
        None
    } else {
        Some(out)
    }
}

/// Join an entry name onto `root`, rejecting anything that would not stay
/// below it.
pub fn contained_path(root: &Path, entry_name: &str) -> Result<PathBuf, SecurityError> {
    let relative = sanitize_entry_name(entry_name).ok_or_else(|| SecurityError::PathTraversal {
        path: entry_name.to_string(),
    })?;
    let joined = root.join(relative);
    if !joined.starts_with(root) {
        return Err(SecurityError::PathTraversal {
            path: entry_name.to_string(),
        });
    }
    Ok(joined)
}

/// Whether an entry name would have escaped its root if used verbatim.
pub fn is_traversal_attempt(entry_name: &str) -> bool {
    let unified = entry_name.replace('\\', "/");
    unified.starts_with('/')
        || (unified.len() >= 2 && unified.as_bytes()[1] == b':')
        || unified.split('/').any(|part| part == "..")
}

/// Check if a decompression ratio exceeds the configured limit (ZIP bomb detection).
pub fn check_compression_ratio(
    compressed_size: u64,
    uncompressed_size: u64,
    limits: &SecurityLimits,
) -> Result<(), SecurityError> {
    if compressed_size == 0 {
        if uncompressed_size > 0 {
            return Err(SecurityError::ZipBomb {
                ratio: u64::MAX,
                limit: limits.max_compression_ratio,
            });
        }
        return Ok(());
    }

    let ratio = uncompressed_size / compressed_size;
    if ratio > limits.max_compression_ratio {
        return Err(SecurityError::ZipBomb {
            ratio,
            limit: limits.max_compression_ratio,
        });
    }

    Ok(())
}

/// Check if the number of entries in an archive exceeds the limit.
pub fn check_file_count(count: u64, limits: &SecurityLimits) -> Result<(), SecurityError> {
    if count > limits.max_file_count {
        return Err(SecurityError::TooManyFiles {
            count,
            limit: limits.max_file_count,
        });
    }
    Ok(())
}

/// Check if a single entry exceeds the size limit.
pub fn check_resource_size(
    name: &str,
    size_bytes: u64,
    limits: &SecurityLimits,
) -> Result<(), SecurityError> {
    if size_bytes > limits.max_resource_size_bytes {
        return Err(SecurityError::OversizedResource {
            name: name.to_string(),
            size_mb: size_bytes / (1024 * 1024),
            limit_mb: limits.max_resource_size_bytes / (1024 * 1024),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sanitize_keeps_safe_paths() {
        assert_eq!(
            sanitize_entry_name("OEBPS/images/cover.jpg"),
            Some(PathBuf::from("OEBPS/images/cover.jpg"))
        );
        assert_eq!(sanitize_entry_name("mimetype"), Some(PathBuf::from("mimetype")));
    }

    #[test]
    fn sanitize_neutralises_traversal() {
        assert_eq!(
            sanitize_entry_name("../../../etc/passwd"),
            Some(PathBuf::from("etc/passwd"))
        );
        assert_eq!(
            sanitize_entry_name("content/../../etc/shadow"),
            Some(PathBuf::from("content/etc/shadow"))
        );
        assert_eq!(sanitize_entry_name("/etc/passwd"), Some(PathBuf::from("etc/passwd")));
        assert_eq!(
            sanitize_entry_name("\\Windows\\System32\\config"),
            Some(PathBuf::from("Windows/System32/config"))
        );
        assert_eq!(
            sanitize_entry_name("C:\\Windows\\win.ini"),
            Some(PathBuf::from("Windows/win.ini"))
        );
    }

    #[test]
    fn sanitize_rejects_empty_results() {
        assert_eq!(sanitize_entry_name(""), None);
        assert_eq!(sanitize_entry_name("../.."), None);
        assert_eq!(sanitize_entry_name("/"), None);
    }

    #[test]
    fn traversal_attempts_are_recognised() {
        assert!(is_traversal_attempt("../evil"));
        assert!(is_traversal_attempt("/abs"));
        assert!(is_traversal_attempt("a\\..\\b"));
        assert!(!is_traversal_attempt("OEBPS/content.opf"));
    }

    #[test]
    fn contained_path_stays_under_root() {
        let root = Path::new("/tmp/scratch");
        let p = contained_path(root, "../../x/y.txt").unwrap();
        assert_eq!(p, PathBuf::from("/tmp/scratch/x/y.txt"));
        assert!(contained_path(root, "..").is_err());
    }

    #[test]
    fn compression_ratio_limits() {
        let limits = SecurityLimits::default();
        assert!(check_compression_ratio(1000, 50_000, &limits).is_ok()); // 50:1
        assert!(check_compression_ratio(100, 100_000, &limits).is_err()); // 1000:1
        assert!(check_compression_ratio(0, 0, &limits).is_ok());
        assert!(check_compression_ratio(0, 100, &limits).is_err());
    }

    #[test]
    fn file_count_and_size_limits() {
        let limits = SecurityLimits::default();
        assert!(check_file_count(10_000, &limits).is_ok());
        assert!(check_file_count(10_001, &limits).is_err());
        assert!(check_resource_size("image.jpg", 1024 * 1024, &limits).is_ok());
        assert!(check_resource_size("huge.png", 201 * 1024 * 1024, &limits).is_err());
    }

    proptest! {
        #[test]
        fn sanitized_names_never_escape(name in "[a-zA-Z0-9./\\\\:]{0,40}") {
            let root = Path::new("/scratch/root");
            if let Ok(p) = contained_path(root, &name) {
                prop_assert!(p.starts_with(root));
                prop_assert!(p.components().all(|c| !matches!(c, Component::ParentDir)));
            }
        }
    }
}
