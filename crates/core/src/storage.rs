//! Content hashing and the managed media tree.
//!
//! The media root holds two buckets, `books/` and `covers/`. Stored names are
//! relative to the root (`books/novel.epub`) and are what the catalog records.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StorageError;

const HASH_CHUNK: usize = 64 * 1024;
const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// SHA-256 of everything `reader` yields, as lowercase hex.
pub fn content_hash<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn hash_file(path: &Path) -> io::Result<String> {
    content_hash(File::open(path)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageStrategy {
    /// Byte-identical copy owned by the catalog.
    Copy,
    /// Symbolic link to the original file, which stays owned by the user.
    Link,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Books,
    Covers,
}

impl Bucket {
    pub fn dir_name(self) -> &'static str {
        match self {
            Bucket::Books => "books",
            Bucket::Covers => "covers",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Root-relative name, e.g. `books/novel_1.epub`.
    pub name: String,
    /// Whether the stored file ended up as a symlink.
    pub linked: bool,
}

#[derive(Debug, Clone)]
pub struct MediaStorage {
    root: PathBuf,
}

impl MediaStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a stored name.
    pub fn path(&self, name: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(name);
        let valid = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Store `source` under `bucket` using `strategy`.
    ///
    /// Only the file-name part of `name` is used. When it is taken, `stem_1.ext`,
    /// `stem_2.ext`, ... are tried in order. `Link` falls back to `Copy` when
    /// symlinks are unavailable or fail for any reason other than a collision.
    pub fn persist(
        &self,
        bucket: Bucket,
        name: &str,
        source: &Path,
        strategy: StorageStrategy,
    ) -> Result<StoredFile, StorageError> {
        let file_name = Path::new(name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty() && n != "." && n != "..")
            .ok_or_else(|| StorageError::InvalidName(name.to_string()))?;

        let dir = self.root.join(bucket.dir_name());
        ensure_dir(&dir)?;

        if strategy == StorageStrategy::Link {
            match self.persist_link(bucket, &dir, &file_name, source) {
                Ok(Some(stored)) => return Ok(stored),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        "Symlinking {} failed, copying instead: {}",
                        source.display(),
                        e
                    );
                }
            }
        }
        self.persist_copy(bucket, &dir, &file_name, source)
    }

    #[cfg(unix)]
    fn persist_link(
        &self,
        bucket: Bucket,
        dir: &Path,
        file_name: &str,
        source: &Path,
    ) -> io::Result<Option<StoredFile>> {
        let target = absolute(source)?;
        // Links must point at a real file, not at another dangling link.
        fs::metadata(&target)?;
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = candidate_name(file_name, attempt);
            match std::os::unix::fs::symlink(&target, dir.join(&candidate)) {
                Ok(()) => {
                    return Ok(Some(StoredFile {
                        name: format!("{}/{}", bucket.dir_name(), candidate),
                        linked: true,
                    }))
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free name for {file_name}"),
        ))
    }

    #[cfg(not(unix))]
    fn persist_link(
        &self,
        _bucket: Bucket,
        _dir: &Path,
        _file_name: &str,
        _source: &Path,
    ) -> io::Result<Option<StoredFile>> {
        tracing::debug!("Symbolic links unsupported on this platform");
        Ok(None)
    }

    fn persist_copy(
        &self,
        bucket: Bucket,
        dir: &Path,
        file_name: &str,
        source: &Path,
    ) -> Result<StoredFile, StorageError> {
        let mut input = File::open(source).map_err(|e| StorageError::Write {
            path: source.to_path_buf(),
            source: e,
        })?;

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = candidate_name(file_name, attempt);
            let dest = dir.join(&candidate);
            let mut output = match OpenOptions::new().write(true).create_new(true).open(&dest) {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StorageError::Write { path: dest, source: e }),
            };
            if let Err(e) = io::copy(&mut input, &mut output).and_then(|_| output.sync_all()) {
                drop(output);
                let _ = fs::remove_file(&dest);
                return Err(StorageError::Write { path: dest, source: e });
            }
            return Ok(StoredFile {
                name: format!("{}/{}", bucket.dir_name(), candidate),
                linked: false,
            });
        }
        Err(StorageError::Write {
            path: dir.join(file_name),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "no free name"),
        })
    }

    /// Remove a stored file. For links only the link goes; its target is untouched.
    pub fn delete(&self, name: &str) -> Result<(), StorageError> {
        let path = self.path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Write { path, source: e }),
        }
    }

    pub fn is_link(&self, name: &str) -> bool {
        self.path(name)
            .ok()
            .and_then(|p| fs::symlink_metadata(p).ok())
            .is_some_and(|m| m.file_type().is_symlink())
    }

    pub fn link_target(&self, name: &str) -> Option<PathBuf> {
        self.path(name).ok().and_then(|p| fs::read_link(p).ok())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).map(|p| p.exists()).unwrap_or(false)
    }

    /// Whether `path` sits in the media tree or resolves into it.
    ///
    /// The first check resolves only the parent, so a stored link counts as
    /// inside even when its target is elsewhere.
    pub fn contains(&self, path: &Path) -> bool {
        let Ok(root) = fs::canonicalize(&self.root) else {
            return false;
        };
        let located = match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => fs::canonicalize(parent).ok().map(|p| p.join(name)),
            _ => None,
        };
        let resolved = fs::canonicalize(path).ok();
        [located, resolved]
            .into_iter()
            .flatten()
            .any(|p| p.starts_with(&root))
    }
}

fn ensure_dir(dir: &Path) -> Result<(), StorageError> {
    match fs::create_dir_all(dir) {
        Ok(()) => {}
        // Created concurrently, or something else is in the way; checked below.
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => {
            return Err(StorageError::Write {
                path: dir.to_path_buf(),
                source: e,
            })
        }
    }
    if !dir.is_dir() {
        return Err(StorageError::NotADirectory {
            path: dir.to_path_buf(),
        });
    }
    Ok(())
}

/// `name` for attempt 0, then `stem_N.ext`.
fn candidate_name(file_name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return file_name.to_string();
    }
    match file_name.rfind('.').filter(|&i| i > 0) {
        Some(i) => format!("{}_{}{}", &file_name[..i], attempt, &file_name[i..]),
        None => format!("{file_name}_{attempt}"),
    }
}

pub fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hash_is_stable_and_streamed() {
        let data = vec![42u8; HASH_CHUNK * 3 + 17];
        let a = content_hash(&data[..]).unwrap();
        let b = content_hash(io::Cursor::new(data.clone())).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(
            content_hash(&b""[..]).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn copy_collisions_get_numeric_suffixes() {
        let root = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("novel.epub");
        fs::write(&src, b"bytes").unwrap();

        let storage = MediaStorage::new(root.path());
        let first = storage
            .persist(Bucket::Books, "novel.epub", &src, StorageStrategy::Copy)
            .unwrap();
        let second = storage
            .persist(Bucket::Books, "some/dir/novel.epub", &src, StorageStrategy::Copy)
            .unwrap();
        let third = storage
            .persist(Bucket::Books, "novel.epub", &src, StorageStrategy::Copy)
            .unwrap();
        assert_eq!(first.name, "books/novel.epub");
        assert_eq!(second.name, "books/novel_1.epub");
        assert_eq!(third.name, "books/novel_2.epub");
        assert!(!first.linked);
        assert_eq!(fs::read(storage.path(&second.name).unwrap()).unwrap(), b"bytes");
        assert!(src.exists());
    }

    #[test]
    fn invalid_names_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(root.path());
        assert!(storage.path("../escape").is_err());
        assert!(storage.path("/etc/passwd").is_err());
        assert!(storage.path("").is_err());
        assert!(storage
            .persist(Bucket::Books, "..", root.path(), StorageStrategy::Copy)
            .is_err());
    }

    #[test]
    fn file_in_place_of_bucket_is_not_a_directory() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("covers"), b"oops").unwrap();
        let src = root.path().join("c.png");
        fs::write(&src, b"png").unwrap();
        let storage = MediaStorage::new(root.path());
        let err = storage
            .persist(Bucket::Covers, "1.png", &src, StorageStrategy::Copy)
            .unwrap_err();
        assert!(matches!(err, StorageError::NotADirectory { .. }));
    }

    #[test]
    fn missing_source_leaves_nothing_behind() {
        let root = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(root.path());
        assert!(storage
            .persist(
                Bucket::Books,
                "gone.epub",
                &root.path().join("gone.epub"),
                StorageStrategy::Copy
            )
            .is_err());
        assert!(!storage.exists("books/gone.epub"));
    }

    #[cfg(unix)]
    #[test]
    fn link_points_at_absolute_original_and_delete_keeps_it() {
        let root = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("linked.epub");
        fs::write(&src, b"original").unwrap();

        let storage = MediaStorage::new(root.path());
        let stored = storage
            .persist(Bucket::Books, "linked.epub", &src, StorageStrategy::Link)
            .unwrap();
        assert!(stored.linked);
        assert!(storage.is_link(&stored.name));
        assert_eq!(storage.link_target(&stored.name), Some(src.clone()));

        storage.delete(&stored.name).unwrap();
        assert!(!storage.exists(&stored.name));
        assert_eq!(fs::read(&src).unwrap(), b"original");
        // Deleting twice is fine.
        storage.delete(&stored.name).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn link_of_missing_source_falls_back_to_copy_error() {
        let root = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(root.path());
        let err = storage
            .persist(
                Bucket::Books,
                "x.epub",
                &root.path().join("missing.epub"),
                StorageStrategy::Link,
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::Write { .. }));
        assert!(!storage.exists("books/x.epub"));
    }

    #[cfg(unix)]
    #[test]
    fn contains_sees_through_links_both_ways() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let src = outside.path().join("book.epub");
        fs::write(&src, b"bytes").unwrap();

        let storage = MediaStorage::new(root.path());
        let copy = storage
            .persist(Bucket::Books, "book.epub", &src, StorageStrategy::Copy)
            .unwrap();
        let link = storage
            .persist(Bucket::Books, "book.epub", &src, StorageStrategy::Link)
            .unwrap();
        assert!(storage.contains(&storage.path(&copy.name).unwrap()));
        // A stored link is inside even though its target is not.
        assert!(storage.contains(&storage.path(&link.name).unwrap()));
        assert!(!storage.contains(&src));

        let alias = outside.path().join("alias.epub");
        std::os::unix::fs::symlink(storage.path(&copy.name).unwrap(), &alias).unwrap();
        assert!(storage.contains(&alias));
        assert!(!MediaStorage::new(root.path().join("missing")).contains(&src));
    }

    #[test]
    fn candidate_names() {
        assert_eq!(candidate_name("a.tar.gz", 0), "a.tar.gz");
        assert_eq!(candidate_name("a.tar.gz", 2), "a.tar_2.gz");
        assert_eq!(candidate_name("README", 1), "README_1");
        assert_eq!(candidate_name(".hidden", 1), ".hidden_1");
    }
}
