//! Batch import and resync over files and directory trees.
//!
//! Per-file failures become outcomes in the report; only an empty candidate
//! list is an error.

use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::error::{BatchError, IngestError};
use crate::library::Library;
use crate::progress::{emit_progress, ProgressHandler};
use crate::storage::{absolute, hash_file, Bucket, StorageStrategy};

const EPUB_EXTENSION: &str = "epub";

/// Expand files and directories into absolute `.epub` paths.
///
/// Directories are walked recursively with entries sorted by name. Order is
/// first-seen and each path appears once. Paths for which `skip` returns true
/// are left out.
pub fn collect_epub_paths<I>(items: I, skip: impl Fn(&Path) -> bool) -> Vec<PathBuf>
where
    I: IntoIterator,
    I::Item: AsRef<Path>,
{
    let mut found = Vec::new();
    for item in items {
        let item = item.as_ref();
        if item.is_dir() {
            walk(item, &mut found);
        } else if item.is_file() {
            found.push(item.to_path_buf());
        } else {
            tracing::warn!("Skipping {}: no such file or directory", item.display());
        }
    }

    let mut seen = HashSet::new();
    found
        .into_iter()
        .filter(|p| has_epub_extension(p))
        .filter_map(|p| match absolute(&p) {
            Ok(abs) => Some(clean_path(&abs)),
            Err(e) => {
                tracing::warn!("Skipping {}: {}", p.display(), e);
                None
            }
        })
        .filter(|p| seen.insert(p.clone()))
        .filter(|p| !skip(p))
        .collect()
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Cannot read directory {}: {}", dir.display(), e);
            return;
        }
    };
    let mut entries: Vec<_> = entries.flatten().collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        // Symlinked directories are not followed, so a cycle cannot loop.
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => walk(&path, found),
            Ok(_) if path.is_file() => found.push(path),
            _ => {}
        }
    }
}

fn has_epub_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(EPUB_EXTENSION))
}

/// Lexically drop `.` and resolve `..` components.
fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ImportOutcome {
    Imported { id: i64, title: String },
    Duplicate { existing: Option<i64> },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportEntry {
    pub path: PathBuf,
    #[serde(flatten)]
    pub outcome: ImportOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub entries: Vec<ImportEntry>,
    pub success: usize,
    /// Every file not imported, duplicates included.
    pub fail: usize,
    pub duplicates: usize,
}

impl ImportReport {
    pub fn summary(&self) -> String {
        format!(
            "{} files imported, {} files not imported.",
            self.success, self.fail
        )
    }
}

/// Ingest every `.epub` under `items`.
///
/// Paths already recorded as an import source are skipped when
/// `import.skip_imported` is set in the library's config.
pub fn import<C, I>(
    library: &mut Library<C>,
    items: I,
    strategy: StorageStrategy,
    progress: Option<&dyn ProgressHandler>,
) -> Result<ImportReport, BatchError>
where
    C: Catalog,
    I: IntoIterator,
    I::Item: AsRef<Path>,
{
    let skip_imported = library.config().import.skip_imported;
    let candidates = collect_epub_paths(items, |p| {
        is_managed(library, p) || (skip_imported && already_imported(library.catalog(), p))
    });
    if candidates.is_empty() {
        return Err(BatchError::NoCandidates);
    }
    tracing::info!("Importing {} items", candidates.len());

    let total = candidates.len() as u64;
    let mut report = ImportReport::default();
    for (i, path) in candidates.into_iter().enumerate() {
        let outcome = match library.ingest(&path, strategy) {
            Ok(book) => {
                report.success += 1;
                ImportOutcome::Imported {
                    id: book.id,
                    title: book.title,
                }
            }
            Err(IngestError::Duplicate { existing, .. }) => {
                report.fail += 1;
                report.duplicates += 1;
                ImportOutcome::Duplicate { existing }
            }
            Err(e) => {
                tracing::warn!("{} not imported: {}", path.display(), e);
                report.fail += 1;
                ImportOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        emit_progress(
            progress,
            "import",
            i as u64 + 1,
            total,
            &path,
            Some(describe_import(&outcome)),
        );
        report.entries.push(ImportEntry { path, outcome });
    }
    tracing::info!("{}", report.summary());
    Ok(report)
}

/// Files in the media tree are the catalog's own and never candidates.
fn is_managed<C: Catalog>(library: &Library<C>, path: &Path) -> bool {
    let managed = library.storage().contains(path);
    if managed {
        tracing::warn!("Skipping {}: it is inside the media root", path.display());
    }
    managed
}

fn already_imported<C: Catalog>(catalog: &C, path: &Path) -> bool {
    match catalog.has_original_path(&path.to_string_lossy()) {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!("Could not check {} against the catalog: {}", path.display(), e);
            false
        }
    }
}

fn describe_import(outcome: &ImportOutcome) -> String {
    match outcome {
        ImportOutcome::Imported { id, title } => format!("Imported #{id} ({title})"),
        ImportOutcome::Duplicate { existing: Some(id) } => format!("Duplicate of #{id}"),
        ImportOutcome::Duplicate { existing: None } => "Duplicate".to_string(),
        ImportOutcome::Failed { error } => error.clone(),
    }
}

/// How resync backs a matched book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplaceStrategy {
    /// Keep whatever the book uses now: links are re-pointed, copies stay.
    #[default]
    Original,
    AlwaysLink,
    AlwaysCopy,
}

impl FromStr for ReplaceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" => Ok(Self::Original),
            "always-link" => Ok(Self::AlwaysLink),
            "always-copy" => Ok(Self::AlwaysCopy),
            other => Err(format!(
                "unknown replace strategy {other:?} (expected original, always-link or always-copy)"
            )),
        }
    }
}

impl fmt::Display for ReplaceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Original => "original",
            Self::AlwaysLink => "always-link",
            Self::AlwaysCopy => "always-copy",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResyncOutcome {
    /// The book now records this path and is backed as `linked` says.
    Matched {
        id: i64,
        original_path: String,
        linked: bool,
    },
    /// Same content as a file matched earlier in this run; left alone.
    AlreadyMatched { id: i64 },
    Unmatched,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResyncEntry {
    pub path: PathBuf,
    #[serde(flatten)]
    pub outcome: ResyncOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    pub entries: Vec<ResyncEntry>,
    pub updated: usize,
    /// Failures and files whose book was already matched in this run.
    pub failed: usize,
    pub unmatched: usize,
}

impl ResyncReport {
    pub fn summary(&self) -> String {
        format!(
            "{} books updated, {} books failed to update, {} items not matched.",
            self.updated, self.failed, self.unmatched
        )
    }
}

/// Point existing books at the files under `items`, matched by content hash.
///
/// Only the changes needed are made. New links or copies are written before
/// the record is saved and the old file is removed afterwards, so a failure
/// never leaves a record pointing at nothing. A second run over an unchanged
/// tree changes nothing and reports the same outcomes.
pub fn resync<C, I>(
    library: &mut Library<C>,
    items: I,
    strategy: ReplaceStrategy,
    progress: Option<&dyn ProgressHandler>,
) -> Result<ResyncReport, BatchError>
where
    C: Catalog,
    I: IntoIterator,
    I::Item: AsRef<Path>,
{
    let candidates = collect_epub_paths(items, |p| is_managed(library, p));
    if candidates.is_empty() {
        return Err(BatchError::NoCandidates);
    }
    tracing::info!("Resyncing {} items ({})", candidates.len(), strategy);

    let total = candidates.len() as u64;
    let mut matched = HashSet::new();
    let mut report = ResyncReport::default();
    for (i, path) in candidates.into_iter().enumerate() {
        let outcome = match resync_one(library, &path, strategy, &mut matched) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("{} not resynced: {}", path.display(), e);
                ResyncOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        match &outcome {
            ResyncOutcome::Matched { .. } => report.updated += 1,
            ResyncOutcome::Unmatched => report.unmatched += 1,
            ResyncOutcome::AlreadyMatched { .. } | ResyncOutcome::Failed { .. } => {
                report.failed += 1
            }
        }
        emit_progress(progress, "resync", i as u64 + 1, total, &path, None);
        report.entries.push(ResyncEntry { path, outcome });
    }
    tracing::info!("{}", report.summary());
    Ok(report)
}

fn resync_one<C: Catalog>(
    library: &mut Library<C>,
    path: &Path,
    strategy: ReplaceStrategy,
    matched: &mut HashSet<i64>,
) -> Result<ResyncOutcome, IngestError> {
    let hash = hash_file(path).map_err(|e| IngestError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let Some(book) = library.catalog().find_by_hash(&hash)? else {
        return Ok(ResyncOutcome::Unmatched);
    };
    if !matched.insert(book.id) {
        return Ok(ResyncOutcome::AlreadyMatched { id: book.id });
    }

    let storage = library.storage();
    let original_path = path.to_string_lossy().into_owned();
    let is_linked = storage.is_link(&book.book_file);
    let want_link = match strategy {
        ReplaceStrategy::Original => is_linked,
        ReplaceStrategy::AlwaysLink => true,
        ReplaceStrategy::AlwaysCopy => false,
    };
    let needs_new_file = if want_link {
        !is_linked || storage.link_target(&book.book_file).as_deref() != Some(path)
    } else {
        is_linked || !storage.exists(&book.book_file)
    };

    if !needs_new_file && book.original_path == original_path {
        tracing::debug!("Book #{} already matches {}", book.id, path.display());
        return Ok(ResyncOutcome::Matched {
            id: book.id,
            original_path,
            linked: is_linked,
        });
    }

    let mut book_file = book.book_file.clone();
    let mut linked = is_linked;
    if needs_new_file {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| book.book_file.clone());
        let file_strategy = if want_link {
            StorageStrategy::Link
        } else {
            StorageStrategy::Copy
        };
        let stored = storage.persist(Bucket::Books, &name, path, file_strategy)?;
        book_file = stored.name;
        linked = stored.linked;
    }

    if let Err(e) = library
        .catalog_mut()
        .update_storage(book.id, &book_file, &original_path)
    {
        if needs_new_file {
            if let Err(del) = library.storage().delete(&book_file) {
                tracing::warn!("Could not remove new file {}: {}", book_file, del);
            }
        }
        return Err(e.into());
    }

    if needs_new_file {
        if let Err(e) = library.storage().delete(&book.book_file) {
            tracing::warn!("Could not remove old file {}: {}", book.book_file, e);
        }
    }
    tracing::info!(
        "Book #{} ({}) now at {} (linked: {})",
        book.id,
        book.title,
        original_path,
        linked
    );
    Ok(ResyncOutcome::Matched {
        id: book.id,
        original_path,
        linked,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::FaultyCatalog;
    use crate::catalog::MemoryCatalog;
    use crate::config::AppConfig;
    use crate::fixtures::EpubBuilder;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    use crate::progress::ProgressEvent;

    fn library(root: &Path) -> Library<MemoryCatalog> {
        let mut config = AppConfig::default();
        config.library.media_root = root.to_path_buf();
        Library::new(config, MemoryCatalog::new())
    }

    #[derive(Default)]
    struct Recorder(RefCell<Vec<ProgressEvent>>);

    impl ProgressHandler for Recorder {
        fn on_progress(&self, event: ProgressEvent) {
            self.0.borrow_mut().push(event);
        }
    }

    #[test]
    fn collects_recursively_in_order() {
        let src = tempfile::tempdir().unwrap();
        let root = src.path();
        std::fs::create_dir_all(root.join("b/nested")).unwrap();
        std::fs::write(root.join("b/nested/z.EPUB"), b"").unwrap();
        std::fs::write(root.join("b/a.epub"), b"").unwrap();
        std::fs::write(root.join("b/notes.txt"), b"").unwrap();
        std::fs::write(root.join("top.epub"), b"").unwrap();

        let items = vec![
            root.join("top.epub"),
            root.to_path_buf(),
            root.join("b/./a.epub"),
            root.join("missing.epub"),
        ];
        let found = collect_epub_paths(&items, |_| false);
        assert_eq!(
            found,
            vec![
                root.join("top.epub"),
                root.join("b/a.epub"),
                root.join("b/nested/z.EPUB"),
            ]
        );

        let skipped = collect_epub_paths(&items, |p| p.ends_with("a.epub"));
        assert_eq!(skipped.len(), 2);
    }

    #[test]
    fn import_counts_and_reports() {
        let media = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        EpubBuilder::new("Good").write_to(&src.path().join("good.epub")).unwrap();
        std::fs::write(src.path().join("bad.epub"), b"not an epub").unwrap();

        let mut lib = library(media.path());
        let recorder = Recorder::default();
        let report = import(&mut lib, [src.path()], StorageStrategy::Copy, Some(&recorder)).unwrap();
        assert_eq!(report.success, 1);
        assert_eq!(report.fail, 1);
        assert_eq!(report.summary(), "1 files imported, 1 files not imported.");
        assert!(matches!(report.entries[0].outcome, ImportOutcome::Failed { .. }));
        assert!(matches!(report.entries[1].outcome, ImportOutcome::Imported { .. }));

        let events = recorder.0.borrow();
        assert_eq!(events.len(), 2);
        assert_eq!((events[1].current, events[1].total), (2, 2));
    }

    #[test]
    fn already_imported_paths_are_skipped() {
        let media = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        EpubBuilder::new("Once").write_to(&src.path().join("once.epub")).unwrap();

        let mut lib = library(media.path());
        import(&mut lib, [src.path()], StorageStrategy::Copy, None).unwrap();
        let again = import(&mut lib, [src.path()], StorageStrategy::Copy, None);
        assert!(matches!(again, Err(BatchError::NoCandidates)));
    }

    #[test]
    fn duplicates_count_as_failures() {
        let media = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let a = src.path().join("a.epub");
        EpubBuilder::new("Twin").write_to(&a).unwrap();
        std::fs::copy(&a, src.path().join("b.epub")).unwrap();

        let mut lib = library(media.path());
        let report = import(&mut lib, [src.path()], StorageStrategy::Copy, None).unwrap();
        assert_eq!((report.success, report.fail, report.duplicates), (1, 1, 1));
        let first_id = match &report.entries[0].outcome {
            ImportOutcome::Imported { id, .. } => *id,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(
            report.entries[1].outcome,
            ImportOutcome::Duplicate {
                existing: Some(first_id)
            }
        );
    }

    #[test]
    fn empty_input_is_an_error() {
        let media = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let mut lib = library(media.path());
        let err = import(&mut lib, [src.path()], StorageStrategy::Copy, None).unwrap_err();
        assert_eq!(err.to_string(), "No .epub files found on the specified paths.");
        assert!(matches!(
            resync(&mut lib, [src.path()], ReplaceStrategy::Original, None),
            Err(BatchError::NoCandidates)
        ));
    }

    #[test]
    fn resync_moves_copy_and_reports_unmatched() {
        let media = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let moved = tempfile::tempdir().unwrap();
        let path = src.path().join("book.epub");
        EpubBuilder::new("Mover").write_to(&path).unwrap();
        EpubBuilder::new("Stranger")
            .write_to(&moved.path().join("stranger.epub"))
            .unwrap();

        let mut lib = library(media.path());
        let book = lib.ingest(&path, StorageStrategy::Copy).unwrap();
        let new_path = moved.path().join("book.epub");
        std::fs::rename(&path, &new_path).unwrap();

        let report = resync(&mut lib, [moved.path()], ReplaceStrategy::Original, None).unwrap();
        assert_eq!(report.summary(), "1 books updated, 0 books failed to update, 1 items not matched.");
        let after = lib.catalog().get(book.id).unwrap().unwrap();
        assert_eq!(after.original_path, new_path.to_string_lossy());
        // A copy stays a copy under the original strategy.
        assert_eq!(after.book_file, book.book_file);
    }

    #[test]
    fn always_copy_keeps_file_when_already_copied() {
        let media = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let path = src.path().join("c.epub");
        EpubBuilder::new("Copied").write_to(&path).unwrap();

        let mut lib = library(media.path());
        let book = lib.ingest(&path, StorageStrategy::Copy).unwrap();
        let report = resync(&mut lib, [&path], ReplaceStrategy::AlwaysCopy, None).unwrap();
        assert_eq!(
            report.entries[0].outcome,
            ResyncOutcome::Matched {
                id: book.id,
                original_path: path.to_string_lossy().into_owned(),
                linked: false,
            }
        );
        let after = lib.catalog().get(book.id).unwrap().unwrap();
        assert_eq!(after.updated_at, book.updated_at);
    }

    #[test]
    fn same_content_twice_in_one_run() {
        let media = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let a = src.path().join("a.epub");
        EpubBuilder::new("Twin").write_to(&a).unwrap();
        std::fs::copy(&a, src.path().join("b.epub")).unwrap();

        let mut lib = library(media.path());
        let book = lib.ingest(&a, StorageStrategy::Copy).unwrap();
        let first = resync(&mut lib, [src.path()], ReplaceStrategy::Original, None).unwrap();
        assert_eq!(first.entries[1].outcome, ResyncOutcome::AlreadyMatched { id: book.id });
        let second = resync(&mut lib, [src.path()], ReplaceStrategy::Original, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn failed_save_removes_the_new_file() {
        let media = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let moved = tempfile::tempdir().unwrap();
        let path = src.path().join("stuck.epub");
        EpubBuilder::new("Stuck").write_to(&path).unwrap();

        let mut config = AppConfig::default();
        config.library.media_root = media.path().to_path_buf();
        let mut lib = Library::new(config, FaultyCatalog::default());
        let book = lib.ingest(&path, StorageStrategy::Copy).unwrap();
        let new_path = moved.path().join("stuck.epub");
        std::fs::rename(&path, &new_path).unwrap();
        lib.catalog_mut().fail_updates = true;

        let report = resync(&mut lib, [moved.path()], ReplaceStrategy::AlwaysLink, None).unwrap();
        assert!(matches!(report.entries[0].outcome, ResyncOutcome::Failed { .. }));
        assert_eq!(report.failed, 1);
        let books: Vec<_> = std::fs::read_dir(media.path().join("books"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(books, vec!["stuck.epub"]);
        assert!(!lib.storage().is_link(&book.book_file));
        let after = lib.catalog().get(book.id).unwrap().unwrap();
        assert_eq!(after.book_file, book.book_file);
    }

    #[test]
    fn replace_strategy_parses() {
        assert_eq!("always-link".parse::<ReplaceStrategy>().unwrap(), ReplaceStrategy::AlwaysLink);
        assert_eq!(ReplaceStrategy::AlwaysCopy.to_string(), "always-copy");
        assert!("sometimes".parse::<ReplaceStrategy>().is_err());
    }
}
