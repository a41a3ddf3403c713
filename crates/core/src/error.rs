use std::path::PathBuf;

/// Violations detected while reading an untrusted archive.
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("ZIP bomb detected: decompression ratio {ratio}:1 exceeds limit {limit}:1")]
    ZipBomb { ratio: u64, limit: u64 },

    #[error("Path traversal detected in archive entry: {path}")]
    PathTraversal { path: String },

    #[error("Archive contains {count} files, exceeding limit of {limit}")]
    TooManyFiles { count: u64, limit: u64 },

    #[error("Resource {name} is {size_mb}MB, exceeding limit of {limit_mb}MB")]
    OversizedResource {
        name: String,
        size_mb: u64,
        limit_mb: u64,
    },
}

/// Failures opening an EPUB container or reading its package document.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Not a ZIP archive: {0}")]
    NotAnArchive(String),

    #[error("Not an EPUB: {0}")]
    NotAnEpub(String),

    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    #[error("Malformed package document: {0}")]
    MalformedPackage(String),

    #[error("Missing archive entry: {0}")]
    MissingEntry(String),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum LanguageError {
    #[error("{0:?} is not a valid language code")]
    Invalid(String),
}

/// Failures writing into managed storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{path} exists and is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("Invalid storage name: {0:?}")]
    InvalidName(String),

    #[error("Storage write failed for {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("A book with content hash {0} already exists")]
    DuplicateHash(String),

    #[error("Book #{0} not found")]
    NotFound(i64),

    #[error("Catalog database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outcome of a single failed ingestion.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("The file is already on the database (content hash {hash})")]
    Duplicate { hash: String, existing: Option<i64> },

    #[error("Invalid EPUB: {0}")]
    InvalidEpub(#[from] ArchiveError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("IO error reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IngestError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestError::Duplicate { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("No .epub files found on the specified paths.")]
    NoCandidates,
}
