//! EPUB container access: ZIP → `mimetype` marker → `container.xml` → OPF.
//!
//! Every open archive owns a private scratch directory. Entries are only ever
//! written below it, whatever their names claim.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::ZipArchive;

use crate::error::{ArchiveError, SecurityError};
use crate::package;
use crate::security::{self, SecurityLimits};
use crate::xml::{self, CONTAINER_NS};

pub const EPUB_MIMETYPE: &str = "application/epub+zip";
pub const OPF_MEDIA_TYPE: &str = "application/oebps-package+xml";
const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Entries smaller than this are exempt from the compression-ratio check;
/// short repetitive markup legitimately compresses very well.
const RATIO_CHECK_THRESHOLD: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub security: SecurityLimits,
    /// Parent for scratch directories; the system temp dir when `None`.
    pub scratch_dir: Option<PathBuf>,
}

/// An opened EPUB container with its scratch directory.
pub struct EpubArchive<R: Read + Seek = File> {
    zip: ZipArchive<R>,
    scratch: TempDir,
    limits: SecurityLimits,
    opf_path: String,
    base_path: String,
    mimetype: String,
    ncx_path: Option<String>,
    package_document: String,
}

impl EpubArchive<File> {
    pub fn open(path: &Path, opts: &ReadOptions) -> Result<Self, ArchiveError> {
        let scratch = create_scratch(opts)?;
        let file = File::open(path)?;
        Self::with_scratch(file, scratch, opts)
    }
}

impl<R: Read + Seek> EpubArchive<R> {
    pub fn from_reader(reader: R, opts: &ReadOptions) -> Result<Self, ArchiveError> {
        let scratch = create_scratch(opts)?;
        Self::with_scratch(reader, scratch, opts)
    }

    // Any early return drops `scratch`, which removes the directory.
    fn with_scratch(reader: R, scratch: TempDir, opts: &ReadOptions) -> Result<Self, ArchiveError> {
        let mut zip =
            ZipArchive::new(reader).map_err(|e| ArchiveError::NotAnArchive(e.to_string()))?;
        security::check_file_count(zip.len() as u64, &opts.security)?;

        let mimetype = read_mimetype(&mut zip, &opts.security)?;
        let opf_path = find_opf_path(&mut zip, &opts.security)?;
        let base_path = opf_path
            .rfind('/')
            .map(|i| opf_path[..i + 1].to_string())
            .unwrap_or_default();

        let package_document =
            String::from_utf8_lossy(&read_limited(&mut zip, &opf_path, &opts.security)?)
                .into_owned();

        let ncx_path = match xml::parse_document(&package_document) {
            Ok(tree) => package::ncx_href(&tree)
                .map(|href| format!("{base_path}{href}"))
                .filter(|p| {
                    let present = zip.index_for_name(p).is_some();
                    if !present {
                        tracing::warn!("NCX {} is declared but not in the archive", p);
                    }
                    present
                }),
            Err(e) => {
                tracing::warn!("Skipping NCX lookup, package document unreadable: {}", e);
                None
            }
        };
        if ncx_path.is_none() {
            tracing::debug!("No NCX for {}", opf_path);
        }

        tracing::debug!(
            "Opened EPUB: opf={} base={:?} scratch={}",
            opf_path,
            base_path,
            scratch.path().display()
        );

        Ok(Self {
            zip,
            scratch,
            limits: opts.security.clone(),
            opf_path,
            base_path,
            mimetype,
            ncx_path,
            package_document,
        })
    }

    pub fn opf_path(&self) -> &str {
        &self.opf_path
    }

    /// Directory of the OPF with a trailing `/`, or empty at archive root.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn mimetype(&self) -> &str {
        &self.mimetype
    }

    pub fn ncx_path(&self) -> Option<&str> {
        self.ncx_path.as_deref()
    }

    pub fn package_document(&self) -> &str {
        &self.package_document
    }

    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }

    /// Read one entry fully into memory, subject to the size limits.
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        read_limited(&mut self.zip, name, &self.limits)
    }

    /// Copy one entry into the scratch directory and return where it landed.
    ///
    /// The entry name is neutralised first; the result always lies below the
    /// scratch root.
    pub fn extract(&mut self, name: &str) -> Result<PathBuf, ArchiveError> {
        if security::is_traversal_attempt(name) {
            tracing::warn!("Neutralising suspicious entry name {:?}", name);
        }
        let dest = security::contained_path(self.scratch.path(), name)?;
        let bytes = read_limited(&mut self.zip, name, &self.limits)?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dest, bytes)?;
        Ok(dest)
    }

    /// Release the archive and remove the scratch directory.
    pub fn close(self) {
        let path = self.scratch.path().to_path_buf();
        drop(self.zip);
        if let Err(e) = self.scratch.close() {
            tracing::warn!("Failed to remove scratch directory {}: {}", path.display(), e);
        }
    }
}

fn create_scratch(opts: &ReadOptions) -> Result<TempDir, ArchiveError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("epub-");
    let dir = match &opts.scratch_dir {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            builder.tempdir_in(parent)?
        }
        None => builder.tempdir()?,
    };
    Ok(dir)
}

fn read_mimetype<R: Read + Seek>(
    zip: &mut ZipArchive<R>,
    limits: &SecurityLimits,
) -> Result<String, ArchiveError> {
    if zip.index_for_name("mimetype").is_none() {
        return Err(ArchiveError::NotAnEpub("missing mimetype entry".into()));
    }
    let bytes = read_limited(zip, "mimetype", limits)?;
    let content = String::from_utf8_lossy(&bytes);
    let first_line = content.lines().next().unwrap_or("").trim();
    if first_line.starts_with(EPUB_MIMETYPE) {
        Ok(EPUB_MIMETYPE.to_string())
    } else {
        Err(ArchiveError::NotAnEpub(format!(
            "unexpected mimetype {:?}",
            first_line.chars().take(64).collect::<String>()
        )))
    }
}

fn find_opf_path<R: Read + Seek>(
    zip: &mut ZipArchive<R>,
    limits: &SecurityLimits,
) -> Result<String, ArchiveError> {
    let bytes = read_limited(zip, CONTAINER_PATH, limits).map_err(|e| match e {
        ArchiveError::MissingEntry(_) => {
            ArchiveError::MalformedContainer(format!("missing {CONTAINER_PATH}"))
        }
        other => other,
    })?;
    let container = String::from_utf8_lossy(&bytes);
    let tree = xml::parse_document(&container)
        .map_err(|e| ArchiveError::MalformedContainer(format!("{CONTAINER_PATH}: {e}")))?;

    let opf_path = tree
        .find_all(CONTAINER_NS, "rootfile")
        .into_iter()
        .filter(|rf| rf.attr("media-type") == Some(OPF_MEDIA_TYPE))
        .find_map(|rf| rf.attr("full-path").map(str::trim).filter(|p| !p.is_empty()))
        .map(str::to_string)
        .ok_or_else(|| {
            ArchiveError::MalformedContainer("no OPF rootfile in container.xml".into())
        })?;

    if zip.index_for_name(&opf_path).is_none() {
        return Err(ArchiveError::MalformedContainer(format!(
            "rootfile {opf_path} is not in the archive"
        )));
    }
    Ok(opf_path)
}

fn read_limited<R: Read + Seek>(
    zip: &mut ZipArchive<R>,
    name: &str,
    limits: &SecurityLimits,
) -> Result<Vec<u8>, ArchiveError> {
    let file = zip
        .by_name(name)
        .map_err(|_| ArchiveError::MissingEntry(name.to_string()))?;

    security::check_resource_size(name, file.size(), limits)?;
    if file.size() > RATIO_CHECK_THRESHOLD {
        security::check_compression_ratio(file.compressed_size(), file.size(), limits)?;
    }

    // Headers can lie about the size; never read past the limit.
    let cap = limits.max_resource_size_bytes;
    let mut buf = Vec::with_capacity(file.size().min(cap) as usize);
    let mut reader = file.take(cap.saturating_add(1));
    reader.read_to_end(&mut buf)?;
    if buf.len() as u64 > cap {
        return Err(SecurityError::OversizedResource {
            name: name.to_string(),
            size_mb: buf.len() as u64 / (1024 * 1024),
            limit_mb: cap / (1024 * 1024),
        }
        .into());
    }
    Ok(buf)
}
