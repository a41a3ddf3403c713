//! Locate and extract the cover image of an open EPUB.
//!
//! The cover reference is either an image or a wrapper document (XHTML or
//! SVG) that embeds one. Failures here never fail an ingestion.

use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;
use scraper::{Html, Selector};
use tempfile::NamedTempFile;

use crate::archive::EpubArchive;
use crate::error::ArchiveError;
use crate::package::PackageMetadata;

pub const RASTER_EXTENSIONS: &[&str] = &["bmp", "gif", "jpg", "jpeg", "png", "webp"];

/// Extract the cover into the archive's scratch directory and return its path.
pub fn resolve_cover<R: Read + Seek>(
    metadata: &PackageMetadata,
    archive: &mut EpubArchive<R>,
) -> Option<PathBuf> {
    let href = metadata.cover_href.as_deref()?;
    match resolve_href(href, archive) {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!("Cover {:?} could not be extracted: {}", href, e);
            None
        }
    }
}

fn resolve_href<R: Read + Seek>(
    href: &str,
    archive: &mut EpubArchive<R>,
) -> Result<Option<PathBuf>, ArchiveError> {
    let entry = normalize_entry_path(&format!("{}{}", archive.base_path(), href));
    if is_raster(&entry) {
        return archive.extract(&entry).map(Some);
    }

    let markup = archive.read_entry(&entry)?;
    let markup = String::from_utf8_lossy(&markup);
    match find_image_reference(&markup) {
        Some(reference) => {
            let target = if reference.starts_with('/') {
                normalize_entry_path(&reference)
            } else {
                normalize_entry_path(&format!("{}/{}", parent_dir(&entry), reference))
            };
            tracing::debug!("Cover wrapper {} references {}", entry, target);
            archive.extract(&target).map(Some)
        }
        None if has_extension(&entry, "svg") => archive.extract(&entry).map(Some),
        None => {
            tracing::warn!("Cover wrapper {} embeds no image", entry);
            Ok(None)
        }
    }
}

/// First `<img src>`, else the `href`/`xlink:href` of an SVG `<image>`.
pub fn find_image_reference(markup: &str) -> Option<String> {
    let doc = Html::parse_document(markup);

    if let Ok(img) = Selector::parse("img[src]") {
        if let Some(src) = doc
            .select(&img)
            .filter_map(|el| el.value().attr("src"))
            .find_map(clean_reference)
        {
            return Some(src);
        }
    }

    // The HTML parser renames <image> to <img> outside of <svg>, so look at both.
    let image = Selector::parse("image, img").ok()?;
    doc.select(&image)
        .flat_map(|el| el.value().attrs())
        .filter(|(name, _)| *name == "href" || name.ends_with(":href"))
        .find_map(|(_, value)| clean_reference(value))
}

fn clean_reference(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') || raw.contains("://") || raw.starts_with("data:") {
        return None;
    }
    let without_fragment = raw.split(['#', '?']).next().unwrap_or(raw);
    Some(percent_decode_str(without_fragment).decode_utf8_lossy().into_owned())
}

/// Collapse `.`, `..` and repeated separators in an archive entry path.
pub fn normalize_entry_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn parent_dir(entry: &str) -> &str {
    entry.rfind('/').map(|i| &entry[..i]).unwrap_or("")
}

fn extension_of(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rfind('.')
        .filter(|&i| i > 0)
        .map(|i| name[i + 1..].to_ascii_lowercase())
}

fn has_extension(path: &str, ext: &str) -> bool {
    extension_of(path).as_deref() == Some(ext)
}

pub fn is_raster(path: &str) -> bool {
    extension_of(path).is_some_and(|ext| RASTER_EXTENSIONS.contains(&ext.as_str()))
}

/// A cover copied out of an archive's scratch directory so it survives `close`.
#[derive(Debug)]
pub struct CoverImage {
    file: NamedTempFile,
    extension: String,
}

impl CoverImage {
    pub fn copy_from(path: &Path, temp_dir: Option<&Path>) -> io::Result<Self> {
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
            .unwrap_or_default();
        let mut builder = tempfile::Builder::new();
        builder.prefix("cover-").suffix(&extension);
        let mut file = match temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let mut source = File::open(path)?;
        io::copy(&mut source, file.as_file_mut())?;
        Ok(Self { file, extension })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Lowercased extension with its leading dot, or empty.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn bytes(&self) -> io::Result<Vec<u8>> {
        std::fs::read(self.file.path())
    }
}
