//! In-memory EPUB archives for tests, including deliberately broken ones.
//!
//! Writes `mimetype` stored and first, then `META-INF/container.xml`, the
//! package document, an NCX, one chapter, any cover files and raw entries.

use std::io::{self, Cursor, Write};
use std::path::Path;

use quick_xml::escape::escape;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// A valid 1x1 transparent PNG.
pub const TINY_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

/// Bytes that only need to look like a JPEG to a reader checking extensions.
pub const FAKE_JPEG: &[u8] = b"\xFF\xD8\xFF\xE0\x00\x10JFIF\x00fixture-cover\xFF\xD9";

#[derive(Debug, Clone)]
enum FixtureCover {
    /// `meta name=cover` points straight at an image item.
    Image { href: String, data: Vec<u8> },
    /// `meta name=cover` points at a wrapper document that references the image.
    Wrapper {
        href: String,
        markup: String,
        image_href: String,
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
pub struct EpubBuilder {
    title: Option<String>,
    creators: Vec<String>,
    language: Option<String>,
    publishers: Vec<String>,
    subjects: Vec<String>,
    description: Option<String>,
    identifier: Option<String>,
    date: Option<String>,
    rights: Option<String>,
    opf_dir: String,
    mimetype: Option<String>,
    container_xml: Option<String>,
    opf: Option<String>,
    ncx: bool,
    cover: Option<FixtureCover>,
    raw_entries: Vec<(String, Vec<u8>)>,
}

impl EpubBuilder {
    pub fn new(title: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            creators: Vec::new(),
            language: Some("en".to_string()),
            publishers: Vec::new(),
            subjects: Vec::new(),
            description: None,
            identifier: Some(format!("urn:fixture:{}", title.to_lowercase().replace(' ', "-"))),
            date: None,
            rights: None,
            opf_dir: "OEBPS".to_string(),
            mimetype: Some("application/epub+zip".to_string()),
            container_xml: None,
            opf: None,
            ncx: true,
            cover: None,
            raw_entries: Vec::new(),
        }
    }

    pub fn untitled(mut self) -> Self {
        self.title = None;
        self
    }

    pub fn creator(mut self, creator: &str) -> Self {
        self.creators.push(creator.to_string());
        self
    }

    pub fn language(mut self, language: Option<&str>) -> Self {
        self.language = language.map(str::to_string);
        self
    }

    pub fn publisher(mut self, publisher: &str) -> Self {
        self.publishers.push(publisher.to_string());
        self
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.subjects.push(subject.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn identifier(mut self, identifier: Option<&str>) -> Self {
        self.identifier = identifier.map(str::to_string);
        self
    }

    pub fn date(mut self, date: &str) -> Self {
        self.date = Some(date.to_string());
        self
    }

    pub fn rights(mut self, rights: &str) -> Self {
        self.rights = Some(rights.to_string());
        self
    }

    /// Directory holding the package document; `""` puts it at the root.
    pub fn opf_dir(mut self, dir: &str) -> Self {
        self.opf_dir = dir.trim_matches('/').to_string();
        self
    }

    pub fn mimetype(mut self, content: &str) -> Self {
        self.mimetype = Some(content.to_string());
        self
    }

    pub fn without_mimetype(mut self) -> Self {
        self.mimetype = None;
        self
    }

    pub fn container_xml(mut self, xml: &str) -> Self {
        self.container_xml = Some(xml.to_string());
        self
    }

    /// Replace the generated package document verbatim.
    pub fn opf(mut self, xml: &str) -> Self {
        self.opf = Some(xml.to_string());
        self
    }

    pub fn without_ncx(mut self) -> Self {
        self.ncx = false;
        self
    }

    /// Cover image referenced directly; `href` is relative to the OPF directory.
    pub fn cover_image(mut self, href: &str, data: &[u8]) -> Self {
        self.cover = Some(FixtureCover::Image {
            href: href.to_string(),
            data: data.to_vec(),
        });
        self
    }

    /// Cover wrapper document at `href` whose markup references `image_href`
    /// (both relative to the OPF directory).
    pub fn cover_wrapper(mut self, href: &str, markup: &str, image_href: &str, data: &[u8]) -> Self {
        self.cover = Some(FixtureCover::Wrapper {
            href: href.to_string(),
            markup: markup.to_string(),
            image_href: image_href.to_string(),
            data: data.to_vec(),
        });
        self
    }

    /// Add an entry under exactly this name, traversal patterns included.
    pub fn raw_entry(mut self, name: &str, data: &[u8]) -> Self {
        self.raw_entries.push((name.to_string(), data.to_vec()));
        self
    }

    pub fn opf_path(&self) -> String {
        self.in_opf_dir("content.opf")
    }

    fn in_opf_dir(&self, href: &str) -> String {
        if self.opf_dir.is_empty() {
            href.to_string()
        } else {
            format!("{}/{}", self.opf_dir, href)
        }
    }

    pub fn build(&self) -> io::Result<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored: FileOptions<'_, ()> =
            FileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated: FileOptions<'_, ()> =
            FileOptions::default().compression_method(CompressionMethod::Deflated);

        if let Some(mimetype) = &self.mimetype {
            zip.start_file("mimetype", stored).map_err(io::Error::other)?;
            zip.write_all(mimetype.as_bytes())?;
        }

        zip.start_file("META-INF/container.xml", deflated)
            .map_err(io::Error::other)?;
        match &self.container_xml {
            Some(xml) => zip.write_all(xml.as_bytes())?,
            None => write!(
                zip,
                r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="{}" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#,
                self.opf_path()
            )?,
        }

        zip.start_file(self.opf_path(), deflated)
            .map_err(io::Error::other)?;
        match &self.opf {
            Some(xml) => zip.write_all(xml.as_bytes())?,
            None => zip.write_all(self.package_document().as_bytes())?,
        }

        if self.ncx {
            zip.start_file(self.in_opf_dir("toc.ncx"), deflated)
                .map_err(io::Error::other)?;
            write!(
                zip,
                r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <docTitle><text>{}</text></docTitle>
  <navMap><navPoint id="p1" playOrder="1"><navLabel><text>Start</text></navLabel><content src="chapter1.xhtml"/></navPoint></navMap>
</ncx>"#,
                escape(self.title.as_deref().unwrap_or(""))
            )?;
        }

        zip.start_file(self.in_opf_dir("chapter1.xhtml"), deflated)
            .map_err(io::Error::other)?;
        zip.write_all(
            br#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>Chapter</title></head><body><p>Text.</p></body></html>"#,
        )?;

        match &self.cover {
            Some(FixtureCover::Image { href, data }) => {
                zip.start_file(self.in_opf_dir(href), stored)
                    .map_err(io::Error::other)?;
                zip.write_all(data)?;
            }
            Some(FixtureCover::Wrapper {
                href,
                markup,
                image_href,
                data,
            }) => {
                zip.start_file(self.in_opf_dir(href), deflated)
                    .map_err(io::Error::other)?;
                zip.write_all(markup.as_bytes())?;
                zip.start_file(self.in_opf_dir(image_href), stored)
                    .map_err(io::Error::other)?;
                zip.write_all(data)?;
            }
            None => {}
        }

        for (name, data) in &self.raw_entries {
            zip.start_file(name.as_str(), deflated)
                .map_err(io::Error::other)?;
            zip.write_all(data)?;
        }

        let cursor = zip.finish().map_err(io::Error::other)?;
        Ok(cursor.into_inner())
    }

    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.build()?)
    }

    fn package_document(&self) -> String {
        let mut meta = String::new();
        let mut push = |tag: &str, value: &str| {
            meta.push_str(&format!("    <dc:{tag}>{}</dc:{tag}>\n", escape(value)));
        };
        if let Some(t) = &self.title {
            push("title", t);
        }
        for c in &self.creators {
            push("creator", c);
        }
        if let Some(l) = &self.language {
            push("language", l);
        }
        if let Some(d) = &self.date {
            push("date", d);
        }
        if let Some(r) = &self.rights {
            push("rights", r);
        }
        for p in &self.publishers {
            push("publisher", p);
        }
        if let Some(d) = &self.description {
            push("description", d);
        }
        for s in &self.subjects {
            push("subject", s);
        }
        if let Some(id) = &self.identifier {
            meta.push_str(&format!(
                "    <dc:identifier id=\"bookid\">{}</dc:identifier>\n",
                escape(id.as_str())
            ));
        }

        let mut manifest = String::new();
        if self.ncx {
            manifest.push_str(
                "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n",
            );
        }
        manifest.push_str(
            "    <item id=\"chapter1\" href=\"chapter1.xhtml\" media-type=\"application/xhtml+xml\"/>\n",
        );
        match &self.cover {
            Some(FixtureCover::Image { href, .. }) => {
                meta.push_str("    <meta name=\"cover\" content=\"cover-image\"/>\n");
                manifest.push_str(&format!(
                    "    <item id=\"cover-image\" href=\"{}\" media-type=\"{}\"/>\n",
                    escape(href.as_str()),
                    media_type_for(href)
                ));
            }
            Some(FixtureCover::Wrapper {
                href, image_href, ..
            }) => {
                meta.push_str("    <meta name=\"cover\" content=\"cover\"/>\n");
                manifest.push_str(&format!(
                    "    <item id=\"cover\" href=\"{}\" media-type=\"{}\"/>\n",
                    escape(href.as_str()),
                    media_type_for(href)
                ));
                manifest.push_str(&format!(
                    "    <item id=\"cover-image\" href=\"{}\" media-type=\"{}\"/>\n",
                    escape(image_href.as_str()),
                    media_type_for(image_href)
                ));
            }
            None => {}
        }

        let toc = if self.ncx { " toc=\"ncx\"" } else { "" };
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="bookid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
{meta}  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine{toc}>
    <itemref idref="chapter1"/>
  </spine>
</package>"#
        )
    }
}

fn media_type_for(href: &str) -> &'static str {
    let lower = href.to_ascii_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else if lower.ends_with(".svg") {
        "image/svg+xml"
    } else {
        "application/xhtml+xml"
    }
}
