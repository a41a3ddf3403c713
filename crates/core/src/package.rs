//! OPF package document → `PackageMetadata`.
//!
//! Each field has its own extractor over the parsed tree, so an absent or
//! unexpected element only ever costs that one field.

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;
use crate::xml::{self, XmlElement, DC_NS, OPF_NS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    /// The element's `id` attribute, used by `unique-identifier`.
    pub id: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub title: Option<String>,
    /// Raw `dc:creator` strings, possibly compound; see `normalize::split_authors`.
    pub creators: Vec<String>,
    pub language: Option<String>,
    pub date: Option<String>,
    pub rights: Option<String>,
    pub identifier: Option<Identifier>,
    pub publishers: Vec<String>,
    pub summary: Option<String>,
    pub subjects: Vec<String>,
    /// Cover reference relative to the package directory.
    pub cover_href: Option<String>,
}

pub fn parse_package(content: &str) -> Result<PackageMetadata, ArchiveError> {
    let tree = xml::parse_document(content)
        .map_err(|e| ArchiveError::MalformedPackage(e.to_string()))?;
    Ok(extract_metadata(&tree))
}

pub fn extract_metadata(tree: &XmlElement) -> PackageMetadata {
    // Some producers omit the OPF namespace on <metadata>; fall back to the
    // whole document so Dublin Core elements are still found.
    let metadata = tree.find(OPF_NS, "metadata").unwrap_or(tree);

    PackageMetadata {
        title: first_text(metadata, "title"),
        creators: all_texts(metadata, "creator"),
        language: first_text(metadata, "language"),
        date: first_text(metadata, "date"),
        rights: first_text(metadata, "rights"),
        identifier: identifier(tree, metadata),
        publishers: all_texts(metadata, "publisher"),
        summary: first_text(metadata, "description"),
        subjects: all_texts(metadata, "subject"),
        cover_href: cover_href(tree, metadata),
    }
}

fn first_text(metadata: &XmlElement, name: &str) -> Option<String> {
    metadata
        .find_all(DC_NS, name)
        .into_iter()
        .find_map(XmlElement::text)
}

fn all_texts(metadata: &XmlElement, name: &str) -> Vec<String> {
    metadata
        .find_all(DC_NS, name)
        .into_iter()
        .filter_map(XmlElement::text)
        .collect()
}

fn identifier(tree: &XmlElement, metadata: &XmlElement) -> Option<Identifier> {
    let candidates: Vec<Identifier> = metadata
        .find_all(DC_NS, "identifier")
        .into_iter()
        .filter_map(|el| {
            el.text().map(|value| Identifier {
                id: el.attr("id").map(str::to_string),
                value,
            })
        })
        .collect();

    let unique = tree.attr("unique-identifier");
    let preferred = unique.and_then(|uid| {
        candidates
            .iter()
            .position(|c| c.id.as_deref() == Some(uid))
    });
    let index = preferred.unwrap_or(0);
    candidates.into_iter().nth(index)
}

fn manifest_href(tree: &XmlElement, id: &str) -> Option<String> {
    let manifest = tree.find(OPF_NS, "manifest")?;
    manifest
        .find_all(OPF_NS, "item")
        .into_iter()
        .find(|item| item.attr("id") == Some(id))
        .and_then(|item| item.attr("href"))
        .map(decode_href)
        .filter(|href| !href.is_empty())
}

fn cover_href(tree: &XmlElement, metadata: &XmlElement) -> Option<String> {
    let cover_id = metadata
        .find_all(OPF_NS, "meta")
        .into_iter()
        .find(|m| m.attr("name") == Some("cover"))
        .and_then(|m| m.attr("content"))
        .map(str::trim)
        .filter(|id| !id.is_empty())?;
    let href = manifest_href(tree, cover_id);
    if href.is_none() {
        tracing::debug!("Cover meta points at unknown manifest id {:?}", cover_id);
    }
    href
}

/// The NCX href declared by `<spine toc=...>`, relative to the package directory.
pub fn ncx_href(tree: &XmlElement) -> Option<String> {
    let toc_id = tree.find(OPF_NS, "spine")?.attr("toc")?;
    manifest_href(tree, toc_id)
}

fn decode_href(href: &str) -> String {
    let href = href.split('#').next().unwrap_or(href).trim();
    percent_decode_str(href).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FULL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
    <dc:title>  The Book  </dc:title>
    <dc:creator opf:role="aut">Smith, John and Doe, Jane</dc:creator>
    <dc:creator>Someone Else</dc:creator>
    <dc:language>en-GB</dc:language>
    <dc:date>2001-02-03</dc:date>
    <dc:rights>Public domain</dc:rights>
    <dc:identifier id="isbn">978-0</dc:identifier>
    <dc:identifier id="uid">urn:uuid:1234</dc:identifier>
    <dc:publisher>Penguin</dc:publisher>
    <dc:description>About things.</dc:description>
    <dc:subject>Fiction</dc:subject>
    <dc:subject>Science Fiction / Space</dc:subject>
    <meta name="cover" content="cover-img"/>
  </metadata>
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="cover-img" href="images/my%20cover.jpg" media-type="image/jpeg"/>
  </manifest>
  <spine toc="ncx"/>
</package>"#;

    #[test]
    fn extracts_every_field() {
        let md = parse_package(FULL).unwrap();
        assert_eq!(md.title.as_deref(), Some("The Book"));
        assert_eq!(md.creators, vec!["Smith, John and Doe, Jane", "Someone Else"]);
        assert_eq!(md.language.as_deref(), Some("en-GB"));
        assert_eq!(md.date.as_deref(), Some("2001-02-03"));
        assert_eq!(md.rights.as_deref(), Some("Public domain"));
        assert_eq!(
            md.identifier,
            Some(Identifier {
                id: Some("uid".into()),
                value: "urn:uuid:1234".into()
            })
        );
        assert_eq!(md.publishers, vec!["Penguin"]);
        assert_eq!(md.summary.as_deref(), Some("About things."));
        assert_eq!(md.subjects, vec!["Fiction", "Science Fiction / Space"]);
        assert_eq!(md.cover_href.as_deref(), Some("images/my cover.jpg"));
    }

    #[test]
    fn missing_elements_only_affect_their_field() {
        let doc = r#"<package xmlns="http://www.idpf.org/2007/opf">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:creator>Only Author</dc:creator>
    <dc:title></dc:title>
  </metadata>
</package>"#;
        let md = parse_package(doc).unwrap();
        assert_eq!(md.title, None);
        assert_eq!(md.creators, vec!["Only Author"]);
        assert_eq!(md.language, None);
        assert_eq!(md.identifier, None);
        assert_eq!(md.cover_href, None);
    }

    #[test]
    fn first_identifier_without_unique_identifier() {
        let doc = r#"<package xmlns="http://www.idpf.org/2007/opf">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier>first</dc:identifier>
    <dc:identifier id="b">second</dc:identifier>
  </metadata>
</package>"#;
        let md = parse_package(doc).unwrap();
        assert_eq!(md.identifier.unwrap().value, "first");
    }

    #[test]
    fn cover_meta_with_unknown_id_means_no_cover() {
        let doc = r#"<package xmlns="http://www.idpf.org/2007/opf">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/"><meta name="cover" content="nope"/></metadata>
  <manifest><item id="img" href="c.jpg" media-type="image/jpeg"/></manifest>
</package>"#;
        assert_eq!(parse_package(doc).unwrap().cover_href, None);
    }

    #[test]
    fn epub3_cover_property_alone_is_not_a_cover() {
        let doc = r#"<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>T</dc:title></metadata>
  <manifest><item id="img" href="c.jpg" media-type="image/jpeg" properties="cover-image"/></manifest>
</package>"#;
        assert_eq!(parse_package(doc).unwrap().cover_href, None);
    }

    #[test]
    fn ncx_from_spine_toc() {
        let tree = xml::parse_document(FULL).unwrap();
        assert_eq!(ncx_href(&tree).as_deref(), Some("toc.ncx"));
    }

    #[test]
    fn unparseable_package_is_malformed() {
        assert!(matches!(
            parse_package("not xml at all"),
            Err(ArchiveError::MalformedPackage(_))
        ));
    }

    #[test]
    fn metadata_without_opf_namespace_still_extracts() {
        let doc = r#"<package><metadata xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>Loose</dc:title></metadata></package>"#;
        assert_eq!(parse_package(doc).unwrap().title.as_deref(), Some("Loose"));
    }
}
