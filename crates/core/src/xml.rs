//! Small namespace-aware element tree over quick-xml's `NsReader`.
//!
//! Package documents in the wild are frequently truncated or carry stray
//! entities, so the builder keeps whatever was parsed before the first error
//! instead of discarding the document.

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;

pub const CONTAINER_NS: &str = "urn:oasis:names:tc:opendocument:xmlns:container";
pub const OPF_NS: &str = "http://www.idpf.org/2007/opf";
pub const DC_NS: &str = "http://purl.org/dc/elements/1.1/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub namespace: Option<String>,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub namespace: Option<String>,
    pub name: String,
    pub attributes: Vec<XmlAttribute>,
    pub children: Vec<XmlElement>,
    /// Concatenated character data directly inside this element.
    pub text: String,
}

impl XmlElement {
    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(namespace)
    }

    /// Attribute by local name, ignoring its namespace.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Trimmed text content, `None` when empty.
    pub fn text(&self) -> Option<String> {
        let t = self.text.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    }

    /// First descendant (depth-first, document order) matching namespace and name.
    pub fn find(&self, namespace: &str, name: &str) -> Option<&XmlElement> {
        for child in &self.children {
            if child.is(namespace, name) {
                return Some(child);
            }
            if let Some(found) = child.find(namespace, name) {
                return Some(found);
            }
        }
        None
    }

    /// All descendants matching namespace and name, in document order.
    pub fn find_all<'a>(&'a self, namespace: &str, name: &str) -> Vec<&'a XmlElement> {
        let mut out = Vec::new();
        self.collect(namespace, name, &mut out);
        out
    }

    fn collect<'a>(&'a self, namespace: &str, name: &str, out: &mut Vec<&'a XmlElement>) {
        for child in &self.children {
            if child.is(namespace, name) {
                out.push(child);
            }
            child.collect(namespace, name, out);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("no root element: {0}")]
    NoRoot(String),
}

/// Parse a document into an element tree.
///
/// Fails only when no root element could be read at all.
pub fn parse_document(src: &str) -> Result<XmlElement, XmlError> {
    let mut reader = NsReader::from_str(src);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let (namespace, event) = match reader.read_resolved_event() {
            Ok((ns, event)) => (owned_namespace(&ns), event),
            Err(e) => {
                if stack.is_empty() && root.is_none() {
                    return Err(XmlError::NoRoot(e.to_string()));
                }
                tracing::warn!(
                    "XML error at byte {}: {}; keeping partial tree",
                    reader.buffer_position(),
                    e
                );
                break;
            }
        };

        match event {
            Event::Start(ref e) => {
                let element = start_element(&reader, namespace, e);
                stack.push(element);
            }
            Event::Empty(ref e) => {
                let element = start_element(&reader, namespace, e);
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut root, element);
                }
            }
            Event::Text(ref e) => {
                if let Some(top) = stack.last_mut() {
                    let text = e
                        .unescape()
                        .unwrap_or_else(|_| String::from_utf8_lossy(e.as_ref()).into_owned().into());
                    top.text.push_str(&text);
                }
            }
            Event::CData(e) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }

        if root.is_some() && stack.is_empty() {
            break;
        }
    }

    // Close whatever a truncated document left open.
    while let Some(element) = stack.pop() {
        attach(&mut stack, &mut root, element);
    }

    root.ok_or_else(|| XmlError::NoRoot("document is empty".to_string()))
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

fn owned_namespace(ns: &ResolveResult<'_>) -> Option<String> {
    match ns {
        ResolveResult::Bound(namespace) => Some(String::from_utf8_lossy(namespace.as_ref()).into_owned()),
        _ => None,
    }
}

fn start_element(reader: &NsReader<&[u8]>, namespace: Option<String>, e: &BytesStart<'_>) -> XmlElement {
    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in e.attributes().with_checks(false).flatten() {
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let (attr_ns, local) = reader.resolve_attribute(attr.key);
        let value = attr
            .unescape_value()
            .unwrap_or_else(|_| Cow::Owned(String::from_utf8_lossy(&attr.value).into_owned()));
        attributes.push(XmlAttribute {
            namespace: owned_namespace(&attr_ns),
            name: String::from_utf8_lossy(local.as_ref()).into_owned(),
            value: value.into_owned(),
        });
    }
    XmlElement {
        namespace,
        name,
        attributes,
        children: Vec::new(),
        text: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_default_and_prefixed_namespaces() {
        let doc = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <metadata>
    <dc:title>A &amp; B</dc:title>
    <meta name="cover" content="img"/>
  </metadata>
</package>"#;
        let root = parse_document(doc).unwrap();
        assert!(root.is(OPF_NS, "package"));
        let title = root.find(DC_NS, "title").unwrap();
        assert_eq!(title.text().as_deref(), Some("A & B"));
        let meta = root.find(OPF_NS, "meta").unwrap();
        assert_eq!(meta.attr("name"), Some("cover"));
        assert!(root.find(DC_NS, "creator").is_none());
    }

    #[test]
    fn truncated_document_keeps_parsed_elements() {
        let doc = r#"<package xmlns="http://www.idpf.org/2007/opf"
            xmlns:dc="http://purl.org/dc/elements/1.1/"><metadata><dc:title>Kept</dc:title><dc:creator>Half"#;
        let root = parse_document(doc).unwrap();
        assert_eq!(
            root.find(DC_NS, "title").and_then(|t| t.text()).as_deref(),
            Some("Kept")
        );
    }

    #[test]
    fn garbage_has_no_root() {
        assert!(parse_document("").is_err());
        assert!(parse_document("just some text").is_err());
    }

    #[test]
    fn find_all_is_in_document_order() {
        let doc = r#"<r xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:subject>a</dc:subject><x><dc:subject>b</dc:subject></x><dc:subject>c</dc:subject></r>"#;
        let root = parse_document(doc).unwrap();
        let subjects: Vec<_> = root
            .find_all(DC_NS, "subject")
            .into_iter()
            .filter_map(|e| e.text())
            .collect();
        assert_eq!(subjects, vec!["a", "b", "c"]);
    }
}
