use std::borrow::Cow;
use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use quick_xml::Writer;

use crate::error::{Error, Result};

/// Namespace URI of Sparkle's vendor elements (`version`, `shortVersionString`, ...).
pub const SPARKLE_NS: &str = "http://www.andymatuschak.org/xml-namespaces/sparkle";

/// Prefix every Sparkle element is written with. Sparkle itself does not care,
/// but other consumers of the appcast match on the literal `sparkle:` prefix.
pub const SPARKLE_PREFIX: &str = "sparkle";

/// SEC-003: Maximum element nesting depth accepted in an appcast.
/// A real appcast is four levels deep; anything close to this is hostile.
const MAX_DEPTH: usize = 50;

/// A node of the owned document tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An owned XML element.
///
/// `name` is the qualified name as written in the source document;
/// `namespace` is the URI that name's prefix resolved to, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub namespace: Option<String>,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    /// Creates an unqualified element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Creates an element in the Sparkle namespace.
    pub fn sparkle(local_name: &str) -> Self {
        Self {
            name: format!("{SPARKLE_PREFIX}:{local_name}"),
            namespace: Some(SPARKLE_NS.to_string()),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    /// Name without its prefix.
    pub fn local_name(&self) -> &str {
        self.name
            .split_once(':')
            .map_or(self.name.as_str(), |(_, local)| local)
    }

    /// True if this element has the given namespace URI and local name.
    pub fn is(&self, namespace: Option<&str>, local_name: &str) -> bool {
        self.namespace.as_deref() == namespace && self.local_name() == local_name
    }

    /// Concatenated text content of the direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Sets an attribute, replacing the value in place if the key already exists.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    /// Name to emit: Sparkle elements always use [`SPARKLE_PREFIX`], whatever
    /// prefix the input document bound to [`SPARKLE_NS`].
    fn output_name(&self) -> Cow<'_, str> {
        if self.namespace.as_deref() == Some(SPARKLE_NS) {
            Cow::Owned(format!("{SPARKLE_PREFIX}:{}", self.local_name()))
        } else {
            Cow::Borrowed(self.name.as_str())
        }
    }
}

// ============================================================================
// Reading
// ============================================================================

/// Parses a complete XML document into its root [`Element`].
///
/// Comments, processing instructions and the DOCTYPE are discarded.
/// Whitespace-only text is treated as formatting and dropped. CDATA
/// sections become plain text.
///
/// # Errors
///
/// [`Error::MalformedFeed`] for any syntax error, unbound namespace prefix,
/// unknown entity reference, unclosed element, missing root, or more than one
/// root element.
///
/// # Security
///
/// SEC-002: `quick-xml` (0.37) never expands `<!ENTITY>` declarations; custom
/// entity references fail to unescape and surface as `MalformedFeed`.
pub fn parse_document(content: &str) -> Result<Element> {
    let mut reader = NsReader::from_str(content);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let (resolved, event) = reader.read_resolved_event().map_err(Error::malformed_feed)?;
        let namespace = match resolved {
            ResolveResult::Bound(Namespace(ns)) => Some(String::from_utf8_lossy(ns).into_owned()),
            ResolveResult::Unbound => None,
            ResolveResult::Unknown(prefix) => {
                return Err(Error::MalformedFeed(format!(
                    "unbound namespace prefix '{}'",
                    String::from_utf8_lossy(&prefix)
                )));
            }
        };

        match event {
            Event::Start(e) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(Error::MalformedFeed(format!(
                        "nesting depth exceeds maximum of {MAX_DEPTH} levels"
                    )));
                }
                stack.push(start_element(&e, namespace, &reader)?);
            }
            Event::Empty(e) => {
                let element = start_element(&e, namespace, &reader)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(e) => {
                let element = stack.pop().ok_or_else(|| {
                    Error::MalformedFeed(format!(
                        "unexpected closing tag </{}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    ))
                })?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(e) => {
                let text = e.unescape().map_err(Error::malformed_feed)?;
                push_text(&mut stack, &text)?;
            }
            Event::CData(e) => {
                let bytes = e.into_inner();
                let text = std::str::from_utf8(&bytes).map_err(Error::malformed_feed)?;
                push_text(&mut stack, text)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(Error::MalformedFeed(format!(
            "unclosed element <{}>",
            open.name
        )));
    }

    root.ok_or_else(|| Error::MalformedFeed("document has no root element".to_string()))
}

fn start_element(
    e: &BytesStart<'_>,
    namespace: Option<String>,
    reader: &NsReader<&[u8]>,
) -> Result<Element> {
    let name = std::str::from_utf8(e.name().as_ref())
        .map_err(Error::malformed_feed)?
        .to_string();

    let mut element = Element {
        name,
        namespace,
        attributes: Vec::new(),
        children: Vec::new(),
    };

    let decoder = reader.decoder();
    for attr_result in e.attributes() {
        let attr = attr_result.map_err(Error::malformed_feed)?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(Error::malformed_feed)?
            .to_string();
        let value = attr
            .decode_and_unescape_value(decoder)
            .map_err(Error::malformed_feed)?
            .into_owned();
        element.attributes.push((key, value));
    }

    Ok(element)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Element(element));
        return Ok(());
    }
    if root.is_some() {
        return Err(Error::MalformedFeed(format!(
            "second root element <{}>",
            element.name
        )));
    }
    *root = Some(element);
    Ok(())
}

fn push_text(stack: &mut [Element], text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Ok(());
    }
    match stack.last_mut() {
        Some(parent) => {
            // Adjacent text and CDATA runs collapse into one node.
            if let Some(Node::Text(prev)) = parent.children.last_mut() {
                prev.push_str(text);
            } else {
                parent.children.push(Node::Text(text.to_string()));
            }
            Ok(())
        }
        None => Err(Error::MalformedFeed(
            "text content outside the root element".to_string(),
        )),
    }
}

// ============================================================================
// Writing
// ============================================================================

/// Renders `root` as a standalone UTF-8 document with an XML declaration,
/// indented by two spaces.
pub fn write_document(root: &Element) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(|e| Error::Render(e.to_string()))?;
    write_element(&mut writer, root)?;

    let mut bytes = writer.into_inner().into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

fn write_element(writer: &mut Writer<Cursor<Vec<u8>>>, element: &Element) -> Result<()> {
    let name = element.output_name();
    let mut start = BytesStart::new(&*name);
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        return writer
            .write_event(Event::Empty(start))
            .map_err(|e| Error::Render(e.to_string()));
    }

    writer
        .write_event(Event::Start(start))
        .map_err(|e| Error::Render(e.to_string()))?;
    for child in &element.children {
        match child {
            Node::Element(e) => write_element(writer, e)?,
            Node::Text(t) => writer
                .write_event(Event::Text(BytesText::new(t)))
                .map_err(|e| Error::Render(e.to_string()))?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(&*name)))
        .map_err(|e| Error::Render(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_resolves_sparkle_namespace() {
        let doc = format!(
            r#"<?xml version="1.0"?>
<rss xmlns:sp="{SPARKLE_NS}"><channel><item><sp:version>42</sp:version></item></channel></rss>"#
        );
        let root = parse_document(&doc).unwrap();
        let version = root
            .child_elements()
            .next()
            .and_then(|channel| channel.child_elements().next())
            .and_then(|item| item.child_elements().next())
            .unwrap();

        assert!(version.is(Some(SPARKLE_NS), "version"));
        assert_eq!(version.name, "sp:version");
        assert_eq!(version.text(), "42");
    }

    #[test]
    fn test_parse_drops_formatting_whitespace_keeps_content() {
        let doc = "<a>\n  <b> padded </b>\n  <!-- note -->\n</a>";
        let root = parse_document(doc).unwrap();
        assert_eq!(root.children.len(), 1);
        let b = root.child_elements().next().unwrap();
        assert_eq!(b.text(), " padded ");
    }

    #[test]
    fn test_parse_cdata_becomes_text() {
        let doc = "<a><![CDATA[<p>hi</p>]]></a>";
        let root = parse_document(doc).unwrap();
        assert_eq!(root.text(), "<p>hi</p>");
    }

    #[test]
    fn test_parse_unescapes_attributes_and_text() {
        let doc = r#"<a href="x?a=1&amp;b=2">1 &lt; 2</a>"#;
        let root = parse_document(doc).unwrap();
        assert_eq!(root.attribute("href"), Some("x?a=1&b=2"));
        assert_eq!(root.text(), "1 < 2");
    }

    #[test]
    fn test_parse_rejects_unclosed_element() {
        let err = parse_document("<rss><channel>").unwrap_err();
        assert!(matches!(err, Error::MalformedFeed(_)));
    }

    #[test]
    fn test_parse_rejects_mismatched_end() {
        assert!(parse_document("<rss><channel></rss>").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_document() {
        let err = parse_document("").unwrap_err();
        assert!(err.to_string().contains("no root element"));
    }

    #[test]
    fn test_parse_rejects_unbound_prefix() {
        let err = parse_document("<rss><sparkle:version>1</sparkle:version></rss>").unwrap_err();
        assert!(matches!(err, Error::MalformedFeed(_)));
    }

    #[test]
    fn test_parse_rejects_custom_entity() {
        // SEC-002: internal entity declarations are never expanded.
        let doc = r#"<?xml version="1.0"?>
<!DOCTYPE rss [<!ENTITY internal "EXPANDED_VALUE">]>
<rss><channel><title>&internal;</title></channel></rss>"#;
        match parse_document(doc) {
            Ok(root) => {
                let text = root.child_elements().next().map(|c| c.text()).unwrap_or_default();
                assert!(!text.contains("EXPANDED_VALUE"));
            }
            Err(e) => assert!(matches!(e, Error::MalformedFeed(_))),
        }
    }

    #[test]
    fn test_parse_rejects_deep_nesting() {
        let mut doc = String::new();
        for _ in 0..=MAX_DEPTH {
            doc.push_str("<n>");
        }
        for _ in 0..=MAX_DEPTH {
            doc.push_str("</n>");
        }
        let err = parse_document(&doc).unwrap_err();
        assert!(err.to_string().contains("depth"));
    }

    #[test]
    fn test_write_normalizes_sparkle_prefix() {
        let mut el = Element::new("sp:version").with_text("7");
        el.namespace = Some(SPARKLE_NS.to_string());
        let out = String::from_utf8(write_document(&el).unwrap()).unwrap();
        assert!(out.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(out.contains("<sparkle:version>7</sparkle:version>"));
    }

    #[test]
    fn test_write_escapes_text_and_attributes() {
        let mut el = Element::new("description").with_text("<p>a & b</p>");
        el.set_attribute("title", "\"q\"");
        let out = String::from_utf8(write_document(&el).unwrap()).unwrap();
        assert!(out.contains("&lt;p&gt;a &amp; b&lt;/p&gt;"));

        let reparsed = parse_document(&out).unwrap();
        assert_eq!(reparsed.text(), "<p>a & b</p>");
        assert_eq!(reparsed.attribute("title"), Some("\"q\""));
    }

    #[test]
    fn test_set_attribute_last_write_wins_in_place() {
        let mut el = Element::new("enclosure");
        el.set_attribute("url", "a");
        el.set_attribute("type", "b");
        el.set_attribute("url", "c");
        assert_eq!(
            el.attributes,
            vec![
                ("url".to_string(), "c".to_string()),
                ("type".to_string(), "b".to_string())
            ]
        );
    }
}
