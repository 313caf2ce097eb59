use std::borrow::Cow;

use chrono::{DateTime, FixedOffset};

use super::xml::{self, Element, Node, SPARKLE_NS};
use crate::error::{Error, Result};

/// `strftime` format of `<pubDate>`, e.g. `Tue, 14 Oct 2025 18:02:11 +0000`.
pub const PUBDATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// [`PUBDATE_FORMAT`] after the weekday; the weekday is checked separately
/// because it is not required to agree with the date.
const PUBDATE_DATE_FORMAT: &str = "%d %b %Y %H:%M:%S %z";

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// An appcast document: a root element (normally `<rss>`) holding one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// Root children preceding the channel.
    pub before_channel: Vec<Node>,
    pub channel: Channel,
    /// Root children following the channel, including any further `<channel>`.
    pub after_channel: Vec<Node>,
}

/// The single `<channel>` of a feed.
///
/// `metadata` holds every child that is not an `<item>` (title, link,
/// language, ...) in document order; they are written before the entries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Channel {
    pub attributes: Vec<(String, String)>,
    pub metadata: Vec<Node>,
    pub entries: Vec<Entry>,
}

/// One `<item>` of the channel.
///
/// Every field is optional because entries read from a prior appcast are
/// taken as found; the reconciler decides which of them survive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entry {
    pub title: Option<String>,
    /// Raw `<pubDate>` text; see [`Entry::published`].
    pub pub_date: Option<String>,
    pub version: Option<String>,
    pub short_version: Option<String>,
    pub minimum_system_version: Option<String>,
    pub description: Option<String>,
    pub enclosure: Option<Enclosure>,
    /// Children this model does not interpret, kept in input order.
    pub extra: Vec<Element>,
}

/// The `<enclosure>` of an entry: `url`, `type`, and whatever the signing
/// tool attached (`sparkle:edSignature`, `length`, ...), in attribute order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Enclosure {
    pub attributes: Vec<(String, String)>,
}

impl Enclosure {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Sets an attribute; an existing key keeps its position and takes the new value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.get("url")
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.get("type")
    }
}

impl Entry {
    /// Publish time, or `None` when `<pubDate>` is absent or not in
    /// [`PUBDATE_FORMAT`].
    ///
    /// The weekday must be a valid abbreviation (any case) but need not match
    /// the date. A trailing `Z` stands for `+0000`.
    pub fn published(&self) -> Option<DateTime<FixedOffset>> {
        let raw = self.pub_date.as_deref()?.trim();
        let (weekday, rest) = raw.split_once(',')?;
        if !WEEKDAYS.iter().any(|w| w.eq_ignore_ascii_case(weekday)) {
            return None;
        }

        let rest = rest.trim_start();
        let rest = match rest.strip_suffix('Z') {
            Some(head) => Cow::Owned(format!("{head}+0000")),
            None => Cow::Borrowed(rest),
        };
        DateTime::parse_from_str(&rest, PUBDATE_DATE_FORMAT).ok()
    }

    /// The first occurrence of each recognised child fills its field; later
    /// repeats are kept in `extra` untouched.
    fn from_element(item: &Element) -> Self {
        let mut entry = Entry::default();
        for child in item.child_elements() {
            let slot = if child.is(None, "title") {
                &mut entry.title
            } else if child.is(None, "pubDate") {
                &mut entry.pub_date
            } else if child.is(Some(SPARKLE_NS), "version") {
                &mut entry.version
            } else if child.is(Some(SPARKLE_NS), "shortVersionString") {
                &mut entry.short_version
            } else if child.is(Some(SPARKLE_NS), "minimumSystemVersion") {
                &mut entry.minimum_system_version
            } else if child.is(None, "description") {
                &mut entry.description
            } else {
                if child.is(None, "enclosure") && entry.enclosure.is_none() {
                    entry.enclosure = Some(Enclosure {
                        attributes: child.attributes.clone(),
                    });
                } else {
                    entry.extra.push(child.clone());
                }
                continue;
            };

            if slot.is_none() {
                *slot = Some(child.text());
            } else {
                entry.extra.push(child.clone());
            }
        }
        entry
    }

    fn to_element(&self) -> Element {
        let mut item = Element::new("item");

        let mut push = |element: Element| item.children.push(Node::Element(element));
        if let Some(title) = &self.title {
            push(Element::new("title").with_text(title));
        }
        if let Some(pub_date) = &self.pub_date {
            push(Element::new("pubDate").with_text(pub_date));
        }
        if let Some(version) = &self.version {
            push(Element::sparkle("version").with_text(version));
        }
        if let Some(short_version) = &self.short_version {
            push(Element::sparkle("shortVersionString").with_text(short_version));
        }
        if let Some(minimum) = &self.minimum_system_version {
            push(Element::sparkle("minimumSystemVersion").with_text(minimum));
        }
        if let Some(description) = &self.description {
            push(Element::new("description").with_text(description));
        }
        if let Some(enclosure) = &self.enclosure {
            let mut element = Element::new("enclosure");
            element.attributes = enclosure.attributes.clone();
            push(element);
        }
        for extra in &self.extra {
            push(extra.clone());
        }

        item
    }
}

/// Parses an appcast document.
///
/// # Errors
///
/// [`Error::MalformedFeed`] if the bytes are not UTF-8, not well-formed XML,
/// or the root element has no direct `<channel>` child.
pub fn parse(document: &[u8]) -> Result<Feed> {
    let content = std::str::from_utf8(document).map_err(Error::malformed_feed)?;
    let root = xml::parse_document(content)?;

    let (position, channel_element) = root
        .children
        .iter()
        .enumerate()
        .find_map(|(idx, node)| match node {
            Node::Element(e) if e.is(None, "channel") => Some((idx, e)),
            _ => None,
        })
        .ok_or_else(|| Error::MalformedFeed(format!("<{}> has no <channel> element", root.name)))?;

    let mut channel = Channel {
        attributes: channel_element.attributes.clone(),
        ..Channel::default()
    };
    for node in &channel_element.children {
        match node {
            Node::Element(e) if e.is(None, "item") => channel.entries.push(Entry::from_element(e)),
            other => channel.metadata.push(other.clone()),
        }
    }

    tracing::debug!(
        root = %root.name,
        entries = channel.entries.len(),
        "Parsed appcast"
    );

    let before_channel = root.children[..position].to_vec();
    let after_channel = root.children[position + 1..].to_vec();
    if !before_channel.is_empty() || !after_channel.is_empty() {
        tracing::debug!(
            before = before_channel.len(),
            after = after_channel.len(),
            "Keeping root children outside the channel"
        );
    }

    Ok(Feed {
        name: root.name,
        attributes: root.attributes,
        before_channel,
        channel,
        after_channel,
    })
}

/// Renders a feed back to XML.
///
/// The root always declares `xmlns:sparkle` so that entries built in memory
/// resolve; an input that bound the prefix elsewhere is overridden.
pub fn serialize(feed: &Feed) -> Result<Vec<u8>> {
    let mut root = Element::new(feed.name.as_str());
    root.attributes = feed.attributes.clone();
    root.set_attribute(format!("xmlns:{}", xml::SPARKLE_PREFIX), SPARKLE_NS);

    let mut channel = Element::new("channel");
    channel.attributes = feed.channel.attributes.clone();
    channel.children.extend(feed.channel.metadata.iter().cloned());
    channel.children.extend(
        feed.channel
            .entries
            .iter()
            .map(|entry| Node::Element(entry.to_element())),
    );
    root.children.extend(feed.before_channel.iter().cloned());
    root.children.push(Node::Element(channel));
    root.children.extend(feed.after_channel.iter().cloned());

    xml::write_document(&root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<rss xmlns:sparkle="http://www.andymatuschak.org/xml-namespaces/sparkle" version="2.0">
  <channel>
    <title>Ghostty</title>
    <item>
      <title>Build 100</title>
      <pubDate>Mon, 06 Oct 2025 12:00:00 +0000</pubDate>
      <sparkle:version>100</sparkle:version>
      <sparkle:shortVersionString>abc1234 (2025-10-06)</sparkle:shortVersionString>
      <sparkle:minimumSystemVersion>13.0.0</sparkle:minimumSystemVersion>
      <description><![CDATA[<p>hello</p>]]></description>
      <enclosure url="https://tip.files.ghostty.org/abc/Ghostty.dmg" type="application/octet-stream" sparkle:edSignature="sig==" length="123"/>
      <sparkle:releaseNotesLink>https://example.com/notes</sparkle:releaseNotesLink>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_sample_entry() {
        let feed = parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(feed.name, "rss");
        assert_eq!(feed.channel.metadata.len(), 1);
        assert_eq!(feed.channel.entries.len(), 1);

        let entry = &feed.channel.entries[0];
        assert_eq!(entry.title.as_deref(), Some("Build 100"));
        assert_eq!(entry.version.as_deref(), Some("100"));
        assert_eq!(entry.short_version.as_deref(), Some("abc1234 (2025-10-06)"));
        assert_eq!(entry.minimum_system_version.as_deref(), Some("13.0.0"));
        assert_eq!(entry.description.as_deref(), Some("<p>hello</p>"));

        let enclosure = entry.enclosure.as_ref().unwrap();
        assert_eq!(
            enclosure.url(),
            Some("https://tip.files.ghostty.org/abc/Ghostty.dmg")
        );
        assert_eq!(enclosure.mime_type(), Some("application/octet-stream"));
        assert_eq!(enclosure.get("sparkle:edSignature"), Some("sig=="));
        assert_eq!(enclosure.get("length"), Some("123"));

        assert_eq!(entry.extra.len(), 1);
        assert!(entry.extra[0].is(Some(SPARKLE_NS), "releaseNotesLink"));
    }

    #[test]
    fn test_published_parses_fixed_format() {
        let feed = parse(SAMPLE.as_bytes()).unwrap();
        let published = feed.channel.entries[0].published().unwrap();
        assert_eq!(published.to_rfc3339(), "2025-10-06T12:00:00+00:00");
    }

    #[test]
    fn test_published_rejects_other_formats() {
        let mut entry = Entry {
            pub_date: Some("2025-10-06T12:00:00Z".to_string()),
            ..Entry::default()
        };
        assert!(entry.published().is_none());

        entry.pub_date = None;
        assert!(entry.published().is_none());

        entry.pub_date = Some("Mon, 06 Oct 2025 14:00:00 +0200".to_string());
        assert_eq!(
            entry.published().unwrap().to_rfc3339(),
            "2025-10-06T14:00:00+02:00"
        );
    }

    #[test]
    fn test_published_ignores_weekday_mismatch() {
        // 6 Oct 2025 is a Monday.
        let entry = Entry {
            pub_date: Some("Tue, 06 Oct 2025 12:00:00 +0000".to_string()),
            ..Entry::default()
        };
        assert_eq!(
            entry.published().unwrap().to_rfc3339(),
            "2025-10-06T12:00:00+00:00"
        );
    }

    #[test]
    fn test_published_accepts_z_offset_and_lowercase_weekday() {
        let entry = Entry {
            pub_date: Some("mon, 06 Oct 2025 12:00:00 Z".to_string()),
            ..Entry::default()
        };
        assert_eq!(
            entry.published().unwrap().to_rfc3339(),
            "2025-10-06T12:00:00+00:00"
        );
    }

    #[test]
    fn test_published_requires_known_weekday() {
        for raw in [
            "Xyz, 06 Oct 2025 12:00:00 +0000",
            "06 Oct 2025 12:00:00 +0000",
            "Mon, 06 Foo 2025 12:00:00 +0000",
            "Mon, 06 Oct 2025 12:00:00",
        ] {
            let entry = Entry {
                pub_date: Some(raw.to_string()),
                ..Entry::default()
            };
            assert!(entry.published().is_none(), "accepted {raw:?}");
        }
    }

    #[test]
    fn test_repeated_children_first_wins_rest_kept() {
        let doc = r#"<rss><channel><item>
<title>A</title><title>B</title>
<pubDate>Mon, 06 Oct 2025 12:00:00 +0000</pubDate><pubDate>garbage</pubDate>
</item></channel></rss>"#;
        let feed = parse(doc.as_bytes()).unwrap();
        let entry = &feed.channel.entries[0];

        assert_eq!(entry.title.as_deref(), Some("A"));
        assert_eq!(entry.pub_date.as_deref(), Some("Mon, 06 Oct 2025 12:00:00 +0000"));
        assert!(entry.published().is_some());
        assert_eq!(entry.extra.len(), 2);
        assert_eq!(entry.extra[0].text(), "B");
        assert_eq!(entry.extra[1].text(), "garbage");

        let text = String::from_utf8(serialize(&feed).unwrap()).unwrap();
        assert!(text.contains("<title>A</title>"));
        assert!(text.contains("<title>B</title>"));
        assert!(text.contains("<pubDate>garbage</pubDate>"));
    }

    #[test]
    fn test_root_children_outside_channel_kept() {
        let doc = r#"<rss><lead>first</lead><channel><title>T</title></channel><extra>keep me</extra></rss>"#;
        let feed = parse(doc.as_bytes()).unwrap();
        assert_eq!(feed.before_channel.len(), 1);
        assert_eq!(feed.after_channel.len(), 1);

        let text = String::from_utf8(serialize(&feed).unwrap()).unwrap();
        let lead = text.find("<lead>first</lead>").unwrap();
        let channel = text.find("<channel>").unwrap();
        let extra = text.find("<extra>keep me</extra>").unwrap();
        assert!(lead < channel && channel < extra);

        let reparsed = parse(text.as_bytes()).unwrap();
        assert_eq!(reparsed.before_channel, feed.before_channel);
        assert_eq!(reparsed.after_channel, feed.after_channel);
    }

    #[test]
    fn test_serialize_round_trip_preserves_content() {
        let feed = parse(SAMPLE.as_bytes()).unwrap();
        let bytes = serialize(&feed).unwrap();
        let reparsed = parse(&bytes).unwrap();
        assert_eq!(reparsed, feed);

        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("<title>Ghostty</title>"));
        assert!(text.contains("<sparkle:releaseNotesLink>"));
        assert!(text.contains(r#"sparkle:edSignature="sig==""#));
    }

    #[test]
    fn test_foreign_sparkle_prefix_is_normalized() {
        let doc = r#"<rss xmlns:sp="http://www.andymatuschak.org/xml-namespaces/sparkle"><channel>
<item><pubDate>Mon, 06 Oct 2025 12:00:00 +0000</pubDate><sp:version>9</sp:version></item>
</channel></rss>"#;
        let feed = parse(doc.as_bytes()).unwrap();
        assert_eq!(feed.channel.entries[0].version.as_deref(), Some("9"));

        let text = String::from_utf8(serialize(&feed).unwrap()).unwrap();
        assert!(text.contains("xmlns:sparkle=\"http://www.andymatuschak.org/xml-namespaces/sparkle\""));
        assert!(text.contains("<sparkle:version>9</sparkle:version>"));
        assert!(!text.contains("<sp:version>"));
    }

    #[test]
    fn test_serialize_declares_namespace_when_missing() {
        let feed = Feed {
            name: "rss".to_string(),
            attributes: vec![("version".to_string(), "2.0".to_string())],
            before_channel: Vec::new(),
            channel: Channel::default(),
            after_channel: Vec::new(),
        };
        let text = String::from_utf8(serialize(&feed).unwrap()).unwrap();
        assert!(text.contains(
            r#"<rss version="2.0" xmlns:sparkle="http://www.andymatuschak.org/xml-namespaces/sparkle">"#
        ));
        assert!(text.contains("<channel/>"));
    }

    #[test]
    fn test_parse_requires_channel() {
        let err = parse(b"<rss version=\"2.0\"></rss>").unwrap_err();
        assert!(matches!(err, Error::MalformedFeed(_)));
        assert!(err.to_string().contains("channel"));
    }

    #[test]
    fn test_parse_rejects_invalid_utf8() {
        let err = parse(&[0x3c, 0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, Error::MalformedFeed(_)));
    }

    #[test]
    fn test_unprefixed_version_is_not_sparkle_version() {
        let doc = r#"<rss><channel><item><version>1</version></item></channel></rss>"#;
        let feed = parse(doc.as_bytes()).unwrap();
        let entry = &feed.channel.entries[0];
        assert_eq!(entry.version, None);
        assert_eq!(entry.extra.len(), 1);
    }
}
