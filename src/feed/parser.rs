use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Feed, Link, Text};
use feed_rs::parser;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Serialize;

use crate::storage::FeedItem;
use crate::util::{collapse_whitespace, decode_entities, strip_html_tags, truncate_chars};

/// Upper bound on `FeedItem::summary`, in characters.
pub const SUMMARY_MAX_CHARS: usize = 300;

/// Channel-level information about a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedMetadata {
    pub title: String,
    pub description: Option<String>,
    pub link: Option<String>,
}

/// Result of normalizing one fetched document.
///
/// Parsing never fails outright: malformed input yields no items and an
/// `error`, and `metadata` may still be present when the lenient scan found a
/// channel title.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub metadata: Option<FeedMetadata>,
    pub items: Vec<FeedItem>,
    pub error: Option<String>,
}

impl ParsedFeed {
    pub fn parse_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.as_ref().map(|m| m.title.as_str())
    }
}

/// Normalizes RSS 2.0 / Atom / RSSHub XML into [`FeedItem`]s, stamping
/// undated items with the current time.
pub fn normalize(bytes: &[u8], source_name: &str) -> ParsedFeed {
    normalize_at(bytes, source_name, Utc::now())
}

/// [`normalize`] with an explicit "now" for items that carry no date.
pub fn normalize_at(bytes: &[u8], source_name: &str, now: DateTime<Utc>) -> ParsedFeed {
    match parser::parse(bytes) {
        Ok(feed) => from_feed(feed, source_name, now),
        Err(e) => {
            let metadata = scan_metadata(bytes);
            tracing::debug!(
                source = %source_name,
                error = %e,
                salvaged_title = metadata.is_some(),
                "Feed document failed to parse"
            );
            ParsedFeed {
                metadata,
                items: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    }
}

fn from_feed(feed: Feed, source_name: &str, now: DateTime<Utc>) -> ParsedFeed {
    let metadata = feed
        .title
        .as_ref()
        .map(clean_field)
        .filter(|t| !t.is_empty())
        .map(|title| FeedMetadata {
            title,
            description: feed
                .description
                .as_ref()
                .map(clean_field)
                .filter(|d| !d.is_empty()),
            link: preferred_link(&feed.links),
        });

    let total = feed.entries.len();
    let items: Vec<FeedItem> = feed
        .entries
        .into_iter()
        .filter_map(|entry| to_item(entry, source_name, now))
        .collect();

    if items.len() < total {
        tracing::debug!(
            source = %source_name,
            dropped = total - items.len(),
            "Entries without a title skipped"
        );
    }

    ParsedFeed {
        metadata,
        items,
        error: None,
    }
}

fn to_item(entry: Entry, source_name: &str, now: DateTime<Utc>) -> Option<FeedItem> {
    let title = entry
        .title
        .as_ref()
        .map(clean_field)
        .filter(|t| !t.is_empty())?;

    let summary = pick_summary(&entry, &title);

    let mut tags: Vec<String> = Vec::new();
    for category in &entry.categories {
        let tag = category.label.as_deref().unwrap_or(&category.term).trim();
        if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }

    Some(FeedItem {
        link: preferred_link(&entry.links),
        publish_time: entry.published.or(entry.updated).unwrap_or(now),
        summary,
        tags,
        title,
        source_name: source_name.to_string(),
        favicon_url: None,
    })
}

/// Snippet, then cleaned full content, then the summary field whatever its
/// type, then the title itself.
fn pick_summary(entry: &Entry, title: &str) -> String {
    let summary = entry.summary.as_ref();
    let snippet = summary
        .filter(|t| is_plain_text(t))
        .map(|t| clean_plain(&t.content));
    let content = entry
        .content
        .as_ref()
        .and_then(|c| c.body.as_deref())
        .map(clean_html)
        .or_else(|| {
            summary
                .filter(|t| !is_plain_text(t))
                .map(|t| clean_html(&t.content))
        });
    let any_summary = summary.map(clean_field);

    [snippet, content, any_summary]
        .into_iter()
        .flatten()
        .map(|s| bounded(&s))
        .find(|s| !s.is_empty())
        .unwrap_or_else(|| bounded(title))
}

fn is_plain_text(text: &Text) -> bool {
    text.content_type.ty() == "text" && text.content_type.subty() == "plain"
}

/// Plain fields keep `<` literal; anything else is treated as markup.
fn clean_field(text: &Text) -> String {
    if is_plain_text(text) {
        clean_plain(&text.content)
    } else {
        clean_html(&text.content)
    }
}

fn preferred_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .or_else(|| links.first())
        .map(|l| l.href.trim().to_string())
        .filter(|href| !href.is_empty())
}

/// Text of an HTML fragment. Tags go first, so escaped markup such as
/// `&lt;script&gt;` survives as literal text.
pub fn clean_html(raw: &str) -> String {
    collapse_whitespace(&decode_entities(&strip_html_tags(raw)))
}

/// Text that is not markup: entities decoded, whitespace collapsed.
pub fn clean_plain(raw: &str) -> String {
    collapse_whitespace(&decode_entities(raw))
}

/// [`clean_html`] bounded to [`SUMMARY_MAX_CHARS`].
pub fn clean_summary(raw: &str) -> String {
    bounded(&clean_html(raw))
}

fn bounded(text: &str) -> String {
    truncate_chars(text, SUMMARY_MAX_CHARS).trim_end().to_string()
}

/// Pulls the channel/feed title out of a document that `feed-rs` rejected.
///
/// Only documents whose root element is `rss`, `feed` or `RDF` qualify, and
/// only a `title` directly under `channel` or `feed` counts, so HTML pages
/// never produce metadata. Scanning stops at the first XML error.
pub fn scan_metadata(bytes: &[u8]) -> Option<FeedMetadata> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut in_title = false;
    let mut title = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_ascii_lowercase();
                if stack.is_empty() && !matches!(name.as_slice(), b"rss" | b"feed" | b"rdf") {
                    return None;
                }
                in_title = name == b"title"
                    && stack
                        .last()
                        .is_some_and(|parent| parent == b"channel" || parent == b"feed");
                stack.push(name);
            }
            Ok(Event::Empty(e)) if stack.is_empty() => {
                let name = e.local_name().as_ref().to_ascii_lowercase();
                if !matches!(name.as_slice(), b"rss" | b"feed" | b"rdf") {
                    return None;
                }
            }
            Ok(Event::Text(t)) if in_title => {
                title.push_str(&String::from_utf8_lossy(&t.into_inner()));
            }
            Ok(Event::CData(c)) if in_title => {
                title.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::End(_)) => {
                if in_title {
                    let cleaned = clean_plain(&title);
                    if !cleaned.is_empty() {
                        return Some(FeedMetadata {
                            title: cleaned,
                            description: None,
                            link: None,
                        });
                    }
                    in_title = false;
                    title.clear();
                }
                stack.pop();
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example Blog</title>
    <link>https://example.com/</link>
    <description>Notes &amp; essays</description>
    <item>
      <title>First post</title>
      <link>https://example.com/first</link>
      <pubDate>Tue, 02 Jan 2024 10:00:00 GMT</pubDate>
      <description><![CDATA[<p>Hello <b>world</b></p>]]></description>
      <category>rust</category>
      <category>async</category>
    </item>
    <item>
      <description>no title here</description>
    </item>
    <item>
      <title>Second post</title>
      <link>https://example.com/second</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_rss_metadata_and_items() {
        let parsed = normalize_at(RSS.as_bytes(), "Example", fixed_now());
        assert!(!parsed.parse_failed());

        let meta = parsed.metadata.unwrap();
        assert_eq!(meta.title, "Example Blog");
        assert_eq!(meta.description.as_deref(), Some("Notes & essays"));

        let titles: Vec<_> = parsed.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["First post", "Second post"]);

        let first = &parsed.items[0];
        assert_eq!(first.link.as_deref(), Some("https://example.com/first"));
        assert_eq!(first.summary, "Hello world");
        assert_eq!(first.tags, vec!["rust".to_string(), "async".to_string()]);
        assert_eq!(first.source_name, "Example");
        assert_eq!(
            first.publish_time,
            Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_undated_item_gets_fetch_time_and_title_summary() {
        let parsed = normalize_at(RSS.as_bytes(), "Example", fixed_now());
        let second = &parsed.items[1];
        assert_eq!(second.publish_time, fixed_now());
        assert_eq!(second.summary, "Second post");
        assert!(second.tags.is_empty());
    }

    #[test]
    fn test_atom_feed() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Site</title>
  <link rel="self" href="https://atom.example/feed.xml"/>
  <link rel="alternate" href="https://atom.example/"/>
  <id>urn:uuid:feed</id>
  <updated>2024-03-01T00:00:00Z</updated>
  <entry>
    <title>Entry one</title>
    <link href="https://atom.example/one"/>
    <id>urn:uuid:1</id>
    <updated>2024-03-01T08:30:00Z</updated>
    <summary type="text">Plain snippet text</summary>
    <content type="html">&lt;p&gt;Full &lt;em&gt;content&lt;/em&gt;&lt;/p&gt;</content>
  </entry>
</feed>"#;

        let parsed = normalize_at(atom.as_bytes(), "Atom", fixed_now());
        let meta = parsed.metadata.unwrap();
        assert_eq!(meta.title, "Atom Site");
        assert_eq!(meta.link.as_deref(), Some("https://atom.example/"));

        let entry = &parsed.items[0];
        assert_eq!(entry.summary, "Plain snippet text");
        assert_eq!(entry.link.as_deref(), Some("https://atom.example/one"));
        assert_eq!(
            entry.publish_time,
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_content_encoded_used_when_no_snippet() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel><title>C</title>
    <item>
      <title>Post</title>
      <content:encoded><![CDATA[<div><h1>Heading</h1><p>Body&nbsp;text</p><script>track()</script></div>]]></content:encoded>
    </item>
  </channel>
</rss>"#;
        let parsed = normalize_at(rss.as_bytes(), "C", fixed_now());
        assert_eq!(parsed.items[0].summary, "Heading Body text");
    }

    #[test]
    fn test_long_html_summary_is_bounded() {
        let body = "<p>lorem <i>ipsum</i> dolor sit amet</p>".repeat(40);
        let rss = format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>L</title>
<item><title>Long</title><description><![CDATA[{}]]></description></item>
</channel></rss>"#,
            body
        );
        let parsed = normalize_at(rss.as_bytes(), "L", fixed_now());
        let summary = &parsed.items[0].summary;
        assert!(summary.chars().count() <= SUMMARY_MAX_CHARS);
        assert!(!summary.contains('<'));
        assert!(summary.starts_with("lorem ipsum dolor"));
    }

    #[test]
    fn test_item_count_excludes_titleless() {
        let mut xml = String::from(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title>"#);
        for i in 0..7 {
            if i % 3 == 0 {
                xml.push_str("<item><description>untitled</description></item>");
            } else {
                xml.push_str(&format!("<item><title>Item {}</title></item>", i));
            }
        }
        xml.push_str("</channel></rss>");

        let parsed = normalize_at(xml.as_bytes(), "T", fixed_now());
        // 7 entries, 3 without titles (i = 0, 3, 6)
        assert_eq!(parsed.items.len(), 7 - 3);
        assert!(parsed.items.iter().all(|i| !i.title.is_empty()));
    }

    #[test]
    fn test_html_page_is_parse_failure_without_metadata() {
        let html = "<!DOCTYPE html><html><head><title>Home</title></head><body>hi</body></html>";
        let parsed = normalize(html.as_bytes(), "Site");
        assert!(parsed.parse_failed());
        assert!(parsed.items.is_empty());
        assert!(parsed.metadata.is_none());
    }

    #[test]
    fn test_escaped_markup_in_titles_is_text() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Front &lt;end&gt; notes</title>
  <item>
    <title>Why &lt;script&gt; tags block rendering</title>
    <link>https://example.com/script</link>
    <description>Put &amp;lt;script&amp;gt; at the &lt;b&gt;end&lt;/b&gt;</description>
  </item>
  <item>
    <title>&lt;style&gt; scoping explained</title>
    <link>https://example.com/style</link>
  </item>
</channel></rss>"#;

        let parsed = normalize_at(rss.as_bytes(), "Front", fixed_now());
        assert_eq!(parsed.metadata.unwrap().title, "Front <end> notes");

        let titles: Vec<_> = parsed.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Why <script> tags block rendering", "<style> scoping explained"]
        );
        assert_eq!(parsed.items[0].summary, "Put <script> at the end");
    }

    #[test]
    fn test_html_titles_are_stripped() {
        let atom = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>A</title><id>urn:a</id>
<entry><id>urn:1</id><title type="html">Use &amp;lt;b&amp;gt; for &lt;b&gt;bold&lt;/b&gt;</title>
<updated>2024-03-01T08:30:00Z</updated></entry></feed>"#;
        let parsed = normalize_at(atom.as_bytes(), "A", fixed_now());
        assert_eq!(parsed.items[0].title, "Use <b> for bold");
    }

    #[test]
    fn test_garbage_is_parse_failure() {
        let parsed = normalize(b"<not valid xml", "X");
        assert!(parsed.parse_failed());
        assert!(parsed.items.is_empty());
    }

    #[test]
    fn test_scan_metadata_truncated_rss() {
        let truncated = br#"<?xml version="1.0"?><rss version="2.0"><channel><title>Broken &amp; Cut</title><item><title>One"#;
        let meta = scan_metadata(truncated).unwrap();
        assert_eq!(meta.title, "Broken & Cut");
    }

    #[test]
    fn test_scan_metadata_ignores_item_titles_and_html_roots() {
        let no_channel_title =
            br#"<rss><channel><item><title>Only an item</title></item></channel></rss>"#;
        assert!(scan_metadata(no_channel_title).is_none());

        let html = br#"<html><head><title>Page</title></head></html>"#;
        assert!(scan_metadata(html).is_none());

        let atom = br#"<feed xmlns="http://www.w3.org/2005/Atom"><title><![CDATA[Atom CDATA]]></title>"#;
        assert_eq!(scan_metadata(atom).unwrap().title, "Atom CDATA");
    }

    proptest! {
        #[test]
        fn prop_clean_summary_bounded_and_tag_free(raw in "[^<&]{0,1200}", tag in "[a-z]{1,8}") {
            let html = format!("<{tag} class=\"x\">{raw}</{tag}><p>{raw}</p>");
            let summary = clean_summary(&html);
            prop_assert!(summary.chars().count() <= SUMMARY_MAX_CHARS);
            let has_tag_start = summary
                .char_indices()
                .any(|(i, c)| c == '<' && summary[i + 1..].chars().next().is_some_and(|n| n.is_ascii_alphabetic() || n == '/' || n == '!' || n == '?'));
            prop_assert!(!has_tag_start);
        }
    }
}
