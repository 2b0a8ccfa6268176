use feed_rs::model::{Entry, Feed as RawFeed, Link};
use feed_rs::parser;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use thiserror::Error;
use url::Url;

use crate::storage::{FeedMetadata, ParsedItem};
use crate::util::clean_text;

/// First `<img src="...">` in an HTML fragment
static IMG_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).expect("static regex is valid")
});

const UNTITLED_FEED: &str = "Untitled Feed";

/// The body was fetched but is not a usable RSS/Atom document
#[derive(Debug, Error)]
#[error("Not a valid RSS/Atom feed: {0}")]
pub struct ParseError(String);

/// A fetched feed in canonical form
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: String,
    pub description: Option<String>,
    /// Site (HTML) link of the feed
    pub link: Option<String>,
    pub image: Option<String>,
    /// At most `max_items` entries, in document order
    pub items: Vec<ParsedItem>,
    /// Entries past the cap that were dropped
    pub dropped: usize,
}

impl ParsedFeed {
    /// Metadata cached on the feed row after a successful refresh
    pub fn metadata(&self) -> FeedMetadata {
        FeedMetadata {
            title: Some(self.title.clone()),
            description: self.description.clone(),
            site_url: self.link.clone(),
            image_url: self.image.clone(),
        }
    }
}

/// Parses RSS 0.9x/1.0/2.0 or Atom bytes into a [`ParsedFeed`].
///
/// Only the document as a whole can fail. Individual entries are normalized
/// best-effort; whatever they lack stays `None`.
pub fn parse_feed(bytes: &[u8], max_items: usize) -> Result<ParsedFeed, ParseError> {
    // feed-rs invents ids for entries without one; an empty id lets us apply
    // our own link / title+date fallback instead.
    let raw = parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
        .parse(bytes)
        .map_err(|e| ParseError(e.to_string()))?;

    Ok(normalize_feed(raw, max_items))
}

fn normalize_feed(raw: RawFeed, max_items: usize) -> ParsedFeed {
    let title = raw
        .title
        .as_ref()
        .and_then(|t| clean_text(&t.content))
        .unwrap_or_else(|| UNTITLED_FEED.to_string());
    let description = raw.description.as_ref().and_then(|t| clean_text(&t.content));
    let link = site_link(&raw.links);
    let image = raw
        .logo
        .as_ref()
        .or(raw.icon.as_ref())
        .and_then(|img| clean_text(&img.uri));

    let total = raw.entries.len();
    let items: Vec<ParsedItem> = raw
        .entries
        .into_iter()
        .take(max_items)
        .map(normalize_entry)
        .collect();

    ParsedFeed {
        title,
        description,
        link,
        image,
        dropped: total.saturating_sub(items.len()),
        items,
    }
}

fn normalize_entry(entry: Entry) -> ParsedItem {
    let title = entry.title.as_ref().and_then(|t| clean_text(&t.content));
    let link = site_link(&entry.links);
    let description = entry.summary.as_ref().and_then(|t| clean_text(&t.content));
    let content = entry
        .content
        .as_ref()
        .and_then(|c| c.body.as_deref())
        .and_then(clean_text);
    let author = entry.authors.iter().find_map(|p| clean_text(&p.name));
    let published = entry.published.or(entry.updated).map(|dt| dt.timestamp());

    let mut categories: Vec<String> = Vec::new();
    for category in &entry.categories {
        if let Some(name) = clean_text(&category.term) {
            if !categories.contains(&name) {
                categories.push(name);
            }
        }
    }

    let image_url = media_image(&entry).or_else(|| {
        content
            .as_deref()
            .or(description.as_deref())
            .and_then(|html| sniff_image(html, link.as_deref()))
    });

    let guid = derive_guid(&entry.id, link.as_deref(), title.as_deref(), published);

    ParsedItem {
        guid,
        title,
        link,
        description,
        content,
        author,
        image_url,
        published,
        categories,
    }
}

/// Stable identifier for an entry: explicit id, else link, else a SHA-256
/// over title and publish time.
///
/// The hash input only uses fields that are stable across fetches, so the
/// same `(title, published)` pair always maps to the same id.
pub fn derive_guid(
    existing: &str,
    link: Option<&str>,
    title: Option<&str>,
    published: Option<i64>,
) -> String {
    let trimmed = existing.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }

    if let Some(link) = link.map(str::trim).filter(|l| !l.is_empty()) {
        return link.to_string();
    }

    let input = format!(
        "{}|{}",
        title.unwrap_or(""),
        published.map(|p| p.to_string()).unwrap_or_default()
    );
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Prefers an `alternate` (or rel-less) link, falling back to the first one.
fn site_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .and_then(|l| clean_text(&l.href))
}

/// Image from structured fields: media content, media thumbnails, then
/// image-typed links (RSS enclosures).
fn media_image(entry: &Entry) -> Option<String> {
    let from_content = entry.media.iter().flat_map(|m| &m.content).find_map(|c| {
        let is_image = c
            .content_type
            .as_ref()
            .map_or(true, |mime| mime.ty().as_str() == "image");
        if is_image {
            c.url.as_ref().map(|u| u.to_string())
        } else {
            None
        }
    });

    from_content
        .or_else(|| {
            entry
                .media
                .iter()
                .flat_map(|m| &m.thumbnails)
                .find_map(|t| clean_text(&t.image.uri))
        })
        .or_else(|| {
            entry
                .links
                .iter()
                .filter(|l| {
                    l.media_type
                        .as_deref()
                        .is_some_and(|t| t.starts_with("image/"))
                })
                .find_map(|l| clean_text(&l.href))
        })
}

/// First `<img>` source in `html`, resolved against `base` when relative.
pub fn sniff_image(html: &str, base: Option<&str>) -> Option<String> {
    let src = IMG_SRC.captures(html)?.get(1)?.as_str().trim();
    let src = src.replace("&amp;", "&");
    if src.is_empty() || src.starts_with("data:") {
        return None;
    }

    if let Some(rest) = src.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    if Url::parse(&src).is_ok() {
        return Some(src);
    }

    let base = Url::parse(base?).ok()?;
    base.join(&src).ok().map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
<channel>
    <title>Example Blog</title>
    <link>https://example.com/</link>
    <description>Posts about things</description>
    <image><url>https://example.com/logo.png</url><title>Example</title><link>https://example.com/</link></image>
    <item>
        <guid>abc123</guid>
        <title>First post</title>
        <link>https://example.com/first</link>
        <description>Hello world</description>
        <author>ada@example.com (Ada)</author>
        <category>rust</category>
        <category>rust</category>
        <category>news</category>
        <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
        <media:content url="https://example.com/first.jpg" medium="image" type="image/jpeg"/>
    </item>
    <item>
        <title>No guid</title>
        <link>https://example.com/second</link>
        <description><![CDATA[<p>Intro</p><img class="hero" src="/img/second.png"/>]]></description>
    </item>
    <item>
        <title>Neither guid nor link</title>
        <pubDate>Tue, 02 Jan 2024 00:00:00 GMT</pubDate>
    </item>
</channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
    <title>Atom Example</title>
    <link href="https://atom.example.com/feed" rel="self"/>
    <link href="https://atom.example.com/" rel="alternate"/>
    <id>urn:uuid:feed</id>
    <updated>2024-01-03T00:00:00Z</updated>
    <entry>
        <title>Atom entry</title>
        <id>urn:uuid:entry-1</id>
        <link href="https://atom.example.com/entry-1"/>
        <updated>2024-01-03T00:00:00Z</updated>
        <author><name>Grace</name></author>
        <category term="rust-lang" label="Rust Language"/>
        <category term="release" label="Release"/>
        <content type="html">&lt;img src="https://cdn.example.com/a.png"&gt;</content>
    </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_feed_metadata() {
        let feed = parse_feed(RSS.as_bytes(), 50).unwrap();
        assert_eq!(feed.title, "Example Blog");
        assert_eq!(feed.description.as_deref(), Some("Posts about things"));
        assert_eq!(feed.link.as_deref(), Some("https://example.com/"));
        assert_eq!(feed.image.as_deref(), Some("https://example.com/logo.png"));
        assert_eq!(feed.items.len(), 3);
        assert_eq!(feed.dropped, 0);
    }

    #[test]
    fn test_parse_rss_item_fields() {
        let feed = parse_feed(RSS.as_bytes(), 50).unwrap();
        let first = &feed.items[0];
        assert_eq!(first.guid, "abc123");
        assert_eq!(first.title.as_deref(), Some("First post"));
        assert_eq!(first.link.as_deref(), Some("https://example.com/first"));
        assert_eq!(first.description.as_deref(), Some("Hello world"));
        assert_eq!(first.published, Some(1_704_067_200));
        assert_eq!(first.categories, vec!["rust".to_string(), "news".to_string()]);
        assert_eq!(first.image_url.as_deref(), Some("https://example.com/first.jpg"));
        assert!(first.author.is_some());
    }

    #[test]
    fn test_guid_falls_back_to_link_then_hash() {
        let feed = parse_feed(RSS.as_bytes(), 50).unwrap();
        assert_eq!(feed.items[1].guid, "https://example.com/second");

        let third = &feed.items[2];
        assert_eq!(third.link, None);
        assert_eq!(
            third.guid,
            derive_guid("", None, Some("Neither guid nor link"), Some(1_704_153_600))
        );
        assert_eq!(third.guid.len(), 64);
    }

    #[test]
    fn test_image_sniffed_from_html_and_resolved() {
        let feed = parse_feed(RSS.as_bytes(), 50).unwrap();
        assert_eq!(
            feed.items[1].image_url.as_deref(),
            Some("https://example.com/img/second.png")
        );
    }

    #[test]
    fn test_parse_atom() {
        let feed = parse_feed(ATOM.as_bytes(), 50).unwrap();
        assert_eq!(feed.title, "Atom Example");
        assert_eq!(feed.link.as_deref(), Some("https://atom.example.com/"));

        let entry = &feed.items[0];
        assert_eq!(entry.guid, "urn:uuid:entry-1");
        assert_eq!(entry.author.as_deref(), Some("Grace"));
        assert_eq!(entry.published, Some(1_704_240_000));
        assert_eq!(entry.image_url.as_deref(), Some("https://cdn.example.com/a.png"));
    }

    #[test]
    fn test_atom_categories_use_term_not_label() {
        let feed = parse_feed(ATOM.as_bytes(), 50).unwrap();
        assert_eq!(
            feed.items[0].categories,
            vec!["rust-lang".to_string(), "release".to_string()]
        );
    }

    #[test]
    fn test_items_capped_at_max() {
        let items: String = (0..10)
            .map(|i| format!("<item><guid>g{i}</guid><title>T{i}</title></item>"))
            .collect();
        let xml = format!(r#"<rss version="2.0"><channel><title>Big</title>{items}</channel></rss>"#);

        let feed = parse_feed(xml.as_bytes(), 4).unwrap();
        assert_eq!(feed.items.len(), 4);
        assert_eq!(feed.dropped, 6);
        assert_eq!(feed.items[0].guid, "g0");
        assert_eq!(feed.items[3].guid, "g3");
    }

    #[test]
    fn test_sparse_item_is_kept() {
        let xml = r#"<rss version="2.0"><channel><item><description>only text</description></item></channel></rss>"#;
        let feed = parse_feed(xml.as_bytes(), 50).unwrap();

        assert_eq!(feed.title, UNTITLED_FEED);
        assert_eq!(feed.items.len(), 1);
        let item = &feed.items[0];
        assert_eq!(item.title, None);
        assert_eq!(item.link, None);
        assert_eq!(item.published, None);
        assert_eq!(item.guid, derive_guid("", None, None, None));
    }

    #[test]
    fn test_invalid_documents_rejected() {
        assert!(parse_feed(b"<not valid xml", 50).is_err());
        assert!(parse_feed(b"{\"hello\": 1}", 50).is_err());
        assert!(parse_feed(b"<html><body>nope</body></html>", 50).is_err());
    }

    #[test]
    fn test_control_chars_stripped_from_titles() {
        let xml = "<rss version=\"2.0\"><channel><title>Bad\u{7f} Feed</title>\
                   <item><guid>1</guid><title>  Spaced  </title></item></channel></rss>";
        let feed = parse_feed(xml.as_bytes(), 50).unwrap();
        assert_eq!(feed.title, "Bad Feed");
        assert_eq!(feed.items[0].title.as_deref(), Some("Spaced"));
    }

    #[test]
    fn test_sniff_image_variants() {
        assert_eq!(
            sniff_image(r#"<IMG SRC='https://a.example/x.png?a=1&amp;b=2'>"#, None).as_deref(),
            Some("https://a.example/x.png?a=1&b=2")
        );
        assert_eq!(
            sniff_image(r#"<img src="//cdn.example/y.png">"#, None).as_deref(),
            Some("https://cdn.example/y.png")
        );
        assert_eq!(sniff_image(r#"<img src="rel.png">"#, None), None);
        assert_eq!(sniff_image(r#"<img src="data:image/png;base64,AA">"#, None), None);
        assert_eq!(sniff_image("<p>no images</p>", Some("https://e.com")), None);
    }

    #[test]
    fn test_derive_guid_prefers_existing() {
        assert_eq!(derive_guid("  id-1 ", Some("https://e.com/a"), None, None), "id-1");
        assert_eq!(derive_guid("", Some(" https://e.com/a "), None, None), "https://e.com/a");
        assert_ne!(
            derive_guid("", None, Some("A"), Some(1)),
            derive_guid("", None, Some("A"), Some(2))
        );
    }

    proptest! {
        #[test]
        fn prop_fallback_guid_is_deterministic(title in ".{0,64}", published in proptest::option::of(any::<i64>())) {
            let first = derive_guid("", None, Some(&title), published);
            let second = derive_guid("   ", None, Some(&title), published);
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.len(), 64);
        }
    }
}
