//! Turns raw feed entries into the article records stored in the cache.

use chrono::DateTime;
use scraper::{node::Node, Html};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Timestamp layout of `Article::pub_date`. Its first ten characters are the
/// date bucket key.
pub const PUB_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One feed entry as it came off the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    pub title: String,
    pub link: String,
    /// May contain HTML.
    pub description: String,
    /// Verbatim feed date string, if the entry carried one.
    pub published: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub link: String,
    /// The feed's own date string, unmodified.
    pub published: String,
    #[serde(rename = "pubDate")]
    pub pub_date: String,
    pub description: String,
    pub image: Option<String>,
}

impl Article {
    /// `YYYY-MM-DD` prefix of the normalized timestamp.
    pub fn date_key(&self) -> &str {
        self.pub_date
            .split_once(' ')
            .map(|(date, _)| date)
            .unwrap_or(&self.pub_date)
    }
}

/// Result of normalizing one fetched document.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub articles: Vec<Article>,
    /// Entries discarded because their publish date did not parse.
    pub dropped: usize,
}

pub fn normalize_entries(entries: &[RawEntry]) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    for entry in entries {
        match normalize_entry(entry) {
            Some(article) => batch.articles.push(article),
            None => batch.dropped += 1,
        }
    }
    batch
}

/// Returns `None` when the entry has no parseable publish date.
pub fn normalize_entry(entry: &RawEntry) -> Option<Article> {
    let published = entry.published.as_deref()?;
    let Some(pub_date) = format_pub_date(published) else {
        debug!("Dropping '{}': unparseable date '{}'", entry.title, published);
        return None;
    };

    let fragment = Html::parse_fragment(&entry.description);
    let image = first_image_src(&fragment);
    let description = unescape(visible_text(&fragment).trim());

    Some(Article {
        title: clean_title(&entry.title),
        link: entry.link.clone(),
        published: published.to_string(),
        pub_date,
        description,
        image,
    })
}

/// Parses an RFC 2822 feed date and renders it as `YYYY-MM-DD HH:MM:SS` in
/// the offset the feed supplied.
pub fn format_pub_date(raw: &str) -> Option<String> {
    DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|dt| dt.format(PUB_DATE_FORMAT).to_string())
}

fn clean_title(raw: &str) -> String {
    // Only markup literally present in the feed is stripped; escaped markup is text.
    let title = if has_link_or_image_markup(raw) {
        visible_text(&Html::parse_fragment(raw)).trim().to_string()
    } else {
        html_escape::decode_html_entities(raw).to_string()
    };
    title.replace("&#39;", "'")
}

fn unescape(text: &str) -> String {
    html_escape::decode_html_entities(text).replace("&#39;", "'")
}

fn has_link_or_image_markup(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    ["<a ", "<a>", "<img"].iter().any(|tag| lower.contains(tag))
}

fn first_image_src(fragment: &Html) -> Option<String> {
    fragment
        .tree
        .root()
        .descendants()
        .filter_map(|node| node.value().as_element())
        .find(|element| element.name() == "img")
        .and_then(|img| img.attr("src"))
        .map(str::to_string)
}

/// Text of the fragment with image elements removed and anchors unwrapped:
/// link markup goes, link text stays.
fn visible_text(fragment: &Html) -> String {
    let mut text = String::new();
    for node in fragment.tree.root().descendants() {
        let Node::Text(chunk) = node.value() else {
            continue;
        };
        let inside_image = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|element| element.name() == "img")
        });
        if !inside_image {
            text.push_str(chunk);
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, description: &str, published: Option<&str>) -> RawEntry {
        RawEntry {
            title: title.to_string(),
            link: "http://x/1".to_string(),
            description: description.to_string(),
            published: published.map(str::to_string),
        }
    }

    mod normalize_entry_tests {
        use super::*;

        #[test]
        fn test_full_entry() {
            let raw = entry(
                "A&#39;s Day",
                "<img src='http://x/img.png'><p>Hello <a href='http://x/2'>world</a></p>",
                Some("Wed, 01 Jan 2025 10:00:00 GMT"),
            );

            let article = normalize_entry(&raw).unwrap();

            assert_eq!(article.title, "A's Day");
            assert_eq!(article.link, "http://x/1");
            assert_eq!(article.image, Some("http://x/img.png".to_string()));
            assert_eq!(article.description, "Hello world");
            assert_eq!(article.published, "Wed, 01 Jan 2025 10:00:00 GMT");
            assert_eq!(article.pub_date, "2025-01-01 10:00:00");
            assert_eq!(article.date_key(), "2025-01-01");
        }

        #[test]
        fn test_unparseable_date_is_dropped() {
            let raw = entry("Title", "<p>Body</p>", Some("sometime last week"));
            assert!(normalize_entry(&raw).is_none());
        }

        #[test]
        fn test_missing_date_is_dropped() {
            let raw = entry("Title", "<p>Body</p>", None);
            assert!(normalize_entry(&raw).is_none());
        }

        #[test]
        fn test_no_image() {
            let raw = entry("T", "plain text only", Some("Wed, 01 Jan 2025 10:00:00 GMT"));
            let article = normalize_entry(&raw).unwrap();
            assert_eq!(article.image, None);
            assert_eq!(article.description, "plain text only");
        }

        #[test]
        fn test_first_image_wins() {
            let raw = entry(
                "T",
                r#"<img src="http://x/a.png"><p>text</p><img src="http://x/b.png">"#,
                Some("Wed, 01 Jan 2025 10:00:00 GMT"),
            );
            let article = normalize_entry(&raw).unwrap();
            assert_eq!(article.image, Some("http://x/a.png".to_string()));
            assert_eq!(article.description, "text");
        }

        #[test]
        fn test_description_entities_decoded() {
            let raw = entry(
                "T",
                "<p>Tom &amp; Jerry&#39;s &quot;show&quot;</p>",
                Some("Wed, 01 Jan 2025 10:00:00 GMT"),
            );
            let article = normalize_entry(&raw).unwrap();
            assert_eq!(article.description, "Tom & Jerry's \"show\"");
        }

        #[test]
        fn test_double_escaped_apostrophe_in_description() {
            let raw = entry(
                "T",
                "<p>it&amp;#39;s here</p>",
                Some("Wed, 01 Jan 2025 10:00:00 GMT"),
            );
            let article = normalize_entry(&raw).unwrap();
            assert_eq!(article.description, "it's here");
        }

        #[test]
        fn test_description_whitespace_trimmed() {
            let raw = entry(
                "T",
                "  \n<p>  spaced  </p>\n ",
                Some("Wed, 01 Jan 2025 10:00:00 GMT"),
            );
            let article = normalize_entry(&raw).unwrap();
            assert_eq!(article.description, "spaced");
        }

        #[test]
        fn test_title_anchor_markup_stripped() {
            let raw = entry(
                "<a href=\"http://x/3\">Linked</a> headline",
                "",
                Some("Wed, 01 Jan 2025 10:00:00 GMT"),
            );
            let article = normalize_entry(&raw).unwrap();
            assert_eq!(article.title, "Linked headline");
        }

        #[test]
        fn test_title_decoded_once() {
            let raw = entry("AT&amp;amp;T", "", Some("Wed, 01 Jan 2025 10:00:00 GMT"));
            let article = normalize_entry(&raw).unwrap();
            assert_eq!(article.title, "AT&amp;T");
        }

        #[test]
        fn test_title_escaped_markup_is_text() {
            let raw = entry("Use &lt;img&gt; tags", "", Some("Wed, 01 Jan 2025 10:00:00 GMT"));
            let article = normalize_entry(&raw).unwrap();
            assert_eq!(article.title, "Use <img> tags");
        }

        #[test]
        fn test_title_with_angle_brackets_kept() {
            let raw = entry("Vec&lt;T&gt; tips", "", Some("Wed, 01 Jan 2025 10:00:00 GMT"));
            let article = normalize_entry(&raw).unwrap();
            assert_eq!(article.title, "Vec<T> tips");
        }
    }

    mod format_pub_date_tests {
        use super::*;

        #[test]
        fn test_gmt() {
            assert_eq!(
                format_pub_date("Wed, 01 Jan 2025 10:00:00 GMT"),
                Some("2025-01-01 10:00:00".to_string())
            );
        }

        #[test]
        fn test_offset_is_not_converted() {
            assert_eq!(
                format_pub_date("Wed, 01 Jan 2025 23:30:00 +0700"),
                Some("2025-01-01 23:30:00".to_string())
            );
        }

        #[test]
        fn test_surrounding_whitespace() {
            assert_eq!(
                format_pub_date("  Wed, 01 Jan 2025 10:00:00 GMT\n"),
                Some("2025-01-01 10:00:00".to_string())
            );
        }

        #[test]
        fn test_garbage() {
            assert_eq!(format_pub_date(""), None);
            assert_eq!(format_pub_date("2025-01-01"), None);
        }
    }

    mod normalize_entries_tests {
        use super::*;

        #[test]
        fn test_dropped_entries_counted() {
            let entries = vec![
                entry("ok", "", Some("Wed, 01 Jan 2025 10:00:00 GMT")),
                entry("bad", "", Some("not a date")),
                entry("none", "", None),
                entry("ok2", "", Some("Thu, 02 Jan 2025 08:15:00 GMT")),
            ];

            let batch = normalize_entries(&entries);

            assert_eq!(batch.articles.len(), 2);
            assert_eq!(batch.dropped, 2);
            assert_eq!(batch.articles.len() + batch.dropped, entries.len());
            assert_eq!(batch.articles[0].title, "ok");
            assert_eq!(batch.articles[1].title, "ok2");
        }

        #[test]
        fn test_empty_input() {
            let batch = normalize_entries(&[]);
            assert!(batch.articles.is_empty());
            assert_eq!(batch.dropped, 0);
        }
    }

    #[test]
    fn test_article_json_field_names() {
        let article = Article {
            title: "t".to_string(),
            link: "l".to_string(),
            published: "p".to_string(),
            pub_date: "2025-01-01 10:00:00".to_string(),
            description: "d".to_string(),
            image: None,
        };

        let value = serde_json::to_value(&article).unwrap();
        assert_eq!(value["pubDate"], "2025-01-01 10:00:00");
        assert!(value["image"].is_null());
        assert!(value.get("pub_date").is_none());
    }
}
