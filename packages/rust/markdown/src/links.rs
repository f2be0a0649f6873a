//! Link extraction from free text carrying embedded `{"url_links": [...]}` objects.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use scholarflow_shared::{LinkCollection, LinkSet};

/// Collect every URL from every embedded link-list object in `text`.
///
/// Each occurrence is parsed on its own; one that fails to parse is skipped
/// without affecting the rest. The result is a set, so neither duplicates nor
/// the order of occurrences change it.
pub fn extract(text: &str) -> LinkSet {
    static LINKS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"\{[^{}]*"url_links"[^{}]*\}"#).expect("valid regex"));

    let mut links = LinkSet::new();
    for found in LINKS_RE.find_iter(text) {
        match serde_json::from_str::<LinkCollection>(found.as_str()) {
            Ok(collection) => links.extend(
                collection
                    .url_links
                    .into_iter()
                    .map(|url| url.trim().to_string())
                    .filter(|url| !url.is_empty()),
            ),
            Err(e) => debug!(error = %e, offset = found.start(), "skipping unparsable link fragment"),
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicated_occurrence_dedups() {
        let obj = r#"{"url_links": ["https://a/x", "https://a/x", "https://b/y"]}"#;
        let text = format!("First pass:\n{obj}\nSecond pass:\n{obj}\n");
        let links = extract(&text);
        assert_eq!(links.len(), 2);
        assert!(links.contains("https://a/x"));
        assert!(links.contains("https://b/y"));
    }

    #[test]
    fn order_of_occurrences_irrelevant() {
        let a = r#"{"url_links": ["https://a/1", "https://a/2"]}"#;
        let b = r#"{"url_links": ["https://b/1"]}"#;
        let c = r#"{"url_links": ["https://a/2", "https://c/1"]}"#;
        let forward = extract(&format!("{a} text {b} more {c}"));
        let backward = extract(&format!("{c}\n{b}\n{a}"));
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 4);
    }

    #[test]
    fn malformed_occurrence_skipped() {
        let text = r#"bad: {"url_links": [https://broken]} good: {"url_links": ["https://ok/1"]}"#;
        let links = extract(text);
        assert_eq!(links.len(), 1);
        assert!(links.contains("https://ok/1"));
    }

    #[test]
    fn no_occurrences_yields_empty_set() {
        assert!(extract("No links were found for this topic.").is_empty());
    }

    #[test]
    fn extraction_is_idempotent_over_its_output() {
        let text = r#"{"url_links": ["https://b/y", "https://a/x"]}"#;
        let once = extract(text);
        let reserialized = serde_json::to_string(&once).unwrap();
        assert_eq!(extract(&reserialized), once);
    }
}
