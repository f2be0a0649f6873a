//! Reduce fetched documents to plain text.

use scraper::{Html, Selector};

/// How a response body is turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Paragraph text extracted from HTML.
    Html,
    /// Plain text or Markdown, kept verbatim.
    Text,
}

impl SourceKind {
    /// Classify a `Content-Type` header value. `None` means unsupported.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        match mime {
            "text/html" | "application/xhtml+xml" => Some(Self::Html),
            "text/plain" | "text/markdown" | "text/x-markdown" => Some(Self::Text),
            _ => None,
        }
    }
}

/// Join the text of every `<p>` longer than `min_chars`, one per line.
pub fn extract_paragraphs(html: &str, min_chars: usize) -> String {
    let doc = Html::parse_document(html);
    let Ok(p_sel) = Selector::parse("p") else {
        return String::new();
    };

    doc.select(&p_sel)
        .map(|p| collapse_whitespace(&p.text().collect::<String>()))
        .filter(|text| text.chars().count() > min_chars)
        .collect::<Vec<_>>()
        .join("\n")
}

/// `<title>`, falling back to the first `<h1>`.
pub fn extract_title(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    ["title", "h1"].iter().find_map(|tag| {
        let sel = Selector::parse(tag).ok()?;
        doc.select(&sel)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty())
    })
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_classification() {
        assert_eq!(
            SourceKind::from_content_type("text/html; charset=utf-8"),
            Some(SourceKind::Html)
        );
        assert_eq!(SourceKind::from_content_type("text/markdown"), Some(SourceKind::Text));
        assert_eq!(SourceKind::from_content_type("application/pdf"), None);
    }

    #[test]
    fn paragraphs_filtered_by_length() {
        let html = "<p>tiny</p><p>  This paragraph is comfortably longer than forty characters.  </p>";
        assert_eq!(
            extract_paragraphs(html, 40),
            "This paragraph is comfortably longer than forty characters."
        );
        assert_eq!(extract_paragraphs(html, 1000), "");
    }

    #[test]
    fn title_falls_back_to_h1() {
        assert_eq!(
            extract_title("<html><body><h1> Spin  States </h1></body></html>").as_deref(),
            Some("Spin States")
        );
        assert_eq!(extract_title("<p>none</p>"), None);
    }
}
