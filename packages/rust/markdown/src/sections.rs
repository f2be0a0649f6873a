//! Heading and line classification shared by the validator and the aggregator.

use std::sync::LazyLock;

use regex::Regex;

/// Level assigned to a bold label line (`**References**`). Sorts below every
/// ATX heading, so any real heading closes a bold-labelled block.
pub(crate) const BOLD_LABEL_LEVEL: usize = 7;

/// The framing sections a fragment may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionLabel {
    Introduction,
    Conclusion,
    References,
}

impl SectionLabel {
    /// Heading text used in the merged document.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Introduction => "Introduction",
            Self::Conclusion => "Conclusion",
            Self::References => "References",
        }
    }

    /// The block emitted in place of an absent section.
    pub fn missing_notice(&self) -> String {
        format!("> **Warning:** {} is missing.", self.title())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Heading {
    pub level: usize,
    pub label: Option<SectionLabel>,
}

/// Recognize an ATX heading, or a bold line naming a framing section.
pub(crate) fn parse_heading(line: &str) -> Option<Heading> {
    static ATX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^\s{0,3}(#{1,6})\s+(.+?)(?:\s+#+)?\s*$").expect("valid regex")
    });
    static BOLD_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\s*\*\*([^*]+?)\*\*\s*:?\s*$").expect("valid regex"));

    if let Some(caps) = ATX_RE.captures(line) {
        return Some(Heading {
            level: caps[1].len(),
            label: classify(&caps[2]),
        });
    }

    // Plain bold lines are emphasis, not structure, unless they name a section.
    let caps = BOLD_RE.captures(line)?;
    let label = classify(&caps[1])?;
    Some(Heading {
        level: BOLD_LABEL_LEVEL,
        label: Some(label),
    })
}

/// Map heading text to a framing label, ignoring numbering, emphasis and case.
pub(crate) fn classify(title: &str) -> Option<SectionLabel> {
    static NUMBERING_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)^(?:\d+(?:\.\d+)*\.?|[ivx]+\.)\s+").expect("valid regex")
    });

    let lowered = title
        .trim()
        .trim_matches(|c| c == '*' || c == '_')
        .trim()
        .to_lowercase();
    let stripped = NUMBERING_RE.replace(&lowered, "");

    match stripped.trim().trim_end_matches(':').trim() {
        "introduction" | "intro" => Some(SectionLabel::Introduction),
        "conclusion" | "conclusions" | "concluding remarks" => Some(SectionLabel::Conclusion),
        "references" | "reference list" | "bibliography" | "works cited" => {
            Some(SectionLabel::References)
        }
        _ => None,
    }
}

/// Opening or closing line of a fenced code block.
pub(crate) fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

/// A validator or member-failure annotation (`> **Warning:** ...`, `> **Note:** ...`).
pub(crate) fn is_annotation(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("> **Warning:**") || trimmed.starts_with("> **Note:**")
}

/// Drop whitespace-only lines at both ends; inner lines are kept verbatim.
pub(crate) fn trim_block(lines: &[&str]) -> String {
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(start), Some(end)) => lines[start..=end].join("\n"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atx_headings_classified() {
        let h = parse_heading("# Introduction").unwrap();
        assert_eq!(h.level, 1);
        assert_eq!(h.label, Some(SectionLabel::Introduction));

        let h = parse_heading("### 4. Concluding Remarks").unwrap();
        assert_eq!(h.level, 3);
        assert_eq!(h.label, Some(SectionLabel::Conclusion));

        let h = parse_heading("## Methods ##").unwrap();
        assert_eq!(h.label, None);
    }

    #[test]
    fn bold_labels_only_count_when_framing() {
        let h = parse_heading("**Bibliography:**").unwrap();
        assert_eq!(h.level, BOLD_LABEL_LEVEL);
        assert_eq!(h.label, Some(SectionLabel::References));

        assert!(parse_heading("**Key finding**").is_none());
        assert!(parse_heading("#hashtag").is_none());
    }

    #[test]
    fn trim_block_keeps_inner_lines() {
        let lines = ["", "  ", "first", "", "  indented", "   "];
        assert_eq!(trim_block(&lines), "first\n\n  indented");
        assert_eq!(trim_block(&["", " "]), "");
    }
}
