//! Final cleanup pipeline for merged and formatted documents.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.
//! Passes only touch whitespace and wrapper fences, never content.

use std::sync::LazyLock;

use regex::Regex;

use crate::sections::{is_fence, parse_heading};

/// Run the full cleanup pipeline on a finished document.
pub fn run_pipeline(md: &str) -> String {
    let mut result = unwrap_markdown_fence(md).to_string();

    result = normalize_line_endings(&result);
    result = normalize_whitespace(&result);
    result = clean_blank_lines(&result);
    result = ensure_trailing_newline(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Unwrap a document-wide fence
// ---------------------------------------------------------------------------

/// Strip a fence wrapping the whole text (```` ```markdown ... ``` ````).
///
/// Generation steps sometimes return their entire answer inside one fenced
/// block, which would hide every heading from the section partitioner.
pub fn unwrap_markdown_fence(md: &str) -> &str {
    static OPEN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^```(?:markdown|md)?[ \t]*\r?\n").expect("valid regex"));

    let trimmed = md.trim();
    let Some(open) = OPEN_RE.find(trimmed) else {
        return md;
    };
    let Some(inner) = trimmed[open.end()..].strip_suffix("```") else {
        return md;
    };
    // A fence inside means the outer lines open and close different blocks.
    if inner.lines().any(|l| l.trim_start().starts_with("```")) {
        return md;
    }
    inner.trim_end()
}

// ---------------------------------------------------------------------------
// Pass 2: Normalize line endings
// ---------------------------------------------------------------------------

fn normalize_line_endings(md: &str) -> String {
    md.replace("\r\n", "\n")
}

// ---------------------------------------------------------------------------
// Pass 3: Normalize whitespace
// ---------------------------------------------------------------------------

/// Clean up trailing whitespace on lines.
///
/// Fenced code is left untouched. A hard line break (two or more trailing
/// spaces before a continuation line) is normalized to exactly two spaces.
fn normalize_whitespace(md: &str) -> String {
    let lines: Vec<&str> = md.lines().collect();
    let mut in_code = false;
    let mut out = Vec::with_capacity(lines.len());

    for (i, line) in lines.iter().enumerate() {
        if is_fence(line) {
            in_code = !in_code;
            out.push(line.trim_end().to_string());
            continue;
        }
        if in_code {
            out.push(line.to_string());
            continue;
        }

        let trimmed = line.trim_end();
        let hard_break = !trimmed.is_empty()
            && line.ends_with("  ")
            && parse_heading(line).is_none()
            && lines.get(i + 1).is_some_and(|next| !next.trim().is_empty());
        if hard_break {
            out.push(format!("{trimmed}  "));
        } else {
            out.push(trimmed.to_string());
        }
    }

    out.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 4: Clean up excessive blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of blank lines into exactly one.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Pass 5: Ensure trailing newline
// ---------------------------------------------------------------------------

/// Ensure the file ends with exactly one newline.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_end_matches('\n');
    format!("{trimmed}\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwrap_markdown_fence_strips_wrapper() {
        let input = "```markdown\n# Title\n\nBody\n```\n";
        assert_eq!(unwrap_markdown_fence(input), "# Title\n\nBody");
    }

    #[test]
    fn unwrap_markdown_fence_keeps_code_documents() {
        let input = "```python\nprint(1)\n```";
        assert_eq!(unwrap_markdown_fence(input), input);

        let two_blocks = "```\na\n```\n\ntext\n\n```\nb\n```";
        assert_eq!(unwrap_markdown_fence(two_blocks), two_blocks);
    }

    #[test]
    fn clean_blank_lines_collapses_excess() {
        let input = "Line 1\n\n\n\n\nLine 2";
        let result = clean_blank_lines(input);
        assert_eq!(result, "Line 1\n\nLine 2");
    }

    #[test]
    fn clean_blank_lines_keeps_double() {
        let input = "Line 1\n\nLine 2";
        let result = clean_blank_lines(input);
        assert_eq!(result, input);
    }

    #[test]
    fn normalize_whitespace_trims_trailing() {
        let input = "Line 1 \nLine 2\t\nLine 3   ";
        let result = normalize_whitespace(input);
        assert_eq!(result, "Line 1\nLine 2\nLine 3");
    }

    #[test]
    fn normalize_whitespace_keeps_hard_breaks() {
        let input = "Roses are red,    \nviolets are blue.  \n\n## Heading  \nText";
        let result = normalize_whitespace(input);
        assert_eq!(result, "Roses are red,  \nviolets are blue.\n\n## Heading\nText");
    }

    #[test]
    fn normalize_whitespace_skips_fenced_code() {
        let input = "Text \n```text   \nkeep   \n\tindent\t\n```\nAfter  ";
        let result = normalize_whitespace(input);
        assert_eq!(result, "Text\n```text\nkeep   \n\tindent\t\n```\nAfter");
    }

    #[test]
    fn ensure_trailing_newline_normalizes_multiple() {
        assert_eq!(ensure_trailing_newline("Content"), "Content\n");
        assert_eq!(ensure_trailing_newline("Content\n\n\n"), "Content\n");
    }

    #[test]
    fn full_pipeline_cleans_document() {
        let input = "# Introduction  \r\n\r\nText\n  \n\n\n\n## Part\n\nMore\n\n\n";
        let result = run_pipeline(input);
        assert_eq!(result, "# Introduction\n\nText\n\n## Part\n\nMore\n");
    }
}
