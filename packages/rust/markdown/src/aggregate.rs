//! Document aggregation: merge independently produced fragments into one
//! document with a single introduction, conclusion and reference list.
//!
//! Body text is never rewritten beyond a one-level heading demotion. Framing
//! blocks are relocated, references are deduplicated byte-for-byte.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};

use scholarflow_shared::{Fragment, MemberFailurePolicy};

use crate::cleanup;
use crate::sections::{Heading, SectionLabel, is_annotation, is_fence, parse_heading, trim_block};

// ---------------------------------------------------------------------------
// Partitioning
// ---------------------------------------------------------------------------

/// One fragment split into framing blocks and body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionedFragment {
    /// Labelled introduction blocks, in order of appearance.
    pub introductions: Vec<String>,
    /// Everything outside labelled framing blocks.
    pub body: String,
    /// Labelled conclusion blocks, in order of appearance.
    pub conclusions: Vec<String>,
    /// Non-blank lines from every reference block.
    pub references: Vec<String>,
}

impl PartitionedFragment {
    fn push_block(&mut self, label: SectionLabel, lines: &[&str]) {
        match label {
            SectionLabel::Introduction => {
                let block = trim_block(lines);
                if !block.is_empty() {
                    self.introductions.push(block);
                }
            }
            SectionLabel::Conclusion => {
                let block = trim_block(lines);
                if !block.is_empty() {
                    self.conclusions.push(block);
                }
            }
            SectionLabel::References => self.references.extend(
                lines
                    .iter()
                    .map(|l| l.trim_end())
                    .filter(|l| !l.trim().is_empty())
                    .map(String::from),
            ),
        }
    }
}

/// A framing block still collecting lines.
struct OpenBlock<'a> {
    label: SectionLabel,
    level: usize,
    lines: Vec<&'a str>,
}

impl OpenBlock<'_> {
    /// Introductions and conclusions hold prose only, so any heading ends them.
    /// A reference list runs until a heading of the same or higher level.
    fn closed_by(&self, heading: &Heading) -> bool {
        heading.label.is_some()
            || heading.level <= self.level
            || self.label != SectionLabel::References
    }

    /// Introductions and conclusions end with their first paragraph.
    fn paragraph_done(&self) -> bool {
        self.label != SectionLabel::References && self.lines.iter().any(|l| !l.trim().is_empty())
    }
}

/// Split `text` by framing headings.
///
/// An introduction or conclusion block is the first paragraph under its
/// heading; whatever follows is body. A reference block runs until the next
/// heading of the same or higher level, or the next framing heading.
/// Annotation lines inside a framing block belong to the body. Unlabelled
/// text is all body.
pub fn partition(text: &str) -> PartitionedFragment {
    let mut out = PartitionedFragment::default();
    let mut body: Vec<&str> = Vec::new();
    let mut current: Option<OpenBlock<'_>> = None;
    let mut in_code = false;

    for line in text.lines() {
        if !in_code {
            if let Some(heading) = parse_heading(line) {
                if current.as_ref().is_some_and(|block| block.closed_by(&heading)) {
                    if let Some(block) = current.take() {
                        out.push_block(block.label, &block.lines);
                    }
                }
                if let Some(label) = heading.label {
                    current = Some(OpenBlock {
                        label,
                        level: heading.level,
                        lines: Vec::new(),
                    });
                    continue;
                }
            } else if line.trim().is_empty()
                && current.as_ref().is_some_and(OpenBlock::paragraph_done)
            {
                if let Some(block) = current.take() {
                    out.push_block(block.label, &block.lines);
                }
            }
        }

        if is_fence(line) {
            in_code = !in_code;
        }

        match current.as_mut() {
            Some(block) if !in_code => {
                if line.trim() == block.label.missing_notice() {
                    continue;
                }
                if is_annotation(line) {
                    body.push(line);
                } else {
                    block.lines.push(line);
                }
            }
            Some(block) => block.lines.push(line),
            None => body.push(line),
        }
    }

    if let Some(block) = current {
        out.push_block(block.label, &block.lines);
    }
    out.body = trim_block(&body);
    out
}

/// Body size used for the no-loss check: non-whitespace characters outside
/// heading lines. Code blocks count in full.
pub fn content_len(text: &str) -> usize {
    let mut in_code = false;
    text.lines()
        .filter(|line| {
            if is_fence(line) {
                in_code = !in_code;
                return true;
            }
            in_code || parse_heading(line).is_none()
        })
        .map(|line| line.chars().filter(|c| !c.is_whitespace()).count())
        .sum()
}

/// Push every ATX heading outside code blocks down one level.
///
/// Markdown has no level below 6, so a fragment's `#####` and `######`
/// headings both render as `######` after demotion. Heading text is never
/// rewritten, so the body length check is unaffected.
pub fn demote_headings(text: &str) -> String {
    static ATX_PREFIX_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(\s{0,3})(#{1,6})\s").expect("valid regex"));

    let mut in_code = false;
    text.lines()
        .map(|line| {
            if is_fence(line) {
                in_code = !in_code;
                return line.to_string();
            }
            if in_code {
                return line.to_string();
            }
            match ATX_PREFIX_RE.captures(line) {
                Some(caps) if caps[2].len() < 6 => {
                    let indent = caps[1].len();
                    format!("{}#{}", &line[..indent], &line[indent..])
                }
                _ => line.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// One body block in the merged document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyBlock {
    /// Originating member index (framing blocks keep their own index).
    pub index: usize,
    /// Level-one heading the block is emitted under.
    pub heading: String,
    /// Body text, headings not yet demoted.
    pub text: String,
    /// Whether this block is a failure sentinel.
    pub missing: bool,
}

/// The merged document before rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentSections {
    pub introduction: Option<String>,
    pub body: Vec<BodyBlock>,
    pub conclusion: Option<String>,
    pub references: Vec<String>,
}

impl DocumentSections {
    /// Render in the fixed order: Introduction, body blocks, Conclusion, References.
    pub fn render(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(self.body.len() + 3);

        parts.push(framing_section(
            SectionLabel::Introduction,
            self.introduction.as_deref(),
        ));

        for block in &self.body {
            let text = if block.missing {
                block.text.clone()
            } else {
                demote_headings(&block.text)
            };
            parts.push(format!("# {}\n\n{}", block.heading, text));
        }

        parts.push(framing_section(
            SectionLabel::Conclusion,
            self.conclusion.as_deref(),
        ));

        let references = if self.references.is_empty() {
            None
        } else {
            Some(self.references.join("\n"))
        };
        parts.push(framing_section(
            SectionLabel::References,
            references.as_deref(),
        ));

        parts.join("\n\n")
    }
}

fn framing_section(label: SectionLabel, content: Option<&str>) -> String {
    match content {
        Some(content) => format!("# {}\n\n{content}", label.title()),
        None => format!("# {}\n\n{}", label.title(), label.missing_notice()),
    }
}

/// Merges a joined parallel output, plus an optional framing fragment, into one document.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aggregator {
    policy: MemberFailurePolicy,
}

impl Aggregator {
    pub fn new(policy: MemberFailurePolicy) -> Self {
        Self { policy }
    }

    /// Build the merged sections.
    ///
    /// The introduction is the first one found (framing first, then members in
    /// index order); the conclusion is the last one found (members, then framing).
    pub fn sections(&self, framing: Option<&Fragment>, fragments: &[Fragment]) -> DocumentSections {
        let mut ordered: Vec<&Fragment> = fragments.iter().collect();
        ordered.sort_by_key(|f| f.index);

        let mut doc = DocumentSections::default();
        let mut seen_refs: HashSet<String> = HashSet::new();
        let mut framing_conclusion = None;

        let framing_parts =
            framing.map(|f| (f, partition(cleanup::unwrap_markdown_fence(&f.text))));
        let member_iter = ordered.into_iter().filter_map(|f| {
            if f.missing {
                return match self.policy {
                    MemberFailurePolicy::WarningBlock => Some((f, None)),
                    MemberFailurePolicy::LogOnly => {
                        debug!(index = f.index, step = %f.step, "omitting missing member from document");
                        None
                    }
                };
            }
            Some((f, Some(partition(cleanup::unwrap_markdown_fence(&f.text)))))
        });

        let framing_iter = framing_parts.map(|(f, parts)| (f, Some(parts))).into_iter();

        for (position, (fragment, parts)) in framing_iter.chain(member_iter).enumerate() {
            let is_framing = position == 0 && framing.is_some();

            let Some(parts) = parts else {
                doc.body.push(BodyBlock {
                    index: fragment.index,
                    heading: block_heading(fragment),
                    text: fragment.text.clone(),
                    missing: true,
                });
                continue;
            };

            if doc.introduction.is_none() {
                doc.introduction = parts.introductions.first().cloned();
            }
            if let Some(conclusion) = parts.conclusions.last() {
                if is_framing {
                    framing_conclusion = Some(conclusion.clone());
                } else {
                    doc.conclusion = Some(conclusion.clone());
                }
            }
            for line in parts.references {
                if seen_refs.insert(line.clone()) {
                    doc.references.push(line);
                }
            }
            if !parts.body.is_empty() {
                doc.body.push(BodyBlock {
                    index: fragment.index,
                    heading: block_heading(fragment),
                    text: parts.body,
                    missing: false,
                });
            }
        }

        if framing_conclusion.is_some() {
            doc.conclusion = framing_conclusion;
        }
        doc
    }

    /// Merge and render, then run the final cleanup passes.
    #[instrument(skip_all, fields(fragments = fragments.len(), framing = framing.is_some()))]
    pub fn aggregate(&self, framing: Option<&Fragment>, fragments: &[Fragment]) -> String {
        let doc = self.sections(framing, fragments);
        debug!(
            body_blocks = doc.body.len(),
            references = doc.references.len(),
            has_introduction = doc.introduction.is_some(),
            has_conclusion = doc.conclusion.is_some(),
            "document sections merged"
        );
        cleanup::run_pipeline(&doc.render())
    }
}

fn block_heading(fragment: &Fragment) -> String {
    fragment
        .title
        .clone()
        .unwrap_or_else(|| fragment.step.clone())
}
