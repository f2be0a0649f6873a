//! Structural validation of generated research fragments.
//!
//! Each rule is an independent predicate contributing at most one warning line.
//! Warnings are appended to the end of the text, and only when the exact line
//! is not already present, so validation is idempotent.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::aggregate::partition;

pub const TABLE_MISSING: &str = "> **Warning:** Required Markdown table is missing.";
pub const TABLE_FORMAT: &str = "> **Warning:** Table format is incorrect.";
pub const EQUATIONS_MISSING: &str = "> **Warning:** Required equations are missing.";
pub const NO_EQUATIONS_NOTICE: &str = "> **Note:** No equations are relevant for this subtopic.";
pub const LOCATORS_MISSING: &str = "> **Warning:** Some references are missing DOIs or URLs.";

/// A single mechanical check over a fragment's text.
pub trait StructuralRule: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// The warning line appended when the rule is violated.
    fn warning(&self) -> &'static str;

    /// Whether `text` violates the rule.
    fn violated(&self, text: &str) -> bool;
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// At least one pipe-delimited table row must be present.
pub struct TableRule;

impl StructuralRule for TableRule {
    fn name(&self) -> &'static str {
        "table"
    }

    fn warning(&self) -> &'static str {
        TABLE_MISSING
    }

    fn violated(&self, text: &str) -> bool {
        static ROW_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"(?m)^\s*\|.*\|\s*$").expect("valid regex"));
        !ROW_RE.is_match(text)
    }
}

/// Box-drawing characters mean a table was drawn instead of written in pipe syntax.
pub struct BoxDrawingRule;

impl StructuralRule for BoxDrawingRule {
    fn name(&self) -> &'static str {
        "box-drawing"
    }

    fn warning(&self) -> &'static str {
        TABLE_FORMAT
    }

    fn violated(&self, text: &str) -> bool {
        text.chars().any(|c| ('\u{2500}'..='\u{257F}').contains(&c))
    }
}

/// At least one math span, unless the fragment states that none apply.
pub struct EquationRule;

impl StructuralRule for EquationRule {
    fn name(&self) -> &'static str {
        "equation"
    }

    fn warning(&self) -> &'static str {
        EQUATIONS_MISSING
    }

    fn violated(&self, text: &str) -> bool {
        static MATH_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(
                r"(?s)\$\$.+?\$\$|\$[^\s$](?:[^$\n]*[^\s$])?\$|\\\(.+?\\\)|\\\[.+?\\\]",
            )
            .expect("valid regex")
        });

        if text.contains(NO_EQUATIONS_NOTICE) {
            return false;
        }
        !MATH_RE.is_match(text)
    }
}

/// Every listed reference needs a DOI or a URL.
pub struct ReferenceLocatorRule;

impl StructuralRule for ReferenceLocatorRule {
    fn name(&self) -> &'static str {
        "reference-locator"
    }

    fn warning(&self) -> &'static str {
        LOCATORS_MISSING
    }

    fn violated(&self, text: &str) -> bool {
        static ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"^\s*(?:\d+[.)]|\(\d+\)|\[\d+\]|[-*+])\s+\S").expect("valid regex")
        });
        static LOCATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"(?i)10\.\d{4,9}/\S+|\bdoi:\s*\S+|\b[a-z][a-z0-9+.\-]*://\S+")
                .expect("valid regex")
        });

        partition(text)
            .references
            .iter()
            .filter(|line| ENTRY_RE.is_match(line))
            .any(|line| !LOCATOR_RE.is_match(line))
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// An ordered list of rules applied to one fragment at a time.
pub struct StructuralValidator {
    rules: Vec<Box<dyn StructuralRule>>,
}

impl Default for StructuralValidator {
    fn default() -> Self {
        Self {
            rules: vec![
                Box::new(TableRule),
                Box::new(BoxDrawingRule),
                Box::new(EquationRule),
                Box::new(ReferenceLocatorRule),
            ],
        }
    }
}

impl StructuralValidator {
    /// A validator with no rules; add them with [`StructuralValidator::with_rule`].
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: impl StructuralRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Warnings that would be appended to `text`, in rule order.
    pub fn pending_warnings(&self, text: &str) -> Vec<&'static str> {
        self.rules
            .iter()
            .filter(|rule| rule.violated(text) && !text.contains(rule.warning()))
            .inspect(|rule| debug!(rule = rule.name(), "structural rule violated"))
            .map(|rule| rule.warning())
            .collect()
    }

    /// Return `text` with every newly triggered warning appended on its own line.
    pub fn validate(&self, text: &str) -> String {
        let warnings = self.pending_warnings(text);
        if warnings.is_empty() {
            return text.to_string();
        }
        format!("{}\n\n{}\n", text.trim_end(), warnings.join("\n\n"))
    }
}

/// Validate with the default rule set.
pub fn validate(text: &str) -> String {
    static DEFAULT: LazyLock<StructuralValidator> = LazyLock::new(StructuralValidator::default);
    DEFAULT.validate(text)
}
