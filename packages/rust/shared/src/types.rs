//! Core pipeline data model for scholarflow runs.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, ScholarflowError};

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// StepResult
// ---------------------------------------------------------------------------

/// The uniform output of every pipeline step.
///
/// Callers never branch on the variant; they ask for [`StepResult::as_text`] or
/// [`StepResult::as_structured`] and let the coercion happen here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResult {
    /// Free text (generation output, serialized function output).
    Text(String),
    /// A structured value (joined parallel output, explicit data).
    Data(Value),
}

impl StepResult {
    /// Build a text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Build a structured result.
    pub fn data(value: Value) -> Self {
        Self::Data(value)
    }

    /// The empty text result fed to the first step of a run.
    pub fn empty() -> Self {
        Self::Text(String::new())
    }

    /// Text view of the result. Structured values serialize to compact JSON;
    /// a bare JSON string is returned without quotes.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(text) => Cow::Borrowed(text),
            Self::Data(Value::String(text)) => Cow::Borrowed(text),
            Self::Data(value) => Cow::Owned(value.to_string()),
        }
    }

    /// Structured view of the result. Text is parsed as JSON when it is a JSON
    /// object or array literal (optionally inside a fenced code block).
    pub fn as_structured(&self) -> Option<Value> {
        match self {
            Self::Data(value) => Some(value.clone()),
            Self::Text(text) => parse_structured(text),
        }
    }

    /// Whether the result carries no content at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Data(value) => value.is_null(),
        }
    }
}

impl Default for StepResult {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Display for StepResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_text())
    }
}

fn parse_structured(text: &str) -> Option<Value> {
    let trimmed = strip_code_fence(text.trim());
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Strip a single surrounding ```` ``` ```` fence (with optional info string).
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(newline) = rest.find('\n') else {
        return text;
    };
    rest[newline + 1..]
        .trim_end()
        .strip_suffix("```")
        .map(str::trim)
        .unwrap_or(text)
}

// ---------------------------------------------------------------------------
// Fragment / JoinedOutput
// ---------------------------------------------------------------------------

/// The fixed notice standing in for a parallel member that failed.
pub fn missing_notice(index: usize) -> String {
    format!("> **Warning:** Output {} is missing or malformed.", index + 1)
}

/// One member's contribution to a joined parallel output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Zero-based ordinal of the member inside its parallel group.
    pub index: usize,
    /// Name of the step that produced this fragment.
    pub step: String,
    /// Optional title (e.g. the assigned subtopic).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// The fragment text.
    pub text: String,
    /// Whether this slot is a failure sentinel.
    #[serde(default)]
    pub missing: bool,
}

impl Fragment {
    /// A fragment produced by a successful member.
    pub fn new(index: usize, step: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            index,
            step: step.into(),
            title: None,
            text: text.into(),
            missing: false,
        }
    }

    /// The sentinel placed in a failed member's slot.
    pub fn missing(index: usize, step: impl Into<String>) -> Self {
        Self {
            index,
            step: step.into(),
            title: None,
            text: missing_notice(index),
            missing: true,
        }
    }

    /// Attach a title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Ordered join of a parallel group's results. Slot `i` always belongs to member `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedOutput {
    pub fragments: Vec<Fragment>,
}

impl JoinedOutput {
    pub fn new(fragments: Vec<Fragment>) -> Self {
        Self { fragments }
    }

    /// Wrap into a structured [`StepResult`].
    pub fn into_result(self) -> StepResult {
        StepResult::Data(serde_json::to_value(&self).unwrap_or(Value::Null))
    }

    /// Recover a joined output from a predecessor result, if it is one.
    pub fn from_result(result: &StepResult) -> Option<Self> {
        let value = result.as_structured()?;
        serde_json::from_value(value).ok()
    }

    /// Number of slots (present and missing).
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Fragments that are not failure sentinels.
    pub fn present(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.iter().filter(|f| !f.missing)
    }

    /// Render as readable Markdown, one top-level section per slot.
    pub fn render(&self) -> String {
        self.fragments
            .iter()
            .map(|f| {
                let heading = match &f.title {
                    Some(title) => format!("{}: {title}", f.step),
                    None => f.step.clone(),
                };
                format!("# {heading}\n\n{}", f.text.trim_end())
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

// ---------------------------------------------------------------------------
// LinkSet
// ---------------------------------------------------------------------------

/// Wire shape of the link-collection stage: `{"url_links": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCollection {
    #[serde(default)]
    pub url_links: Vec<String>,
}

/// A deduplicated set of URLs. Iteration order is sorted, so equality and
/// serialization never depend on discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LinkCollection", into = "LinkCollection")]
pub struct LinkSet(BTreeSet<String>);

impl LinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a URL; returns `false` if it was already present.
    pub fn insert(&mut self, url: impl Into<String>) -> bool {
        self.0.insert(url.into())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.0.contains(url)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    /// Convert into the wire collection.
    pub fn to_collection(&self) -> LinkCollection {
        LinkCollection {
            url_links: self.0.iter().cloned().collect(),
        }
    }
}

impl From<LinkCollection> for LinkSet {
    fn from(collection: LinkCollection) -> Self {
        collection.url_links.into_iter().collect()
    }
}

impl From<LinkSet> for LinkCollection {
    fn from(set: LinkSet) -> Self {
        Self {
            url_links: set.0.into_iter().collect(),
        }
    }
}

impl FromIterator<String> for LinkSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<String> for LinkSet {
    fn extend<I: IntoIterator<Item = String>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

// ---------------------------------------------------------------------------
// PlanningOutput
// ---------------------------------------------------------------------------

/// The planner's structured output consumed by the research tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningOutput {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_style: Option<String>,
    #[serde(alias = "subtopics")]
    pub topics: Subtopics,
}

/// Subtopics as a list, or as a map keyed by index (`"0"`/`"1"`/...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Subtopics {
    List(Vec<Subtopic>),
    Keyed(BTreeMap<String, Subtopic>),
}

/// A single research assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtopic {
    pub topic: String,
    #[serde(default)]
    pub key_ideas: Vec<String>,
    #[serde(default)]
    pub writing_guideline: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_count: Option<WordCount>,
}

/// Word count as a number or free-form range (`"1000-2000 words"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WordCount {
    Count(u64),
    Range(String),
}

impl std::fmt::Display for WordCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{n} words"),
            Self::Range(s) => f.write_str(s),
        }
    }
}

impl PlanningOutput {
    /// Parse the planner's text. Accepts a bare JSON object or the first
    /// `{ ... }` span embedded in surrounding prose or a code fence.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if let Ok(parsed) = serde_json::from_str(trimmed) {
            return Ok(parsed);
        }

        match (trimmed.find('{'), trimmed.rfind('}')) {
            (Some(start), Some(end)) if start < end => {
                serde_json::from_str(&trimmed[start..=end])
                    .map_err(|e| ScholarflowError::parse(format!("planning output: {e}")))
            }
            _ => Err(ScholarflowError::parse(
                "planning output contains no JSON object",
            )),
        }
    }

    /// Subtopics in zero-based order. Keyed maps are ordered by numeric key,
    /// so `{"1": .., "2": ..}` and `{"0": .., "1": ..}` both start at index 0.
    pub fn subtopics(&self) -> Vec<&Subtopic> {
        match &self.topics {
            Subtopics::List(list) => list.iter().collect(),
            Subtopics::Keyed(map) => {
                let mut entries: Vec<(&String, &Subtopic)> = map.iter().collect();
                entries.sort_by(|(a, _), (b, _)| subtopic_key_order(a, b));
                entries.into_iter().map(|(_, s)| s).collect()
            }
        }
    }

    /// The subtopic at zero-based `index`.
    pub fn subtopic(&self, index: usize) -> Option<&Subtopic> {
        self.subtopics().get(index).copied()
    }
}

fn subtopic_key_order(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<usize>(), b.trim().parse::<usize>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

impl Subtopic {
    /// Render the assignment block handed to a research task.
    pub fn render_assignment(&self, index: usize) -> String {
        let mut out = format!("## Assigned subtopic (index {index})\n\nTopic: {}\n", self.topic);
        if !self.key_ideas.is_empty() {
            out.push_str("Key ideas:\n");
            for idea in &self.key_ideas {
                out.push_str(&format!("- {idea}\n"));
            }
        }
        if !self.writing_guideline.is_empty() {
            out.push_str(&format!("Writing guideline: {}\n", self.writing_guideline));
        }
        if let Some(count) = &self.word_count {
            out.push_str(&format!("Word count: {count}\n"));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Interaction history
// ---------------------------------------------------------------------------

/// Identity under which a generation step records its history (`owner:role`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    pub owner: String,
    pub role: String,
}

impl IdentityKey {
    pub fn new(owner: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            role: role.into(),
        }
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.owner, self.role)
    }
}

/// Who produced an interaction entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionRole {
    User,
    Assistant,
}

impl InteractionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for InteractionRole {
    type Err = ScholarflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(ScholarflowError::parse(format!(
                "unknown interaction role '{other}'"
            ))),
        }
    }
}

/// One append-only history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub role: InteractionRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Interaction {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: InteractionRole::User,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: InteractionRole::Assistant,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn step_result_text_coercion() {
        let data = StepResult::data(json!({"url_links": ["https://a/x"]}));
        assert_eq!(data.as_text(), r#"{"url_links":["https://a/x"]}"#);

        let bare = StepResult::data(json!("plain"));
        assert_eq!(bare.as_text(), "plain");
    }

    #[test]
    fn step_result_structured_coercion() {
        let text = StepResult::text("  {\"a\": 1}  ");
        assert_eq!(text.as_structured(), Some(json!({"a": 1})));

        let fenced = StepResult::text("```json\n{\"a\": 2}\n```");
        assert_eq!(fenced.as_structured(), Some(json!({"a": 2})));

        let prose = StepResult::text("The findings suggest {a} pattern.");
        assert_eq!(prose.as_structured(), None);
    }

    #[test]
    fn joined_output_survives_result_wrapping() {
        let joined = JoinedOutput::new(vec![
            Fragment::new(0, "Agent 1", "alpha"),
            Fragment::missing(1, "Agent 2"),
        ]);
        let result = joined.clone().into_result();
        let recovered = JoinedOutput::from_result(&result).expect("joined output");
        assert_eq!(recovered, joined);
        assert_eq!(recovered.present().count(), 1);
        assert!(recovered.fragments[1].text.contains("Output 2 is missing"));

        // Also recoverable after text serialization by an upstream adapter.
        let as_text = StepResult::text(result.as_text().into_owned());
        assert_eq!(JoinedOutput::from_result(&as_text), Some(joined));
    }

    #[test]
    fn link_set_dedups_and_serializes_as_collection() {
        let set: LinkSet = ["https://b/y", "https://a/x", "https://a/x"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(set.len(), 2);
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json, json!({"url_links": ["https://a/x", "https://b/y"]}));
    }

    #[test]
    fn planning_output_list_form() {
        let text = r#"Here is the plan:
{"title": "ML for coordination compounds",
 "topics": [
   {"topic": "Descriptors", "key_ideas": ["graphs"], "writing_guideline": "survey", "word_count": "1000-2000 words"},
   {"topic": "Datasets", "key_ideas": [], "writing_guideline": "", "word_count": 800}
 ]}
Good luck."#;
        let plan = PlanningOutput::parse(text).expect("parse plan");
        assert_eq!(plan.title, "ML for coordination compounds");
        assert_eq!(plan.subtopic(0).unwrap().topic, "Descriptors");
        assert_eq!(plan.subtopic(1).unwrap().word_count, Some(WordCount::Count(800)));
        assert!(plan.subtopic(2).is_none());
    }

    #[test]
    fn planning_output_keyed_form_is_zero_based() {
        let one_based = r#"{"title": "T", "topics": {
            "2": {"topic": "second"}, "10": {"topic": "tenth"}, "1": {"topic": "first"}}}"#;
        let plan = PlanningOutput::parse(one_based).expect("parse");
        let topics: Vec<_> = plan.subtopics().iter().map(|s| s.topic.as_str()).collect();
        assert_eq!(topics, vec!["first", "second", "tenth"]);
        assert_eq!(plan.subtopic(0).unwrap().topic, "first");
    }

    #[test]
    fn planning_output_without_json_fails() {
        let err = PlanningOutput::parse("no plan today").unwrap_err();
        assert!(err.to_string().contains("no JSON object"));
    }

    #[test]
    fn identity_key_display() {
        let key = IdentityKey::new("user_id", "researcher_0");
        assert_eq!(key.to_string(), "user_id:researcher_0");
    }

    #[test]
    fn subtopic_assignment_lists_ideas() {
        let sub = Subtopic {
            topic: "Descriptors".into(),
            key_ideas: vec!["graphs".into(), "fingerprints".into()],
            writing_guideline: "Compare approaches.".into(),
            word_count: Some(WordCount::Range("1000-2000 words".into())),
        };
        let block = sub.render_assignment(0);
        assert!(block.contains("index 0"));
        assert!(block.contains("- fingerprints"));
        assert!(block.contains("1000-2000 words"));
    }
}
