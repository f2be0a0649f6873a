//! The two concrete workflows and the per-run context they are built from.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument};

use scholarflow_collector::Collector;
use scholarflow_markdown::{Aggregator, extract_links, validate};
use scholarflow_shared::{
    AppConfig, Fragment, IdentityKey, JoinedOutput, MemberFailurePolicy, Result, ScholarflowError,
    StepResult,
};

use crate::capability::GenerationCapability;
use crate::generation::GenerationStep;
use crate::guides::CitationGuides;
use crate::history::InteractionHistory;
use crate::parallel::ParallelGroup;
use crate::progress::ProgressReporter;
use crate::report::ReportMaker;
use crate::step::{FunctionStep, Step};
use crate::workflow::{InputBinding, RunOutcome, Workflow, WorkflowSpec};

// ---------------------------------------------------------------------------
// Workflow kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowKind {
    /// Plan, research subtopics, validate, frame, merge, format.
    DeepSearch,
    /// Plan, collect links per subtopic, fetch sources, write a report.
    ResearchReport,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeepSearch => "deep-search",
            Self::ResearchReport => "research-report",
        }
    }

    /// Subtopics planned when the config does not say.
    pub fn default_subtopics(&self) -> usize {
        match self {
            Self::DeepSearch => 3,
            Self::ResearchReport => 4,
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowKind {
    type Err = ScholarflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "deep-search" => Ok(Self::DeepSearch),
            "research-report" => Ok(Self::ResearchReport),
            other => Err(ScholarflowError::validation(format!(
                "unknown workflow '{other}' (expected deep-search or research-report)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Run context
// ---------------------------------------------------------------------------

/// Everything a workflow needs, constructed once per run and handed to every
/// step at build time.
#[derive(Clone)]
pub struct RunContext {
    pub config: AppConfig,
    pub query: String,
    pub capability: Arc<dyn GenerationCapability>,
    pub history: Arc<dyn InteractionHistory>,
    pub collector: Arc<Collector>,
    pub guides: CitationGuides,
}

impl RunContext {
    pub fn new(
        config: AppConfig,
        query: impl Into<String>,
        capability: Arc<dyn GenerationCapability>,
        history: Arc<dyn InteractionHistory>,
    ) -> Result<Self> {
        let collector = Arc::new(Collector::new(config.collector.clone())?);
        let guides = CitationGuides::from_config(&config);
        Ok(Self {
            config,
            query: query.into(),
            capability,
            history,
            collector,
            guides,
        })
    }

    pub fn with_collector(mut self, collector: Arc<Collector>) -> Self {
        self.collector = collector;
        self
    }

    pub fn with_guides(mut self, guides: CitationGuides) -> Self {
        self.guides = guides;
        self
    }

    pub fn subtopic_count(&self, kind: WorkflowKind) -> usize {
        self.config
            .defaults
            .subtopic_count
            .unwrap_or_else(|| kind.default_subtopics())
            .max(1)
    }

    fn citation_style(&self) -> &str {
        &self.config.defaults.citation_style
    }

    fn generation(&self, name: &str, instruction: String) -> GenerationStep {
        GenerationStep::new(
            name,
            IdentityKey::new(&self.config.defaults.owner, name),
            instruction,
            Arc::clone(&self.capability),
            Arc::clone(&self.history),
        )
        .with_window(self.config.defaults.history_window)
    }

    fn researchers(&self, count: usize, instruction: &str) -> ParallelGroup {
        let members: Vec<Step> = (0..count)
            .map(|i| {
                self.generation(&format!("researcher_{i}"), instruction.to_string())
                    .with_subtopic(i)
                    .into()
            })
            .collect();
        ParallelGroup::new("research", members)
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn build(kind: WorkflowKind, ctx: &RunContext) -> Result<WorkflowSpec> {
    match kind {
        WorkflowKind::DeepSearch => deep_search(ctx),
        WorkflowKind::ResearchReport => research_report(ctx),
    }
}

/// Build and run `kind` for the context's query.
#[instrument(skip_all, fields(workflow = %kind))]
pub async fn run(
    kind: WorkflowKind,
    ctx: &RunContext,
    progress: Arc<dyn ProgressReporter>,
) -> Result<RunOutcome> {
    let spec = build(kind, ctx)?;
    info!(stages = ?spec.stage_names(), "workflow built");
    Workflow::new(spec)
        .with_progress(progress)
        .run(StepResult::text(ctx.query.clone()))
        .await
}

/// planning → research (parallel) → validate → synthesis → consolidate → formatting
pub fn deep_search(ctx: &RunContext) -> Result<WorkflowSpec> {
    let count = ctx.subtopic_count(WorkflowKind::DeepSearch);
    let guides = ctx.guides.list()?;
    let policy = ctx.config.pipeline.member_failure;

    let mut builder = WorkflowSpec::builder(WorkflowKind::DeepSearch.as_str())
        .step(ctx.generation(
            "planning",
            planning_instruction(count, ctx.citation_style(), PlanPurpose::Document),
        ))
        .parallel(ctx.researchers(count, RESEARCHER_INSTRUCTION));

    let fragments_from = if ctx.config.pipeline.validate_outputs {
        builder = builder.step(FunctionStep::blocking("validate", validate_fragments));
        "validate"
    } else {
        "research"
    };

    builder
        .step(ctx.generation("synthesis", SYNTHESIS_INSTRUCTION.to_string()))
        .step_with_inputs(
            FunctionStep::blocking("consolidate", move |text| consolidate(policy, &text)),
            vec![
                InputBinding::required("framing", "synthesis"),
                InputBinding::required("fragments", fragments_from),
            ],
        )
        .step(ctx.generation(
            "formatting",
            formatting_instruction(ctx.citation_style(), &guides),
        ))
        .build()
}

/// planning → research (parallel) → compiler → extract_links → report
pub fn research_report(ctx: &RunContext) -> Result<WorkflowSpec> {
    let count = ctx.subtopic_count(WorkflowKind::ResearchReport);
    let report = ReportMaker::new(
        Arc::clone(&ctx.capability),
        Arc::clone(&ctx.collector),
        report_instruction(ctx.citation_style()),
        ctx.query.clone(),
    );

    WorkflowSpec::builder(WorkflowKind::ResearchReport.as_str())
        .step(ctx.generation(
            "planning",
            planning_instruction(count, ctx.citation_style(), PlanPurpose::Sources),
        ))
        .parallel(ctx.researchers(count, LINK_RESEARCHER_INSTRUCTION))
        .step(ctx.generation("compiler", COMPILER_INSTRUCTION.to_string()))
        .step(FunctionStep::blocking("extract_links", |text| {
            serde_json::to_value(extract_links(&text).to_collection())
                .map_err(|e| ScholarflowError::internal(format!("serialize links: {e}")))
        }))
        .step(report.into_step("report"))
        .build()
}

// ---------------------------------------------------------------------------
// Function steps
// ---------------------------------------------------------------------------

fn parse_joined(step: &str, text: &str) -> Result<JoinedOutput> {
    serde_json::from_str(text).map_err(|e| {
        ScholarflowError::malformed_input(step, format!("expected joined fragments: {e}"))
    })
}

/// Run the structural validator over every present fragment.
fn validate_fragments(text: String) -> Result<Value> {
    let mut joined = parse_joined("validate", &text)?;
    for fragment in joined.fragments.iter_mut().filter(|f| !f.missing) {
        fragment.text = validate(&fragment.text);
    }
    serde_json::to_value(&joined)
        .map_err(|e| ScholarflowError::internal(format!("serialize fragments: {e}")))
}

#[derive(Debug, Deserialize)]
struct ConsolidateInput {
    #[serde(default)]
    framing: Option<String>,
    fragments: JoinedOutput,
}

/// Merge the framing text and the fragments into one document.
fn consolidate(policy: MemberFailurePolicy, text: &str) -> Result<Value> {
    let input: ConsolidateInput = serde_json::from_str(text).map_err(|e| {
        ScholarflowError::malformed_input("consolidate", format!("expected framing and fragments: {e}"))
    })?;
    let framing = input
        .framing
        .filter(|f| !f.trim().is_empty())
        .map(|f| Fragment::new(0, "synthesis", f));

    let document = Aggregator::new(policy).aggregate(framing.as_ref(), &input.fragments.fragments);
    Ok(Value::String(document))
}

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum PlanPurpose {
    Document,
    Sources,
}

fn planning_instruction(count: usize, style: &str, purpose: PlanPurpose) -> String {
    let goal = match purpose {
        PlanPurpose::Document => "a research document written section by section",
        PlanPurpose::Sources => "a source search carried out subtopic by subtopic",
    };
    format!(
        "You are the planner of {goal}.\n\
         Split the user's query into exactly {count} subtopics.\n\
         Answer with one JSON object and nothing else:\n\
         {{\"title\": string, \"citation_style\": \"{style}\", \"topics\": [\
         {{\"topic\": string, \"key_ideas\": [string], \"writing_guideline\": string, \"word_count\": number}}]}}\n\
         List the topics in the order they should appear. Subtopic indexes start at 0."
    )
}

const RESEARCHER_INSTRUCTION: &str = "You are a researcher writing one section of a research document.\n\
     Write only the assigned subtopic, in Markdown, starting with a level-one heading.\n\
     Include at least one Markdown pipe table. Include equations in $...$ or $$...$$ \
     where relevant; if none are relevant, write exactly: \
     > **Note:** No equations are relevant for this subtopic.\n\
     End with a `# References` section as a numbered list; every entry needs a DOI or URL.";

const SYNTHESIS_INSTRUCTION: &str = "You are the editor who frames a research document.\n\
     You receive every section written so far. Write only two sections: \
     `# Introduction`, which opens the whole document, and `# Conclusion`, which closes it.\n\
     Do not repeat or rewrite the sections themselves.";

fn formatting_instruction(style: &str, guides: &[String]) -> String {
    let available = if guides.is_empty() {
        "No citation guides are available; follow the style as commonly practised.".to_string()
    } else {
        format!(
            "Available citation guides: {}. Use the one closest to the requested style.",
            guides.join(", ")
        )
    };
    format!(
        "You are the copy editor responsible for citations and formatting.\n\
         Reformat the document's citations and reference list in the {style} style.\n\
         {available}\n\
         Keep every section, table, equation and warning line exactly where it is. \
         Return the complete document in Markdown."
    )
}

const LINK_RESEARCHER_INSTRUCTION: &str = "You are a researcher collecting sources for one subtopic.\n\
     Find authoritative, publicly reachable pages for the assigned subtopic.\n\
     Answer with one JSON object and nothing else: {\"url_links\": [string]}";

const COMPILER_INSTRUCTION: &str = "You are the compiler of a source list.\n\
     You receive the link lists found for every subtopic. Merge them, drop duplicates \
     and unreachable-looking entries, and answer with one JSON object: {\"url_links\": [string]}";

fn report_instruction(style: &str) -> String {
    format!(
        "You are the report writer.\n\
         Using only the collected sources, write a structured Markdown report answering \
         the query, with an introduction, findings and a conclusion. \
         Cite sources inline and finish with a reference list in the {style} style."
    )
}
