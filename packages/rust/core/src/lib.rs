//! Pipeline orchestration for scholarflow.
//!
//! Steps, the adapter that lets plain functions sit between generation steps,
//! parallel fan-out with an order-preserving join, sequential composition,
//! and the deep-search and research-report workflows built from them.

pub mod adapter;
pub mod capability;
pub mod generation;
pub mod guides;
pub mod history;
pub mod parallel;
pub mod pipelines;
pub mod progress;
pub mod report;
pub mod schedule;
pub mod step;
pub mod workflow;

pub use capability::GenerationCapability;
pub use generation::GenerationStep;
pub use guides::CitationGuides;
pub use history::{InteractionHistory, MemoryHistory};
pub use parallel::{GroupOutcome, MemberFailure, ParallelGroup};
pub use pipelines::{RunContext, WorkflowKind};
pub use progress::{ProgressReporter, SilentProgress};
pub use schedule::SchedulingContext;
pub use step::{FunctionStep, NamedInputs, Step};
pub use workflow::{InputBinding, RunOutcome, Workflow, WorkflowSpec};
