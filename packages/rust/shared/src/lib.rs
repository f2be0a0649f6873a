//! Shared types, error model, and configuration for scholarflow.
//!
//! This crate is the foundation depended on by all other scholarflow crates.
//! It provides:
//! - [`ScholarflowError`]: the unified error type
//! - Pipeline data model ([`StepResult`], [`JoinedOutput`], [`Fragment`], [`LinkSet`],
//!   [`PlanningOutput`], [`IdentityKey`], [`Interaction`])
//! - Configuration ([`AppConfig`], [`CollectorConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BridgeConfig, CollectorConfig, DefaultsConfig, MemberFailurePolicy,
    OpenRouterConfig, PipelineConfig, config_dir, config_file_path, expand_home, init_config,
    load_config, load_config_from, validate_api_key,
};
pub use error::{Result, ScholarflowError};
pub use types::{
    Fragment, IdentityKey, Interaction, InteractionRole, JoinedOutput, LinkCollection, LinkSet,
    PlanningOutput, RunId, StepResult, Subtopic, Subtopics, WordCount, missing_notice,
};
