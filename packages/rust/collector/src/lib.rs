//! Source collection for the report step.
//!
//! This crate provides:
//! - [`engine`]: Concurrent, rate-limited fetcher over a [`LinkSet`](scholarflow_shared::LinkSet)
//! - [`extract`]: HTML paragraph and title extraction

pub mod engine;
pub mod extract;

pub use engine::{CollectResult, CollectedSource, Collector};
pub use extract::SourceKind;
