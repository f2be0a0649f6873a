//! Markdown reconciliation for research fragments.
//!
//! Stateless text passes used as pipeline steps: structural validation of a
//! single fragment, aggregation of many fragments into one framed document,
//! link extraction, and the final cleanup pipeline.

pub mod aggregate;
pub mod cleanup;
pub mod links;
mod sections;
pub mod validate;

pub use aggregate::{
    Aggregator, BodyBlock, DocumentSections, PartitionedFragment, content_len, demote_headings,
    partition,
};
pub use links::extract as extract_links;
pub use sections::SectionLabel;
pub use validate::{StructuralRule, StructuralValidator, validate};
