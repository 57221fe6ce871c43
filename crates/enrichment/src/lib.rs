//! StudySpark Enrichment Trigger
//!
//! Reacts to processing record updates. Each request flag that flips to
//! true becomes an `EnrichmentTask`; tasks run concurrently against the
//! stored model handle and each commits its own field-level update, which
//! also resets the consumed flag.

mod edge;
mod task;
mod trigger;

pub use edge::newly_requested;
pub use task::{EnrichmentReport, EnrichmentTask, FeatureFailure};
pub use trigger::EnrichmentTrigger;
