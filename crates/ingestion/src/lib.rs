//! StudySpark Ingestion Trigger
//!
//! Reacts to a blob landing in storage:
//! 1. Filters to PDF documents
//! 2. Buffers the blob locally and registers it with the model provider
//! 3. Writes the initial processing record carrying the model handle
//! 4. Generates the initial summary in the requested mode
//! 5. Merges the summary (or the failure) into the record

mod trigger;

pub use trigger::{IngestionOutcome, IngestionTrigger};
