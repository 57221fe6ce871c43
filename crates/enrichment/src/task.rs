//! Enrichment tasks and their results.

use serde::{Deserialize, Serialize};
use studyspark_common::record::Feature;
use uuid::Uuid;

/// One requested artifact generation. The request flag reset written with
/// the result acknowledges the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentTask {
    pub id: Uuid,
    pub document_id: String,
    pub feature: Feature,
}

impl EnrichmentTask {
    pub fn new(document_id: impl Into<String>, feature: Feature) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id: document_id.into(),
            feature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFailure {
    pub feature: Feature,
    pub message: String,
}

/// What one enrichment invocation did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentReport {
    pub document_id: String,
    pub succeeded: Vec<Feature>,
    pub failed: Vec<FeatureFailure>,
}

impl EnrichmentReport {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            ..Default::default()
        }
    }

    /// True when no feature was requested.
    pub fn is_empty(&self) -> bool {
        self.succeeded.is_empty() && self.failed.is_empty()
    }

    pub fn failure(&self, feature: Feature) -> Option<&str> {
        self.failed
            .iter()
            .find(|f| f.feature == feature)
            .map(|f| f.message.as_str())
    }
}
