//! Per-object outcomes of a batch write and the client-facing report.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ErrorCode, StacksError};
use crate::identity::RecordKey;

/// Error details attached to a failed batch entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub code: ErrorCode,
    pub status: u16,
    pub message: String,
}

impl From<&StacksError> for ErrorDescriptor {
    fn from(err: &StacksError) -> Self {
        let code = err.code();
        Self {
            code,
            status: code.status_code(),
            message: err.to_string(),
        }
    }
}

/// Outcome for one submitted object, identified by its submission index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchResult {
    Success { index: usize, key: RecordKey },
    Unchanged { index: usize, key: RecordKey },
    Failure {
        index: usize,
        /// Key if the object named one or one had been assigned.
        key: Option<String>,
        error: ErrorDescriptor,
    },
}

impl BatchResult {
    pub fn index(&self) -> usize {
        match self {
            BatchResult::Success { index, .. }
            | BatchResult::Unchanged { index, .. }
            | BatchResult::Failure { index, .. } => *index,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BatchResult::Success { .. })
    }
}

/// Aggregated outcomes of one batch, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    results: Vec<BatchResult>,
}

impl BatchReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: BatchResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[BatchResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn unchanged_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, BatchResult::Unchanged { .. }))
            .count()
    }

    pub fn failure_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, BatchResult::Failure { .. }))
            .count()
    }

    /// Build the `success` / `unchanged` / `failed` response body.
    pub fn to_response(&self) -> BatchResponse {
        let mut response = BatchResponse::default();
        for result in &self.results {
            match result {
                BatchResult::Success { index, key } => {
                    response.success.insert(index.to_string(), key.to_string());
                }
                BatchResult::Unchanged { index, key } => {
                    response.unchanged.insert(index.to_string(), key.to_string());
                }
                BatchResult::Failure { index, key, error } => {
                    response.failed.insert(
                        index.to_string(),
                        FailedEntry {
                            key: key.clone(),
                            code: error.status,
                            message: error.message.clone(),
                        },
                    );
                }
            }
        }
        response
    }
}

/// Serializable body of a batch response keyed by submission index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub success: BTreeMap<String, String>,
    pub unchanged: BTreeMap<String, String>,
    pub failed: BTreeMap<String, FailedEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub code: u16,
    pub message: String,
}
