//! Error taxonomy for submit operations.
//!
//! Collaborators (stores, loaders, channels) report failures as `anyhow::Error`;
//! the orchestrator wraps them into `SubmitError` so callers can tell a bad request
//! apart from a failure inside the store or the channel.

use crate::record::RecordId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("$mdm-submit does not support resource type: {record_type}")]
    Validation { record_type: String },

    #[error("invalid criteria '{criteria}' for {record_type}: {reason}")]
    InvalidCriteria {
        record_type: String,
        criteria: String,
        reason: String,
    },

    #[error("no store is registered for resource type {record_type}")]
    UnknownType { record_type: String },

    #[error("'{raw}' is not a typed record id (expected Type/id)")]
    InvalidId { raw: String },

    /// `published` counts records already handed to the channel in this call.
    #[error("failure while querying {record_type} resources ({published} already submitted)")]
    Query {
        record_type: String,
        published: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("failure while loading {record_type} resources ({published} already submitted)")]
    Load {
        record_type: String,
        published: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("failure while submitting {record_type} to the channel ({published} already submitted)")]
    Publish {
        record_type: String,
        published: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("resource {id} is not known")]
    NotFound { id: RecordId },

    #[error("failure while reading {id}")]
    Read {
        id: RecordId,
        #[source]
        source: anyhow::Error,
    },

    #[error("transaction failure")]
    Transaction {
        #[source]
        source: anyhow::Error,
    },
}

impl SubmitError {
    /// True for failures the caller can fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SubmitError::Validation { .. }
                | SubmitError::InvalidCriteria { .. }
                | SubmitError::InvalidId { .. }
                | SubmitError::NotFound { .. }
        )
    }

    /// Records handed to the channel before the failure, when the failure happened mid-run.
    pub fn published(&self) -> Option<u64> {
        match self {
            SubmitError::Query { published, .. }
            | SubmitError::Load { published, .. }
            | SubmitError::Publish { published, .. } => Some(*published),
            _ => None,
        }
    }
}
