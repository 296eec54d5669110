use crate::credentials::CredentialsError;
use crate::types::{CollectionPath, RasterId, Snapshot};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store request for {path} timed out")]
    Timeout { path: String },

    #[error("store request for {path} failed: {source}")]
    Http {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("store answered {status} for {path}")]
    Status { path: String, status: StatusCode },

    #[error("unexpected payload at {path}: {reason}")]
    Payload { path: String, reason: String },

    #[error("invalid store path {0:?}")]
    InvalidPath(String),

    #[error("could not obtain store credentials: {0}")]
    Credentials(#[from] CredentialsError),
}

impl StoreError {
    pub fn from_reqwest(path: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            StoreError::Timeout {
                path: path.to_string(),
            }
        } else {
            StoreError::Http {
                path: path.to_string(),
                source,
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout { .. })
    }
}

/// Addresses one feature for a write: where it was seen and what it must
/// still be when the write lands.
#[derive(Clone, Copy, Debug)]
pub struct RecordRef<'a> {
    pub collection: &'a CollectionPath,
    pub position: usize,
    pub raster_id: RasterId,
}

impl RecordRef<'_> {
    pub fn properties_path(&self) -> String {
        format!("{}/properties", self.collection.record(self.position))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The record at the position no longer carries the expected raster id.
    Moved,
    /// The record was written by someone else between our read and write.
    Conflict,
}

impl UpdateOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateOutcome::Applied => "applied",
            UpdateOutcome::Moved => "moved",
            UpdateOutcome::Conflict => "conflict",
        }
    }
}

/// The remote document store holding the feature collections.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads a whole collection in one request.
    async fn read_collection(&self, path: &CollectionPath) -> Result<Snapshot, StoreError>;

    /// Sets one property of a feature, leaving its other properties alone.
    /// The write only happens if the feature at `record.position` still has
    /// `record.raster_id` and was not modified concurrently.
    async fn update_field(
        &self,
        record: &RecordRef<'_>,
        field: &str,
        value: Value,
    ) -> Result<UpdateOutcome, StoreError>;

    /// Replaces the document at `path`.
    async fn put_document(&self, path: &str, value: Value) -> Result<(), StoreError>;

    fn is_ready(&self) -> bool {
        true
    }
}
