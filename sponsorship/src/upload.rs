//! Replacement datasets uploaded through the update page.
//!
//! Depending on the deployment the raw file is either relayed to an external
//! endpoint with HTTP PUT, or parsed as JSON and written to the store under
//! the project's name.

use crate::assignment::validate_key;
use crate::config::{UploadConfig, UploadTarget};
use crate::metrics_defs::UPLOAD_BYTES;
use crate::store::{DocumentStore, StoreError};
use bytes::Bytes;
use shared::histogram;
use std::sync::Arc;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum UploadError {
    #[error("missing form field {0:?}")]
    MissingField(&'static str),
    #[error("invalid project name: {0}")]
    InvalidProjectName(String),
    #[error("uploaded file is not a JSON document: {0}")]
    NotJson(#[from] serde_json::Error),
    #[error("could not read upload: {reason}")]
    Multipart {
        status: http::StatusCode,
        reason: String,
    },
    #[error("relay request failed: {0}")]
    Relay(#[from] reqwest::Error),
    #[error("relay endpoint answered {0}")]
    RelayRejected(reqwest::StatusCode),
    #[error("store write failed: {0}")]
    Store(#[from] StoreError),
}

/// A file received from the upload form.
#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

enum Target {
    Relay { client: reqwest::Client, url: Url },
    Store { store: Arc<dyn DocumentStore>, root: String },
}

pub struct Uploader {
    target: Target,
}

impl Uploader {
    pub fn new(config: &UploadConfig, store: Arc<dyn DocumentStore>) -> Self {
        let target = match &config.target {
            UploadTarget::Relay { url } => Target::Relay {
                client: reqwest::Client::new(),
                url: url.clone(),
            },
            UploadTarget::Store { root } => Target::Store {
                store,
                root: root.trim_matches('/').to_string(),
            },
        };
        Uploader { target }
    }

    pub async fn upload(
        &self,
        project_name: Option<&str>,
        file: UploadedFile,
    ) -> Result<(), UploadError> {
        tracing::info!(
            file_name = file.file_name.as_deref().unwrap_or("<unnamed>"),
            content_type = file.content_type.as_deref().unwrap_or("<none>"),
            size = file.data.len(),
            "Received upload"
        );

        match &self.target {
            Target::Relay { client, url } => {
                histogram!(UPLOAD_BYTES, "target" => "relay").record(file.data.len() as f64);

                let content_type = file
                    .content_type
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let response = client
                    .put(url.clone())
                    .header(reqwest::header::CONTENT_TYPE, content_type)
                    .body(file.data)
                    .send()
                    .await?;

                if !response.status().is_success() {
                    tracing::error!(url = %url, status = %response.status(), "Relay rejected upload");
                    return Err(UploadError::RelayRejected(response.status()));
                }
            }
            Target::Store { store, root } => {
                let project_name = project_name
                    .filter(|name| !name.is_empty())
                    .ok_or(UploadError::MissingField("projectname"))?;
                validate_key(project_name).map_err(UploadError::InvalidProjectName)?;

                let document: serde_json::Value = serde_json::from_slice(&file.data)?;
                histogram!(UPLOAD_BYTES, "target" => "store").record(file.data.len() as f64);

                let path = format!("{root}/{project_name}");
                store.put_document(&path, document).await?;
                tracing::info!(path, "Stored uploaded dataset");
            }
        }

        Ok(())
    }
}
