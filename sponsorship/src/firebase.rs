//! Realtime Database REST client.
//!
//! Every location is addressed as `<base url>/<path>.json`. Conditional
//! writes use the ETag protocol: a read with `X-Firebase-ETag: true` returns
//! the location's ETag, and a write with `if-match` fails with
//! `412 Precondition Failed` if the location changed since.

use crate::config::StoreConfig;
use crate::credentials::Credentials;
use crate::metrics_defs::STORE_REQUEST_DURATION;
use crate::store::{DocumentStore, RecordRef, StoreError, UpdateOutcome};
use crate::types::{CollectionPath, Snapshot, raster_id_of};
use async_trait::async_trait;
use reqwest::header::{ETAG, IF_MATCH};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use shared::histogram;
use std::time::{Duration, Instant};
use url::Url;

const ETAG_REQUEST_HEADER: &str = "X-Firebase-ETag";

pub struct FirebaseStore {
    client: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
}

impl FirebaseStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoreError::from_reqwest(config.url.as_str(), e))?;
        let credentials = Credentials::from_config(&config.credentials, client.clone())?;

        Ok(FirebaseStore {
            client,
            base_url: config.url.clone(),
            credentials,
        })
    }

    /// Fetches a token up front so the first request does not pay for it.
    pub async fn warm_up(&self) -> Result<(), StoreError> {
        self.credentials.query_param().await?;
        Ok(())
    }

    fn location_url(&self, path: &str) -> Result<Url, StoreError> {
        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let last = format!("{}.json", segments.pop().unwrap_or_default());

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidPath(path.to_string()))?
            .pop_if_empty()
            .extend(segments)
            .push(&last);
        Ok(url)
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, StoreError> {
        let mut request = self.client.request(method, self.location_url(path)?);
        if let Some(param) = self.credentials.query_param().await? {
            request = request.query(&[param]);
        }
        Ok(request)
    }

    async fn send(
        &self,
        operation: &'static str,
        path: &str,
        request: RequestBuilder,
    ) -> Result<Response, StoreError> {
        let start = Instant::now();
        let result = request.send().await;
        histogram!(STORE_REQUEST_DURATION, "operation" => operation)
            .record(start.elapsed().as_secs_f64());

        result.map_err(|e| StoreError::from_reqwest(path, e))
    }

    async fn read_json(path: &str, response: Response) -> Result<Value, StoreError> {
        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::from_reqwest(path, e)
            } else {
                StoreError::Payload {
                    path: path.to_string(),
                    reason: e.to_string(),
                }
            }
        })
    }
}

fn ensure_success(path: &str, response: &Response) -> Result<(), StoreError> {
    if response.status().is_success() {
        return Ok(());
    }
    tracing::warn!(path, status = %response.status(), "Store request failed");
    Err(StoreError::Status {
        path: path.to_string(),
        status: response.status(),
    })
}

#[async_trait]
impl DocumentStore for FirebaseStore {
    async fn read_collection(&self, path: &CollectionPath) -> Result<Snapshot, StoreError> {
        let path = path.as_str();
        let request = self.request(Method::GET, path).await?;
        let response = self.send("read_collection", path, request).await?;
        ensure_success(path, &response)?;

        let value = Self::read_json(path, response).await?;
        Snapshot::from_json(&value).map_err(|e| StoreError::Payload {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    async fn update_field(
        &self,
        record: &RecordRef<'_>,
        field: &str,
        value: Value,
    ) -> Result<UpdateOutcome, StoreError> {
        let path = record.properties_path();

        let request = self
            .request(Method::GET, &path)
            .await?
            .header(ETAG_REQUEST_HEADER, "true");
        let response = self.send("read_record", &path, request).await?;
        ensure_success(&path, &response)?;

        let etag = response
            .headers()
            .get(ETAG)
            .cloned()
            .ok_or_else(|| StoreError::Payload {
                path: path.clone(),
                reason: "missing ETag header".into(),
            })?;

        let mut properties = match Self::read_json(&path, response).await? {
            Value::Object(properties) => properties,
            _ => return Ok(UpdateOutcome::Moved),
        };
        if raster_id_of(&properties) != Some(record.raster_id) {
            return Ok(UpdateOutcome::Moved);
        }
        properties.insert(field.to_string(), value);

        let request = self
            .request(Method::PUT, &path)
            .await?
            .header(IF_MATCH, etag)
            .json(&properties);
        let response = self.send("write_record", &path, request).await?;

        if response.status() == StatusCode::PRECONDITION_FAILED {
            return Ok(UpdateOutcome::Conflict);
        }
        ensure_success(&path, &response)?;

        Ok(UpdateOutcome::Applied)
    }

    async fn put_document(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let request = self.request(Method::PUT, path).await?.json(&value);
        let response = self.send("put_document", path, request).await?;
        ensure_success(path, &response)
    }

    fn is_ready(&self) -> bool {
        self.credentials.is_ready()
    }
}
