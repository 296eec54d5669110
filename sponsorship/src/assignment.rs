//! Marks features as sponsored.
//!
//! One assignment fetches the target collection once, then walks the
//! requested identifiers in order. For each identifier the first feature
//! with that raster id gets `PatenID` set to [`SPONSORED_MARKER`], and the
//! write is awaited before the next identifier is looked at.
//!
//! Writes are conditional. If the feature moved or was modified after the
//! fetch, the collection is fetched again and the identifier re-matched, up
//! to `max_conflict_retries` times.

use crate::config::{Config, IdentifierParsing};
use crate::identifiers::{IdentifierError, parse_identifiers};
use crate::matcher::first_match;
use crate::metrics_defs::{IDENTIFIERS_MATCHED, IDENTIFIERS_UNMATCHED, WRITE_RETRIES};
use crate::store::{DocumentStore, RecordRef, StoreError, UpdateOutcome};
use crate::types::{CollectionPath, PATEN_ID_FIELD, RasterId, Snapshot};
use serde_json::json;
use shared::counter;
use std::sync::Arc;

/// Value written to `PatenID`. It does not identify the sponsor.
pub const SPONSORED_MARKER: i64 = 1;

#[derive(thiserror::Error, Debug)]
pub enum AssignError {
    #[error("no feature matched the requested identifiers")]
    NotFound,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    #[error("store timed out: {0}")]
    StoreTimeout(#[source] StoreError),

    #[error("feature {raster_id} kept changing, gave up after {attempts} attempts")]
    Contention { raster_id: RasterId, attempts: u32 },
}

impl AssignError {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignError::NotFound => "not_found",
            AssignError::InvalidInput(_) => "invalid_input",
            AssignError::StoreUnavailable(_) => "store_unavailable",
            AssignError::StoreTimeout(_) => "store_timeout",
            AssignError::Contention { .. } => "contention",
        }
    }
}

impl From<StoreError> for AssignError {
    fn from(err: StoreError) -> Self {
        if err.is_timeout() {
            AssignError::StoreTimeout(err)
        } else {
            AssignError::StoreUnavailable(err)
        }
    }
}

impl From<IdentifierError> for AssignError {
    fn from(err: IdentifierError) -> Self {
        AssignError::InvalidInput(err.to_string())
    }
}

/// Decides which collection a request targets.
#[derive(Clone, Debug)]
pub struct CollectionResolver {
    default_collection: CollectionPath,
    areas_root: String,
}

impl CollectionResolver {
    pub fn new(default_collection: &str, areas_root: &str) -> Self {
        CollectionResolver {
            default_collection: CollectionPath::new(default_collection),
            areas_root: areas_root.trim_matches('/').to_string(),
        }
    }

    /// `<areas_root>/<area>/features` for a non-empty area, the default
    /// collection otherwise.
    pub fn resolve(&self, area: Option<&str>) -> Result<CollectionPath, AssignError> {
        match area {
            Some(area) if !area.is_empty() => {
                validate_key(area).map_err(AssignError::InvalidInput)?;
                Ok(CollectionPath::new(format!(
                    "{}/{area}/features",
                    self.areas_root
                )))
            }
            _ => Ok(self.default_collection.clone()),
        }
    }
}

/// Rejects names that cannot be a single store key.
pub fn validate_key(name: &str) -> Result<(), String> {
    const FORBIDDEN: &[char] = &['/', '.', '#', '$', '[', ']'];

    if name.is_empty() || name.chars().any(|c| FORBIDDEN.contains(&c) || c.is_control()) {
        return Err(format!("{name:?} is not a valid name"));
    }
    Ok(())
}

/// Outcome of a successful assignment.
#[derive(Debug, PartialEq)]
pub struct AssignmentReport {
    pub collection: CollectionPath,
    /// Raster ids that were assigned, in request order. An identifier
    /// requested twice appears twice.
    pub assigned: Vec<RasterId>,
}

impl AssignmentReport {
    /// One acknowledgment line per assigned identifier.
    pub fn render(&self) -> String {
        self.assigned
            .iter()
            .map(|id| format!("Put hektar with ID {id}...\n"))
            .collect()
    }
}

pub struct Assigner {
    store: Arc<dyn DocumentStore>,
    resolver: CollectionResolver,
    identifiers: IdentifierParsing,
    max_conflict_retries: u32,
}

impl Assigner {
    pub fn new(store: Arc<dyn DocumentStore>, config: &Config) -> Self {
        Assigner {
            store,
            resolver: CollectionResolver::new(
                &config.store.default_collection,
                &config.store.areas_root,
            ),
            identifiers: config.identifiers,
            max_conflict_retries: config.store.max_conflict_retries,
        }
    }

    /// Assigns every feature named in the comma separated `raw_ids`.
    ///
    /// Fails with [`AssignError::NotFound`] when nothing matched. A store
    /// error aborts the request; writes made before it stay in place.
    pub async fn assign(
        &self,
        raw_ids: &str,
        area: Option<&str>,
    ) -> Result<AssignmentReport, AssignError> {
        let ids = parse_identifiers(raw_ids, self.identifiers)?;
        let collection = self.resolver.resolve(area)?;
        let mut snapshot = self.fetch(&collection).await?;

        let mut assigned = Vec::new();
        for id in ids {
            if self.assign_one(&collection, &mut snapshot, id).await? {
                counter!(IDENTIFIERS_MATCHED).increment(1);
                assigned.push(id);
            } else {
                counter!(IDENTIFIERS_UNMATCHED).increment(1);
                tracing::debug!(raster_id = id, collection = %collection, "No feature matched");
            }
        }

        if assigned.is_empty() {
            return Err(AssignError::NotFound);
        }

        tracing::info!(
            collection = %collection,
            assigned = assigned.len(),
            "Assigned features"
        );
        Ok(AssignmentReport {
            collection,
            assigned,
        })
    }

    async fn fetch(&self, collection: &CollectionPath) -> Result<Snapshot, StoreError> {
        let snapshot = self.store.read_collection(collection).await?;
        tracing::debug!(collection = %collection, features = snapshot.len(), "Fetched collection");
        Ok(snapshot)
    }

    /// Returns whether a feature was assigned. On a lost race the snapshot is
    /// replaced by a fresh one, which later identifiers then use too.
    async fn assign_one(
        &self,
        collection: &CollectionPath,
        snapshot: &mut Snapshot,
        raster_id: RasterId,
    ) -> Result<bool, AssignError> {
        let mut retries = 0;

        loop {
            let Some(found) = first_match(snapshot, raster_id) else {
                return Ok(false);
            };
            let record = RecordRef {
                collection,
                position: found.position,
                raster_id,
            };

            let outcome = self
                .store
                .update_field(&record, PATEN_ID_FIELD, json!(SPONSORED_MARKER))
                .await?;

            match outcome {
                UpdateOutcome::Applied => return Ok(true),
                UpdateOutcome::Moved | UpdateOutcome::Conflict => {
                    counter!(WRITE_RETRIES, "reason" => outcome.as_str()).increment(1);

                    if retries >= self.max_conflict_retries {
                        tracing::warn!(
                            raster_id,
                            collection = %collection,
                            reason = outcome.as_str(),
                            "Giving up on contended feature"
                        );
                        return Err(AssignError::Contention {
                            raster_id,
                            attempts: retries + 1,
                        });
                    }
                    retries += 1;

                    tracing::info!(
                        raster_id,
                        position = record.position,
                        reason = outcome.as_str(),
                        "Feature changed since fetch, refetching"
                    );
                    *snapshot = self.fetch(collection).await?;
                }
            }
        }
    }
}
