use serde_json::{Map, Value};
use std::fmt;

pub type RasterId = u64;

/// Property holding the numeric raster identifier of a feature.
pub const RASTER_ID_FIELD: &str = "RasterID";
/// Property holding the sponsorship marker of a feature.
pub const PATEN_ID_FIELD: &str = "PatenID";

/// Store path of a collection, without leading or trailing slashes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl AsRef<str>) -> Self {
        CollectionPath(path.as_ref().trim_matches('/').to_string())
    }

    /// Path of the record at `position` inside this collection.
    pub fn record(&self, position: usize) -> String {
        format!("{}/{position}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One feature of a collection. Only the properties object is interpreted;
/// geometry and everything else is left to the store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureRecord {
    pub properties: Option<Map<String, Value>>,
}

impl FeatureRecord {
    pub fn from_value(value: &Value) -> Self {
        FeatureRecord {
            properties: value
                .get("properties")
                .and_then(Value::as_object)
                .cloned(),
        }
    }

    /// `None` when the feature has no properties or no readable raster id.
    pub fn raster_id(&self) -> Option<RasterId> {
        self.properties.as_ref().and_then(raster_id_of)
    }

    pub fn paten_id(&self) -> Option<i64> {
        self.properties
            .as_ref()
            .and_then(|props| property(props, PATEN_ID_FIELD))
            .and_then(Value::as_i64)
    }
}

/// Raster id of a properties object, accepting the known key spellings and
/// integers stored as integral floats or decimal strings.
pub fn raster_id_of(properties: &Map<String, Value>) -> Option<RasterId> {
    match property(properties, RASTER_ID_FIELD)? {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f < u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn property<'a>(properties: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    properties
        .get(field)
        .or_else(|| properties.get(&field.to_ascii_lowercase()))
}

/// A record together with the position it had when the snapshot was taken.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexedRecord {
    pub position: usize,
    pub record: FeatureRecord,
}

/// In-memory copy of a collection at one point in time, ordered by position.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    records: Vec<IndexedRecord>,
}

impl Snapshot {
    pub fn new(mut records: Vec<IndexedRecord>) -> Self {
        records.sort_by_key(|r| r.position);
        Snapshot { records }
    }

    /// Builds a snapshot from the JSON the store returns for a collection.
    ///
    /// Arrays map index to position and skip `null` holes. Objects are only
    /// accepted with decimal keys, which is how sparse arrays come back.
    /// `null` is an empty collection.
    pub fn from_json(value: &Value) -> Result<Self, SnapshotError> {
        let records = match value {
            Value::Null => Vec::new(),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .filter(|(_, item)| !item.is_null())
                .map(|(position, item)| IndexedRecord {
                    position,
                    record: FeatureRecord::from_value(item),
                })
                .collect(),
            Value::Object(entries) => entries
                .iter()
                .filter(|(_, item)| !item.is_null())
                .map(|(key, item)| {
                    let position = key
                        .parse::<usize>()
                        .map_err(|_| SnapshotError::NonNumericKey(key.clone()))?;
                    Ok(IndexedRecord {
                        position,
                        record: FeatureRecord::from_value(item),
                    })
                })
                .collect::<Result<_, _>>()?,
            other => return Err(SnapshotError::NotACollection(kind_of(other))),
        };

        Ok(Snapshot::new(records))
    }

    pub fn records(&self) -> &[IndexedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SnapshotError {
    #[error("collection is a {0}, expected an array or object")]
    NotACollection(&'static str),
    #[error("collection key {0:?} is not a position")]
    NonNumericKey(String),
}
