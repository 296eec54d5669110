use crate::store::{DocumentStore, RecordRef, StoreError, UpdateOutcome};
use crate::types::{CollectionPath, FeatureRecord, Snapshot, raster_id_of};
use async_trait::async_trait;
use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, Key, KeyName, Metadata, Recorder,
    SharedString, Unit,
};
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

type Hook = Box<dyn FnOnce(&mut Vec<Value>) + Send>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Failure {
    Unavailable,
    Timeout,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, Vec<Value>>,
    documents: HashMap<String, Value>,
    read_failure: Option<Failure>,
    stall_reads: bool,
    write_failure: Option<Failure>,
    // Runs between the read and the write of the next update, like a
    // concurrent writer would.
    before_write: Vec<Hook>,
    reads: usize,
    writes: usize,
}

/// Document store kept in memory. Collections are arrays, holes are `null`.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn with_collection(path: &str, features: Value) -> Self {
        let store = InMemoryStore::default();
        store.set_collection(path, features);
        store
    }

    pub fn set_collection(&self, path: &str, features: Value) {
        let features = match features {
            Value::Array(items) => items,
            _ => panic!("collections are arrays"),
        };
        self.state
            .lock()
            .collections
            .insert(CollectionPath::new(path).to_string(), features);
    }

    pub fn collection(&self, path: &str) -> Vec<Value> {
        self.state
            .lock()
            .collections
            .get(CollectionPath::new(path).as_str())
            .cloned()
            .unwrap_or_default()
    }

    /// `PatenID` of every feature in the collection, by position.
    pub fn paten_ids(&self, path: &str) -> Vec<Option<i64>> {
        self.collection(path)
            .iter()
            .map(|feature| FeatureRecord::from_value(feature).paten_id())
            .collect()
    }

    pub fn document(&self, path: &str) -> Option<Value> {
        self.state.lock().documents.get(path).cloned()
    }

    pub fn fail_reads(&self, failure: Failure) {
        self.state.lock().read_failure = Some(failure);
    }

    /// Makes every following read hang forever.
    pub fn stall_reads(&self) {
        self.state.lock().stall_reads = true;
    }

    pub fn fail_writes(&self, failure: Failure) {
        self.state.lock().write_failure = Some(failure);
    }

    /// Queues a change to a collection that lands between the read and the
    /// write of the next update, one hook per update.
    pub fn before_write(&self, hook: impl FnOnce(&mut Vec<Value>) + Send + 'static) {
        self.state.lock().before_write.push(Box::new(hook));
    }

    pub fn reads(&self) -> usize {
        self.state.lock().reads
    }

    pub fn writes(&self) -> usize {
        self.state.lock().writes
    }
}

fn error_for(failure: Failure, path: &str) -> StoreError {
    match failure {
        Failure::Unavailable => StoreError::Status {
            path: path.to_string(),
            status: StatusCode::SERVICE_UNAVAILABLE,
        },
        Failure::Timeout => StoreError::Timeout {
            path: path.to_string(),
        },
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn read_collection(&self, path: &CollectionPath) -> Result<Snapshot, StoreError> {
        let stalled = self.state.lock().stall_reads;
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock();
        state.reads += 1;
        if let Some(failure) = state.read_failure {
            return Err(error_for(failure, path.as_str()));
        }

        let value = state
            .collections
            .get(path.as_str())
            .map(|items| Value::Array(items.clone()))
            .unwrap_or(Value::Null);
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
        let mut state = self.state.lock();
        let path = record.properties_path();
        if let Some(failure) = state.write_failure {
            return Err(error_for(failure, &path));
        }

        let key = record.collection.as_str().to_string();
        let read = state
            .collections
            .get(&key)
            .and_then(|items| items.get(record.position))
            .and_then(|feature| feature.get("properties"))
            .cloned();
        let Some(Value::Object(mut properties)) = read.clone() else {
            return Ok(UpdateOutcome::Moved);
        };
        if raster_id_of(&properties) != Some(record.raster_id) {
            return Ok(UpdateOutcome::Moved);
        }

        if !state.before_write.is_empty() {
            let hook = state.before_write.remove(0);
            hook(state.collections.entry(key.clone()).or_default());
        }

        let items = state.collections.entry(key).or_default();
        let current = items
            .get(record.position)
            .and_then(|feature| feature.get("properties"))
            .cloned();
        if current != read {
            return Ok(UpdateOutcome::Conflict);
        }

        properties.insert(field.to_string(), value);
        items[record.position]["properties"] = Value::Object(properties);
        state.writes += 1;
        Ok(UpdateOutcome::Applied)
    }

    async fn put_document(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if let Some(failure) = state.write_failure {
            return Err(error_for(failure, path));
        }
        state.documents.insert(path.to_string(), value);
        state.writes += 1;
        Ok(())
    }
}

/// Recorder keeping the current value of every counter and gauge, keyed by
/// name and labels, e.g. `assignment.requests{outcome=assigned}`.
/// Histograms are dropped.
#[derive(Clone, Default)]
pub struct CapturingRecorder {
    values: Arc<Mutex<HashMap<String, f64>>>,
}

impl CapturingRecorder {
    pub fn value(&self, key: &str) -> Option<f64> {
        self.values.lock().get(key).copied()
    }

    fn handle(&self, key: &Key) -> Arc<CapturedValue> {
        let labels: Vec<String> = key
            .labels()
            .map(|label| format!("{}={}", label.key(), label.value()))
            .collect();
        let key = if labels.is_empty() {
            key.name().to_string()
        } else {
            format!("{}{{{}}}", key.name(), labels.join(","))
        };
        Arc::new(CapturedValue {
            key,
            values: self.values.clone(),
        })
    }
}

struct CapturedValue {
    key: String,
    values: Arc<Mutex<HashMap<String, f64>>>,
}

impl CapturedValue {
    fn update(&self, f: impl FnOnce(&mut f64)) {
        f(self.values.lock().entry(self.key.clone()).or_default());
    }
}

impl CounterFn for CapturedValue {
    fn increment(&self, value: u64) {
        self.update(|v| *v += value as f64);
    }

    fn absolute(&self, value: u64) {
        self.update(|v| *v = value as f64);
    }
}

impl GaugeFn for CapturedValue {
    fn increment(&self, value: f64) {
        self.update(|v| *v += value);
    }

    fn decrement(&self, value: f64) {
        self.update(|v| *v -= value);
    }

    fn set(&self, value: f64) {
        self.update(|v| *v = value);
    }
}

impl Recorder for CapturingRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        Counter::from_arc(self.handle(key))
    }

    fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(self.handle(key))
    }

    fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}
