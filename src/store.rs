//! Append-only metric observation store.
//!
//! Observations are created once and never mutated or deleted. Every engine
//! keeps its observations in timestamp order: the timestamp is assigned under
//! the store's write lock and never goes backwards, even if the wall clock does.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StorageConfig;
use crate::error::{MonitorError, Result};

/// Free-form annotations. Values are any JSON scalar, list or map; the
/// monitor never looks inside them.
pub type Tags = BTreeMap<String, serde_json::Value>;

/// Identity of one monitored metric series
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricKey {
    pub model_name: String,
    pub model_version: String,
    pub metric_name: String,
}

impl MetricKey {
    pub fn new(
        model_name: impl Into<String>,
        model_version: impl Into<String>,
        metric_name: impl Into<String>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            model_version: model_version.into(),
            metric_name: metric_name.into(),
        }
    }
}

impl std::fmt::Display for MetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}/{}", self.model_name, self.model_version, self.metric_name)
    }
}

/// One persisted metric sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricObservation {
    pub model_name: String,
    pub model_version: String,
    pub metric_name: String,
    pub value: f64,
    /// Number of predictions this sample aggregates
    pub prediction_count: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: Tags,
}

impl MetricObservation {
    pub fn key(&self) -> MetricKey {
        MetricKey::new(&self.model_name, &self.model_version, &self.metric_name)
    }

    fn matches_model(&self, model_name: &str, model_version: &str) -> bool {
        self.model_name == model_name && self.model_version == model_version
    }

    fn matches(&self, key: &MetricKey) -> bool {
        self.matches_model(&key.model_name, &key.model_version) && self.metric_name == key.metric_name
    }
}

/// An observation before the store stamps it
#[derive(Debug, Clone, PartialEq)]
pub struct NewObservation {
    pub key: MetricKey,
    pub value: f64,
    pub prediction_count: u64,
    pub tags: Tags,
}

impl NewObservation {
    pub fn new(key: MetricKey, value: f64) -> Self {
        Self {
            key,
            value,
            prediction_count: 1,
            tags: Tags::new(),
        }
    }

    pub fn with_prediction_count(mut self, prediction_count: u64) -> Self {
        self.prediction_count = prediction_count;
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Reject input that must never reach storage.
    pub fn validate(&self) -> Result<()> {
        if !self.value.is_finite() {
            return Err(MonitorError::InvalidObservation(format!(
                "value for {} must be finite, got {}",
                self.key, self.value
            )));
        }
        if self.prediction_count == 0 {
            return Err(MonitorError::InvalidObservation(format!(
                "prediction_count for {} must be at least 1",
                self.key
            )));
        }
        for (field, name) in [
            ("model_name", &self.key.model_name),
            ("model_version", &self.key.model_version),
            ("metric_name", &self.key.metric_name),
        ] {
            if name.trim().is_empty() {
                return Err(MonitorError::InvalidObservation(format!("{} must not be empty", field)));
            }
        }
        Ok(())
    }

    fn stamp(self, timestamp: DateTime<Utc>) -> MetricObservation {
        MetricObservation {
            model_name: self.key.model_name,
            model_version: self.key.model_version,
            metric_name: self.key.metric_name,
            value: self.value,
            prediction_count: self.prediction_count,
            timestamp,
            tags: self.tags,
        }
    }
}

/// Storage engine contract for metric observations
pub trait MetricStore: Send + Sync {
    /// Validate, stamp with the current time, and durably append.
    fn append(&self, observation: NewObservation) -> Result<MetricObservation>;

    /// Observations for `key` with `timestamp >= since`, oldest first.
    fn query(&self, key: &MetricKey, since: DateTime<Utc>) -> Result<Vec<MetricObservation>>;

    /// Every metric of a model version with `timestamp >= since`, oldest first.
    fn query_model(
        &self,
        model_name: &str,
        model_version: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricObservation>>;

    /// Total number of stored observations.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Open the engine selected by `config`.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn MetricStore>> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(InMemoryStore::new())),
        StorageConfig::Jsonl { path } => Ok(Arc::new(JsonlStore::open(path)?)),
    }
}

/// Timestamp-ordered observation index shared by the engines.
#[derive(Default)]
struct ObservationIndex {
    entries: RwLock<Vec<MetricObservation>>,
}

impl ObservationIndex {
    fn from_entries(mut entries: Vec<MetricObservation>) -> Self {
        entries.sort_by_key(|o| o.timestamp);
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Next write timestamp: now, or the last issued one if the clock stepped back.
    fn next_timestamp(&self) -> Result<DateTime<Utc>> {
        let entries = self.entries.read().map_err(|_| MonitorError::storage("index lock poisoned"))?;
        let now = Utc::now();
        Ok(match entries.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        })
    }

    fn push(&self, observation: MetricObservation) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| MonitorError::storage("index lock poisoned"))?;
        entries.push(observation);
        Ok(())
    }

    fn select<F>(&self, since: DateTime<Utc>, keep: F) -> Result<Vec<MetricObservation>>
    where
        F: Fn(&MetricObservation) -> bool,
    {
        let entries = self.entries.read().map_err(|_| MonitorError::storage("index lock poisoned"))?;
        let start = entries.partition_point(|o| o.timestamp < since);
        Ok(entries[start..].iter().filter(|o| keep(o)).cloned().collect())
    }

    fn len(&self) -> Result<usize> {
        self.entries
            .read()
            .map(|e| e.len())
            .map_err(|_| MonitorError::storage("index lock poisoned"))
    }
}

/// Process-local store, for tests and short-lived monitors
#[derive(Default)]
pub struct InMemoryStore {
    write_lock: Mutex<()>,
    index: ObservationIndex,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricStore for InMemoryStore {
    fn append(&self, observation: NewObservation) -> Result<MetricObservation> {
        observation.validate()?;
        let _guard = self.write_lock.lock().map_err(|_| MonitorError::storage("write lock poisoned"))?;
        let stored = observation.stamp(self.index.next_timestamp()?);
        self.index.push(stored.clone())?;
        Ok(stored)
    }

    fn query(&self, key: &MetricKey, since: DateTime<Utc>) -> Result<Vec<MetricObservation>> {
        self.index.select(since, |o| o.matches(key))
    }

    fn query_model(
        &self,
        model_name: &str,
        model_version: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricObservation>> {
        self.index.select(since, |o| o.matches_model(model_name, model_version))
    }

    fn len(&self) -> Result<usize> {
        self.index.len()
    }
}

/// Durable store backed by an append-only JSON Lines file.
///
/// Each append writes one line and flushes before the observation becomes
/// visible to readers. The file is replayed into memory on open.
pub struct JsonlStore {
    path: PathBuf,
    writer: Mutex<LogWriter>,
    index: ObservationIndex,
}

impl JsonlStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(MonitorError::storage)?;
            }
        }

        let entries = if path.exists() {
            Self::replay(&path)?
        } else {
            Vec::new()
        };
        let writer = LogWriter::open(&path)?;

        tracing::info!(path = %path.display(), observations = entries.len(), "Opened metric store");

        Ok(Self {
            path,
            writer: Mutex::new(writer),
            index: ObservationIndex::from_entries(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every line. An unterminated final line from an interrupted write
    /// is either completed with its newline, when it holds a whole record, or
    /// cut off the file. A malformed line anywhere else fails the open.
    fn replay(path: &Path) -> Result<Vec<MetricObservation>> {
        let file = File::open(path).map_err(MonitorError::storage)?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut offset: u64 = 0;
        let mut line = Vec::new();
        let mut line_no = 0usize;

        loop {
            line.clear();
            let read = reader.read_until(b'\n', &mut line).map_err(MonitorError::storage)?;
            if read == 0 {
                break;
            }
            line_no += 1;
            let complete = line.last() == Some(&b'\n');
            let record = trim_record(&line);

            if !record.is_empty() {
                match serde_json::from_slice::<MetricObservation>(record) {
                    Ok(observation) => {
                        entries.push(observation);
                        if !complete {
                            tracing::warn!(path = %path.display(), line = line_no, "Restoring newline after final record");
                            let mut file = OpenOptions::new().append(true).open(path).map_err(MonitorError::storage)?;
                            file.write_all(b"\n").map_err(MonitorError::storage)?;
                        }
                    }
                    Err(e) if !complete => {
                        tracing::warn!(
                            path = %path.display(),
                            line = line_no,
                            error = %e,
                            "Discarding torn trailing record"
                        );
                        let file = OpenOptions::new().write(true).open(path).map_err(MonitorError::storage)?;
                        file.set_len(offset).map_err(MonitorError::storage)?;
                        break;
                    }
                    Err(e) => {
                        return Err(MonitorError::StorageUnavailable(format!(
                            "{}: corrupt record on line {}: {}",
                            path.display(),
                            line_no,
                            e
                        )));
                    }
                }
            }
            offset += read as u64;
        }

        Ok(entries)
    }
}

fn trim_record(line: &[u8]) -> &[u8] {
    let start = line.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(line.len());
    let end = line.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &line[start..end]
}

/// Append handle that never lets a failed record reach the file.
///
/// `committed_len` is the file length after the last successful append. A
/// failed write drops the buffered bytes unwritten and cuts the file back to
/// that length before the next append.
struct LogWriter {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    committed_len: u64,
}

impl LogWriter {
    fn open(path: &Path) -> Result<Self> {
        let file = Self::append_handle(path)?;
        let committed_len = file.metadata().map_err(MonitorError::storage)?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(BufWriter::new(file)),
            committed_len,
        })
    }

    fn append_handle(path: &Path) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(MonitorError::storage)
    }

    fn append_line(&mut self, line: &[u8]) -> Result<()> {
        if self.file.is_none() {
            self.reset()?;
        }
        let written = match self.file.as_mut() {
            Some(file) => file.write_all(line).and_then(|()| file.flush()),
            None => return Err(MonitorError::storage("log writer unavailable")),
        };

        match written {
            Ok(()) => {
                self.committed_len += line.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.discard();
                if let Err(reset) = self.reset() {
                    tracing::warn!(path = %self.path.display(), error = %reset, "Failed to roll back metric store");
                }
                Err(MonitorError::storage(e))
            }
        }
    }

    /// Drop the current handle together with any bytes it still buffers.
    fn discard(&mut self) {
        if let Some(file) = self.file.take() {
            let (_file, _unwritten) = file.into_parts();
        }
    }

    /// Reopen and truncate to the last committed record.
    fn reset(&mut self) -> Result<()> {
        let file = Self::append_handle(&self.path)?;
        file.set_len(self.committed_len).map_err(MonitorError::storage)?;
        self.file = Some(BufWriter::new(file));
        Ok(())
    }
}

impl MetricStore for JsonlStore {
    fn append(&self, observation: NewObservation) -> Result<MetricObservation> {
        observation.validate()?;
        let mut writer = self.writer.lock().map_err(|_| MonitorError::storage("writer lock poisoned"))?;

        let stored = observation.stamp(self.index.next_timestamp()?);
        let mut line = serde_json::to_vec(&stored)?;
        line.push(b'\n');
        writer.append_line(&line)?;

        self.index.push(stored.clone())?;
        Ok(stored)
    }

    fn query(&self, key: &MetricKey, since: DateTime<Utc>) -> Result<Vec<MetricObservation>> {
        self.index.select(since, |o| o.matches(key))
    }

    fn query_model(
        &self,
        model_name: &str,
        model_version: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricObservation>> {
        self.index.select(since, |o| o.matches_model(model_name, model_version))
    }

    fn len(&self) -> Result<usize> {
        self.index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn accuracy_key() -> MetricKey {
        MetricKey::new("classifier", "v1", "accuracy")
    }

    fn long_ago() -> DateTime<Utc> {
        Utc::now() - Duration::days(365)
    }

    #[test]
    fn test_append_and_query_in_order() {
        let store = InMemoryStore::new();
        for i in 0..25 {
            store.append(NewObservation::new(accuracy_key(), 0.9 + i as f64 * 0.001)).unwrap();
        }
        let rows = store.query(&accuracy_key(), long_ago()).unwrap();
        assert_eq!(rows.len(), 25);
        assert!(rows.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!((rows[24].value - 0.924).abs() < 1e-12);
    }

    #[test]
    fn test_query_filters_key_and_since() {
        let store = InMemoryStore::new();
        store.append(NewObservation::new(accuracy_key(), 0.9)).unwrap();
        store.append(NewObservation::new(MetricKey::new("classifier", "v1", "latency_ms"), 12.0)).unwrap();
        store.append(NewObservation::new(MetricKey::new("classifier", "v2", "accuracy"), 0.8)).unwrap();

        assert_eq!(store.query(&accuracy_key(), long_ago()).unwrap().len(), 1);
        assert_eq!(store.query_model("classifier", "v1", long_ago()).unwrap().len(), 2);
        let future = Utc::now() + Duration::hours(1);
        assert!(store.query(&accuracy_key(), future).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_observations_rejected() {
        let store = InMemoryStore::new();
        let nan = store.append(NewObservation::new(accuracy_key(), f64::NAN));
        assert!(matches!(nan, Err(MonitorError::InvalidObservation(_))));

        let inf = store.append(NewObservation::new(accuracy_key(), f64::INFINITY));
        assert!(matches!(inf, Err(MonitorError::InvalidObservation(_))));

        let zero = store.append(NewObservation::new(accuracy_key(), 0.5).with_prediction_count(0));
        assert!(matches!(zero, Err(MonitorError::InvalidObservation(_))));

        let unnamed = store.append(NewObservation::new(MetricKey::new("", "v1", "accuracy"), 0.5));
        assert!(matches!(unnamed, Err(MonitorError::InvalidObservation(_))));

        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_jsonl_roundtrip_with_tags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics").join("observations.jsonl");

        {
            let store = JsonlStore::open(&path).unwrap();
            for i in 0..5 {
                let obs = NewObservation::new(accuracy_key(), 0.8 + i as f64 / 100.0)
                    .with_prediction_count(32)
                    .with_tag("region", "eu-west")
                    .with_tag("batch", serde_json::json!({"id": i, "shards": [1, 2]}));
                store.append(obs).unwrap();
            }
        }

        let store = JsonlStore::open(&path).unwrap();
        let rows = store.query(&accuracy_key(), long_ago()).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].prediction_count, 32);
        assert_eq!(rows[3].tags["batch"]["id"], 3);
        assert_eq!(rows[0].tags["region"], "eu-west");

        store.append(NewObservation::new(accuracy_key(), 0.7)).unwrap();
        assert_eq!(store.len().unwrap(), 6);
        assert!(rows[4].timestamp <= store.query(&accuracy_key(), long_ago()).unwrap()[5].timestamp);
    }

    #[test]
    fn test_jsonl_drops_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observations.jsonl");
        {
            let store = JsonlStore::open(&path).unwrap();
            store.append(NewObservation::new(accuracy_key(), 0.9)).unwrap();
            store.append(NewObservation::new(accuracy_key(), 0.8)).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"model_name":"classifier","model_ver"#).unwrap();
        drop(file);

        let store = JsonlStore::open(&path).unwrap();
        assert_eq!(store.len().unwrap(), 2);
        store.append(NewObservation::new(accuracy_key(), 0.7)).unwrap();
        drop(store);

        let store = JsonlStore::open(&path).unwrap();
        assert_eq!(store.len().unwrap(), 3);
    }

    #[test]
    fn test_jsonl_restores_missing_final_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observations.jsonl");
        {
            let store = JsonlStore::open(&path).unwrap();
            store.append(NewObservation::new(accuracy_key(), 0.9)).unwrap();
            store.append(NewObservation::new(accuracy_key(), 0.8)).unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.pop(), Some(b'\n'));
        std::fs::write(&path, &bytes).unwrap();

        let store = JsonlStore::open(&path).unwrap();
        assert_eq!(store.len().unwrap(), 2);
        store.append(NewObservation::new(accuracy_key(), 0.7)).unwrap();
        drop(store);

        let store = JsonlStore::open(&path).unwrap();
        let values: Vec<f64> = store
            .query(&accuracy_key(), long_ago())
            .unwrap()
            .iter()
            .map(|o| o.value)
            .collect();
        assert_eq!(values, vec![0.9, 0.8, 0.7]);
    }

    #[test]
    fn test_jsonl_drops_tail_torn_inside_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observations.jsonl");
        {
            let store = JsonlStore::open(&path).unwrap();
            store.append(NewObservation::new(accuracy_key(), 0.9).with_tag("site", "café")).unwrap();
        }
        let intact = std::fs::metadata(&path).unwrap().len();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        // First byte of a two-byte "é".
        file.write_all(b"{\"model_name\":\"caf\xC3").unwrap();
        drop(file);

        let store = JsonlStore::open(&path).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), intact);
        assert_eq!(store.query(&accuracy_key(), long_ago()).unwrap()[0].tags["site"], "café");
    }

    #[test]
    fn test_jsonl_rejects_invalid_utf8_middle_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observations.jsonl");
        std::fs::write(&path, b"{\"model_name\":\"\xC3\"}\n{}\n").unwrap();
        assert!(matches!(JsonlStore::open(&path), Err(MonitorError::StorageUnavailable(_))));
    }

    #[test]
    fn test_jsonl_failed_append_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observations.jsonl");
        let store = JsonlStore::open(&path).unwrap();
        store.append(NewObservation::new(accuracy_key(), 0.9)).unwrap();
        let committed = std::fs::metadata(&path).unwrap().len();

        // A read-only handle makes the flush fail.
        let read_only = File::open(&path).unwrap();
        store.writer.lock().unwrap().file = Some(BufWriter::new(read_only));

        let failed = store.append(NewObservation::new(accuracy_key(), 0.1));
        assert!(matches!(failed, Err(MonitorError::StorageUnavailable(_))));
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), committed);

        store.append(NewObservation::new(accuracy_key(), 0.8)).unwrap();
        drop(store);

        let store = JsonlStore::open(&path).unwrap();
        let values: Vec<f64> = store
            .query(&accuracy_key(), long_ago())
            .unwrap()
            .iter()
            .map(|o| o.value)
            .collect();
        assert_eq!(values, vec![0.9, 0.8]);
    }

    #[test]
    fn test_timestamps_hold_when_clock_steps_back() {
        let ahead = Utc::now() + Duration::hours(1);
        let store = InMemoryStore {
            write_lock: Mutex::new(()),
            index: ObservationIndex::from_entries(vec![NewObservation::new(accuracy_key(), 0.9).stamp(ahead)]),
        };

        let stored = store.append(NewObservation::new(accuracy_key(), 0.8)).unwrap();
        assert!(stored.timestamp >= ahead);

        let rows = store.query(&accuracy_key(), long_ago()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].value, 0.8);
    }

    #[test]
    fn test_jsonl_rejects_corrupt_middle_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observations.jsonl");
        std::fs::write(&path, "not json\n{}\n").unwrap();
        assert!(matches!(JsonlStore::open(&path), Err(MonitorError::StorageUnavailable(_))));
    }

    #[test]
    fn test_concurrent_appends_are_all_kept() {
        let store = Arc::new(InMemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let key = MetricKey::new("classifier", "v1", format!("worker_{}", t));
                        store.append(NewObservation::new(key, i as f64)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.len().unwrap(), 400);
        let all = store.query_model("classifier", "v1", long_ago()).unwrap();
        assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_open_store_from_config() {
        let store = open_store(&StorageConfig::Memory).unwrap();
        store.append(NewObservation::new(accuracy_key(), 1.0)).unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }
}
