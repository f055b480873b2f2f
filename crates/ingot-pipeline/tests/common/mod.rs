//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ingot_core::config::{
    DatasetConfig, NormalizeConfig, NotifyConfig, ParseConfig, SourceConfig, SourceOrigin,
};
use ingot_core::row::Row;
use ingot_core::storage::{Etag, MemoryBackend, PutCondition, PutOutcome, StorageBackend};
use ingot_core::{Error as CoreError, Result as CoreResult};

use ingot_pipeline::source::{Normalizer, Parser, PluginRegistry};
use ingot_pipeline::Result as PipelineResult;

// ============================================================================
// JSON test source format
// ============================================================================

/// One observation in the JSON test-source format.
#[derive(Debug, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Observation time, RFC 3339; absent for dateless datasets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obs_time: Option<DateTime<Utc>>,
    /// Observed value.
    pub value: f64,
    /// Series the observation belongs to.
    pub series: String,
}

/// Builds a JSON source payload from `(obs_time, value, series)` triples.
pub fn json_source(records: &[(&str, f64, &str)]) -> Bytes {
    let records: Vec<SourceRecord> = records
        .iter()
        .map(|(ts, value, series)| SourceRecord {
            obs_time: Some(ts.parse().expect("valid RFC 3339 timestamp")),
            value: *value,
            series: (*series).to_string(),
        })
        .collect();
    Bytes::from(serde_json::to_vec(&records).expect("serialize source"))
}

/// Builds a JSON source payload of dateless records.
pub fn dateless_json_source(records: &[(f64, &str)]) -> Bytes {
    let records: Vec<SourceRecord> = records
        .iter()
        .map(|(value, series)| SourceRecord {
            obs_time: None,
            value: *value,
            series: (*series).to_string(),
        })
        .collect();
    Bytes::from(serde_json::to_vec(&records).expect("serialize source"))
}

/// Parser for the JSON test-source format.
pub struct JsonParser;

impl Parser for JsonParser {
    fn id(&self) -> &str {
        "json"
    }

    fn parse(&self, _config: &DatasetConfig, raw: &Bytes) -> PipelineResult<Vec<Row>> {
        let records: Vec<SourceRecord> =
            serde_json::from_slice(raw).map_err(|e| ingot_pipeline::PipelineError::Validation {
                message: format!("bad test source: {e}"),
            })?;
        Ok(records
            .into_iter()
            .map(|r| Row::observation(r.obs_time, r.value, r.series))
            .collect())
    }
}

/// Normalizer that keeps rows untouched (for dateless datasets).
pub struct PassthroughNormalizer;

impl Normalizer for PassthroughNormalizer {
    fn id(&self) -> &str {
        "passthrough"
    }

    fn normalize(&self, _config: &DatasetConfig, rows: Vec<Row>) -> PipelineResult<Vec<Row>> {
        Ok(rows)
    }
}

/// Registry with the JSON parser and both test normalizers.
pub fn registry() -> Arc<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    registry.register_parser(Arc::new(JsonParser));
    registry.register_normalizer(Arc::new(PassthroughNormalizer));
    Arc::new(registry)
}

/// Dataset config wired for the JSON test source.
pub fn test_config(dataset_id: &str) -> DatasetConfig {
    DatasetConfig {
        dataset_id: dataset_id.into(),
        provider: Some("test-provider".into()),
        frequency: "monthly".into(),
        unit: Some("index".into()),
        lag_days: 0,
        full_reload: false,
        publish_empty_versions: false,
        source: SourceConfig {
            kind: SourceOrigin::Local,
            url: Some("https://example.org/source/data.json".into()),
            format: Some("json".into()),
            sheet: None,
            header_row: None,
        },
        parse: ParseConfig {
            plugin: Some("json".into()),
        },
        normalize: NormalizeConfig {
            plugin: Some("generic".into()),
            primary_keys: vec!["obs_time".into(), "internal_series_code".into()],
            timezone: None,
        },
        notify: Some(NotifyConfig {
            topic: Some("dataset-updates".into()),
        }),
        lock_table_name: None,
    }
}

// ============================================================================
// FailingBackend - configurable failure injection
// ============================================================================

/// Backend wrapper that injects failures at configurable keys.
///
/// Used to simulate crashes at precise points of the publish and
/// consolidation protocols. Write/copy failures match on exact key or any
/// configured suffix, and are consumed after one use (single-shot).
pub struct FailingBackend {
    inner: MemoryBackend,
    fail_on_write: RwLock<HashSet<String>>,
    fail_on_write_suffix: RwLock<HashSet<String>>,
    fail_on_copy_suffix: RwLock<HashSet<String>>,
    fail_all: AtomicBool,
}

impl FailingBackend {
    pub fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            fail_on_write: RwLock::new(HashSet::new()),
            fail_on_write_suffix: RwLock::new(HashSet::new()),
            fail_on_copy_suffix: RwLock::new(HashSet::new()),
            fail_all: AtomicBool::new(false),
        }
    }

    /// Fails the next write to exactly `key`.
    pub fn fail_on_write(&self, key: &str) {
        self.fail_on_write.write().unwrap().insert(key.to_string());
    }

    /// Fails the next write to any key ending in `suffix`.
    pub fn fail_on_write_suffix(&self, suffix: &str) {
        self.fail_on_write_suffix
            .write()
            .unwrap()
            .insert(suffix.to_string());
    }

    /// Fails the next copy whose destination ends in `suffix`.
    pub fn fail_on_copy_suffix(&self, suffix: &str) {
        self.fail_on_copy_suffix
            .write()
            .unwrap()
            .insert(suffix.to_string());
    }

    /// Fails every subsequent operation.
    pub fn fail_all(&self) {
        self.fail_all.store(true, Ordering::SeqCst);
    }

    fn should_fail_write(&self, key: &str) -> bool {
        if self.fail_all.load(Ordering::SeqCst) {
            return true;
        }
        if self.fail_on_write.write().unwrap().remove(key) {
            return true;
        }
        let mut suffixes = self.fail_on_write_suffix.write().unwrap();
        if let Some(matched) = suffixes.iter().find(|s| key.ends_with(s.as_str())).cloned() {
            suffixes.remove(&matched);
            return true;
        }
        false
    }

    fn should_fail_copy(&self, dst: &str) -> bool {
        if self.fail_all.load(Ordering::SeqCst) {
            return true;
        }
        let mut suffixes = self.fail_on_copy_suffix.write().unwrap();
        if let Some(matched) = suffixes.iter().find(|s| dst.ends_with(s.as_str())).cloned() {
            suffixes.remove(&matched);
            return true;
        }
        false
    }
}

impl Default for FailingBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for FailingBackend {
    async fn get(&self, key: &str) -> CoreResult<Bytes> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(CoreError::storage(format!("injected read failure: {key}")));
        }
        self.inner.get(key).await
    }

    async fn head(&self, key: &str) -> CoreResult<Option<Etag>> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(CoreError::storage(format!("injected head failure: {key}")));
        }
        self.inner.head(key).await
    }

    async fn put(
        &self,
        key: &str,
        body: Bytes,
        condition: PutCondition,
    ) -> CoreResult<PutOutcome> {
        if self.should_fail_write(key) {
            return Err(CoreError::storage(format!("injected write failure: {key}")));
        }
        self.inner.put(key, body, condition).await
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(CoreError::storage(format!(
                "injected delete failure: {key}"
            )));
        }
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> CoreResult<Vec<String>> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(CoreError::storage(format!(
                "injected list failure: {prefix}"
            )));
        }
        self.inner.list(prefix).await
    }

    async fn copy(&self, src: &str, dst: &str) -> CoreResult<()> {
        if self.should_fail_copy(dst) {
            return Err(CoreError::storage(format!("injected copy failure: {dst}")));
        }
        self.inner.copy(src, dst).await
    }
}
