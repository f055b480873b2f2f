//! Pipeline driver: orders the stages and owns the run outcome.
//!
//! One run is strictly sequential: lock, consistency guard, fetch,
//! change-check, parse, date filter, normalize, delta, enrich, write
//! events, publish, consolidate, notify, release. Components return typed
//! errors upward; this driver is the single place that converts them into
//! result codes and the only owner of the lock release.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::Instrument as _;

use ingot_core::config::DatasetConfig;
use ingot_core::lock::{LockTable, PipelineLock};
use ingot_core::observability::pipeline_span;
use ingot_core::paths::DatasetPaths;
use ingot_core::version::{generate_run_id, generate_version_ts};

use crate::consolidator::Consolidator;
use crate::delta::compute_delta;
use crate::enrich::enrich_delta;
use crate::error::Result;
use crate::event_writer::EventWriter;
use crate::guard::{ConsistencyGuard, GuardConfig};
use crate::manifest::SourceFileInfo;
use crate::notify::{notify_consumers, Notifier};
use crate::publisher::{PublishOutcome, PublishRequest, Publisher, PublishSkipReason};
use crate::source::{filter_new_rows, fingerprint, source_changed, PluginRegistry, SourceFetcher};
use crate::store::DatasetStore;

/// Result code of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// A new version was published (and consolidated).
    Completed,
    /// The source fingerprint was unchanged; nothing processed.
    NoChange,
    /// Nothing new to publish (empty filter result or empty delta).
    NoNewData,
    /// Another run advanced the pointer first; nothing mutated.
    CasConflict,
    /// The pipeline lock was held by another run; no side effects.
    SkippedLock,
    /// An unrecovered error aborted the run.
    Error,
}

impl RunStatus {
    /// Returns the wire string for reports and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::NoChange => "no_change",
            Self::NoNewData => "no_new_data",
            Self::CasConflict => "cas_conflict",
            Self::SkippedLock => "skipped_lock",
            Self::Error => "error",
        }
    }
}

/// Structured result of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Unique id of this run.
    pub run_id: String,
    /// Version timestamp this run would have (or did) publish under.
    pub version_ts: String,
    /// Result code.
    pub status: RunStatus,
    /// Rows added by this run (0 unless `completed`).
    pub rows_added: u64,
}

/// Orchestrates pipeline runs for datasets.
pub struct PipelineDriver {
    store: DatasetStore,
    registry: Arc<PluginRegistry>,
    fetcher: Arc<dyn SourceFetcher>,
    notifier: Option<Arc<dyn Notifier>>,
    lock_table: Option<Arc<dyn LockTable>>,
    guard_config: GuardConfig,
}

impl PipelineDriver {
    /// Creates a driver over the store, plugin registry and fetcher.
    #[must_use]
    pub fn new(
        store: DatasetStore,
        registry: Arc<PluginRegistry>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Self {
        Self {
            store,
            registry,
            fetcher,
            notifier: None,
            lock_table: None,
            guard_config: GuardConfig::default(),
        }
    }

    /// Attaches a notifier for post-publish announcements.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Attaches the lock table; locking still requires `lock_table_name`
    /// in the dataset config.
    #[must_use]
    pub fn with_lock_table(mut self, table: Arc<dyn LockTable>) -> Self {
        self.lock_table = Some(table);
        self
    }

    /// Overrides the consistency-guard tuning.
    #[must_use]
    pub fn with_guard_config(mut self, config: GuardConfig) -> Self {
        self.guard_config = config;
        self
    }

    /// Runs the pipeline once for `config`.
    ///
    /// Never returns an error: every failure is converted to a result code
    /// here, and the lock - when held - is always released before this
    /// returns.
    pub async fn run(&self, config: &DatasetConfig) -> RunReport {
        let run_id = generate_run_id();
        let run_start = Utc::now();
        let version_ts = generate_version_ts(run_start);

        let span = pipeline_span(&config.dataset_id, &run_id);
        self.run_guarded(config, run_id, version_ts, run_start)
            .instrument(span)
            .await
    }

    async fn run_guarded(
        &self,
        config: &DatasetConfig,
        run_id: String,
        version_ts: String,
        run_start: chrono::DateTime<Utc>,
    ) -> RunReport {
        tracing::info!(%version_ts, "starting pipeline run");

        let report = |status: RunStatus, rows_added: u64| RunReport {
            run_id: run_id.clone(),
            version_ts: version_ts.clone(),
            status,
            rows_added,
        };

        if let Err(e) = config.validate() {
            tracing::error!(error = %e, "invalid dataset config");
            return report(RunStatus::Error, 0);
        }

        // Locking: enabled only when both the table and the config name it
        let lock = match (&self.lock_table, &config.lock_table_name) {
            (Some(table), Some(_)) => Some(PipelineLock::new(Arc::clone(table))),
            _ => None,
        };
        let lock_key = DatasetPaths::pipeline_lock_key(&config.dataset_id);

        if let Some(lock) = &lock {
            match lock.acquire(&lock_key, &run_id).await {
                Ok(true) => {}
                Ok(false) => return report(RunStatus::SkippedLock, 0),
                Err(e) => {
                    tracing::error!(error = %e, "lock acquisition failed");
                    return report(RunStatus::Error, 0);
                }
            }
        }

        let outcome = self
            .execute(config, &run_id, &version_ts, run_start)
            .await;

        // Guaranteed release: runs on every path out of execute()
        if let Some(lock) = &lock {
            if let Err(e) = lock.release(&lock_key, &run_id).await {
                tracing::warn!(error = %e, "failed to release lock");
            }
        }

        match outcome {
            Ok((status, rows_added)) => {
                tracing::info!(status = status.as_str(), rows_added, "pipeline run finished");
                report(status, rows_added)
            }
            Err(e) => {
                tracing::error!(error = %e, "pipeline run failed");
                report(RunStatus::Error, 0)
            }
        }
    }

    async fn execute(
        &self,
        config: &DatasetConfig,
        run_id: &str,
        version_ts: &str,
        run_start: chrono::DateTime<Utc>,
    ) -> Result<(RunStatus, u64)> {
        let dataset_id = &config.dataset_id;

        // Self-heal before reading the index for the delta
        let guard = ConsistencyGuard::with_config(self.store.clone(), self.guard_config);
        guard.ensure_consistent(dataset_id).await?;

        // Fetch & fingerprint
        let content = self.fetcher.fetch(config).await?;
        let sha256 = fingerprint(&content);
        let size = content.len() as u64;
        let filename = source_filename(config);
        let raw_key = self
            .store
            .stage_raw_source(dataset_id, run_id, &filename, content.clone())
            .await?;
        tracing::info!(bytes = size, hash = &sha256[..8], "fetched source");

        // Change check
        if config.full_reload {
            tracing::info!("full reload requested, ignoring source fingerprint");
        } else if !source_changed(&self.store, dataset_id, &sha256).await? {
            return Ok((RunStatus::NoChange, 0));
        }

        // Parse
        let parser = self.registry.parser(config.parse.plugin.as_deref())?;
        let parsed = parser.parse(config, &content)?;
        tracing::info!(rows = parsed.len(), parser = parser.id(), "parsed source");

        // Date filter
        let fresh = filter_new_rows(&self.store, dataset_id, parsed).await?;
        if fresh.is_empty() {
            tracing::info!("no rows past the published cutoff");
            return Ok((RunStatus::NoNewData, 0));
        }

        // Normalize
        let normalizer = self.registry.normalizer(config.normalize.plugin.as_deref())?;
        let normalized = normalizer.normalize(config, fresh)?;
        tracing::info!(rows = normalized.len(), normalizer = normalizer.id(), "normalized rows");

        // Delta
        let index = self.store.read_index(dataset_id).await?;
        let delta = compute_delta(
            &normalized,
            index.as_deref(),
            &config.normalize.primary_keys,
        )?;
        tracing::info!(rows = delta.delta.len(), "computed delta");

        if delta.is_empty() && !config.publish_empty_versions {
            return Ok((RunStatus::NoNewData, 0));
        }

        // Enrich
        let enriched = enrich_delta(delta.delta, config, version_ts, run_start);
        let rows_added = enriched.len() as u64;
        let event_rows: Vec<_> = enriched.iter().map(|k| k.row.clone()).collect();

        // Write events (rolls itself back on failure)
        let writer = EventWriter::new(self.store.clone());
        let event_keys = writer
            .write_events(dataset_id, version_ts, &event_rows)
            .await?;

        // Publish (CAS)
        let publisher = Publisher::new(self.store.clone());
        let outcome: PublishOutcome = publisher
            .publish(PublishRequest {
                dataset_id: dataset_id.clone(),
                version_ts: version_ts.to_string(),
                source_file: SourceFileInfo {
                    path: Some(raw_key),
                    sha256,
                    size,
                },
                event_keys,
                rows_added,
                primary_keys: config.normalize.primary_keys.clone(),
                updated_index: delta.updated_index,
                allow_empty: config.publish_empty_versions,
            })
            .await?;

        if !outcome.published {
            return Ok(match outcome.reason {
                Some(PublishSkipReason::CasConflict) => (RunStatus::CasConflict, 0),
                _ => (RunStatus::NoNewData, 0),
            });
        }

        // Consolidate the months this delta touched; failures self-heal
        // next run and never retract the publish
        let months: Vec<(i32, u32)> = enriched
            .iter()
            .filter_map(|k| k.row.partition_month())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let consolidator = Consolidator::new(self.store.clone());
        consolidator.consolidate_months(config, &months).await;

        // Notify, fire-and-forget
        if let Some(notifier) = &self.notifier {
            let manifest_pointer = DatasetPaths::event_manifest_pointer(dataset_id, version_ts);
            notify_consumers(
                notifier,
                config.notify_topic(),
                dataset_id,
                &manifest_pointer,
            )
            .await;
        }

        Ok((RunStatus::Completed, rows_added))
    }
}

/// Filename the raw source is staged under.
fn source_filename(config: &DatasetConfig) -> String {
    config
        .source
        .url
        .as_deref()
        .and_then(|url| url.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("resource")
        .to_string()
}
