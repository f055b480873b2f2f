//! # ingot-pipeline
//!
//! Incremental, event-sourced dataset publication for the ingot pipeline.
//!
//! This crate implements the publication protocol on top of the storage and
//! lock contracts from `ingot-core`:
//!
//! - **Delta Engine**: primary-key hashing and anti-join against the index
//! - **Event Writer**: immutable per-month Parquet partitions with rollback
//! - **Publisher**: atomic pointer advance via CAS, post-CAS index write
//! - **Consistency Guard**: pointer/index divergence detection and repair
//! - **Consolidator**: WAL-staged per-month read projections
//! - **Driver**: orders the stages, guards with the lock, emits a run report
//!
//! ## Correctness Model
//!
//! Two object-storage primitives carry the whole correctness argument: the
//! single pointer object `current/manifest.json` mutated only by CAS, and
//! immutable versioned event objects that are never rewritten once
//! acknowledged. Everything else (primary-key index, per-month event index,
//! projections) is derived state that can be rebuilt from events.
//!
//! ## Storage Layout
//!
//! ```text
//! datasets/{dataset_id}/
//! ├── current/manifest.json        # pointer (CAS target)
//! ├── index/keys.parquet           # primary-key hash index
//! ├── events/{version_ts}/         # immutable event versions
//! └── projections/                 # per-month read models
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod consolidator;
pub mod delta;
pub mod driver;
pub mod enrich;
pub mod error;
pub mod event_writer;
pub mod guard;
pub mod manifest;
pub mod notify;
pub mod parquet_util;
pub mod publisher;
pub mod source;
pub mod store;

// Re-export main types at crate root
pub use consolidator::Consolidator;
pub use delta::{compute_delta, compute_key_hash, DeltaResult, KeyedRow};
pub use driver::{PipelineDriver, RunReport, RunStatus};
pub use error::{PipelineError, Result};
pub use event_writer::EventWriter;
pub use guard::{ConsistencyGuard, ConsistencyStatus, GuardConfig};
pub use manifest::{
    ConsolidationManifest, ConsolidationStatus, EventIndex, EventManifest, PointerManifest,
    SourceFileInfo,
};
pub use publisher::{PublishOutcome, Publisher};
pub use store::DatasetStore;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::consolidator::Consolidator;
    pub use crate::delta::{compute_delta, DeltaResult};
    pub use crate::driver::{PipelineDriver, RunReport, RunStatus};
    pub use crate::error::{PipelineError, Result};
    pub use crate::event_writer::EventWriter;
    pub use crate::guard::{ConsistencyGuard, ConsistencyStatus};
    pub use crate::manifest::{EventManifest, PointerManifest};
    pub use crate::notify::{DatasetUpdated, MemoryNotifier, Notifier};
    pub use crate::publisher::{PublishOutcome, Publisher};
    pub use crate::source::{Normalizer, Parser, PluginRegistry, SourceFetcher, StaticSource};
    pub use crate::store::DatasetStore;
}
