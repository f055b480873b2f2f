//! # ingot-core
//!
//! Core abstractions for the ingot incremental dataset ingestion pipeline.
//!
//! This crate provides the foundational types used across all ingot components:
//!
//! - **Storage Backend**: Object-store contract with conditional (CAS) writes
//! - **Pipeline Lock**: Conditional-write key-value lock with TTL recovery
//! - **Paths**: Canonical object-store key layout for a dataset
//! - **Row Model**: The normalized observation row shared by every stage
//! - **Configuration**: Resolved per-dataset configuration
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `ingot-core` is the only crate allowed to define shared primitives. The
//! pipeline crate builds the publication protocol on top of these contracts
//! and never talks to a concrete backend directly.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod lock;
pub mod observability;
pub mod paths;
pub mod retry;
pub mod row;
pub mod storage;
pub mod version;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use ingot_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{
        DatasetConfig, NormalizeConfig, NotifyConfig, ParseConfig, SourceConfig, SourceOrigin,
    };
    pub use crate::error::{Error, Result};
    pub use crate::lock::{LockRecord, LockTable, MemoryLockTable, PipelineLock};
    pub use crate::paths::DatasetPaths;
    pub use crate::row::{QualityFlag, Row, SourceKind};
    pub use crate::storage::{Etag, MemoryBackend, PutCondition, PutOutcome, StorageBackend};
    pub use crate::version::{generate_run_id, generate_version_ts};
}

// Re-export key types at crate root for ergonomics
pub use config::{DatasetConfig, NormalizeConfig, NotifyConfig, ParseConfig, SourceConfig};
pub use error::{Error, Result};
pub use lock::{LockRecord, LockTable, MemoryLockTable, PipelineLock};
pub use observability::{init_logging, LogFormat};
pub use paths::DatasetPaths;
pub use retry::RetryingBackend;
pub use row::{QualityFlag, Row, SourceKind};
pub use storage::{Etag, MemoryBackend, PutCondition, PutOutcome, StorageBackend};
