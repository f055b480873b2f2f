//! Observability infrastructure for ingot.
//!
//! Structured logging with consistent spans. This module provides the
//! initialization helper and span constructors shared by the pipeline and
//! any embedding application.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `ingot_pipeline=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for one pipeline run with standard fields.
#[must_use]
pub fn pipeline_span(dataset_id: &str, run_id: &str) -> Span {
    tracing::info_span!("pipeline", dataset = dataset_id, run = run_id)
}

/// Creates a span for consolidation of one month.
#[must_use]
pub fn consolidation_span(dataset_id: &str, year: i32, month: u32) -> Span {
    tracing::info_span!("consolidation", dataset = dataset_id, year, month)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Pretty); // Second call should be a no-op
    }

    #[test]
    fn span_helpers_create_spans() {
        let span = pipeline_span("ds", "run-1");
        let _guard = span.enter();
        tracing::info!("test message in span");
    }
}
