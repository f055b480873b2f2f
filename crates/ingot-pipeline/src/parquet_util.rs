//! Parquet encoding/decoding helpers for event payloads and the key index.
//!
//! This module defines the canonical Parquet schemas for the two file kinds
//! the pipeline persists:
//! - event partitions and projection windows (observation rows)
//! - `index/keys.parquet` (a single deduplicated `key_hash` column)
//!
//! The row schema is the contract for downstream readers. Keep changes
//! backwards-compatible: readers of older partitions must keep working,
//! because events are immutable and never rewritten.
//!
//! Timestamps are persisted as epoch-millisecond `Int64`, dates as
//! `Date32`. The `key_hash` column is never part of an event payload.

use std::io::Cursor;
use std::sync::Arc;

use arrow::array::{Array as _, Date32Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;

use ingot_core::row::{QualityFlag, Row, SourceKind};

use crate::error::{PipelineError, Result};

fn rows_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("dataset_id", DataType::Utf8, false),
        Field::new("provider", DataType::Utf8, false),
        Field::new("frequency", DataType::Utf8, false),
        Field::new("unit", DataType::Utf8, false),
        Field::new("source_kind", DataType::Utf8, false),
        Field::new("obs_time", DataType::Int64, true),
        Field::new("obs_date", DataType::Date32, true),
        Field::new("value", DataType::Float64, false),
        Field::new("internal_series_code", DataType::Utf8, false),
        Field::new("version", DataType::Utf8, false),
        Field::new("vintage_date", DataType::Int64, true),
        Field::new("quality_flag", DataType::Utf8, false),
    ]))
}

fn key_index_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![Field::new(
        "key_hash",
        DataType::Utf8,
        false,
    )]))
}

/// Returns the observation-row schema for contract tests.
#[must_use]
pub fn row_schema() -> Schema {
    (*rows_schema()).clone()
}

/// Returns the key-index schema for contract tests.
#[must_use]
pub fn index_schema() -> Schema {
    (*key_index_schema()).clone()
}

fn writer_properties() -> WriterProperties {
    // Keep properties minimal and widely compatible with downstream readers.
    let created_by = KeyValue {
        key: "created_by".to_string(),
        value: Some("ingot-pipeline".to_string()),
    };
    WriterProperties::builder()
        .set_key_value_metadata(Some(vec![created_by]))
        .build()
}

fn write_single_batch(schema: Arc<Schema>, batch: &RecordBatch) -> Result<Bytes> {
    let mut cursor = Cursor::new(Vec::<u8>::new());
    let props = writer_properties();
    let mut writer = ArrowWriter::try_new(&mut cursor, schema, Some(props)).map_err(|e| {
        PipelineError::Parquet {
            message: format!("parquet writer init failed: {e}"),
        }
    })?;
    writer.write(batch).map_err(|e| PipelineError::Parquet {
        message: format!("parquet write failed: {e}"),
    })?;
    writer.close().map_err(|e| PipelineError::Parquet {
        message: format!("parquet close failed: {e}"),
    })?;
    Ok(Bytes::from(cursor.into_inner()))
}

fn read_batches(bytes: &Bytes) -> Result<Vec<RecordBatch>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes.clone())
        .map_err(|e| PipelineError::Parquet {
            message: format!("parquet reader init failed: {e}"),
        })?
        .build()
        .map_err(|e| PipelineError::Parquet {
            message: format!("parquet reader build failed: {e}"),
        })?;

    let mut batches = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| PipelineError::Parquet {
            message: format!("parquet read batch failed: {e}"),
        })?;
        batches.push(batch);
    }
    Ok(batches)
}

fn date_to_days(date: NaiveDate) -> i32 {
    // NaiveDate::default() is the Unix epoch (1970-01-01)
    i32::try_from(date.signed_duration_since(NaiveDate::default()).num_days()).unwrap_or(i32::MAX)
}

fn days_to_date(days: i32) -> NaiveDate {
    NaiveDate::default() + Duration::days(i64::from(days))
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| PipelineError::InvariantViolation {
        message: format!("timestamp out of range: {millis}"),
    })
}

/// Writes observation rows as a Parquet payload.
///
/// # Errors
///
/// Returns an error if the record batch cannot be built or the Parquet
/// write fails.
pub fn write_rows(rows: &[Row]) -> Result<Bytes> {
    let schema = rows_schema();

    let dataset_ids = StringArray::from(
        rows.iter()
            .map(|r| Some(r.dataset_id.as_str()))
            .collect::<Vec<_>>(),
    );
    let providers = StringArray::from(
        rows.iter()
            .map(|r| Some(r.provider.as_str()))
            .collect::<Vec<_>>(),
    );
    let frequencies = StringArray::from(
        rows.iter()
            .map(|r| Some(r.frequency.as_str()))
            .collect::<Vec<_>>(),
    );
    let units = StringArray::from(
        rows.iter()
            .map(|r| Some(r.unit.as_str()))
            .collect::<Vec<_>>(),
    );
    let source_kinds = StringArray::from(
        rows.iter()
            .map(|r| Some(r.source_kind.as_str()))
            .collect::<Vec<_>>(),
    );
    let obs_times = Int64Array::from(
        rows.iter()
            .map(|r| r.obs_time.map(|t| t.timestamp_millis()))
            .collect::<Vec<_>>(),
    );
    let obs_dates = Date32Array::from(
        rows.iter()
            .map(|r| r.obs_date.map(date_to_days))
            .collect::<Vec<_>>(),
    );
    let values = Float64Array::from(rows.iter().map(|r| r.value).collect::<Vec<_>>());
    let series_codes = StringArray::from(
        rows.iter()
            .map(|r| Some(r.internal_series_code.as_str()))
            .collect::<Vec<_>>(),
    );
    let versions = StringArray::from(
        rows.iter()
            .map(|r| Some(r.version.as_str()))
            .collect::<Vec<_>>(),
    );
    let vintage_dates = Int64Array::from(
        rows.iter()
            .map(|r| r.vintage_date.map(|t| t.timestamp_millis()))
            .collect::<Vec<_>>(),
    );
    let quality_flags = StringArray::from(
        rows.iter()
            .map(|r| Some(r.quality_flag.as_str()))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(dataset_ids),
            Arc::new(providers),
            Arc::new(frequencies),
            Arc::new(units),
            Arc::new(source_kinds),
            Arc::new(obs_times),
            Arc::new(obs_dates),
            Arc::new(values),
            Arc::new(series_codes),
            Arc::new(versions),
            Arc::new(vintage_dates),
            Arc::new(quality_flags),
        ],
    )
    .map_err(|e| PipelineError::Parquet {
        message: format!("record batch build failed: {e}"),
    })?;

    write_single_batch(schema, &batch)
}

/// Reads observation rows from a Parquet payload.
///
/// # Errors
///
/// Returns an error if the Parquet payload is invalid or required columns
/// are missing.
pub fn read_rows(bytes: &Bytes) -> Result<Vec<Row>> {
    let mut out = Vec::new();
    for batch in read_batches(bytes)? {
        let dataset_id = col_string(&batch, "dataset_id")?;
        let provider = col_string(&batch, "provider")?;
        let frequency = col_string(&batch, "frequency")?;
        let unit = col_string(&batch, "unit")?;
        let source_kind = col_string(&batch, "source_kind")?;
        let obs_time = col_i64(&batch, "obs_time")?;
        let obs_date = col_date32(&batch, "obs_date")?;
        let value = col_f64(&batch, "value")?;
        let series_code = col_string(&batch, "internal_series_code")?;
        let version = col_string(&batch, "version")?;
        let vintage_date = col_i64(&batch, "vintage_date")?;
        let quality_flag = col_string(&batch, "quality_flag")?;

        for i in 0..batch.num_rows() {
            out.push(Row {
                dataset_id: dataset_id.value(i).to_string(),
                provider: provider.value(i).to_string(),
                frequency: frequency.value(i).to_string(),
                unit: unit.value(i).to_string(),
                source_kind: SourceKind::parse(source_kind.value(i)).ok_or_else(|| {
                    PipelineError::InvariantViolation {
                        message: format!("unknown source_kind: {}", source_kind.value(i)),
                    }
                })?,
                obs_time: if obs_time.is_null(i) {
                    None
                } else {
                    Some(millis_to_datetime(obs_time.value(i))?)
                },
                obs_date: if obs_date.is_null(i) {
                    None
                } else {
                    Some(days_to_date(obs_date.value(i)))
                },
                value: value.value(i),
                internal_series_code: series_code.value(i).to_string(),
                version: version.value(i).to_string(),
                vintage_date: if vintage_date.is_null(i) {
                    None
                } else {
                    Some(millis_to_datetime(vintage_date.value(i))?)
                },
                quality_flag: QualityFlag::parse(quality_flag.value(i)).ok_or_else(|| {
                    PipelineError::InvariantViolation {
                        message: format!("unknown quality_flag: {}", quality_flag.value(i)),
                    }
                })?,
            });
        }
    }
    Ok(out)
}

/// Writes the key index (single deduplicated `key_hash` column).
///
/// # Errors
///
/// Returns an error if the record batch cannot be built or the Parquet
/// write fails.
pub fn write_key_index(hashes: &[String]) -> Result<Bytes> {
    let schema = key_index_schema();

    let key_hashes = StringArray::from(
        hashes
            .iter()
            .map(|h| Some(h.as_str()))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(key_hashes)]).map_err(|e| {
        PipelineError::Parquet {
            message: format!("record batch build failed: {e}"),
        }
    })?;

    write_single_batch(schema, &batch)
}

/// Reads the key index.
///
/// # Errors
///
/// Returns an error if the Parquet payload is invalid or the `key_hash`
/// column is missing.
pub fn read_key_index(bytes: &Bytes) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for batch in read_batches(bytes)? {
        let key_hash = col_string(&batch, "key_hash")?;
        for i in 0..batch.num_rows() {
            out.push(key_hash.value(i).to_string());
        }
    }
    Ok(out)
}

fn col_index(batch: &RecordBatch, name: &str) -> Result<usize> {
    batch
        .schema()
        .index_of(name)
        .map_err(|e| PipelineError::InvariantViolation {
            message: format!("missing column '{name}': {e}"),
        })
}

fn col_string<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column(col_index(batch, name)?)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| PipelineError::InvariantViolation {
            message: format!("column '{name}' is not StringArray"),
        })
}

fn col_i64<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    batch
        .column(col_index(batch, name)?)
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| PipelineError::InvariantViolation {
            message: format!("column '{name}' is not Int64Array"),
        })
}

fn col_f64<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Float64Array> {
    batch
        .column(col_index(batch, name)?)
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| PipelineError::InvariantViolation {
            message: format!("column '{name}' is not Float64Array"),
        })
}

fn col_date32<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Date32Array> {
    batch
        .column(col_index(batch, name)?)
        .as_any()
        .downcast_ref::<Date32Array>()
        .ok_or_else(|| PipelineError::InvariantViolation {
            message: format!("column '{name}' is not Date32Array"),
        })
}
