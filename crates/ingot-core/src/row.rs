//! The normalized observation row shared by every pipeline stage.
//!
//! A [`Row`] is produced by a normalizer with the observation fields set
//! (`obs_time`, `value`, `internal_series_code`), then completed by the
//! metadata enricher with the dataset- and run-scoped columns. The same
//! type flows through delta computation, event serialization and
//! projection consolidation, so column semantics are defined exactly once.

use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// How the source material reached the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    /// Source was a fetched file.
    #[default]
    #[serde(rename = "FILE")]
    File,
    /// Source was an API response.
    #[serde(rename = "API")]
    Api,
}

impl SourceKind {
    /// Returns the canonical wire string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::File => "FILE",
            Self::Api => "API",
        }
    }

    /// Parses the canonical wire string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FILE" => Some(Self::File),
            "API" => Some(Self::Api),
            _ => None,
        }
    }
}

/// Quality flag attached to every published observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityFlag {
    /// Observation passed normalization unchanged.
    #[default]
    #[serde(rename = "OK")]
    Ok,
    /// Observation was flagged as an outlier by the normalizer.
    #[serde(rename = "OUTLIER")]
    Outlier,
    /// Observation was imputed.
    #[serde(rename = "IMPUTED")]
    Imputed,
}

impl QualityFlag {
    /// Returns the canonical wire string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Outlier => "OUTLIER",
            Self::Imputed => "IMPUTED",
        }
    }

    /// Parses the canonical wire string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(Self::Ok),
            "OUTLIER" => Some(Self::Outlier),
            "IMPUTED" => Some(Self::Imputed),
            _ => None,
        }
    }
}

/// One normalized (and, after enrichment, publishable) observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Dataset this row belongs to (enrichment column).
    pub dataset_id: String,
    /// Data provider (enrichment column).
    pub provider: String,
    /// Observation frequency (enrichment column).
    pub frequency: String,
    /// Measurement unit (enrichment column).
    pub unit: String,
    /// Source kind (enrichment column).
    pub source_kind: SourceKind,
    /// Observation timestamp, UTC. Preferred partition column.
    pub obs_time: Option<DateTime<Utc>>,
    /// Observation date; partition fallback when `obs_time` is absent.
    pub obs_date: Option<NaiveDate>,
    /// Observed value.
    pub value: f64,
    /// Series the observation belongs to.
    pub internal_series_code: String,
    /// Version timestamp of the run that published this row.
    pub version: String,
    /// Time the run observed this row (run start).
    pub vintage_date: Option<DateTime<Utc>>,
    /// Quality flag, defaults to `OK`.
    pub quality_flag: QualityFlag,
}

impl Row {
    /// Creates a bare observation row, before enrichment.
    #[must_use]
    pub fn observation(
        obs_time: Option<DateTime<Utc>>,
        value: f64,
        internal_series_code: impl Into<String>,
    ) -> Self {
        Self {
            dataset_id: String::new(),
            provider: String::new(),
            frequency: String::new(),
            unit: String::new(),
            source_kind: SourceKind::default(),
            obs_time,
            obs_date: obs_time.map(|t| t.date_naive()),
            value,
            internal_series_code: internal_series_code.into(),
            version: String::new(),
            vintage_date: None,
            quality_flag: QualityFlag::default(),
        }
    }

    /// Returns the canonical string form of a logical column, used for
    /// primary-key hashing.
    ///
    /// These forms are a stability contract: any change to them changes
    /// every key hash and would make the whole index diverge from history.
    /// Returns `None` for unknown columns or absent optional values.
    #[must_use]
    pub fn canonical_value(&self, column: &str) -> Option<String> {
        match column {
            "dataset_id" => Some(self.dataset_id.clone()),
            "provider" => Some(self.provider.clone()),
            "frequency" => Some(self.frequency.clone()),
            "unit" => Some(self.unit.clone()),
            "source_kind" => Some(self.source_kind.as_str().to_string()),
            "obs_time" => self
                .obs_time
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
            "obs_date" => self.obs_date.map(|d| d.format("%Y-%m-%d").to_string()),
            "value" => Some(self.value.to_string()),
            "internal_series_code" => Some(self.internal_series_code.clone()),
            "version" => Some(self.version.clone()),
            "vintage_date" => self
                .vintage_date
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
            "quality_flag" => Some(self.quality_flag.as_str().to_string()),
            _ => None,
        }
    }

    /// Derives the `(year, month)` partition for this row, from `obs_time`
    /// with `obs_date` as fallback. `None` when the row carries no date.
    #[must_use]
    pub fn partition_month(&self) -> Option<(i32, u32)> {
        if let Some(t) = self.obs_time {
            return Some((t.year(), t.month()));
        }
        self.obs_date.map(|d| (d.year(), d.month()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn partition_prefers_obs_time() {
        let t = Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap();
        let mut row = Row::observation(Some(t), 1.0, "s1");
        row.obs_date = Some(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());

        assert_eq!(row.partition_month(), Some((2024, 2)));
    }

    #[test]
    fn partition_falls_back_to_obs_date() {
        let mut row = Row::observation(None, 1.0, "s1");
        row.obs_date = Some(NaiveDate::from_ymd_opt(2024, 7, 3).unwrap());

        assert_eq!(row.partition_month(), Some((2024, 7)));
    }

    #[test]
    fn partition_none_without_any_date() {
        let row = Row::observation(None, 1.0, "s1");
        assert_eq!(row.partition_month(), None);
    }

    #[test]
    fn canonical_values_are_stable_strings() {
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let row = Row::observation(Some(t), 1.5, "ipc_core");

        assert_eq!(
            row.canonical_value("obs_time").as_deref(),
            Some("2024-01-15T10:30:00Z")
        );
        assert_eq!(
            row.canonical_value("obs_date").as_deref(),
            Some("2024-01-15")
        );
        assert_eq!(row.canonical_value("value").as_deref(), Some("1.5"));
        assert_eq!(
            row.canonical_value("internal_series_code").as_deref(),
            Some("ipc_core")
        );
        assert_eq!(row.canonical_value("quality_flag").as_deref(), Some("OK"));
        assert_eq!(row.canonical_value("no_such_column"), None);
    }

    #[test]
    fn enum_wire_strings_roundtrip() {
        assert_eq!(SourceKind::parse(SourceKind::Api.as_str()), Some(SourceKind::Api));
        assert_eq!(
            QualityFlag::parse(QualityFlag::Imputed.as_str()),
            Some(QualityFlag::Imputed)
        );
        assert_eq!(QualityFlag::parse("bogus"), None);
    }
}
