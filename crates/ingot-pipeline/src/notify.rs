//! Downstream notification after a successful publish.
//!
//! Fire-and-forget: a notification failure is logged and never fails the
//! run, because the publish already happened and consumers can always
//! re-read the pointer.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Message announced on a topic after a publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetUpdated {
    /// Message type discriminator, always `DATASET_UPDATED`.
    #[serde(rename = "type")]
    pub kind: String,
    /// When the notification was built.
    pub timestamp: DateTime<Utc>,
    /// Dataset that was published.
    pub dataset_id: String,
    /// Bucket-relative path of the published event manifest.
    pub manifest_pointer: String,
}

impl DatasetUpdated {
    /// Builds a notification stamped now.
    #[must_use]
    pub fn new(dataset_id: &str, manifest_pointer: &str) -> Self {
        Self {
            kind: "DATASET_UPDATED".to_string(),
            timestamp: Utc::now(),
            dataset_id: dataset_id.to_string(),
            manifest_pointer: manifest_pointer.to_string(),
        }
    }
}

/// Publishes notifications to a topic.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publishes `event` on `topic`.
    async fn publish(&self, topic: &str, event: &DatasetUpdated) -> Result<()>;
}

/// In-memory notifier for tests; records everything it is asked to send.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: RwLock<Vec<(String, DatasetUpdated)>>,
}

impl MemoryNotifier {
    /// Creates an empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything published so far.
    #[must_use]
    pub fn sent(&self) -> Vec<(String, DatasetUpdated)> {
        self.sent.read().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn publish(&self, topic: &str, event: &DatasetUpdated) -> Result<()> {
        if let Ok(mut sent) = self.sent.write() {
            sent.push((topic.to_string(), event.clone()));
        }
        Ok(())
    }
}

/// Notifies consumers of a new version, fire-and-forget.
///
/// Skips silently without a topic; logs (and swallows) publish failures.
pub async fn notify_consumers(
    notifier: &Arc<dyn Notifier>,
    topic: Option<&str>,
    dataset_id: &str,
    manifest_pointer: &str,
) {
    let Some(topic) = topic else {
        tracing::info!(dataset_id, "skipping notification: no topic configured");
        return;
    };

    let event = DatasetUpdated::new(dataset_id, manifest_pointer);
    match notifier.publish(topic, &event).await {
        Ok(()) => tracing::info!(dataset_id, topic, "notification sent"),
        Err(e) => tracing::warn!(dataset_id, topic, error = %e, "notification failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_wire_format() {
        let event = DatasetUpdated::new("ds", "ds/events/2024-01-15T10-30-00/manifest.json");
        let json = serde_json::to_value(&event).expect("serialize");

        assert_eq!(json["type"], "DATASET_UPDATED");
        assert_eq!(json["dataset_id"], "ds");
        assert_eq!(
            json["manifest_pointer"],
            "ds/events/2024-01-15T10-30-00/manifest.json"
        );
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn memory_notifier_records_messages() {
        let notifier: Arc<dyn Notifier> = Arc::new(MemoryNotifier::new());
        notify_consumers(&notifier, Some("topic-a"), "ds", "ptr").await;
        notify_consumers(&notifier, None, "ds", "ptr").await;

        let memory = Arc::new(MemoryNotifier::new());
        let as_trait: Arc<dyn Notifier> = memory.clone();
        notify_consumers(&as_trait, Some("topic-b"), "ds", "ptr").await;

        let sent = memory.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "topic-b");
        assert_eq!(sent[0].1.dataset_id, "ds");
    }
}
