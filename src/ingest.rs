use crate::history::RawHistory;
use crate::registry::RouteRegistry;
use crate::types::Reading;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

/// Substituted when the rssi field is missing or unparseable. Malformed
/// signal data never drops the whole line.
pub const DEFAULT_RSSI_DBM: i32 = -70;

/// Decodes raw scanner lines into typed readings and maintains the rolling
/// raw history.
///
/// Wire format is one ASCII reading per line: `"<tagId>,<rssi>"`.
pub struct ReadIngestor {
    registry: Arc<RouteRegistry>,
    history: Arc<Mutex<RawHistory>>,
    min_rssi_threshold: i32,
}

impl ReadIngestor {
    pub fn new(
        registry: Arc<RouteRegistry>,
        history: Arc<Mutex<RawHistory>>,
        min_rssi_threshold: i32,
    ) -> Self {
        Self {
            registry,
            history,
            min_rssi_threshold,
        }
    }

    /// Decode one line, timestamping it at ingestion. Returns `None` for
    /// blank lines and unknown tags; the rssi sample is still recorded in the
    /// rolling window either way.
    pub async fn ingest(&self, raw_line: &str, now_ms: u64) -> Option<Reading> {
        let line = raw_line.trim();
        if line.is_empty() {
            return None;
        }

        let mut parts = line.splitn(2, ',');
        let tag_id = parts.next().unwrap_or_default().trim();
        if tag_id.is_empty() {
            return None;
        }

        let rssi = parts
            .next()
            .and_then(|field| field.trim().parse::<i32>().ok())
            .unwrap_or(DEFAULT_RSSI_DBM);

        let route = self.registry.lookup(tag_id);

        let mut history = self.history.lock().await;
        history.record_sample(rssi, now_ms);

        let route = match route {
            Some(route) => route.to_string(),
            None => {
                trace!("Dropping reading for unknown tag {}", tag_id);
                return None;
            }
        };

        let reading = Reading {
            id: Uuid::new_v4(),
            tag_id: tag_id.to_string(),
            rssi,
            timestamp_ms: now_ms,
            route,
        };
        history.record_reading(reading.clone());
        drop(history);

        debug!(
            "Ingested reading {} ({} dBm) for {}",
            reading.tag_id, reading.rssi, reading.route
        );
        Some(reading)
    }

    /// Admission filter applied before a reading may affect the tracked bus.
    /// Rejected readings remain in raw history.
    pub fn is_admitted(&self, reading: &Reading) -> bool {
        reading.rssi >= self.min_rssi_threshold
    }

    pub fn min_rssi_threshold(&self) -> i32 {
        self.min_rssi_threshold
    }
}
