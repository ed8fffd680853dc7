use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Current wall-clock time in milliseconds since the Unix epoch. All state
/// machine timestamps use this scale.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Kind of physical scanner link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    Wired,
    Wireless,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Wired => write!(f, "wired"),
            TransportKind::Wireless => write!(f, "wireless"),
        }
    }
}

/// A single decoded proximity-tag reading. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub id: Uuid,
    pub tag_id: String,
    /// Signal strength in dBm, typically -100..0.
    pub rssi: i32,
    pub timestamp_ms: u64,
    /// Display route name attached from the registry.
    pub route: String,
}

/// Arrival state of the tracked bus.
///
/// `Departing` and `Passing` are declared for forward compatibility but no
/// transition in the current algorithm produces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrivalState {
    NotPresent,
    Approaching,
    Arrived,
    Departing,
    Passing,
}

impl fmt::Display for ArrivalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrivalState::NotPresent => write!(f, "not present"),
            ArrivalState::Approaching => write!(f, "approaching"),
            ArrivalState::Arrived => write!(f, "arrived"),
            ArrivalState::Departing => write!(f, "departing"),
            ArrivalState::Passing => write!(f, "passing"),
        }
    }
}

/// Tag id prefix marking an operator-asserted manual override.
pub const MANUAL_TAG_PREFIX: &str = "MANUAL-";

/// The tracked bus entity. At most one instance exists at any time, owned by
/// the presence tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusStatus {
    pub tag_id: String,
    pub route: String,
    pub state: ArrivalState,
    /// Detection confidence 0..100, non-decreasing while the same tag is
    /// tracked.
    pub confidence: u8,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
    /// Exponential moving average of reading rssi, seeded with the first
    /// reading.
    pub avg_rssi: f64,
    pub description: String,
}

impl BusStatus {
    /// Whether this entity was installed by a manual override rather than
    /// automatic detection.
    pub fn is_manual(&self) -> bool {
        self.tag_id.starts_with(MANUAL_TAG_PREFIX)
    }
}

/// Connection manager state. `preferred` persists across disconnects and
/// drives auto-reconnect target selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionState {
    /// Kind of the currently open transport, if any.
    pub active: Option<TransportKind>,
    pub preferred: Option<TransportKind>,
    pub is_reconnecting: bool,
    pub attempt_count: u32,
}

/// Coarse scanner status reported in health snapshots.
///
/// `Error` is declared in the health contract but the current monitor never
/// produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Connected,
    Idle,
    Disconnected,
    Error,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Connected => write!(f, "connected"),
            HealthStatus::Idle => write!(f, "idle"),
            HealthStatus::Disconnected => write!(f, "disconnected"),
            HealthStatus::Error => write!(f, "error"),
        }
    }
}

/// Link quality estimated from the recent rssi window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

/// Point-in-time scanner health record, recomputed from scratch on every
/// monitor tick and never partially mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub last_read_time_ms: Option<u64>,
    /// 0..100.
    pub battery_level: u8,
    pub link_quality: LinkQuality,
    pub is_scanning: bool,
    pub faults: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_tag_detection() {
        let bus = BusStatus {
            tag_id: format!("{}1724744100000", MANUAL_TAG_PREFIX),
            route: "Route 9".to_string(),
            state: ArrivalState::Arrived,
            confidence: 100,
            first_seen_ms: 0,
            last_seen_ms: 0,
            avg_rssi: 0.0,
            description: String::new(),
        };
        assert!(bus.is_manual());

        let auto = BusStatus {
            tag_id: "E280-11AC-0001".to_string(),
            ..bus
        };
        assert!(!auto.is_manual());
    }

    #[test]
    fn test_arrival_state_display() {
        assert_eq!(ArrivalState::Approaching.to_string(), "approaching");
        assert_eq!(ArrivalState::NotPresent.to_string(), "not present");
    }
}
