use crate::types::{ArrivalState, BusStatus, Reading, MANUAL_TAG_PREFIX};
use tracing::{debug, info};

/// Confidence assigned when a bus is first detected.
pub const INITIAL_CONFIDENCE: u8 = 60;
/// Confidence gained per admitted reading, capped at 100.
pub const CONFIDENCE_STEP: u8 = 5;
pub const MAX_CONFIDENCE: u8 = 100;

/// EMA weights: `new = 0.7 * prior + 0.3 * sample`.
pub const EMA_PRIOR_WEIGHT: f64 = 0.7;
pub const EMA_SAMPLE_WEIGHT: f64 = 0.3;

/// Average signal must exceed this for the dwell to count as an arrival.
pub const ARRIVAL_RSSI_GATE_DBM: f64 = -65.0;

/// Idle eviction timeouts.
pub const EVICTION_IDLE_MS: u64 = 8_000;
pub const MANUAL_EVICTION_IDLE_MS: u64 = 120_000;

/// Default dwell required before an arrival can be declared.
pub const DEFAULT_ARRIVAL_DURATION_MS: u64 = 3_000;

const PENDING_AUTO_DESCRIPTION: &str = "Detecting bus approach pattern...";
const PENDING_MANUAL_DESCRIPTION: &str = "Manually confirmed. Fetching guidance...";

/// Result of feeding one admitted reading to the tracker.
#[derive(Debug, Clone)]
pub enum ObserveOutcome {
    /// A new bus replaced nothing or a different tag.
    Created(BusStatus),
    /// The current bus was updated in place.
    Updated {
        bus: BusStatus,
        previous_state: ArrivalState,
    },
    /// A manual override is active for a different route; the reading was
    /// dropped without touching it.
    Ignored,
}

/// The arrival state machine. Owns the single "current bus" entity; callers
/// must serialize access so at most one transition is in flight at a time.
///
/// Reachable states are absent -> `Approaching` -> `Arrived`. The only paths
/// back to absent are the idle eviction timer and an explicit manual clear,
/// and no transition out of `Arrived` exists.
#[derive(Debug)]
pub struct PresenceTracker {
    current: Option<BusStatus>,
    arrival_duration_ms: u64,
}

impl PresenceTracker {
    pub fn new(arrival_duration_ms: u64) -> Self {
        Self {
            current: None,
            arrival_duration_ms,
        }
    }

    pub fn current(&self) -> Option<&BusStatus> {
        self.current.as_ref()
    }

    /// Apply one admitted reading.
    pub fn observe(&mut self, reading: &Reading) -> ObserveOutcome {
        if let Some(bus) = &self.current {
            // Manual overrides are sticky against conflicting automatic
            // detections.
            if bus.is_manual() && bus.route != reading.route {
                debug!(
                    "Ignoring reading for {} while manual override for {} is active",
                    reading.route, bus.route
                );
                return ObserveOutcome::Ignored;
            }
        }

        let replace = match &self.current {
            None => true,
            Some(bus) => bus.tag_id != reading.tag_id && !bus.is_manual(),
        };

        if replace {
            let bus = BusStatus {
                tag_id: reading.tag_id.clone(),
                route: reading.route.clone(),
                state: ArrivalState::Approaching,
                confidence: INITIAL_CONFIDENCE,
                first_seen_ms: reading.timestamp_ms,
                last_seen_ms: reading.timestamp_ms,
                avg_rssi: reading.rssi as f64,
                description: PENDING_AUTO_DESCRIPTION.to_string(),
            };
            info!("Tracking new bus: {} ({})", bus.route, bus.tag_id);
            self.current = Some(bus.clone());
            return ObserveOutcome::Created(bus);
        }

        // Same tag, or a manual override consistent with this route.
        let bus = self.current.as_mut().expect("checked above");
        let previous_state = bus.state;

        let duration = reading.timestamp_ms.saturating_sub(bus.first_seen_ms);
        bus.avg_rssi = EMA_PRIOR_WEIGHT * bus.avg_rssi + EMA_SAMPLE_WEIGHT * reading.rssi as f64;
        if duration > self.arrival_duration_ms && bus.avg_rssi > ARRIVAL_RSSI_GATE_DBM {
            // The state never regresses; Arrived stays Arrived.
            if bus.state == ArrivalState::Approaching {
                info!("Bus arrived: {}", bus.route);
            }
            bus.state = ArrivalState::Arrived;
        }
        bus.confidence = bus
            .confidence
            .saturating_add(CONFIDENCE_STEP)
            .min(MAX_CONFIDENCE);
        bus.last_seen_ms = reading.timestamp_ms;

        ObserveOutcome::Updated {
            bus: bus.clone(),
            previous_state,
        }
    }

    /// Idle eviction check, run on an independent periodic tick. Returns the
    /// evicted bus when the idle timeout has elapsed.
    pub fn evict(&mut self, now_ms: u64) -> Option<BusStatus> {
        let bus = self.current.as_ref()?;
        let timeout = if bus.is_manual() {
            MANUAL_EVICTION_IDLE_MS
        } else {
            EVICTION_IDLE_MS
        };
        let idle = now_ms.saturating_sub(bus.last_seen_ms);
        if idle > timeout {
            let evicted = self.current.take();
            if let Some(bus) = &evicted {
                info!("Evicting {} after {} ms idle", bus.route, idle);
            }
            evicted
        } else {
            None
        }
    }

    /// Operator override. An empty route clears the current bus
    /// unconditionally; otherwise a synthetic manual bus is installed
    /// directly in `Arrived`, bypassing the duration/signal gate.
    pub fn manual_identify(&mut self, route: &str, now_ms: u64) -> Option<BusStatus> {
        if route.is_empty() {
            if self.current.take().is_some() {
                info!("Manual clear of tracked bus");
            }
            return None;
        }

        let bus = BusStatus {
            tag_id: format!("{}{}", MANUAL_TAG_PREFIX, now_ms),
            route: route.to_string(),
            state: ArrivalState::Arrived,
            confidence: MAX_CONFIDENCE,
            first_seen_ms: now_ms,
            last_seen_ms: now_ms,
            avg_rssi: 0.0,
            description: PENDING_MANUAL_DESCRIPTION.to_string(),
        };
        info!("Manual identify: {}", bus.route);
        self.current = Some(bus.clone());
        Some(bus)
    }

    /// Explicitly clear the current bus, returning it if one was tracked.
    pub fn clear(&mut self) -> Option<BusStatus> {
        self.current.take()
    }

    /// Attach a generated description, but only if the same tag is still
    /// tracked. Returns the updated bus on success.
    pub fn set_description(&mut self, tag_id: &str, description: String) -> Option<BusStatus> {
        let bus = self.current.as_mut()?;
        if bus.tag_id != tag_id {
            return None;
        }
        bus.description = description;
        Some(bus.clone())
    }
}
