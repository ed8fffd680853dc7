use crate::error::EventBusError;
use crate::types::{ArrivalState, BusStatus, HealthSnapshot, Reading, TransportKind};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Why the tracked bus was cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClearReason {
    /// The idle eviction timer expired.
    Evicted,
    /// An operator cleared it explicitly.
    ManualClear,
}

/// Events emitted by the core, replacing per-category callbacks with typed
/// message passing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BayScanEvent {
    /// A reading was decoded from the wire, admitted or not.
    ReadDecoded { reading: Reading },
    /// The tracked bus was created or updated. `previous_state` is
    /// `NotPresent` when the bus was just created, so hosts can detect
    /// arrival transitions for chimes and announcements.
    BusUpdated {
        bus: BusStatus,
        previous_state: ArrivalState,
    },
    /// The tracked bus was cleared.
    BusCleared {
        tag_id: String,
        route: String,
        reason: ClearReason,
    },
    /// The scanner transport opened or dropped.
    TransportStatusChanged {
        kind: TransportKind,
        connected: bool,
        timestamp_ms: u64,
    },
    /// Periodic health snapshot.
    HealthReport { snapshot: HealthSnapshot },
}

impl BayScanEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            BayScanEvent::ReadDecoded { reading } => {
                format!("Read {} at {} dBm", reading.tag_id, reading.rssi)
            }
            BayScanEvent::BusUpdated { bus, .. } => {
                format!(
                    "{} {} (confidence {}%)",
                    bus.route, bus.state, bus.confidence
                )
            }
            BayScanEvent::BusCleared { route, reason, .. } => {
                format!("{} cleared ({:?})", route, reason)
            }
            BayScanEvent::TransportStatusChanged {
                kind, connected, ..
            } => {
                format!(
                    "{} scanner {}",
                    kind,
                    if *connected {
                        "connected"
                    } else {
                        "disconnected"
                    }
                )
            }
            BayScanEvent::HealthReport { snapshot } => {
                format!(
                    "Health {} (battery {}%, link {:?})",
                    snapshot.status, snapshot.battery_level, snapshot.link_quality
                )
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            BayScanEvent::ReadDecoded { .. } => "read_decoded",
            BayScanEvent::BusUpdated { .. } => "bus_updated",
            BayScanEvent::BusCleared { .. } => "bus_cleared",
            BayScanEvent::TransportStatusChanged { .. } => "transport_status_changed",
            BayScanEvent::HealthReport { .. } => "health_report",
        }
    }
}

/// Async event bus for host and component coordination using broadcast
/// channels.
pub struct EventBus {
    sender: broadcast::Sender<BayScanEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<BayScanEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers. Publishing with no subscribers is
    /// not an error; the event is simply dropped.
    pub fn publish(&self, event: BayScanEvent) -> usize {
        match &event {
            BayScanEvent::TransportStatusChanged {
                kind, connected, ..
            } => {
                if *connected {
                    info!("{} scanner connected", kind);
                } else {
                    warn!("{} scanner disconnected", kind);
                }
            }
            BayScanEvent::BusUpdated { bus, .. } => {
                info!("Bus update: {} {} ({}%)", bus.route, bus.state, bus.confidence);
            }
            BayScanEvent::BusCleared { route, reason, .. } => {
                info!("Bus cleared: {} ({:?})", route, reason);
            }
            _ => {
                debug!("Event: {}", event.description());
            }
        }

        self.sender.send(event).unwrap_or(0)
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Custom filter function
    Custom(fn(&BayScanEvent) -> bool),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &BayScanEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering, for hosts that only care about one event
/// category (for example the health feed).
pub struct EventReceiver {
    receiver: broadcast::Receiver<BayScanEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<BayScanEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<BayScanEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::PublishFailed {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<BayScanEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    return Ok(None);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::PublishFailed {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now_ms;
    use tokio::time::{timeout, Duration};
    use uuid::Uuid;

    fn sample_reading() -> Reading {
        Reading {
            id: Uuid::new_v4(),
            tag_id: "E280-11AC-0001".to_string(),
            rssi: -62,
            timestamp_ms: now_ms(),
            route: "Route 402 - Northgate".to_string(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let subscriber_count = event_bus.publish(BayScanEvent::ReadDecoded {
            reading: sample_reading(),
        });
        assert_eq!(subscriber_count, 1);

        let received = receiver.recv().await.unwrap();
        match received {
            BayScanEvent::ReadDecoded { reading } => {
                assert_eq!(reading.tag_id, "E280-11AC-0001");
            }
            _ => panic!("Unexpected event type"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_not_an_error() {
        let event_bus = EventBus::new(10);
        let delivered = event_bus.publish(BayScanEvent::ReadDecoded {
            reading: sample_reading(),
        });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let event_bus = EventBus::new(10);
        let receiver = event_bus.subscribe();
        let filter = EventFilter::EventTypes(vec!["bus_cleared"]);
        let mut filtered = EventReceiver::new(receiver, filter, "test".to_string());

        event_bus.publish(BayScanEvent::ReadDecoded {
            reading: sample_reading(),
        });
        event_bus.publish(BayScanEvent::BusCleared {
            tag_id: "E280-11AC-0001".to_string(),
            route: "Route 402 - Northgate".to_string(),
            reason: ClearReason::Evicted,
        });

        let received = timeout(Duration::from_millis(100), filtered.recv())
            .await
            .unwrap()
            .unwrap();
        match received {
            BayScanEvent::BusCleared { reason, .. } => {
                assert_eq!(reason, ClearReason::Evicted);
            }
            _ => panic!("Unexpected event type"),
        }
    }

    #[test]
    fn test_event_properties() {
        let event = BayScanEvent::BusCleared {
            tag_id: "E280-11AC-0001".to_string(),
            route: "Route 402 - Northgate".to_string(),
            reason: ClearReason::ManualClear,
        };
        assert_eq!(event.event_type(), "bus_cleared");
        assert!(event.description().contains("Route 402"));
    }
}
