//! Bay scanner core: presence tracking for bus arrivals from a proximity
//! tag scanner, with resilient transport handling.
//!
//! The crate assembles five concerns behind [`BayScanService`]:
//!
//! - transports over the physical scanner link ([`transport`])
//! - connection lifecycle with bounded auto-reconnect ([`connection`])
//! - wire-line ingestion, registry lookup and admission ([`ingest`])
//! - the single-bus arrival state machine ([`tracker`])
//! - derived scanner health snapshots ([`health`])
//!
//! Hosts subscribe to the [`events::EventBus`] feed and render; the core
//! never draws or plays audio itself.

pub mod config;
pub mod connection;
pub mod describe;
pub mod error;
pub mod events;
pub mod health;
pub mod history;
pub mod ingest;
pub mod registry;
pub mod service;
pub mod tracker;
pub mod transport;
pub mod types;

pub use config::BayScanConfig;
pub use connection::ConnectionManager;
pub use describe::{Describer, TemplateDescriber};
pub use error::{BayScanError, DescribeError, Result, TransportError};
pub use events::{BayScanEvent, ClearReason, EventBus, EventFilter, EventReceiver};
pub use health::HealthMonitor;
pub use history::{RawHistory, RingBuffer};
pub use ingest::ReadIngestor;
pub use registry::RouteRegistry;
pub use service::BayScanService;
pub use tracker::{ObserveOutcome, PresenceTracker};
pub use transport::{
    DeviceTransportFactory, ScannerTransport, SimulatedTransport, SimulatedTransportFactory,
    TransportFactory, WiredTransport, WirelessTransport,
};
pub use types::{
    ArrivalState, BusStatus, ConnectionState, HealthSnapshot, HealthStatus, LinkQuality, Reading,
    TransportKind,
};
