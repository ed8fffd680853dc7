#[cfg(test)]
pub(crate) mod mock;
mod simulated;
mod wired;
mod wireless;

pub use simulated::{SimulatedTransport, SimulatedTransportFactory};
pub use wired::WiredTransport;
pub use wireless::WirelessTransport;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::types::TransportKind;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;

/// Uniform capability over a physical scanner link.
///
/// A read timeout is reported as `Ok(None)` and is not an error; fatal
/// conditions (device removed, link dropped) surface as `Err` and through the
/// out-of-band [`ScannerTransport::disconnected`] channel.
#[async_trait]
pub trait ScannerTransport: Send {
    fn kind(&self) -> TransportKind;

    /// Open and claim the device. Must leave the transport unusable but
    /// consistent on failure.
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Read one chunk of raw bytes, waiting at most `timeout`.
    async fn read_chunk(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    /// Release the device. Safe to call more than once.
    async fn close(&mut self);

    /// Out-of-band unexpected-disconnect notification. The value flips to
    /// `true` when the device drops underneath an open transport.
    fn disconnected(&self) -> watch::Receiver<bool>;
}

/// Constructs transports for a requested kind, standing in for device
/// enumeration and access requests. Reconnection re-invokes this for the
/// preferred kind.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn request(
        &self,
        kind: TransportKind,
    ) -> Result<Box<dyn ScannerTransport>, TransportError>;
}

/// Factory backed by real device endpoints from configuration.
pub struct DeviceTransportFactory {
    config: TransportConfig,
}

impl DeviceTransportFactory {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportFactory for DeviceTransportFactory {
    async fn request(
        &self,
        kind: TransportKind,
    ) -> Result<Box<dyn ScannerTransport>, TransportError> {
        match kind {
            TransportKind::Wired => Ok(Box::new(WiredTransport::new(&self.config.wired_device))),
            TransportKind::Wireless => Ok(Box::new(WirelessTransport::new(
                &self.config.wireless_addr,
            ))),
        }
    }
}
