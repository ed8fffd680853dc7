use super::{ScannerTransport, TransportFactory};
use crate::error::TransportError;
use crate::types::TransportKind;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Signal profile one simulated bus sweeps through: approach ramp, then a
/// strong dwell long enough to satisfy the arrival gate.
const RSSI_PROFILE: [i32; 15] = [
    -84, -79, -74, -69, -64, -60, -58, -57, -58, -59, -58, -57, -58, -60, -63,
];

/// Deterministic stand-in scanner for demos and development without
/// hardware. Cycles through the configured tags, emitting one wire line per
/// cadence period with rssi following [`RSSI_PROFILE`].
pub struct SimulatedTransport {
    tags: Vec<String>,
    cadence: Duration,
    tick: usize,
    open: bool,
    disconnect_tx: watch::Sender<bool>,
}

impl SimulatedTransport {
    pub fn new(tags: Vec<String>, cadence: Duration) -> Self {
        let (disconnect_tx, _) = watch::channel(false);
        Self {
            tags,
            cadence,
            tick: 0,
            open: false,
            disconnect_tx,
        }
    }

    fn next_line(&mut self) -> String {
        let bus = self.tick / RSSI_PROFILE.len();
        let phase = self.tick % RSSI_PROFILE.len();
        self.tick += 1;

        let tag = &self.tags[bus % self.tags.len()];
        format!("{},{}\n", tag, RSSI_PROFILE[phase])
    }
}

#[async_trait]
impl ScannerTransport for SimulatedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Wired
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        if self.tags.is_empty() {
            return Err(TransportError::NotFound {
                kind: TransportKind::Wired,
            });
        }
        self.open = true;
        info!("Simulated scanner open ({} tags)", self.tags.len());
        Ok(())
    }

    async fn read_chunk(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        if !self.open {
            return Err(TransportError::Disconnected);
        }
        tokio::time::sleep(self.cadence).await;
        let line = self.next_line();
        Ok(Some(line.into_bytes()))
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            debug!("Simulated scanner closed");
        }
    }

    fn disconnected(&self) -> watch::Receiver<bool> {
        self.disconnect_tx.subscribe()
    }
}

/// Factory yielding simulated scanners for any requested kind.
pub struct SimulatedTransportFactory {
    tags: Vec<String>,
    cadence: Duration,
}

impl SimulatedTransportFactory {
    pub fn new(tags: Vec<String>) -> Self {
        Self {
            tags,
            cadence: Duration::from_millis(1000),
        }
    }

    pub fn with_cadence(tags: Vec<String>, cadence: Duration) -> Self {
        Self { tags, cadence }
    }
}

#[async_trait]
impl TransportFactory for SimulatedTransportFactory {
    async fn request(
        &self,
        _kind: TransportKind,
    ) -> Result<Box<dyn ScannerTransport>, TransportError> {
        Ok(Box::new(SimulatedTransport::new(
            self.tags.clone(),
            self.cadence,
        )))
    }
}
