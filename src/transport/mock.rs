//! Scripted transports for exercising the connection layer without
//! hardware. Each transport plays back a fixed sequence of read results;
//! an exhausted script reports timeouts forever.

use super::{ScannerTransport, TransportFactory};
use crate::error::TransportError;
use crate::types::TransportKind;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

pub(crate) enum ScriptStep {
    /// One decoded wire line arrives.
    Line(&'static str),
    /// A read times out.
    Silence,
    /// The device drops underneath the transport.
    Fatal,
}

pub(crate) struct ScriptedTransport {
    kind: TransportKind,
    open_ok: bool,
    steps: VecDeque<ScriptStep>,
    open: bool,
    disconnect_tx: watch::Sender<bool>,
}

impl ScriptedTransport {
    pub(crate) fn with_steps(steps: Vec<ScriptStep>) -> Self {
        let (disconnect_tx, _) = watch::channel(false);
        Self {
            kind: TransportKind::Wired,
            open_ok: true,
            steps: steps.into(),
            open: false,
            disconnect_tx,
        }
    }

    pub(crate) fn failing_open() -> Self {
        let mut transport = Self::with_steps(vec![]);
        transport.open_ok = false;
        transport
    }
}

#[async_trait]
impl ScannerTransport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        if !self.open_ok {
            return Err(TransportError::NotFound { kind: self.kind });
        }
        self.open = true;
        Ok(())
    }

    async fn read_chunk(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        if !self.open {
            return Err(TransportError::Disconnected);
        }
        match self.steps.pop_front() {
            Some(ScriptStep::Line(line)) => Ok(Some(line.as_bytes().to_vec())),
            Some(ScriptStep::Silence) | None => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(None)
            }
            Some(ScriptStep::Fatal) => {
                let _ = self.disconnect_tx.send(true);
                Err(TransportError::Disconnected)
            }
        }
    }

    async fn close(&mut self) {
        self.open = false;
    }

    fn disconnected(&self) -> watch::Receiver<bool> {
        self.disconnect_tx.subscribe()
    }
}

/// Hands out pre-built transports in order; further requests fail as if no
/// device were present.
pub(crate) struct ScriptedFactory {
    scripts: Mutex<VecDeque<ScriptedTransport>>,
    requests: AtomicU32,
}

impl ScriptedFactory {
    pub(crate) fn new(scripts: Vec<ScriptedTransport>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: AtomicU32::new(0),
        }
    }

    #[allow(dead_code)]
    pub(crate) fn request_count(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for ScriptedFactory {
    async fn request(
        &self,
        kind: TransportKind,
    ) -> Result<Box<dyn ScannerTransport>, TransportError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let next = self
            .scripts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        match next {
            Some(transport) => Ok(Box::new(transport)),
            None => Err(TransportError::NotFound { kind }),
        }
    }
}
