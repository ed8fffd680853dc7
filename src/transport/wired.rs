use super::ScannerTransport;
use crate::error::TransportError;
use crate::types::TransportKind;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const READ_BUF_SIZE: usize = 64;

/// Bulk-transfer style scanner attached as a character device node.
pub struct WiredTransport {
    path: PathBuf,
    file: Option<File>,
    disconnect_tx: watch::Sender<bool>,
}

impl WiredTransport {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let (disconnect_tx, _) = watch::channel(false);
        Self {
            path: path.into(),
            file: None,
            disconnect_tx,
        }
    }

    fn map_open_error(&self, e: std::io::Error) -> TransportError {
        match e.kind() {
            ErrorKind::PermissionDenied => TransportError::PermissionDenied {
                kind: TransportKind::Wired,
            },
            ErrorKind::NotFound => TransportError::NotFound {
                kind: TransportKind::Wired,
            },
            _ => TransportError::Open {
                kind: TransportKind::Wired,
                details: e.to_string(),
            },
        }
    }

    fn mark_disconnected(&mut self) {
        self.file = None;
        let _ = self.disconnect_tx.send(true);
    }
}

#[async_trait]
impl ScannerTransport for WiredTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Wired
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        debug!("Opening wired scanner at {}", self.path.display());
        let file = File::open(&self.path)
            .await
            .map_err(|e| self.map_open_error(e))?;
        self.file = Some(file);
        let _ = self.disconnect_tx.send(false);
        info!("Wired scanner open at {}", self.path.display());
        Ok(())
    }

    async fn read_chunk(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let file = self.file.as_mut().ok_or(TransportError::Disconnected)?;

        let mut buf = [0u8; READ_BUF_SIZE];
        match tokio::time::timeout(timeout, file.read(&mut buf)).await {
            Err(_) => Ok(None),
            Ok(Ok(0)) => {
                // EOF on a device node means the device went away.
                warn!("Wired scanner at {} reached EOF", self.path.display());
                self.mark_disconnected();
                Err(TransportError::Disconnected)
            }
            Ok(Ok(n)) => Ok(Some(buf[..n].to_vec())),
            Ok(Err(e)) => {
                warn!("Wired scanner read failed: {}", e);
                self.mark_disconnected();
                Err(TransportError::Read {
                    details: e.to_string(),
                })
            }
        }
    }

    async fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("Closed wired scanner at {}", self.path.display());
        }
    }

    fn disconnected(&self) -> watch::Receiver<bool> {
        self.disconnect_tx.subscribe()
    }
}
