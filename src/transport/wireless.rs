use super::ScannerTransport;
use crate::error::TransportError;
use crate::types::TransportKind;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const READ_BUF_SIZE: usize = 64;

/// Connect/notify style scanner reached over a socket link bridge.
pub struct WirelessTransport {
    addr: String,
    stream: Option<TcpStream>,
    disconnect_tx: watch::Sender<bool>,
}

impl WirelessTransport {
    pub fn new<S: Into<String>>(addr: S) -> Self {
        let (disconnect_tx, _) = watch::channel(false);
        Self {
            addr: addr.into(),
            stream: None,
            disconnect_tx,
        }
    }

    fn map_connect_error(&self, e: std::io::Error) -> TransportError {
        match e.kind() {
            ErrorKind::PermissionDenied => TransportError::PermissionDenied {
                kind: TransportKind::Wireless,
            },
            ErrorKind::ConnectionRefused | ErrorKind::AddrNotAvailable | ErrorKind::NotFound => {
                TransportError::NotFound {
                    kind: TransportKind::Wireless,
                }
            }
            _ => TransportError::Open {
                kind: TransportKind::Wireless,
                details: e.to_string(),
            },
        }
    }

    fn mark_disconnected(&mut self) {
        self.stream = None;
        let _ = self.disconnect_tx.send(true);
    }
}

#[async_trait]
impl ScannerTransport for WirelessTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Wireless
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        debug!("Connecting to wireless scanner at {}", self.addr);
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| self.map_connect_error(e))?;
        self.stream = Some(stream);
        let _ = self.disconnect_tx.send(false);
        info!("Wireless scanner link up at {}", self.addr);
        Ok(())
    }

    async fn read_chunk(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Disconnected)?;

        let mut buf = [0u8; READ_BUF_SIZE];
        match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
            Err(_) => Ok(None),
            Ok(Ok(0)) => {
                warn!("Wireless scanner link at {} closed by peer", self.addr);
                self.mark_disconnected();
                Err(TransportError::Disconnected)
            }
            Ok(Ok(n)) => Ok(Some(buf[..n].to_vec())),
            Ok(Err(e)) => {
                warn!("Wireless scanner read failed: {}", e);
                self.mark_disconnected();
                Err(TransportError::Read {
                    details: e.to_string(),
                })
            }
        }
    }

    async fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Closed wireless scanner link to {}", self.addr);
        }
    }

    fn disconnected(&self) -> watch::Receiver<bool> {
        self.disconnect_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_refused_maps_to_not_found() {
        // Port 1 is essentially never listening.
        let mut transport = WirelessTransport::new("127.0.0.1:1");
        match transport.open().await {
            Err(TransportError::NotFound { kind }) => assert_eq!(kind, TransportKind::Wireless),
            Err(TransportError::Open { .. }) => {} // some platforms report differently
            other => panic!("Expected connect failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_and_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"E280-11AC-0002,-71\n").await.unwrap();
            // Dropping the socket closes the link.
        });

        let mut transport = WirelessTransport::new(addr.to_string());
        transport.open().await.unwrap();
        let disco = transport.disconnected();

        let chunk = transport
            .read_chunk(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chunk, b"E280-11AC-0002,-71\n");

        server.await.unwrap();
        assert!(matches!(
            transport.read_chunk(Duration::from_secs(1)).await,
            Err(TransportError::Disconnected)
        ));
        assert!(*disco.borrow());
    }

    #[tokio::test]
    async fn test_read_timeout_is_not_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut transport = WirelessTransport::new(addr.to_string());
        transport.open().await.unwrap();

        let result = transport.read_chunk(Duration::from_millis(50)).await;
        assert!(matches!(result, Ok(None)));
    }
}
