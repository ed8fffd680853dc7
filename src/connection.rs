use crate::error::TransportError;
use crate::events::{BayScanEvent, EventBus};
use crate::ingest::ReadIngestor;
use crate::transport::{ScannerTransport, TransportFactory};
use crate::types::{now_ms, ConnectionState, Reading, TransportKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bounded auto-reconnect protocol parameters.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const BACKOFF_BASE_MS: u64 = 1_000;
pub const BACKOFF_CAP_MS: u64 = 10_000;

/// Pause after a read timeout before retrying.
const READ_RETRY_PAUSE: Duration = Duration::from_millis(100);

/// Delay slept before reconnect attempt `attempt` (1-based): exponential,
/// capped at [`BACKOFF_CAP_MS`].
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    Duration::from_millis(BACKOFF_CAP_MS.min(BACKOFF_BASE_MS.saturating_mul(exp)))
}

struct TaskHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl TaskHandle {
    async fn cancel_and_join(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

/// Owns the scanner transport lifecycle: opens transports, runs the read
/// loop, detects unexpected disconnects and drives the bounded-backoff
/// auto-reconnect protocol.
///
/// No error ever crosses the `connect` boundary; failures are reported as
/// `false` and through health faults.
pub struct ConnectionManager {
    factory: Arc<dyn TransportFactory>,
    ingestor: Arc<ReadIngestor>,
    admitted_tx: mpsc::Sender<Reading>,
    events: EventBus,
    health_poke: Arc<Notify>,
    state: Arc<Mutex<ConnectionState>>,
    read_timeout: Duration,
    read_session: Mutex<Option<TaskHandle>>,
    reconnect_session: Mutex<Option<TaskHandle>>,
}

impl ConnectionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        ingestor: Arc<ReadIngestor>,
        admitted_tx: mpsc::Sender<Reading>,
        events: EventBus,
        health_poke: Arc<Notify>,
        state: Arc<Mutex<ConnectionState>>,
        read_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            factory,
            ingestor,
            admitted_tx,
            events,
            health_poke,
            state,
            read_timeout,
            read_session: Mutex::new(None),
            reconnect_session: Mutex::new(None),
        })
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.lock().await.clone()
    }

    /// Request, open and claim a transport of the given kind, then start the
    /// read loop. Records the kind as preferred for auto-reconnect. Returns
    /// `false` on any failure, leaving state unchanged.
    pub async fn connect(self: &Arc<Self>, kind: TransportKind) -> bool {
        let mut transport = match self.factory.request(kind).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!("{} scanner request failed: {}", kind, e);
                return false;
            }
        };
        if let Err(e) = transport.open().await {
            warn!("{} scanner open failed: {}", kind, e);
            return false;
        }

        // Replace any previous session before recording the new transport,
        // so no open handle is ever leaked.
        self.stop_read_session().await;
        {
            let mut state = self.state.lock().await;
            state.active = Some(kind);
            state.preferred = Some(kind);
        }
        self.start_read_session(transport).await;

        self.events.publish(BayScanEvent::TransportStatusChanged {
            kind,
            connected: true,
            timestamp_ms: now_ms(),
        });
        self.health_poke.notify_one();
        true
    }

    /// Tear everything down: forget the preferred kind, cancel any in-flight
    /// reconnect, stop the read loop (which closes the transport on every
    /// exit path) and force a final health recompute.
    pub async fn disconnect(&self) {
        info!("Disconnecting scanner");
        {
            let mut state = self.state.lock().await;
            state.preferred = None;
        }

        if let Some(handle) = self.reconnect_session.lock().await.take() {
            handle.cancel_and_join().await;
        }
        self.stop_read_session().await;

        let was_active = {
            let mut state = self.state.lock().await;
            state.is_reconnecting = false;
            state.attempt_count = 0;
            state.active.take()
        };
        if let Some(kind) = was_active {
            self.events.publish(BayScanEvent::TransportStatusChanged {
                kind,
                connected: false,
                timestamp_ms: now_ms(),
            });
        }
        self.health_poke.notify_one();
    }

    async fn start_read_session(self: &Arc<Self>, transport: Box<dyn ScannerTransport>) {
        let token = CancellationToken::new();
        let task = tokio::spawn(Self::run_read_loop(
            Arc::clone(self),
            transport,
            token.clone(),
        ));
        *self.read_session.lock().await = Some(TaskHandle { token, task });
    }

    async fn stop_read_session(&self) {
        if let Some(handle) = self.read_session.lock().await.take() {
            handle.cancel_and_join().await;
        }
    }

    /// Read loop paired with one open transport. A timeout is not an error;
    /// a fatal transport error breaks the loop into unexpected-disconnect
    /// handling. The transport is closed on every exit path.
    // Returns a boxed future (rather than being an `async fn`) to break the
    // opaque-type cycle with `run_reconnect`, which the compiler cannot
    // prove `Send` across `tokio::spawn` otherwise.
    fn run_read_loop(
        manager: Arc<Self>,
        mut transport: Box<dyn ScannerTransport>,
        token: CancellationToken,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            let kind = transport.kind();
            let mut disco = transport.disconnected();
            debug!("Read loop started for {} scanner", kind);

            let fatal = loop {
                tokio::select! {
                    _ = token.cancelled() => break false,
                    changed = disco.changed() => {
                        if changed.is_err() || *disco.borrow() {
                            warn!("{} scanner dropped unexpectedly", kind);
                            break true;
                        }
                    }
                    result = transport.read_chunk(manager.read_timeout) => match result {
                        Ok(Some(chunk)) => manager.dispatch_chunk(&chunk).await,
                        Ok(None) => tokio::time::sleep(READ_RETRY_PAUSE).await,
                        Err(e) => {
                            warn!("Fatal {} scanner error: {}", kind, e);
                            break true;
                        }
                    }
                }
            };

            transport.close().await;
            debug!("Read loop for {} scanner ended (fatal: {})", kind, fatal);
            if fatal {
                manager.handle_unexpected_disconnect(kind).await;
            }
        })
    }

    async fn dispatch_chunk(&self, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk);
        for line in text.lines() {
            let Some(reading) = self.ingestor.ingest(line, now_ms()).await else {
                continue;
            };
            let admitted = self.ingestor.is_admitted(&reading);
            self.events.publish(BayScanEvent::ReadDecoded {
                reading: reading.clone(),
            });
            if admitted {
                if self.admitted_tx.send(reading).await.is_err() {
                    warn!("Presence tracker channel closed, dropping reading");
                }
            } else {
                debug!(
                    "Reading {} below admission threshold ({} dBm)",
                    reading.tag_id, reading.rssi
                );
            }
        }
    }

    /// Clears the dropped handle, forces a health recompute and, when a
    /// preferred kind is set and no reconnect is running, starts the
    /// reconnect protocol.
    async fn handle_unexpected_disconnect(self: &Arc<Self>, kind: TransportKind) {
        let preferred = {
            let mut state = self.state.lock().await;
            state.active = None;
            state.preferred
        };
        self.events.publish(BayScanEvent::TransportStatusChanged {
            kind,
            connected: false,
            timestamp_ms: now_ms(),
        });
        self.health_poke.notify_one();

        let Some(preferred) = preferred else {
            return;
        };
        {
            let mut state = self.state.lock().await;
            if state.is_reconnecting {
                return;
            }
            state.is_reconnecting = true;
            state.attempt_count = 0;
        }

        let token = CancellationToken::new();
        let task = tokio::spawn(Self::run_reconnect(
            Arc::clone(self),
            preferred,
            token.clone(),
        ));
        *self.reconnect_session.lock().await = Some(TaskHandle { token, task });
    }

    /// Bounded-backoff reconnect: up to [`MAX_RECONNECT_ATTEMPTS`] attempts
    /// with capped exponential delays, stopping on first success. Exhaustion
    /// gives up silently; only the health fault list tells the story. The
    /// reconnecting flag is cleared on every exit path.
    fn run_reconnect(
        manager: Arc<Self>,
        kind: TransportKind,
        token: CancellationToken,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            info!("Attempting auto-reconnect to {} scanner", kind);

            let mut success = false;
            for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
                {
                    manager.state.lock().await.attempt_count = attempt;
                }
                let delay = backoff_delay(attempt);
                debug!(
                    "Reconnect attempt {}/{} after {:?}",
                    attempt, MAX_RECONNECT_ATTEMPTS, delay
                );
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                if token.is_cancelled() {
                    break;
                }
                // disconnect() may have raced us and withdrawn the target.
                if manager.state.lock().await.preferred.is_none() {
                    break;
                }

                match manager.try_reconnect(kind).await {
                    Ok(()) => {
                        info!("Auto-reconnect to {} scanner successful", kind);
                        success = true;
                        break;
                    }
                    Err(e) => {
                        warn!("Reconnect attempt {} failed: {}", attempt, e);
                    }
                }
            }

            {
                manager.state.lock().await.is_reconnecting = false;
            }
            if !success {
                debug!("Auto-reconnect to {} scanner gave up", kind);
            }
            manager.health_poke.notify_one();
        })
    }

    /// One kind-specific reconnection attempt: re-request the device and
    /// re-open it, then restart the read loop.
    async fn try_reconnect(self: &Arc<Self>, kind: TransportKind) -> Result<(), TransportError> {
        let mut transport = self.factory.request(kind).await?;
        transport.open().await?;

        self.stop_read_session().await;
        {
            self.state.lock().await.active = Some(kind);
        }
        self.start_read_session(transport).await;

        self.events.publish(BayScanEvent::TransportStatusChanged {
            kind,
            connected: true,
            timestamp_ms: now_ms(),
        });
        self.health_poke.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::RawHistory;
    use crate::registry::RouteRegistry;
    use crate::transport::mock::{ScriptStep, ScriptedFactory, ScriptedTransport};
    use std::collections::HashMap;

    fn test_parts() -> (
        Arc<ReadIngestor>,
        mpsc::Receiver<Reading>,
        mpsc::Sender<Reading>,
        EventBus,
        Arc<Notify>,
        Arc<Mutex<ConnectionState>>,
    ) {
        let mut map = HashMap::new();
        map.insert(
            "E280-11AC-0001".to_string(),
            "Route 402 - Northgate".to_string(),
        );
        let ingestor = Arc::new(ReadIngestor::new(
            Arc::new(RouteRegistry::new(map)),
            Arc::new(Mutex::new(RawHistory::new())),
            -75,
        ));
        let (tx, rx) = mpsc::channel(64);
        (
            ingestor,
            rx,
            tx,
            EventBus::new(64),
            Arc::new(Notify::new()),
            Arc::new(Mutex::new(ConnectionState::default())),
        )
    }

    fn manager_with(factory: ScriptedFactory) -> (Arc<ConnectionManager>, mpsc::Receiver<Reading>) {
        let (ingestor, rx, tx, events, poke, state) = test_parts();
        let manager = ConnectionManager::new(
            Arc::new(factory),
            ingestor,
            tx,
            events,
            poke,
            state,
            Duration::from_millis(50),
        );
        (manager, rx)
    }

    async fn wait_until<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..600 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_backoff_delay_sequence() {
        let delays: Vec<u64> = (1..=MAX_RECONNECT_ATTEMPTS)
            .map(|attempt| backoff_delay(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![2_000, 4_000, 8_000, 10_000, 10_000]);
    }

    #[tokio::test]
    async fn test_connect_failure_returns_false() {
        let factory = ScriptedFactory::new(vec![ScriptedTransport::failing_open()]);
        let (manager, _rx) = manager_with(factory);

        assert!(!manager.connect(TransportKind::Wired).await);
        let state = manager.state().await;
        assert_eq!(state.active, None);
        assert_eq!(state.preferred, None);
        assert!(!state.is_reconnecting);
    }

    #[tokio::test]
    async fn test_connect_records_preferred_kind() {
        let factory = ScriptedFactory::new(vec![ScriptedTransport::with_steps(vec![])]);
        let (manager, _rx) = manager_with(factory);

        assert!(manager.connect(TransportKind::Wireless).await);
        let state = manager.state().await;
        assert_eq!(state.active, Some(TransportKind::Wireless));
        assert_eq!(state.preferred, Some(TransportKind::Wireless));

        manager.disconnect().await;
        let state = manager.state().await;
        assert_eq!(state.active, None);
        assert_eq!(state.preferred, None);
    }

    #[tokio::test]
    async fn test_read_loop_feeds_admitted_readings() {
        let factory = ScriptedFactory::new(vec![ScriptedTransport::with_steps(vec![
            ScriptStep::Line("E280-11AC-0001,-60\n"),
            ScriptStep::Silence,
            ScriptStep::Line("E280-11AC-0001,-90\n"), // below threshold
            ScriptStep::Line("UNKNOWN-TAG,-50\n"),    // not in registry
            ScriptStep::Line("E280-11AC-0001,-70\n"),
        ])]);
        let (manager, mut rx) = manager_with(factory);

        assert!(manager.connect(TransportKind::Wired).await);

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.rssi, -60);

        // The weak and unknown readings never reach the tracker channel.
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.rssi, -70);

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_triggers_reconnect_success() {
        let factory = ScriptedFactory::new(vec![
            ScriptedTransport::with_steps(vec![ScriptStep::Fatal]),
            ScriptedTransport::failing_open(), // attempt 1 fails
            ScriptedTransport::with_steps(vec![]), // attempt 2 succeeds
        ]);
        let (manager, _rx) = manager_with(factory);

        assert!(manager.connect(TransportKind::Wired).await);

        let state = Arc::clone(&manager.state);
        wait_until(|| {
            let state = Arc::clone(&state);
            async move {
                let state = state.lock().await;
                state.active.is_some() && !state.is_reconnecting
            }
        })
        .await;

        let state = manager.state().await;
        assert_eq!(state.active, Some(TransportKind::Wired));
        assert_eq!(state.attempt_count, 2);

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_exhaustion_gives_up_silently() {
        let mut scripts = vec![ScriptedTransport::with_steps(vec![ScriptStep::Fatal])];
        for _ in 0..MAX_RECONNECT_ATTEMPTS {
            scripts.push(ScriptedTransport::failing_open());
        }
        let factory = ScriptedFactory::new(scripts);
        let (manager, _rx) = manager_with(factory);

        assert!(manager.connect(TransportKind::Wired).await);
        let start = tokio::time::Instant::now();

        let state = Arc::clone(&manager.state);
        wait_until(|| {
            let state = Arc::clone(&state);
            async move {
                let state = state.lock().await;
                state.attempt_count == MAX_RECONNECT_ATTEMPTS && !state.is_reconnecting
            }
        })
        .await;

        // Backoff totals 2+4+8+10+10 seconds before giving up.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(34_000), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(36_000), "{:?}", elapsed);

        let state = manager.state().await;
        assert_eq!(state.active, None);
        assert_eq!(state.preferred, Some(TransportKind::Wired));
        assert!(!state.is_reconnecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_reconnect() {
        let factory =
            ScriptedFactory::new(vec![ScriptedTransport::with_steps(vec![ScriptStep::Fatal])]);
        let (manager, _rx) = manager_with(factory);

        assert!(manager.connect(TransportKind::Wired).await);

        let state = Arc::clone(&manager.state);
        wait_until(|| {
            let state = Arc::clone(&state);
            async move { state.lock().await.is_reconnecting }
        })
        .await;

        manager.disconnect().await;
        let state = manager.state().await;
        assert!(!state.is_reconnecting);
        assert_eq!(state.preferred, None);
        assert_eq!(state.active, None);
    }
}
