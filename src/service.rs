use crate::config::BayScanConfig;
use crate::connection::ConnectionManager;
use crate::describe::{describe_or_fallback, Describer, TemplateDescriber};
use crate::error::{BayScanError, Result};
use crate::events::{BayScanEvent, ClearReason, EventBus, EventFilter, EventReceiver};
use crate::health::HealthMonitor;
use crate::history::RawHistory;
use crate::ingest::ReadIngestor;
use crate::registry::RouteRegistry;
use crate::tracker::{ObserveOutcome, PresenceTracker};
use crate::transport::{DeviceTransportFactory, TransportFactory};
use crate::types::{
    now_ms, ArrivalState, BusStatus, ConnectionState, Reading, TransportKind,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cadence of the independent idle-eviction check.
const EVICTION_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Capacity of the admitted-readings channel between the read path and the
/// tracker dispatch task.
const ADMITTED_CHANNEL_CAPACITY: usize = 64;

/// Top-level assembly of the bay scanner core: transports, connection
/// management, ingestion, the presence tracker and health monitoring, all
/// coordinated over the event bus.
///
/// Hosts construct one service, subscribe, start it and drive connect and
/// manual-identify from their UI.
pub struct BayScanService {
    config: BayScanConfig,
    events: EventBus,
    tracker: Arc<Mutex<PresenceTracker>>,
    history: Arc<Mutex<RawHistory>>,
    connection: Arc<ConnectionManager>,
    health: Arc<HealthMonitor>,
    describer: Arc<dyn Describer>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    admitted_rx: Mutex<Option<mpsc::Receiver<Reading>>>,
}

impl BayScanService {
    /// Build a service on real device transports and the template describer.
    pub fn new(config: BayScanConfig) -> Arc<Self> {
        let factory = Arc::new(DeviceTransportFactory::new(config.transport.clone()));
        Self::with_parts(config, factory, Arc::new(TemplateDescriber))
    }

    /// Build a service with injected transport factory and describer.
    pub fn with_parts(
        config: BayScanConfig,
        factory: Arc<dyn TransportFactory>,
        describer: Arc<dyn Describer>,
    ) -> Arc<Self> {
        let events = EventBus::new(config.system.event_bus_capacity);
        let registry = Arc::new(RouteRegistry::new(config.registry_map()));
        let history = Arc::new(Mutex::new(RawHistory::new()));
        let ingestor = Arc::new(ReadIngestor::new(
            registry,
            Arc::clone(&history),
            config.scanner.min_rssi_threshold,
        ));
        let state = Arc::new(Mutex::new(ConnectionState::default()));
        let health_poke = Arc::new(Notify::new());
        let (admitted_tx, admitted_rx) = mpsc::channel(ADMITTED_CHANNEL_CAPACITY);

        let connection = ConnectionManager::new(
            factory,
            ingestor,
            admitted_tx,
            events.clone(),
            Arc::clone(&health_poke),
            Arc::clone(&state),
            Duration::from_millis(config.scanner.read_timeout_ms),
        );
        let health = Arc::new(HealthMonitor::new(
            state,
            Arc::clone(&history),
            events.clone(),
            health_poke,
        ));
        let tracker = Arc::new(Mutex::new(PresenceTracker::new(
            config.scanner.arrival_duration_ms,
        )));

        Arc::new(Self {
            config,
            events,
            tracker,
            history,
            connection,
            health,
            describer,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            admitted_rx: Mutex::new(Some(admitted_rx)),
        })
    }

    /// Start the background tasks: tracker dispatch, idle eviction and the
    /// health monitor. Starting twice is an error.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let rx = self
            .admitted_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| BayScanError::system("service already started"))?;

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.spawn_dispatch(rx));
        tasks.push(self.spawn_eviction());
        tasks.push(Arc::clone(&self.health).spawn(self.cancel.child_token()));

        info!(
            "Bay scanner service started for {} / {}",
            self.config.terminal.terminal_name, self.config.terminal.bay_number
        );
        Ok(())
    }

    /// Stop all background tasks and release any open transport.
    pub async fn shutdown(&self) {
        info!("Shutting down bay scanner service");
        self.cancel.cancel();
        self.connection.disconnect().await;
        for task in self.tasks.lock().await.drain(..) {
            let _ = task.await;
        }
        info!("Bay scanner service stopped");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BayScanEvent> {
        self.events.subscribe()
    }

    /// Subscribe to a filtered event feed, for hosts that only care about one
    /// category.
    pub fn subscribe_filtered(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.events.subscribe(), filter, name.to_string())
    }

    pub async fn connect(&self, kind: TransportKind) -> bool {
        self.connection.connect(kind).await
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.connection.state().await
    }

    pub async fn current_bus(&self) -> Option<BusStatus> {
        self.tracker.lock().await.current().cloned()
    }

    /// Snapshot of the retained raw readings, newest last.
    pub async fn recent_readings(&self) -> Vec<Reading> {
        self.history.lock().await.readings().cloned().collect()
    }

    /// Operator override. A non-empty route installs a manual bus directly in
    /// `Arrived` and kicks off description generation; an empty route clears
    /// whatever is tracked.
    pub async fn manual_identify(self: &Arc<Self>, route: &str) -> Option<BusStatus> {
        let now = now_ms();

        if route.is_empty() {
            let cleared = self.tracker.lock().await.clear();
            if let Some(bus) = cleared {
                self.events.publish(BayScanEvent::BusCleared {
                    tag_id: bus.tag_id,
                    route: bus.route,
                    reason: ClearReason::ManualClear,
                });
            }
            return None;
        }

        let (bus, previous_state) = {
            let mut tracker = self.tracker.lock().await;
            let previous_state = tracker
                .current()
                .map(|bus| bus.state)
                .unwrap_or(ArrivalState::NotPresent);
            let bus = tracker.manual_identify(route, now)?;
            (bus, previous_state)
        };

        self.events.publish(BayScanEvent::BusUpdated {
            bus: bus.clone(),
            previous_state,
        });
        self.spawn_describe(bus.clone());
        Some(bus)
    }

    fn spawn_dispatch(self: &Arc<Self>, mut rx: mpsc::Receiver<Reading>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let token = self.cancel.child_token();
        tokio::spawn(async move {
            debug!("Tracker dispatch task started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    reading = rx.recv() => {
                        let Some(reading) = reading else { break };
                        service.apply_reading(reading).await;
                    }
                }
            }
            debug!("Tracker dispatch task stopped");
        })
    }

    async fn apply_reading(self: &Arc<Self>, reading: Reading) {
        let outcome = {
            let mut tracker = self.tracker.lock().await;
            tracker.observe(&reading)
        };
        match outcome {
            ObserveOutcome::Created(bus) => {
                self.events.publish(BayScanEvent::BusUpdated {
                    bus: bus.clone(),
                    previous_state: ArrivalState::NotPresent,
                });
                self.spawn_describe(bus);
            }
            ObserveOutcome::Updated {
                bus,
                previous_state,
            } => {
                let arrived_now =
                    bus.state == ArrivalState::Arrived && previous_state != ArrivalState::Arrived;
                let bus_for_describe = arrived_now.then(|| bus.clone());
                self.events.publish(BayScanEvent::BusUpdated {
                    bus,
                    previous_state,
                });
                // Refresh the announcement when the arrival transition fires.
                if let Some(bus) = bus_for_describe {
                    self.spawn_describe(bus);
                }
            }
            ObserveOutcome::Ignored => {}
        }
    }

    /// Generate a description off the hot path. The result only lands if the
    /// same tag is still tracked when it completes.
    fn spawn_describe(self: &Arc<Self>, bus: BusStatus) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let text = describe_or_fallback(
                service.describer.as_ref(),
                &bus,
                &service.config.terminal.terminal_name,
                &service.config.terminal.bay_number,
            )
            .await;

            let updated = {
                let mut tracker = service.tracker.lock().await;
                tracker.set_description(&bus.tag_id, text)
            };
            match updated {
                Some(updated) => {
                    let state = updated.state;
                    service.events.publish(BayScanEvent::BusUpdated {
                        bus: updated,
                        previous_state: state,
                    });
                }
                None => debug!("Dropping stale description for {}", bus.tag_id),
            }
        });
    }

    fn spawn_eviction(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let token = self.cancel.child_token();
        tokio::spawn(async move {
            debug!("Eviction task started");
            let mut ticker = tokio::time::interval(EVICTION_TICK_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let evicted = {
                    let mut tracker = service.tracker.lock().await;
                    tracker.evict(now_ms())
                };
                if let Some(bus) = evicted {
                    warn!("Bus {} timed out", bus.route);
                    service.events.publish(BayScanEvent::BusCleared {
                        tag_id: bus.tag_id,
                        route: bus.route,
                        reason: ClearReason::Evicted,
                    });
                }
            }
            debug!("Eviction task stopped");
        })
    }
}
