use crate::events::{BayScanEvent, EventBus};
use crate::history::RawHistory;
use crate::types::{now_ms, ConnectionState, HealthSnapshot, HealthStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Periodic recompute cadence.
pub const HEALTH_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Connected scanner with no read for this long reports idle.
pub const IDLE_AFTER_MS: u64 = 60_000;

pub const INITIAL_BATTERY: f64 = 85.0;
pub const BATTERY_DRAIN_PER_TICK: f64 = 0.05;
pub const BATTERY_FLOOR: f64 = 5.0;
pub const LOW_BATTERY_THRESHOLD: f64 = 20.0;

/// Recomputes scanner health from scratch on a fixed cadence and whenever
/// the connection layer pokes it after a state transition. Snapshots are
/// derived, never mutated in place.
pub struct HealthMonitor {
    state: Arc<Mutex<ConnectionState>>,
    history: Arc<Mutex<RawHistory>>,
    battery: Mutex<f64>,
    events: EventBus,
    poke: Arc<Notify>,
}

impl HealthMonitor {
    pub fn new(
        state: Arc<Mutex<ConnectionState>>,
        history: Arc<Mutex<RawHistory>>,
        events: EventBus,
        poke: Arc<Notify>,
    ) -> Self {
        Self {
            state,
            history,
            battery: Mutex::new(INITIAL_BATTERY),
            events,
            poke,
        }
    }

    /// Build and publish a fresh snapshot. The synthetic battery drains a
    /// little on each recompute while a transport is open, never below the
    /// floor.
    pub async fn recompute(&self, now_ms: u64) -> HealthSnapshot {
        let conn = self.state.lock().await.clone();
        let is_connected = conn.active.is_some();

        let battery = {
            let mut level = self.battery.lock().await;
            if is_connected && *level > BATTERY_FLOOR {
                *level = (*level - BATTERY_DRAIN_PER_TICK).max(BATTERY_FLOOR);
            }
            *level
        };

        let (last_read, link_quality) = {
            let history = self.history.lock().await;
            (history.last_read_ms(), history.link_quality())
        };

        let idle_ms = last_read.map(|t| now_ms.saturating_sub(t));
        let status = if !is_connected {
            if conn.is_reconnecting {
                HealthStatus::Idle
            } else {
                HealthStatus::Disconnected
            }
        } else if idle_ms.map_or(true, |idle| idle > IDLE_AFTER_MS) {
            // Connected but silent, including a scanner that never read.
            HealthStatus::Idle
        } else {
            HealthStatus::Connected
        };

        let mut faults = Vec::new();
        if battery < LOW_BATTERY_THRESHOLD {
            faults.push("Low Battery Warning".to_string());
        }
        if conn.is_reconnecting {
            faults.push("Attempting Reconnect...".to_string());
        }

        let snapshot = HealthSnapshot {
            status,
            last_read_time_ms: last_read,
            battery_level: battery.floor() as u8,
            link_quality,
            is_scanning: is_connected && status != HealthStatus::Idle,
            faults,
        };
        trace!(
            "Health: {} (battery {}%, link {:?})",
            snapshot.status,
            snapshot.battery_level,
            snapshot.link_quality
        );
        self.events.publish(BayScanEvent::HealthReport {
            snapshot: snapshot.clone(),
        });
        snapshot
    }

    /// Run the monitor until cancelled: one snapshot immediately, then one
    /// per tick or poke.
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!("Health monitor started ({:?} tick)", HEALTH_TICK_INTERVAL);
            let mut ticker = tokio::time::interval(HEALTH_TICK_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = self.poke.notified() => {}
                }
                self.recompute(now_ms()).await;
            }
            debug!("Health monitor stopped");
        })
    }

    #[cfg(test)]
    async fn set_battery(&self, level: f64) {
        *self.battery.lock().await = level;
    }
}
