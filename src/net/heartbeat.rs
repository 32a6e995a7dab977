//! Heartbeat Monitor
//!
//! Periodically sweeps the session registry and flags sessions whose last
//! inbound traffic is older than the timeout threshold. Any inbound message
//! counts as liveness; explicit heartbeats only matter for otherwise idle
//! clients.
//!
//! The monitor is strictly advisory: it sends [`SessionControl::Timeout`]
//! and each session tears itself down. It never mutates session state.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::net::session::{SessionControl, SessionRegistry};

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How often the registry is swept.
    pub sweep_interval: Duration,
    /// Silence longer than this marks a session dead.
    pub timeout_threshold: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(2),
            timeout_threshold: Duration::from_secs(15),
        }
    }
}

/// Run the monitor until the shutdown signal fires.
pub async fn run_monitor(
    registry: SessionRegistry,
    epoch: Instant,
    config: MonitorConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut sweep = interval(config.sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let threshold_ms = config.timeout_threshold.as_millis() as u64;

    loop {
        tokio::select! {
            _ = sweep.tick() => {
                let now_ms = epoch.elapsed().as_millis() as u64;
                let registry = registry.read().await;
                for handle in registry.values() {
                    let last_seen = handle.last_seen_ms.load(Ordering::Relaxed);
                    if now_ms.saturating_sub(last_seen) > threshold_ms {
                        debug!(
                            client = %handle.client_id.short(),
                            silent_ms = now_ms.saturating_sub(last_seen),
                            "session timed out"
                        );
                        // Full control queue means the session is already on
                        // its way out.
                        let _ = handle.control.try_send(SessionControl::Timeout);
                    }
                }
            }
            _ = shutdown.recv() => {
                info!("heartbeat monitor stopping");
                return;
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::ClientId;
    use crate::net::session::SessionHandle;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;
    use tokio::sync::{mpsc, RwLock};

    fn handle(client_id: ClientId, last_seen_ms: u64) -> (SessionHandle, mpsc::Receiver<SessionControl>) {
        let (control, rx) = mpsc::channel(4);
        (
            SessionHandle {
                client_id,
                control,
                last_seen_ms: Arc::new(AtomicU64::new(last_seen_ms)),
            },
            rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_session_is_flagged() {
        let epoch = Instant::now();
        let (h, mut rx) = handle(ClientId::new([1; 16]), 0);
        let registry: SessionRegistry =
            Arc::new(RwLock::new(BTreeMap::from([(h.client_id, h)])));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        tokio::spawn(run_monitor(
            registry,
            epoch,
            MonitorConfig {
                sweep_interval: Duration::from_millis(100),
                timeout_threshold: Duration::from_millis(500),
            },
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rx.try_recv().unwrap(), SessionControl::Timeout);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_session_is_left_alone() {
        let epoch = Instant::now();
        let (h, mut rx) = handle(ClientId::new([2; 16]), 0);
        let last_seen = h.last_seen_ms.clone();
        let registry: SessionRegistry =
            Arc::new(RwLock::new(BTreeMap::from([(h.client_id, h)])));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        tokio::spawn(run_monitor(
            registry,
            epoch,
            MonitorConfig {
                sweep_interval: Duration::from_millis(100),
                timeout_threshold: Duration::from_millis(500),
            },
            shutdown_rx,
        ));

        // Keep touching liveness faster than the threshold.
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            last_seen.store(epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
        }
        assert!(rx.try_recv().is_err());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_stops_on_shutdown() {
        let epoch = Instant::now();
        let registry: SessionRegistry = Arc::new(RwLock::new(BTreeMap::new()));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(run_monitor(
            registry,
            epoch,
            MonitorConfig::default(),
            shutdown_rx,
        ));

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
