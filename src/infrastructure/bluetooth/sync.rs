//! Sync Loop
//!
//! Fixed-interval background task pushing the current control vector to the
//! primary peripheral. Runs for the lifetime of the process; individual
//! write failures are logged and skipped, and ticks with no ready link are
//! silent no-ops.
//!
//! Writes cannot interleave: the loop is a single task that awaits each
//! write inline, and missed ticks are skipped rather than queued, so a
//! write slower than the period delays the next frame instead of racing it.

use crate::domain::state::LiveStateStore;
use crate::infrastructure::bluetooth::codec;
use crate::infrastructure::bluetooth::manager::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct SyncLoop;

/// Handle to a running sync loop; stopping it cancels the timer.
pub struct SyncLoopHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncLoop {
    pub fn spawn(
        manager: Arc<ConnectionManager>,
        store: LiveStateStore,
        period: Duration,
    ) -> SyncLoopHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = ticker.tick() => {
                        let controls = store.controls();
                        let frame = codec::encode_controls(&controls);
                        match manager.write_control_frame(&frame).await {
                            Ok(true) => {}
                            Ok(false) => {
                                // Expected before a connection completes.
                            }
                            Err(e) => warn!("Control frame write failed: {e}"),
                        }
                    }
                }
            }
            debug!("Sync loop stopped");
        });
        SyncLoopHandle { shutdown, task }
    }
}

impl SyncLoopHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::registry::DeviceRegistry;
    use crate::infrastructure::bluetooth::transport::testing::MockTransport;
    use crate::infrastructure::bluetooth::transport::PermissionsGranted;

    fn manager(mock: &Arc<MockTransport>, store: &LiveStateStore) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(
            mock.clone(),
            Arc::new(PermissionsGranted),
            DeviceRegistry::default_hand(),
            store.clone(),
            Duration::from_secs(10),
        ))
    }

    async fn connect(mock: &MockTransport, manager: &ConnectionManager) {
        mock.advertise_after(Duration::ZERO, "p1", "ESP32-77");
        mock.advertise_after(Duration::ZERO, "p2", "Nicla Sense ME");
        manager.connect_all().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ready_link_means_no_writes() {
        let mock = MockTransport::new();
        let store = LiveStateStore::new();
        let manager = manager(&mock, &store);

        let sync = SyncLoop::spawn(manager, store, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(550)).await;
        sync.stop().await;

        assert!(mock.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_write_current_controls() {
        let mock = MockTransport::new();
        let store = LiveStateStore::new();
        let manager = manager(&mock, &store);
        connect(&mock, &manager).await;

        store.set_controls(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        let sync = SyncLoop::spawn(manager, store.clone(), Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(250)).await;
        sync.stop().await;

        let writes = mock.writes();
        assert!(!writes.is_empty());
        for (_, frame) in &writes {
            assert_eq!(frame, b"10,20,30,40,50;");
        }
        // Frames go to the hand actuator, never the EMG board.
        assert!(mock.ops().iter().any(|op| op == "write p1"));
        assert!(mock.ops().iter().all(|op| op != "write p2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failures_do_not_stop_the_loop() {
        let mock = MockTransport::new();
        let store = LiveStateStore::new();
        let manager = manager(&mock, &store);
        connect(&mock, &manager).await;

        mock.fail_writes(true);
        let sync = SyncLoop::spawn(manager, store.clone(), Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(250)).await;

        // Recover; subsequent ticks must still publish.
        mock.fail_writes(false);
        store.set_control(0, 42.0);
        tokio::time::sleep(Duration::from_millis(250)).await;
        sync.stop().await;

        let writes = mock.writes();
        assert!(!writes.is_empty());
        assert_eq!(writes.last().unwrap().1, b"42,0,0,0,0;");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_loop_becomes_no_op() {
        let mock = MockTransport::new();
        let store = LiveStateStore::new();
        let manager = manager(&mock, &store);
        connect(&mock, &manager).await;

        let sync = SyncLoop::spawn(manager.clone(), store.clone(), Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(250)).await;
        manager.disconnect_all().await;
        let writes_at_disconnect = mock.writes().len();
        tokio::time::sleep(Duration::from_millis(500)).await;
        sync.stop().await;

        assert_eq!(mock.writes().len(), writes_at_disconnect);
    }
}
