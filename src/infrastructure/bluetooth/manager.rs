//! Connection Manager
//!
//! Drives the scanner and the per-peripheral links to establish a session
//! to every peripheral in the registry, or none at all. The observable link
//! set is always either empty or the full registry in `Ready` state; no
//! partial state ever escapes a connect attempt.

use crate::domain::state::LiveStateStore;
use crate::infrastructure::bluetooth::link::Link;
use crate::infrastructure::bluetooth::registry::DeviceRegistry;
use crate::infrastructure::bluetooth::scanner::Scanner;
use crate::infrastructure::bluetooth::transport::{
    RadioPermissions, Transport, TransportError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConnectError {
    /// The radio permission gate said no. Retryable only by user action.
    #[error("Bluetooth permission denied")]
    PermissionDenied,

    /// A connect attempt was issued while another was in flight.
    #[error("A connection attempt is already in progress")]
    AlreadyInProgress,

    /// Not every required peripheral was found within the scan timeout.
    #[error("Missing required peripherals: {}", missing.join(", "))]
    IncompleteDiscovery { missing: Vec<String> },

    /// A specific peripheral failed to connect or to finish setup; every
    /// link opened in the same attempt has been rolled back.
    #[error("Failed to connect to {descriptor_id}")]
    Peripheral {
        descriptor_id: String,
        #[source]
        source: TransportError,
    },

    /// The scan itself could not be started.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Resets the in-flight flag when the connect attempt ends, on every path.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    permissions: Arc<dyn RadioPermissions>,
    registry: DeviceRegistry,
    store: LiveStateStore,
    scan_timeout: Duration,
    /// The published connection set. Mutated only by this manager; the sync
    /// loop resolves links under the same lock at time of use.
    links: Mutex<HashMap<String, Link>>,
    connecting: AtomicBool,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        permissions: Arc<dyn RadioPermissions>,
        registry: DeviceRegistry,
        store: LiveStateStore,
        scan_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            permissions,
            registry,
            store,
            scan_timeout,
            links: Mutex::new(HashMap::new()),
            connecting: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Establish a link to every peripheral in the registry, or roll back
    /// to the empty set. Rejected immediately if another attempt is in
    /// flight.
    pub async fn connect_all(&self) -> Result<(), ConnectError> {
        if self.connecting.swap(true, Ordering::SeqCst) {
            return Err(ConnectError::AlreadyInProgress);
        }
        let _in_flight = InFlight(&self.connecting);

        if !self.permissions.has_radio_permission().await {
            return Err(ConnectError::PermissionDenied);
        }

        // Idempotent reset: no duplicate sessions, ever.
        self.disconnect_all().await;

        let found = Scanner::new(self.transport.clone())
            .discover(&self.registry, self.scan_timeout)
            .await?;

        let missing: Vec<String> = self
            .registry
            .iter()
            .filter(|d| !found.contains_key(&d.id))
            .map(|d| d.id.clone())
            .collect();
        if !missing.is_empty() {
            return Err(ConnectError::IncompleteDiscovery { missing });
        }

        // Sequential, in registry order: keeps radio contention down and
        // failure attribution unambiguous.
        let mut opened: Vec<Link> = Vec::with_capacity(self.registry.len());
        for descriptor in self.registry.iter() {
            let discovered = &found[&descriptor.id];
            match Link::open(
                &self.transport,
                descriptor,
                &discovered.peripheral,
                self.store.clone(),
            )
            .await
            {
                Ok(link) => opened.push(link),
                Err(source) => {
                    warn!(
                        "Connect failed for {}; rolling back {} established link(s)",
                        descriptor.id,
                        opened.len()
                    );
                    for link in opened.iter_mut().rev() {
                        link.close(&self.transport).await;
                    }
                    return Err(ConnectError::Peripheral {
                        descriptor_id: descriptor.id.clone(),
                        source,
                    });
                }
            }
        }

        // Publish the complete set as one transition.
        let mut links = self.links.lock().await;
        *links = opened
            .into_iter()
            .map(|link| (link.descriptor_id().to_string(), link))
            .collect();
        info!("All {} peripherals connected", links.len());
        Ok(())
    }

    /// Close every open link. Per-link close errors are logged and
    /// swallowed so teardown always completes.
    pub async fn disconnect_all(&self) {
        let drained: Vec<Link> = {
            let mut links = self.links.lock().await;
            links.drain().map(|(_, link)| link).collect()
        };
        for mut link in drained {
            link.close(&self.transport).await;
        }
    }

    /// Write a control frame to the primary peripheral. Returns `Ok(false)`
    /// when no primary link is ready, which is the expected state before a
    /// connection has completed.
    pub async fn write_control_frame(&self, frame: &[u8]) -> Result<bool, TransportError> {
        // Holding the set lock across the write serializes outbound frames
        // with connection teardown: a tick sees the old ready link or no
        // link, never a half-closed handle.
        let links = self.links.lock().await;
        let Some(primary) = self.registry.primary() else {
            return Ok(false);
        };
        let Some(link) = links.get(&primary.id) else {
            return Ok(false);
        };
        if !link.is_ready() {
            return Ok(false);
        }
        link.send(&self.transport, frame).await?;
        Ok(true)
    }

    pub async fn is_connected(&self) -> bool {
        !self.links.lock().await.is_empty()
    }

    pub async fn connected_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.links.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Process-level teardown: release every radio session.
    pub async fn shutdown(&self) {
        info!("Shutting down connection manager");
        self.disconnect_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::transport::testing::{
        MockTransport, PermissionsDenied,
    };
    use crate::infrastructure::bluetooth::transport::PermissionsGranted;

    fn manager(mock: &Arc<MockTransport>) -> ConnectionManager {
        ConnectionManager::new(
            mock.clone(),
            Arc::new(PermissionsGranted),
            DeviceRegistry::default_hand(),
            LiveStateStore::new(),
            Duration::from_secs(10),
        )
    }

    fn advertise_both(mock: &MockTransport) {
        mock.advertise_after(Duration::from_millis(100), "p1", "ESP32-77");
        mock.advertise_after(Duration::from_millis(200), "p2", "Nicla Sense ME");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_all_success() {
        let mock = MockTransport::new();
        advertise_both(&mock);
        let manager = manager(&mock);

        manager.connect_all().await.unwrap();

        assert_eq!(manager.connected_ids().await, vec!["emg", "hand"]);
        assert_eq!(mock.open_channels(), 2);
        assert_eq!(mock.active_subscriptions(), 2);
        assert!(!mock.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_discovery_attempts_no_connections() {
        let mock = MockTransport::new();
        mock.advertise_after(Duration::from_millis(100), "p1", "ESP32-77");
        let manager = manager(&mock);

        let err = manager.connect_all().await.unwrap_err();
        match err {
            ConnectError::IncompleteDiscovery { missing } => {
                assert_eq!(missing, vec!["emg"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(!manager.is_connected().await);
        assert!(mock.ops().iter().all(|op| !op.starts_with("connect")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_on_connect_failure() {
        let mock = MockTransport::new();
        advertise_both(&mock);
        mock.fail_connect("p2"); // emg is second in registry order
        let manager = manager(&mock);

        let err = manager.connect_all().await.unwrap_err();
        match err {
            ConnectError::Peripheral { descriptor_id, .. } => {
                assert_eq!(descriptor_id, "emg");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // All-or-nothing: the hand link opened first must be gone too.
        assert!(!manager.is_connected().await);
        assert_eq!(mock.open_channels(), 0);
        assert_eq!(mock.active_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_on_subscribe_failure() {
        let mock = MockTransport::new();
        advertise_both(&mock);
        mock.fail_subscribe("p1");
        let manager = manager(&mock);

        let err = manager.connect_all().await.unwrap_err();
        match err {
            ConnectError::Peripheral { descriptor_id, .. } => {
                assert_eq!(descriptor_id, "hand");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(mock.open_channels(), 0);
        assert_eq!(mock.active_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_scans_nothing() {
        let mock = MockTransport::new();
        advertise_both(&mock);
        let manager = ConnectionManager::new(
            mock.clone(),
            Arc::new(PermissionsDenied),
            DeviceRegistry::default_hand(),
            LiveStateStore::new(),
            Duration::from_secs(10),
        );

        let err = manager.connect_all().await.unwrap_err();
        assert!(matches!(err, ConnectError::PermissionDenied));
        assert!(mock.ops().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_closes_previous_links_first() {
        let mock = MockTransport::new();
        advertise_both(&mock);
        let manager = manager(&mock);

        manager.connect_all().await.unwrap();
        manager.connect_all().await.unwrap();

        // No duplicate sessions or subscriptions survive the reset.
        assert_eq!(mock.open_channels(), 2);
        assert_eq!(mock.active_subscriptions(), 2);
        let ops = mock.ops();
        let first_connect = ops.iter().position(|op| op == "connect p1").unwrap();
        let close_after = ops[first_connect..]
            .iter()
            .any(|op| op.starts_with("close"));
        assert!(close_after, "second attempt must close prior links");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connect_rejected() {
        let mock = MockTransport::new();
        mock.advertise_after(Duration::ZERO, "p1", "ESP32-77");
        mock.advertise_after(Duration::ZERO, "p2", "Nicla Sense ME");
        mock.set_connect_delay(Duration::from_millis(500));
        let manager = Arc::new(manager(&mock));

        let in_flight = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect_all().await })
        };
        // Let the first attempt get past the scan and into a connect.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = manager.connect_all().await.unwrap_err();
        assert!(matches!(err, ConnectError::AlreadyInProgress));

        // The in-flight attempt is undisturbed and completes.
        in_flight.await.unwrap().unwrap();
        assert_eq!(manager.connected_ids().await, vec!["emg", "hand"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_update_telemetry() {
        let mock = MockTransport::new();
        advertise_both(&mock);
        let store = LiveStateStore::new();
        let manager = ConnectionManager::new(
            mock.clone(),
            Arc::new(PermissionsGranted),
            DeviceRegistry::default_hand(),
            store.clone(),
            Duration::from_secs(10),
        );
        manager.connect_all().await.unwrap();

        mock.notify("p2", b"642\r\n");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.telemetry("emg").as_deref(), Some("642"));

        // A malformed frame is marked but never tears the session down.
        mock.notify("p2", &[0xFF, 0xFE]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            store.telemetry("emg").as_deref(),
            Some(crate::infrastructure::bluetooth::codec::UNPARSEABLE)
        );

        mock.notify("p2", b"650");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.telemetry("emg").as_deref(), Some("650"));
        assert_eq!(mock.active_subscriptions(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_all_sessions() {
        let mock = MockTransport::new();
        advertise_both(&mock);
        let manager = manager(&mock);
        manager.connect_all().await.unwrap();

        manager.shutdown().await;

        assert!(!manager.is_connected().await);
        assert_eq!(mock.open_channels(), 0);
        assert_eq!(mock.active_subscriptions(), 0);
    }
}
