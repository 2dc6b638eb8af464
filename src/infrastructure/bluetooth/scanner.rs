//! Scanner
//!
//! Time-bounded discovery of the peripherals named by the registry. One
//! scan pass per call: no internal retries, and the underlying broadcast
//! listen is stopped on every exit path.

use crate::infrastructure::bluetooth::registry::DeviceRegistry;
use crate::infrastructure::bluetooth::transport::{
    Advertisement, PeripheralId, Transport, TransportResult,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A peripheral matched to a descriptor during one scan pass. Discarded
/// once the scan resolves.
#[derive(Debug, Clone)]
pub struct DiscoveredPeripheral {
    pub descriptor_id: String,
    pub peripheral: PeripheralId,
    pub first_seen: Instant,
}

pub struct Scanner {
    transport: Arc<dyn Transport>,
}

/// Stops the broadcast listen if the scan pass is dropped before it can
/// stop the listen itself, e.g. when `discover` is cancelled at an await
/// point.
struct ScanStopGuard {
    transport: Arc<dyn Transport>,
    armed: bool,
}

impl ScanStopGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ScanStopGuard {
    fn drop(&mut self) {
        if self.armed {
            let transport = self.transport.clone();
            tokio::spawn(async move {
                if let Err(e) = transport.stop_scan().await {
                    warn!("Failed to stop scan after cancellation: {e}");
                }
            });
        }
    }
}

impl Scanner {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Scan for every descriptor in the registry. Returns the instant all
    /// descriptors have a match; otherwise at `timeout` with whatever
    /// subset matched. First advertisement wins per descriptor.
    pub async fn discover(
        &self,
        registry: &DeviceRegistry,
        timeout: Duration,
    ) -> TransportResult<HashMap<String, DiscoveredPeripheral>> {
        info!(
            "Scanning for {} peripherals (timeout {:?})",
            registry.len(),
            timeout
        );
        let mut advertisements = self.transport.start_scan().await?;
        let guard = ScanStopGuard {
            transport: self.transport.clone(),
            armed: true,
        };

        let found = self.collect(registry, timeout, &mut advertisements).await;

        // The listen must not outlive the pass, whichever way it ended.
        if let Err(e) = self.transport.stop_scan().await {
            warn!("Failed to stop scan: {e}");
        }
        guard.disarm();

        info!("Scan finished: matched {}/{}", found.len(), registry.len());
        Ok(found)
    }

    async fn collect(
        &self,
        registry: &DeviceRegistry,
        timeout: Duration,
        advertisements: &mut mpsc::UnboundedReceiver<Advertisement>,
    ) -> HashMap<String, DiscoveredPeripheral> {
        let deadline = Instant::now() + timeout;
        let mut found: HashMap<String, DiscoveredPeripheral> = HashMap::new();

        while found.len() < registry.len() {
            let advertisement = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                advertisement = advertisements.recv() => match advertisement {
                    Some(advertisement) => advertisement,
                    // Transport dropped the stream; treat as end of scan.
                    None => break,
                },
            };

            // An advertisement claims at most one still-unmatched descriptor.
            let matched = registry.iter().find(|d| {
                !found.contains_key(&d.id) && advertisement.local_name.starts_with(&d.name_prefix)
            });
            if let Some(descriptor) = matched {
                debug!(
                    "Matched {} as '{}' ({})",
                    descriptor.id, advertisement.local_name, advertisement.peripheral
                );
                found.insert(
                    descriptor.id.clone(),
                    DiscoveredPeripheral {
                        descriptor_id: descriptor.id.clone(),
                        peripheral: advertisement.peripheral,
                        first_seen: Instant::now(),
                    },
                );
            }
        }

        found
    }
}
