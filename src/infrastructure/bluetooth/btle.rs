//! btleplug-backed Transport
//!
//! Production implementation of the [`Transport`] seam on top of the
//! cross-platform `btleplug` stack. Keeps the bookkeeping the seam's opaque
//! handles need: peripherals seen while scanning, open channels, and the
//! per-subscription notification forwarder tasks.

use crate::infrastructure::bluetooth::transport::{
    Advertisement, ChannelId, PeripheralId, SubscriptionId, Transport, TransportError,
    TransportResult,
};
use anyhow::anyhow;
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

fn radio(e: btleplug::Error) -> TransportError {
    TransportError::Radio(e.to_string())
}

struct Subscription {
    channel: u64,
    characteristic: Characteristic,
    forwarder: JoinHandle<()>,
}

pub struct BtleTransport {
    adapter: Adapter,
    /// Peripherals observed while scanning, keyed by their stringified id.
    seen: Arc<Mutex<HashMap<String, Peripheral>>>,
    scan_forwarder: Mutex<Option<JoinHandle<()>>>,
    channels: Mutex<HashMap<u64, Peripheral>>,
    subscriptions: Mutex<HashMap<u64, Subscription>>,
    next_id: AtomicU64,
}

impl BtleTransport {
    /// Open the first Bluetooth adapter on the host.
    pub async fn new() -> anyhow::Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        info!("Using Bluetooth adapter: {:?}", adapter.adapter_info().await);

        Ok(Self {
            adapter,
            seen: Arc::new(Mutex::new(HashMap::new())),
            scan_forwarder: Mutex::new(None),
            channels: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn peripheral_for(&self, channel: ChannelId) -> TransportResult<Peripheral> {
        self.channels
            .lock()
            .unwrap()
            .get(&channel.0)
            .cloned()
            .ok_or(TransportError::UnknownChannel(channel))
    }

    fn find_characteristic(
        peripheral: &Peripheral,
        service: Uuid,
        characteristic: Uuid,
    ) -> TransportResult<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or(TransportError::MissingCharacteristic {
                service,
                characteristic,
            })
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn start_scan(&self) -> TransportResult<mpsc::UnboundedReceiver<Advertisement>> {
        // Take the event stream first so no early advertisement is missed.
        let mut events = self.adapter.events().await.map_err(radio)?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(radio)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let adapter = self.adapter.clone();
        let seen = self.seen.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let Ok(Some(properties)) = peripheral.properties().await else {
                    continue;
                };
                // Unnamed advertisements can never match a name prefix.
                let Some(name) = properties.local_name else {
                    continue;
                };
                let key = id.to_string();
                seen.lock().unwrap().insert(key.clone(), peripheral);
                if tx
                    .send(Advertisement {
                        peripheral: PeripheralId(key),
                        local_name: name,
                    })
                    .is_err()
                {
                    break;
                }
            }
        });

        let previous = self.scan_forwarder.lock().unwrap().replace(forwarder);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(rx)
    }

    async fn stop_scan(&self) -> TransportResult<()> {
        self.adapter.stop_scan().await.map_err(radio)?;
        if let Some(forwarder) = self.scan_forwarder.lock().unwrap().take() {
            forwarder.abort();
        }
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralId) -> TransportResult<ChannelId> {
        let device = self
            .seen
            .lock()
            .unwrap()
            .get(&peripheral.0)
            .cloned()
            .ok_or_else(|| TransportError::UnknownPeripheral(peripheral.clone()))?;

        device.connect().await.map_err(radio)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.channels.lock().unwrap().insert(id, device);
        debug!("Opened channel ch{id} to {peripheral}");
        Ok(ChannelId(id))
    }

    async fn discover_services(&self, channel: ChannelId) -> TransportResult<()> {
        let peripheral = self.peripheral_for(channel)?;
        peripheral.discover_services().await.map_err(radio)
    }

    async fn subscribe(
        &self,
        channel: ChannelId,
        service: Uuid,
        characteristic: Uuid,
    ) -> TransportResult<(SubscriptionId, mpsc::UnboundedReceiver<Vec<u8>>)> {
        let peripheral = self.peripheral_for(channel)?;
        let target = Self::find_characteristic(&peripheral, service, characteristic)?;
        peripheral.subscribe(&target).await.map_err(radio)?;

        // The peripheral-wide notification stream is filtered down to the
        // subscribed characteristic.
        let mut notifications = peripheral.notifications().await.map_err(radio)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != characteristic {
                    continue;
                }
                if tx.send(notification.value).is_err() {
                    break;
                }
            }
        });

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.lock().unwrap().insert(
            id,
            Subscription {
                channel: channel.0,
                characteristic: target,
                forwarder,
            },
        );
        Ok((SubscriptionId(id), rx))
    }

    async fn unsubscribe(
        &self,
        channel: ChannelId,
        subscription: SubscriptionId,
    ) -> TransportResult<()> {
        let entry = self.subscriptions.lock().unwrap().remove(&subscription.0);
        let Some(entry) = entry else {
            return Ok(());
        };
        entry.forwarder.abort();
        let peripheral = self.peripheral_for(channel)?;
        peripheral
            .unsubscribe(&entry.characteristic)
            .await
            .map_err(radio)
    }

    async fn write(
        &self,
        channel: ChannelId,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> TransportResult<()> {
        let peripheral = self.peripheral_for(channel)?;
        let target = Self::find_characteristic(&peripheral, service, characteristic)?;
        peripheral
            .write(&target, payload, WriteType::WithResponse)
            .await
            .map_err(radio)
    }

    async fn close(&self, channel: ChannelId) -> TransportResult<()> {
        let peripheral = self.channels.lock().unwrap().remove(&channel.0);
        let Some(peripheral) = peripheral else {
            return Err(TransportError::UnknownChannel(channel));
        };

        // Drop any forwarders still bound to this channel.
        let orphaned: Vec<Subscription> = {
            let mut subscriptions = self.subscriptions.lock().unwrap();
            let ids: Vec<u64> = subscriptions
                .iter()
                .filter(|(_, s)| s.channel == channel.0)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| subscriptions.remove(&id))
                .collect()
        };
        for subscription in orphaned {
            subscription.forwarder.abort();
        }

        if let Err(e) = peripheral.disconnect().await {
            warn!("Disconnect reported an error for {channel}: {e}");
        }
        Ok(())
    }
}
