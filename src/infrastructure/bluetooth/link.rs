//! Link
//!
//! A live session to one connected peripheral: the open channel, the
//! inbound-notification subscription, and the task decoding notifications
//! into the live state store. Links are owned by the connection manager
//! and released by an explicit `close`; radio resources are never left to
//! be collected implicitly.

use crate::domain::state::LiveStateStore;
use crate::infrastructure::bluetooth::codec;
use crate::infrastructure::bluetooth::registry::DeviceDescriptor;
use crate::infrastructure::bluetooth::transport::{
    ChannelId, PeripheralId, SubscriptionId, Transport, TransportError,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Ready,
    Closing,
    Closed,
}

pub struct Link {
    descriptor: DeviceDescriptor,
    channel: ChannelId,
    subscription: Option<SubscriptionId>,
    notify_task: Option<JoinHandle<()>>,
    state: LinkState,
}

impl Link {
    /// Open a session: connect, discover services, subscribe to the notify
    /// characteristic, and start decoding notifications into
    /// `telemetry[descriptor.id]`. On a setup failure the partially opened
    /// session is torn down before the error is returned.
    pub async fn open(
        transport: &Arc<dyn Transport>,
        descriptor: &DeviceDescriptor,
        peripheral: &PeripheralId,
        store: LiveStateStore,
    ) -> Result<Self, TransportError> {
        info!("Connecting {} ({})", descriptor.id, peripheral);
        let channel = transport.connect(peripheral).await?;

        let mut link = Self {
            descriptor: descriptor.clone(),
            channel,
            subscription: None,
            notify_task: None,
            state: LinkState::Connecting,
        };

        match link.finish_setup(transport, store).await {
            Ok(()) => {
                link.state = LinkState::Ready;
                info!("Link ready: {}", link.descriptor.id);
                Ok(link)
            }
            Err(e) => {
                link.close(transport).await;
                Err(e)
            }
        }
    }

    async fn finish_setup(
        &mut self,
        transport: &Arc<dyn Transport>,
        store: LiveStateStore,
    ) -> Result<(), TransportError> {
        transport.discover_services(self.channel).await?;

        let (subscription, mut notifications) = transport
            .subscribe(
                self.channel,
                self.descriptor.service_uuid,
                self.descriptor.notify_characteristic,
            )
            .await?;
        self.subscription = Some(subscription);

        let descriptor_id = self.descriptor.id.clone();
        self.notify_task = Some(tokio::spawn(async move {
            while let Some(payload) = notifications.recv().await {
                let text = codec::decode_telemetry(&payload);
                if text == codec::UNPARSEABLE {
                    // A corrupted frame is recoverable noise; keep the
                    // session up.
                    warn!("Dropping malformed frame from {descriptor_id}");
                }
                store.set_telemetry(&descriptor_id, text);
            }
            debug!("Notification stream for {descriptor_id} ended");
        }));

        Ok(())
    }

    pub fn descriptor_id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn is_ready(&self) -> bool {
        self.state == LinkState::Ready
    }

    /// Write a payload to the peripheral's outbound characteristic.
    pub async fn send(
        &self,
        transport: &Arc<dyn Transport>,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let characteristic = self.descriptor.write_characteristic.ok_or_else(|| {
            TransportError::Radio(format!(
                "{} has no outbound characteristic",
                self.descriptor.id
            ))
        })?;
        transport
            .write(self.channel, self.descriptor.service_uuid, characteristic, payload)
            .await
    }

    /// Tear the session down: remove the subscription, stop the
    /// notification task, release the channel. Every step is best-effort
    /// so teardown always completes.
    pub async fn close(&mut self, transport: &Arc<dyn Transport>) {
        if self.state == LinkState::Closed {
            return;
        }
        self.state = LinkState::Closing;

        if let Some(subscription) = self.subscription.take() {
            if let Err(e) = transport.unsubscribe(self.channel, subscription).await {
                warn!("Failed to unsubscribe {}: {e}", self.descriptor.id);
            }
        }
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        if let Err(e) = transport.close(self.channel).await {
            warn!("Failed to release channel for {}: {e}", self.descriptor.id);
        }

        self.state = LinkState::Closed;
        info!("Link closed: {}", self.descriptor.id);
    }
}
