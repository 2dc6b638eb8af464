//! Transport seam
//!
//! The connection core never talks to a radio stack directly; it goes
//! through [`Transport`], which models the small set of operations the core
//! needs: broadcast scan, connect, service discovery, notification
//! subscription, characteristic write, and channel release. Advertised
//! names are opaque matchable strings, characteristic values are opaque
//! byte buffers.
//!
//! Advertisements and notification values are delivered over `mpsc`
//! channels rather than callbacks; dropping the transport-side sender ends
//! the consumer loop, which ties resource release to subscription removal.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Opaque identity of an advertising peripheral, valid for the lifetime of
/// the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralId(pub String);

impl std::fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Handle to an open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Handle to an active notification subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// One observed advertisement. Unnamed advertisements are filtered out by
/// the transport; they can never match a descriptor prefix.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub peripheral: PeripheralId,
    pub local_name: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unknown peripheral {0}")]
    UnknownPeripheral(PeripheralId),
    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),
    #[error("characteristic {characteristic} not found under service {service}")]
    MissingCharacteristic { service: Uuid, characteristic: Uuid },
    #[error("radio failure: {0}")]
    Radio(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Radio permission gate, checked once before any scan. A denied result is
/// surfaced to the user, never retried internally.
#[async_trait]
pub trait RadioPermissions: Send + Sync {
    async fn has_radio_permission(&self) -> bool;
}

/// Permission gate for platforms without a runtime radio prompt.
pub struct PermissionsGranted;

#[async_trait]
impl RadioPermissions for PermissionsGranted {
    async fn has_radio_permission(&self) -> bool {
        true
    }
}

/// The radio operations the connection core is built on.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start a broadcast listen. Advertisements arrive on the returned
    /// receiver until [`Transport::stop_scan`] is called or the transport
    /// drops the stream.
    async fn start_scan(&self) -> TransportResult<mpsc::UnboundedReceiver<Advertisement>>;

    /// Stop the broadcast listen. Idempotent.
    async fn stop_scan(&self) -> TransportResult<()>;

    /// Open a channel to a previously advertised peripheral.
    async fn connect(&self, peripheral: &PeripheralId) -> TransportResult<ChannelId>;

    /// Run capability/service discovery on an open channel.
    async fn discover_services(&self, channel: ChannelId) -> TransportResult<()>;

    /// Subscribe to notifications from one characteristic. Values arrive on
    /// the returned receiver; the sender is dropped on unsubscribe or close.
    async fn subscribe(
        &self,
        channel: ChannelId,
        service: Uuid,
        characteristic: Uuid,
    ) -> TransportResult<(SubscriptionId, mpsc::UnboundedReceiver<Vec<u8>>)>;

    /// Remove a notification subscription.
    async fn unsubscribe(&self, channel: ChannelId, subscription: SubscriptionId)
        -> TransportResult<()>;

    /// Write a payload to one characteristic, with response.
    async fn write(
        &self,
        channel: ChannelId,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> TransportResult<()>;

    /// Release an open channel. The channel id is invalid afterwards.
    async fn close(&self, channel: ChannelId) -> TransportResult<()>;
}
