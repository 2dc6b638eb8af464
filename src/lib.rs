//! HandLink
//!
//! Control core for a multi-finger prosthetic hand: discovers and connects
//! the fixed set of wireless boards (hand actuator + EMG sensor), streams
//! the shared control state out on a fixed period, and decodes inbound
//! telemetry into a shared live state surface for the UI layer.

pub mod domain;
pub mod infrastructure;

pub use domain::state::LiveStateStore;
pub use infrastructure::bluetooth::{ConnectError, ConnectionManager, DeviceRegistry, SyncLoop};
