//! Bluetooth Module
//!
//! The device connection core: discovering, connecting, and keeping a
//! synchronized bidirectional data link with the fixed set of peripherals
//! the prosthetic hand is built from.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   ConnectionManager                      │
//! │   (all-or-nothing connect, owns the published Link set)  │
//! └────────┬──────────────┬──────────────┬──────────────────┘
//!          │              │              │
//!          ▼              ▼              ▼
//!   ┌───────────┐  ┌────────────┐  ┌──────────┐
//!   │  Scanner  │  │    Link    │  │ SyncLoop │
//!   │           │  │            │  │          │
//!   │ - bounded │  │ - session  │  │ - 100 ms │
//!   │   listen  │  │ - notify   │  │   control│
//!   │ - prefix  │  │   decode   │  │   frames │
//!   │   match   │  │            │  │          │
//!   └───────────┘  └────────────┘  └──────────┘
//!          all through the Transport trait (btleplug in production)
//! ```
//!
//! ## Modules
//!
//! - [`registry`] - the fixed peripheral table (identities, UUIDs)
//! - [`codec`] - control frame encoding and telemetry decoding
//! - [`transport`] - the radio seam the core is written against
//! - [`scanner`] - time-bounded discovery
//! - [`link`] - per-peripheral connected session
//! - [`manager`] - the connection orchestrator
//! - [`sync`] - the periodic outbound state publisher
//! - [`btle`] - btleplug-backed transport

pub mod btle;
pub mod codec;
pub mod link;
pub mod manager;
pub mod registry;
pub mod scanner;
pub mod sync;
pub mod transport;

pub use manager::{ConnectError, ConnectionManager};
pub use registry::DeviceRegistry;
pub use sync::SyncLoop;
pub use transport::Transport;
