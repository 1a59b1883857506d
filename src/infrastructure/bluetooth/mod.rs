//! Bluetooth Module
//!
//! Provides the BLE command/response exchange with the OttoPi robot.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   PeripheralSession                      │
//! │  (connection state, command gate, telemetry)             │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌───────────┐
//! │ Transport │  │  Protocol  │  │   Mock    │
//! │           │  │            │  │           │
//! │ - scan    │  │ - UUIDs    │  │ - in-     │
//! │ - GATT    │  │ - base64   │  │   memory  │
//! │   access  │  │ - JSON     │  │   central │
//! └───────────┘  └────────────┘  └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Wire identifiers and payload codecs
//! - [`transport`] - The BLE central contract
//! - [`session`] - Connection and single-command gate
//! - [`mock`] - Simulated transport

pub mod mock;
pub mod protocol;
pub mod session;
pub mod transport;

pub use mock::SimulatedTransport;
pub use protocol::GattProfile;
pub use session::{PeripheralSession, SessionConfig, SessionError};
pub use transport::{BleTransport, TransportError, TransportEvent};
