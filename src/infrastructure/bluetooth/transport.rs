//! BLE Transport Module
//!
//! The contract the peripheral session expects from a BLE central.
//! Payloads cross this boundary base64-encoded.

use crate::domain::models::DiscoveredPeripheral;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("bluetooth adapter unavailable")]
    AdapterUnavailable,

    #[error("peripheral not found: {0}")]
    DeviceNotFound(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("notification subscription failed: {0}")]
    NotificationFailed(String),

    #[error("not connected")]
    NotConnected,
}

/// Asynchronous events pushed by the transport while connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A subscribed characteristic changed; `payload` is base64
    Notification { characteristic: Uuid, payload: String },
    /// The link went down
    Disconnected,
    /// The transport hit an error it cannot recover from
    Error(String),
}

/// BLE central abstraction.
///
/// One transport serves one peripheral at a time. `connect` hands over the
/// event sink that receives notifications and link loss for that connection.
#[async_trait]
pub trait BleTransport: Send + Sync + 'static {
    /// Scan for peripherals advertising `service`
    async fn scan(&self, service: Uuid) -> Result<Vec<DiscoveredPeripheral>, TransportError>;

    async fn connect(
        &self,
        peripheral_id: &str,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        payload: &str,
        with_response: bool,
    ) -> Result<(), TransportError>;

    /// One-shot read; returns the base64 value
    async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<String, TransportError>;

    /// Subscribe to `characteristic`; changes arrive as [`TransportEvent::Notification`]
    async fn start_notifications(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), TransportError>;
}
