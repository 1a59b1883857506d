//! Simulated Transport
//!
//! In-memory [`BleTransport`] for tests and for hosts without radio
//! hardware. Writes are recorded, reads are served from a queue, and
//! notifications or link loss can be injected at any time.

use crate::domain::models::DiscoveredPeripheral;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{BleTransport, TransportError, TransportEvent};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use uuid::Uuid;

/// A write seen by the simulated peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub payload: String,
    pub with_response: bool,
}

impl WriteRecord {
    /// The command text carried by this write
    pub fn text(&self) -> Option<String> {
        protocol::decode_text(&self.payload).ok()
    }
}

#[derive(Default)]
struct MockState {
    devices: Vec<DiscoveredPeripheral>,
    connected_id: Option<String>,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    writes: Vec<WriteRecord>,
    reads: VecDeque<String>,
    read_count: usize,
    subscriptions: Vec<Uuid>,
    scans: usize,
    disconnects: usize,
    fail_next_write: Option<String>,
    fail_notifications: u32,
}

#[derive(Default)]
pub struct SimulatedTransport {
    state: Mutex<MockState>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that advertises a single robot
    pub fn with_sample_device() -> Self {
        let transport = Self::new();
        transport.add_device(DiscoveredPeripheral {
            id: "ottopi-1".to_string(),
            name: "OttoPi".to_string(),
            rssi: Some(-58),
        });
        transport
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_device(&self, device: DiscoveredPeripheral) {
        self.lock().devices.push(device);
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    /// Command texts written so far, in order
    pub fn written_commands(&self) -> Vec<String> {
        self.lock()
            .writes
            .iter()
            .filter_map(WriteRecord::text)
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<Uuid> {
        self.lock().subscriptions.clone()
    }

    pub fn scan_count(&self) -> usize {
        self.lock().scans
    }

    pub fn disconnect_count(&self) -> usize {
        self.lock().disconnects
    }

    pub fn read_count(&self) -> usize {
        self.lock().read_count
    }

    /// Queue the base64 value returned by the next one-shot read
    pub fn queue_read(&self, payload: impl Into<String>) {
        self.lock().reads.push_back(payload.into());
    }

    /// Queue a read whose value is `text` (encoded for the wire)
    pub fn queue_read_text(&self, text: &str) {
        self.queue_read(protocol::encode_command(text));
    }

    /// Make the next write fail with `reason`
    pub fn fail_next_write(&self, reason: impl Into<String>) {
        self.lock().fail_next_write = Some(reason.into());
    }

    /// Make the next `attempts` subscription requests fail
    pub fn fail_notifications(&self, attempts: u32) {
        self.lock().fail_notifications = attempts;
    }

    /// Push a raw base64 notification. Returns false when nobody is listening.
    pub fn notify(&self, characteristic: Uuid, payload: impl Into<String>) -> bool {
        let state = self.lock();
        match &state.events {
            Some(events) => events
                .send(TransportEvent::Notification {
                    characteristic,
                    payload: payload.into(),
                })
                .is_ok(),
            None => false,
        }
    }

    /// Push a notification whose value is `text`
    pub fn notify_text(&self, characteristic: Uuid, text: &str) -> bool {
        self.notify(characteristic, protocol::encode_command(text))
    }

    /// Simulate the peripheral dropping the link
    pub fn drop_link(&self) {
        let mut state = self.lock();
        state.connected_id = None;
        if let Some(events) = state.events.take() {
            let _ = events.send(TransportEvent::Disconnected);
        }
    }
}

#[async_trait]
impl BleTransport for SimulatedTransport {
    async fn scan(&self, _service: Uuid) -> Result<Vec<DiscoveredPeripheral>, TransportError> {
        let mut state = self.lock();
        state.scans += 1;
        Ok(state.devices.clone())
    }

    async fn connect(
        &self,
        peripheral_id: &str,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.devices.iter().any(|d| d.id == peripheral_id) {
            return Err(TransportError::DeviceNotFound(peripheral_id.to_string()));
        }
        state.connected_id = Some(peripheral_id.to_string());
        state.events = Some(events);
        state.subscriptions.clear();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.disconnects += 1;
        state.connected_id = None;
        state.events = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected_id.is_some()
    }

    async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        payload: &str,
        with_response: bool,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.connected_id.is_none() {
            return Err(TransportError::NotConnected);
        }
        if let Some(reason) = state.fail_next_write.take() {
            return Err(TransportError::WriteFailed(reason));
        }
        state.writes.push(WriteRecord {
            service,
            characteristic,
            payload: payload.to_string(),
            with_response,
        });
        Ok(())
    }

    async fn read(&self, _service: Uuid, _characteristic: Uuid) -> Result<String, TransportError> {
        let mut state = self.lock();
        if state.connected_id.is_none() {
            return Err(TransportError::NotConnected);
        }
        state.read_count += 1;
        Ok(state.reads.pop_front().unwrap_or_default())
    }

    async fn start_notifications(
        &self,
        _service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.connected_id.is_none() {
            return Err(TransportError::NotConnected);
        }
        if state.fail_notifications > 0 {
            state.fail_notifications -= 1;
            return Err(TransportError::NotificationFailed(
                "CCCD write rejected".to_string(),
            ));
        }
        state.subscriptions.push(characteristic);
        Ok(())
    }
}
