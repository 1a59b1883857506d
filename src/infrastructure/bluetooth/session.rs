//! Peripheral Session Module
//!
//! Owns one robot connection and the command/response exchange on it.
//!
//! At most one command is in flight: [`PeripheralSession::send_command`]
//! sets the gate and returns at once, and the gate is released when the
//! response for that command is observed (a notification on the response
//! characteristic, or the follow-up one-shot read). A response timeout and
//! any transport failure release it as well.
//!
//! Every connection gets a new generation number and every command a new
//! sequence number; frames that arrive for an older generation or a
//! superseded command are dropped.

use crate::domain::models::{
    ConnectionState, DiscoveredPeripheral, MessageSeverity, ResponseEnvelope, SendOutcome,
    SessionEvent, StatusMessage, TelemetrySnapshot,
};
use crate::domain::settings::{InboundMode, Settings};
use crate::infrastructure::bluetooth::protocol::{self, GattProfile};
use crate::infrastructure::bluetooth::transport::{BleTransport, TransportError, TransportEvent};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid UUID in settings: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("connection attempt was cancelled by a disconnect")]
    Cancelled,
}

/// Immutable configuration for one session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name used in log lines (e.g. the extension id)
    pub extension_id: String,
    pub profile: GattProfile,
    pub inbound_mode: InboundMode,
    /// Gate is released if no response arrives within this delay
    pub response_timeout: Duration,
    /// Attempts at subscribing to the response characteristic
    pub notify_retries: u32,
    pub notify_retry_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            extension_id: "ottopi".to_string(),
            profile: GattProfile::ottopi(),
            inbound_mode: InboundMode::Notify,
            response_timeout: Duration::from_millis(3000),
            notify_retries: 3,
            notify_retry_delay: Duration::from_millis(500),
        }
    }
}

impl SessionConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, SessionError> {
        Ok(Self {
            profile: GattProfile::from_settings(settings)?,
            inbound_mode: settings.inbound_mode,
            response_timeout: Duration::from_millis(settings.response_timeout_ms),
            notify_retries: settings.notify_retries.max(1),
            notify_retry_delay: Duration::from_millis(settings.notify_retry_delay_ms),
            ..Self::default()
        })
    }
}

#[derive(Debug, Default)]
struct SessionState {
    connection: ConnectionState,
    generation: u64,
    next_seq: u64,
    /// Command waiting for its response
    pending: Option<PendingCommand>,
    telemetry: TelemetrySnapshot,
}

#[derive(Debug, Clone)]
struct PendingCommand {
    seq: u64,
    text: String,
}

impl SessionState {
    fn pending_seq(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| p.seq)
    }

    fn reset(&mut self) {
        self.connection = ConnectionState::Disconnected;
        self.pending = None;
        self.generation += 1;
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.connection == ConnectionState::Connected
    }
}

/// What an inbound frame does to the command gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateAction {
    /// Response notification: releases the pending command unless the
    /// frame names a different one
    Release,
    /// One-shot read for a specific command
    ReleaseIf(u64),
    /// Telemetry-only frame
    Keep,
}

struct Shared<T> {
    transport: Arc<T>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    event_sender: mpsc::UnboundedSender<SessionEvent>,
}

/// Connection and command gate for one robot.
///
/// Cloning yields another handle to the same session. Methods that spawn
/// background work must be called from within a Tokio runtime.
pub struct PeripheralSession<T: BleTransport> {
    inner: Arc<Shared<T>>,
}

impl<T: BleTransport> Clone for PeripheralSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: BleTransport> PeripheralSession<T> {
    pub fn new(
        transport: Arc<T>,
        config: SessionConfig,
        event_sender: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Shared {
                transport,
                config,
                state: Mutex::new(SessionState::default()),
                event_sender,
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Scan for robots advertising the configured service.
    ///
    /// Any previous connection is torn down first. The caller picks one of
    /// the returned peripherals and passes its id to [`Self::connect_by_id`].
    pub async fn start_discovery(&self) -> Result<Vec<DiscoveredPeripheral>, SessionError> {
        self.disconnect().await;

        let service = self.inner.config.profile.service;
        info!("Starting BLE scan for service UUID: {}", service);
        self.inner.set_connection(ConnectionState::Scanning);
        self.inner
            .send_log("Scanning for OttoPi...", MessageSeverity::Info);

        let result = self.inner.transport.scan(service).await;

        {
            let mut state = self.inner.lock();
            if state.connection == ConnectionState::Scanning {
                state.connection = ConnectionState::Disconnected;
            }
        }
        self.inner
            .emit(SessionEvent::ConnectionStatus(self.connection_state()));

        let devices = result.map_err(|e| {
            error!("Scan failed: {}", e);
            self.inner
                .send_log(&format!("Scan failed: {}", e), MessageSeverity::Error);
            e
        })?;

        info!("Scan finished, {} peripheral(s) found", devices.len());
        for device in &devices {
            self.inner.emit(SessionEvent::DeviceFound(device.clone()));
        }
        Ok(devices)
    }

    /// Connect to a peripheral found by [`Self::start_discovery`] and arm
    /// the inbound channel for it.
    pub async fn connect_by_id(&self, peripheral_id: &str) -> Result<(), SessionError> {
        info!("Connecting to peripheral: {}", peripheral_id);
        self.inner
            .send_log("Connecting to robot...", MessageSeverity::Info);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        if let Err(e) = self.inner.transport.connect(peripheral_id, event_tx).await {
            error!("Connection to {} failed: {}", peripheral_id, e);
            self.inner.lock().reset();
            self.inner
                .send_log(&format!("Connection failed: {}", e), MessageSeverity::Error);
            return Err(e.into());
        }

        let generation = {
            let mut state = self.inner.lock();
            state.reset();
            state.generation
        };
        tokio::spawn(Arc::clone(&self.inner).pump_events(generation, event_rx));

        if let Err(e) = self.inner.arm_inbound_channel().await {
            error!("Failed to arm inbound channel: {}", e);
            self.inner.lock().reset();
            let _ = self.inner.transport.disconnect().await;
            self.inner
                .send_log(&format!("Connection failed: {}", e), MessageSeverity::Error);
            return Err(e.into());
        }

        {
            let mut state = self.inner.lock();
            if state.generation != generation {
                warn!("Connection to {} superseded before it completed", peripheral_id);
                return Err(SessionError::Cancelled);
            }
            state.connection = ConnectionState::Connected;
        }

        info!("Connected to {}", peripheral_id);
        self.inner
            .emit(SessionEvent::ConnectionStatus(ConnectionState::Connected));
        self.inner
            .send_log("Connection established!", MessageSeverity::Success);
        Ok(())
    }

    /// Tear down the connection. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        let was = {
            let mut state = self.inner.lock();
            let was = state.connection;
            state.reset();
            was
        };

        if was == ConnectionState::Disconnected && !self.inner.transport.is_connected() {
            return;
        }

        if let Err(e) = self.inner.transport.disconnect().await {
            warn!("Transport disconnect reported: {}", e);
        }

        info!("Disconnected from robot");
        self.inner
            .send_log("Disconnected from robot", MessageSeverity::Info);
        self.inner
            .emit(SessionEvent::ConnectionStatus(ConnectionState::Disconnected));
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock().connection
    }

    /// True while a command is waiting for its response
    pub fn is_busy(&self) -> bool {
        self.inner.lock().pending.is_some()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.inner.lock().telemetry
    }

    /// Send command text to the robot.
    ///
    /// Never waits: the write and the response are handled in the
    /// background. `Busy` and `NotConnected` leave no trace.
    pub fn send_command(&self, text: &str) -> SendOutcome {
        let (generation, seq) = {
            let mut state = self.inner.lock();
            if state.connection != ConnectionState::Connected {
                debug!("< send_cmd: is not connected");
                return SendOutcome::NotConnected;
            }
            if state.pending.is_some() {
                trace!("< send_cmd: busy");
                return SendOutcome::Busy;
            }
            state.next_seq += 1;
            state.pending = Some(PendingCommand {
                seq: state.next_seq,
                text: text.to_string(),
            });
            (state.generation, state.next_seq)
        };

        debug!("> send_cmd:'{}' (seq {})", text, seq);
        let payload = protocol::encode_command(text);
        tokio::spawn(Arc::clone(&self.inner).complete_command(
            generation,
            seq,
            text.to_string(),
            payload,
        ));
        SendOutcome::Accepted
    }

    /// Read the response characteristic once and apply what it holds.
    ///
    /// The command gate is not affected. Malformed content is logged and
    /// reported as `Ok(None)`.
    pub async fn read_response(&self) -> Result<Option<ResponseEnvelope>, SessionError> {
        let generation = {
            let state = self.inner.lock();
            if state.connection != ConnectionState::Connected {
                return Err(TransportError::NotConnected.into());
            }
            state.generation
        };

        debug!("> read_resp()");
        let profile = self.inner.config.profile;
        let payload = self
            .inner
            .transport
            .read(profile.service, profile.response)
            .await?;
        Ok(self.inner.handle_frame(generation, GateAction::Keep, &payload))
    }
}

impl<T: BleTransport> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // State is updated in single assignments, so a poisoned lock is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_connection(&self, connection: ConnectionState) {
        self.lock().connection = connection;
        self.emit(SessionEvent::ConnectionStatus(connection));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_sender.send(event);
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        self.emit(SessionEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }

    async fn arm_inbound_channel(&self) -> Result<(), TransportError> {
        let profile = self.config.profile;
        match self.config.inbound_mode {
            InboundMode::OneShotRead => {
                info!("Responses will be read after each command");
                Ok(())
            }
            InboundMode::Notify => {
                self.enable_notifications(profile.response).await?;
                if let Some(telemetry) = profile.telemetry {
                    if let Err(e) = self.enable_notifications(telemetry).await {
                        warn!(
                            "Telemetry subscription failed: {}. Distance only updates with responses.",
                            e
                        );
                        self.send_log(
                            "Connected (distance updates may be limited)",
                            MessageSeverity::Warning,
                        );
                    }
                }
                Ok(())
            }
        }
    }

    /// Enable notifications on `characteristic` with retry logic
    async fn enable_notifications(&self, characteristic: Uuid) -> Result<(), TransportError> {
        info!("Enabling notifications on {}...", characteristic);
        let attempts = self.config.notify_retries.max(1);

        let mut attempt = 1;
        loop {
            match self
                .transport
                .start_notifications(self.config.profile.service, characteristic)
                .await
            {
                Ok(()) => {
                    info!("Notifications enabled on {}", characteristic);
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        "Notification subscription attempt {} failed: {}",
                        attempt, e
                    );
                    tokio::time::sleep(self.config.notify_retry_delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        "Failed to enable notifications after {} attempts",
                        attempt
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Deliver transport events for one connection until it ends
    async fn pump_events(
        self: Arc<Self>,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        while let Some(event) = events.recv().await {
            if self.lock().generation != generation {
                debug!("Transport events from a previous connection ignored");
                break;
            }
            match event {
                TransportEvent::Notification {
                    characteristic,
                    payload,
                } => {
                    let profile = self.config.profile;
                    if characteristic == profile.response {
                        self.handle_frame(generation, GateAction::Release, &payload);
                    } else if Some(characteristic) == profile.telemetry {
                        self.handle_frame(generation, GateAction::Keep, &payload);
                    } else {
                        debug!("Notification from unexpected characteristic {}", characteristic);
                    }
                }
                TransportEvent::Disconnected => {
                    self.on_link_lost(generation, "peripheral disconnected");
                    break;
                }
                TransportEvent::Error(reason) => {
                    self.on_link_lost(generation, &reason);
                    break;
                }
            }
        }
        trace!("Event pump for connection {} finished", generation);
    }

    /// Write one command, then wait for its response or the timeout
    async fn complete_command(
        self: Arc<Self>,
        generation: u64,
        seq: u64,
        text: String,
        payload: String,
    ) {
        let profile = self.config.profile;
        if let Err(e) = self
            .transport
            .write(profile.service, profile.command, &payload, true)
            .await
        {
            self.on_link_lost(generation, &format!("write:'{}' failed: {}", text, e));
            return;
        }
        debug!("write:'{}':done", text);

        match self.config.inbound_mode {
            InboundMode::OneShotRead => {
                let read = self
                    .transport
                    .read(profile.service, profile.response);
                match tokio::time::timeout(self.config.response_timeout, read).await {
                    Ok(Ok(frame)) => {
                        self.handle_frame(generation, GateAction::ReleaseIf(seq), &frame);
                    }
                    Ok(Err(e)) => {
                        self.on_link_lost(generation, &format!("read after '{}' failed: {}", text, e));
                    }
                    Err(_) => self.expire(generation, seq),
                }
            }
            InboundMode::Notify => {
                tokio::time::sleep(self.config.response_timeout).await;
                self.expire(generation, seq);
            }
        }
    }

    /// Decode and apply one inbound frame.
    ///
    /// Malformed notifications are dropped without touching the gate; the
    /// response timeout still bounds how long it stays set. A one-shot read
    /// completes its command whatever it holds.
    fn handle_frame(
        &self,
        generation: u64,
        gate: GateAction,
        payload: &str,
    ) -> Option<ResponseEnvelope> {
        let decoded = protocol::decode_response(payload);

        let snapshot = {
            let mut state = self.lock();
            if !state.is_current(generation) {
                debug!("Late response from a closed connection dropped");
                return None;
            }
            match gate {
                GateAction::Release => {
                    let release = match (&decoded, state.pending.as_ref()) {
                        (Ok(Some(envelope)), Some(pending)) => {
                            let answers = envelope.answers(&pending.text);
                            if !answers {
                                debug!(
                                    "Response for '{}' does not answer pending '{}'",
                                    envelope.cmd.as_deref().unwrap_or_default(),
                                    pending.text
                                );
                            }
                            answers
                        }
                        (Ok(None), Some(_)) => true,
                        _ => false,
                    };
                    if release {
                        state.pending = None;
                    }
                }
                GateAction::ReleaseIf(seq) if state.pending_seq() == Some(seq) => {
                    state.pending = None
                }
                GateAction::ReleaseIf(seq) => {
                    debug!("Response for superseded command {} dropped", seq);
                    return None;
                }
                GateAction::Keep => {}
            }

            match &decoded {
                Ok(Some(envelope)) => envelope.distance().map(|distance| {
                    state.telemetry.distance = distance;
                    state.telemetry.updates += 1;
                    state.telemetry
                }),
                _ => None,
            }
        };

        match decoded {
            Ok(Some(envelope)) => {
                debug!("CMD='{}'", envelope.cmd.as_deref().unwrap_or_default());
                if let Some(snapshot) = snapshot {
                    trace!("d={}", snapshot.distance);
                    self.emit(SessionEvent::Telemetry(snapshot));
                }
                Some(envelope)
            }
            Ok(None) => {
                trace!("Empty response");
                None
            }
            Err(e) => {
                warn!("Dropping malformed response: {}", e);
                None
            }
        }
    }

    /// Release the gate if `seq` is still waiting
    fn expire(&self, generation: u64, seq: u64) {
        let mut state = self.lock();
        if state.generation == generation && state.pending_seq() == Some(seq) {
            state.pending = None;
            drop(state);
            warn!(
                "No response to command {} within {:?}, releasing gate",
                seq, self.config.response_timeout
            );
        }
    }

    fn on_link_lost(&self, generation: u64, reason: &str) {
        {
            let mut state = self.lock();
            if state.generation != generation {
                debug!("Stale transport failure ignored: {}", reason);
                return;
            }
            state.reset();
        }

        error!("Transport failure: {}", reason);
        self.send_log(&format!("Connection lost: {}", reason), MessageSeverity::Error);
        self.emit(SessionEvent::ConnectionStatus(ConnectionState::Disconnected));
    }
}
