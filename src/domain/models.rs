use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Connection state of the peripheral session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Scanning,
    Connected,
}

/// Immediate result of a send request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The command was handed to the transport
    Accepted,
    /// Another command is still waiting for its response
    Busy,
    NotConnected,
}

/// Sentinel sent by the stop block
pub const AUTO_OFF: &str = ":auto_off";

/// A command for the robot, serialized as `"<verb> <repeat>"`.
///
/// The verb vocabulary belongs to the robot firmware and is passed through
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    verb: String,
    repeat_count: Option<u32>,
}

impl Command {
    pub fn new(verb: impl Into<String>, repeat_count: u32) -> Self {
        Self {
            verb: verb.into(),
            repeat_count: Some(repeat_count),
        }
    }

    /// A bare command with no repeat count (e.g. [`AUTO_OFF`])
    pub fn sentinel(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            repeat_count: None,
        }
    }

    pub fn auto_off() -> Self {
        Self::sentinel(AUTO_OFF)
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn repeat_count(&self) -> Option<u32> {
        self.repeat_count
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.repeat_count {
            Some(n) => write!(f, "{} {}", self.verb, n),
            None => f.write_str(&self.verb),
        }
    }
}

/// JSON frame sent back by the robot.
///
/// ```text
/// { "CMD": ":.forward 1", "MSG": { "d": 123, ... } }
/// ```
///
/// Every field is optional; unknown fields are kept in `MSG`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "CMD", default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(rename = "MSG", default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<Value>,
}

impl ResponseEnvelope {
    /// Raw distance reading (`MSG.d`), if the frame carries one
    pub fn distance(&self) -> Option<f64> {
        self.msg.as_ref()?.get("d")?.as_f64()
    }

    /// Whether this frame can be the response to `command_text`.
    ///
    /// Frames without `CMD` answer anything. Otherwise `CMD` must echo the
    /// whole command or its verb; the `:.` verb prefix is ignored.
    pub fn answers(&self, command_text: &str) -> bool {
        let cmd = match self.cmd.as_deref().map(normalize_verb) {
            Some(cmd) if !cmd.is_empty() => cmd,
            _ => return true,
        };
        let text = normalize_verb(command_text);
        cmd == text || Some(cmd) == text.split_whitespace().next()
    }
}

fn normalize_verb(text: &str) -> &str {
    text.trim().trim_start_matches([':', '.'])
}

/// Last known sensor reading. Only the latest value is kept.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetrySnapshot {
    /// Raw distance as reported by the robot (millimeters)
    pub distance: f64,
    /// Number of readings applied since the session was created
    pub updates: u64,
}

/// A peripheral found while scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeripheral {
    pub id: String,
    pub name: String,
    pub rssi: Option<i16>,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConnectionStatus(ConnectionState),
    DeviceFound(DiscoveredPeripheral),
    Telemetry(TelemetrySnapshot),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
