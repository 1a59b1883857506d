//! Bluetooth LE command layer for the OttoPi walking robot.
//!
//! [`RobotController`] turns block intents ("move forward 3 times", "stop",
//! distance checks) into commands for a [`PeripheralSession`], which keeps
//! one command in flight at a time over any [`BleTransport`].

pub mod controller;
pub mod domain;
pub mod infrastructure;

pub use controller::{BlockStatus, Comparison, ControllerConfig, DistanceHat, RobotController};
pub use domain::models::{
    Command, ConnectionState, DiscoveredPeripheral, ResponseEnvelope, SendOutcome, SessionEvent,
    TelemetrySnapshot,
};
pub use domain::settings::{InboundMode, Settings, SettingsService};
pub use infrastructure::bluetooth::{
    BleTransport, GattProfile, PeripheralSession, SessionConfig, SessionError,
    SimulatedTransport, TransportError, TransportEvent,
};
pub use infrastructure::logging::init_logger;
