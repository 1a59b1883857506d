//! Robot block commands.
//!
//! Each block call turns an intent into command text, hands it to the
//! peripheral session and tells the caller's scheduler whether to yield
//! and retry on a later tick.

use crate::domain::models::{Command, SendOutcome};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::session::PeripheralSession;
use crate::infrastructure::bluetooth::transport::BleTransport;
use std::time::Duration;
use tracing::{debug, warn};

/// What the scheduler should do with the calling block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// The block is finished for this invocation
    Done,
    /// Suspend the block and invoke it again next tick
    Yield,
}

impl From<SendOutcome> for BlockStatus {
    fn from(outcome: SendOutcome) -> Self {
        match outcome {
            SendOutcome::Busy => BlockStatus::Yield,
            SendOutcome::Accepted | SendOutcome::NotConnected => BlockStatus::Done,
        }
    }
}

/// Distance comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Comparison {
    /// `<`: closer than the threshold
    #[default]
    Closer,
    /// `>`: farther than the threshold
    Farther,
}

impl From<&str> for Comparison {
    /// `">"` means farther; anything else is treated as `"<"`
    fn from(op: &str) -> Self {
        if op.trim() == ">" {
            Comparison::Farther
        } else {
            Comparison::Closer
        }
    }
}

impl Comparison {
    fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Closer => value < threshold,
            Comparison::Farther => value > threshold,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    /// Raw distance units per reported unit (millimeters to centimeters)
    pub distance_divisor: f64,
    /// Delay between re-invocations of a yielding block
    pub scheduler_tick: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            distance_divisor: 10.0,
            scheduler_tick: Duration::from_millis(16),
        }
    }
}

impl ControllerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            distance_divisor: settings.distance_divisor,
            scheduler_tick: Duration::from_millis(settings.scheduler_tick_ms),
        }
        .validated()
    }

    /// Replace a zero, negative or non-finite divisor with the default
    fn validated(mut self) -> Self {
        if !(self.distance_divisor.is_finite() && self.distance_divisor > 0.0) {
            let fallback = Self::default().distance_divisor;
            warn!(
                "Invalid distance_divisor {}, using {}",
                self.distance_divisor, fallback
            );
            self.distance_divisor = fallback;
        }
        self
    }
}

pub struct RobotController<T: BleTransport> {
    session: PeripheralSession<T>,
    config: ControllerConfig,
}

impl<T: BleTransport> RobotController<T> {
    pub fn new(session: PeripheralSession<T>, config: ControllerConfig) -> Self {
        Self {
            session,
            config: config.validated(),
        }
    }

    pub fn session(&self) -> &PeripheralSession<T> {
        &self.session
    }

    /// Send a command; `Yield` while another command is in flight
    pub fn send(&self, command: &Command) -> BlockStatus {
        let outcome = self.session.send_command(&command.to_string());
        if outcome == SendOutcome::NotConnected {
            debug!("'{}' skipped: robot not connected", command);
        }
        outcome.into()
    }

    /// Movement block: walk `repeat_count` times using `verb`
    pub fn move_robot(&self, verb: &str, repeat_count: u32) -> BlockStatus {
        self.send(&Command::new(verb, repeat_count))
    }

    /// Motion block: play gesture `verb` `repeat_count` times
    pub fn motion(&self, verb: &str, repeat_count: u32) -> BlockStatus {
        self.send(&Command::new(verb, repeat_count))
    }

    pub fn stop(&self) -> BlockStatus {
        self.send(&Command::auto_off())
    }

    fn scaled_distance(&self) -> f64 {
        self.session.telemetry().distance / self.config.distance_divisor
    }

    /// Latest distance in reported units, rounded
    pub fn distance(&self) -> i64 {
        self.scaled_distance().round() as i64
    }

    pub fn compare_distance(&self, threshold: f64, op: Comparison) -> bool {
        op.holds(self.scaled_distance(), threshold)
    }

    /// Inclusive range test; the bounds may be given in either order
    pub fn distance_between(&self, a: f64, b: f64) -> bool {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let d = self.scaled_distance();
        d >= low && d <= high
    }

    /// Re-invoke `block` every scheduler tick until it reports `Done`
    pub async fn run_block<F>(&self, mut block: F)
    where
        F: FnMut(&Self) -> BlockStatus,
    {
        while block(self) == BlockStatus::Yield {
            tokio::time::sleep(self.config.scheduler_tick).await;
        }
    }
}

/// Edge-triggered "when distance ..." hat.
///
/// Fires once each time the comparison goes from false to true.
#[derive(Debug, Clone)]
pub struct DistanceHat {
    threshold: f64,
    op: Comparison,
    was_true: bool,
}

impl DistanceHat {
    pub fn new(threshold: f64, op: Comparison) -> Self {
        Self {
            threshold,
            op,
            was_true: false,
        }
    }

    pub fn poll<T: BleTransport>(&mut self, controller: &RobotController<T>) -> bool {
        let now = controller.compare_distance(self.threshold, self.op);
        let fire = now && !self.was_true;
        self.was_true = now;
        fire
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SessionEvent;
    use crate::infrastructure::bluetooth::mock::SimulatedTransport;
    use crate::infrastructure::bluetooth::protocol::GattProfile;
    use crate::infrastructure::bluetooth::session::SessionConfig;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct Harness {
        transport: Arc<SimulatedTransport>,
        controller: RobotController<SimulatedTransport>,
        _events: mpsc::UnboundedReceiver<SessionEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let transport = Arc::new(SimulatedTransport::with_sample_device());
            let (tx, rx) = mpsc::unbounded_channel();
            let session = PeripheralSession::new(Arc::clone(&transport), SessionConfig::default(), tx);
            let config = ControllerConfig {
                scheduler_tick: Duration::from_millis(1),
                ..ControllerConfig::default()
            };
            Self {
                transport,
                controller: RobotController::new(session, config),
                _events: rx,
            }
        }

        async fn connected() -> Self {
            let harness = Self::new();
            harness
                .controller
                .session()
                .connect_by_id("ottopi-1")
                .await
                .unwrap();
            harness
        }

        fn respond(&self, json: &str) {
            assert!(self
                .transport
                .notify_text(GattProfile::ottopi().response, json));
        }

        async fn set_distance(&self, raw: f64) {
            let before = self.controller.session().telemetry().updates;
            self.transport.notify_text(
                GattProfile::ottopi().telemetry.unwrap(),
                &format!(r#"{{"MSG":{{"d":{}}}}}"#, raw),
            );
            for _ in 0..500 {
                if self.controller.session().telemetry().updates > before {
                    return;
                }
                tokio::task::yield_now().await;
            }
            panic!("telemetry not applied");
        }

        async fn settle(&self) {
            for _ in 0..50 {
                tokio::task::yield_now().await;
            }
        }
    }

    #[tokio::test]
    async fn test_move_yields_while_busy() {
        let h = Harness::connected().await;

        assert_eq!(h.controller.move_robot(":.forward", 3), BlockStatus::Done);
        assert_eq!(h.controller.motion(":.happy", 1), BlockStatus::Yield);
        h.settle().await;
        assert_eq!(h.transport.written_commands(), vec![":.forward 3"]);
    }

    #[tokio::test]
    async fn test_blocks_are_noops_when_disconnected() {
        let h = Harness::new();

        assert_eq!(h.controller.move_robot(":.forward", 1), BlockStatus::Done);
        assert_eq!(h.controller.stop(), BlockStatus::Done);
        h.settle().await;
        assert!(h.transport.writes().is_empty());
        assert_eq!(h.controller.distance(), 0);
    }

    #[tokio::test]
    async fn test_stop_sends_auto_off() {
        let h = Harness::connected().await;

        assert_eq!(h.controller.stop(), BlockStatus::Done);
        h.settle().await;
        assert_eq!(h.transport.written_commands(), vec![":auto_off"]);
    }

    #[tokio::test]
    async fn test_distance_from_response() {
        let h = Harness::connected().await;

        assert_eq!(h.controller.move_robot("forward", 1), BlockStatus::Done);
        h.respond(r#"{"CMD":"forward","MSG":{"d":123}}"#);
        h.controller
            .run_block(|c| c.move_robot("backward", 1))
            .await;

        assert_eq!(h.controller.distance(), 12);
        h.settle().await;
        assert_eq!(
            h.transport.written_commands(),
            vec!["forward 1", "backward 1"]
        );
    }

    #[tokio::test]
    async fn test_run_block_waits_for_gate() {
        let h = Harness::connected().await;
        let transport = Arc::clone(&h.transport);

        assert_eq!(h.controller.motion(":.hi_right", 2), BlockStatus::Done);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            transport.notify_text(GattProfile::ottopi().response, r#"{"CMD":":.hi_right 2"}"#);
        });

        let mut ticks = 0;
        h.controller
            .run_block(|c| {
                ticks += 1;
                c.motion(":.bye_left", 1)
            })
            .await;

        assert!(ticks > 1);
        h.settle().await;
        assert_eq!(
            h.transport.written_commands(),
            vec![":.hi_right 2", ":.bye_left 1"]
        );
    }

    #[tokio::test]
    async fn test_compare_distance() {
        let h = Harness::connected().await;
        h.set_distance(305.0).await;

        assert_eq!(h.controller.distance(), 31);
        assert!(h.controller.compare_distance(31.0, Comparison::Closer));
        assert!(!h.controller.compare_distance(30.0, Comparison::Closer));
        assert!(h.controller.compare_distance(30.0, Comparison::Farther));
        assert!(!h.controller.compare_distance(30.5, Comparison::Farther));
    }

    #[tokio::test]
    async fn test_distance_between_is_symmetric() {
        let h = Harness::connected().await;
        h.set_distance(250.0).await;

        assert!(h.controller.distance_between(20.0, 30.0));
        assert!(h.controller.distance_between(25.0, 25.0));
        assert!(!h.controller.distance_between(0.0, 20.0));

        let bounds = [0.0, 10.0, 24.9, 25.0, 25.1, 50.0, 200.0];
        for a in bounds {
            for b in bounds {
                assert_eq!(
                    h.controller.distance_between(a, b),
                    h.controller.distance_between(b, a),
                    "between({a}, {b})"
                );
            }
        }
    }

    #[tokio::test]
    async fn test_zero_divisor_is_not_applied() {
        let transport = Arc::new(SimulatedTransport::with_sample_device());
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = PeripheralSession::new(Arc::clone(&transport), SessionConfig::default(), tx);
        let config = ControllerConfig {
            distance_divisor: 0.0,
            ..ControllerConfig::default()
        };
        let controller = RobotController::new(session, config);
        controller.session().connect_by_id("ottopi-1").await.unwrap();

        transport.notify_text(GattProfile::ottopi().telemetry.unwrap(), r#"{"MSG":{"d":120}}"#);
        for _ in 0..500 {
            if controller.session().telemetry().updates > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(controller.distance(), 12);
        assert!(controller.distance_between(11.0, 13.0));
    }

    #[tokio::test]
    async fn test_distance_hat_fires_on_edge() {
        let h = Harness::connected().await;
        let mut hat = DistanceHat::new(30.0, Comparison::Closer);

        h.set_distance(500.0).await;
        assert!(!hat.poll(&h.controller));

        h.set_distance(200.0).await;
        assert!(hat.poll(&h.controller));
        assert!(!hat.poll(&h.controller));

        h.set_distance(150.0).await;
        assert!(!hat.poll(&h.controller));

        h.set_distance(400.0).await;
        assert!(!hat.poll(&h.controller));
        h.set_distance(100.0).await;
        assert!(hat.poll(&h.controller));
    }

    #[test]
    fn test_comparison_from_operator() {
        assert_eq!(Comparison::from(">"), Comparison::Farther);
        assert_eq!(Comparison::from("<"), Comparison::Closer);
        assert_eq!(Comparison::from("?"), Comparison::Closer);
    }

    #[test]
    fn test_config_from_settings() {
        let mut settings = Settings::default();
        settings.distance_divisor = 1.0;
        settings.scheduler_tick_ms = 33;

        let config = ControllerConfig::from_settings(&settings);
        assert_eq!(config.distance_divisor, 1.0);
        assert_eq!(config.scheduler_tick, Duration::from_millis(33));
    }

    #[test]
    fn test_invalid_divisor_falls_back_to_default() {
        let mut settings = Settings::default();
        for divisor in [0.0, -10.0, f64::NAN, f64::INFINITY] {
            settings.distance_divisor = divisor;
            let config = ControllerConfig::from_settings(&settings);
            assert_eq!(config.distance_divisor, 10.0, "divisor {divisor}");
        }
    }
}
