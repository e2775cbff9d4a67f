//! Core telemetry pipeline and command path used by the Preflight dashboard

use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

pub use model::{Rotor, SchemaError, TelemetrySnapshot};

pub mod config;
pub mod gateway;
pub mod poller;
pub mod render;
pub mod state;

pub use config::SessionConfig;
pub use gateway::{ArmRequestState, CommandGateway};
pub use poller::{Poller, PollerHandle};
pub use render::{Frame, RenderLoop, RenderSurface, Staleness};
pub use state::{attitude_cell, AttitudeReader, AttitudeState, AttitudeWriter, Published};

/// Why a telemetry fetch produced no snapshot.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TelemetryError {
    #[error("telemetry request timed out after {0:?}")]
    Timeout(Duration),
    #[error("telemetry endpoint returned status {0}")]
    Status(u16),
    #[error("network: {0}")]
    Network(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl TelemetryError {
    /// Errors worth retrying unchanged on the next tick. Client-side 4xx
    /// and schema problems will most likely repeat.
    pub fn is_transient(&self) -> bool {
        match self {
            TelemetryError::Timeout(_) | TelemetryError::Network(_) => true,
            TelemetryError::Status(code) => *code >= 500,
            TelemetryError::Schema(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("a {0} request is already in flight")]
    AlreadyInFlight(&'static str),
    #[error("motors are already armed")]
    AlreadyArmed,
    #[error("server rejected the command (status {status}): {}", .reason.as_deref().unwrap_or("no reason given"))]
    Rejected { status: u16, reason: Option<String> },
    #[error("server returned status {0}")]
    Status(u16),
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("network: {0}")]
    Network(String),
    #[error("malformed acknowledgement: {0}")]
    Malformed(String),
    #[error("command gateway has been shut down")]
    Cancelled,
    #[error("result discarded: arm state changed while the request was in flight")]
    Superseded,
    #[error("command task aborted: {0}")]
    Aborted(String),
}

/// Commands the flight controller accepts over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    ArmMotors,
    DisarmMotors,
    StartMotor(Rotor),
    StopMotor(Rotor),
}

/// Affirmative value the server requires before it will change arm state.
pub const CONFIRMATION: &str = "confirm";

impl Command {
    pub fn path(&self) -> &'static str {
        match self {
            Command::ArmMotors => "/api/arm_motors",
            Command::DisarmMotors => "/api/disarm_motors",
            Command::StartMotor(_) => "/api/start_motor",
            Command::StopMotor(_) => "/api/stop_motor",
        }
    }

    pub fn body(&self) -> Value {
        match self {
            Command::ArmMotors => json!({ "arm": CONFIRMATION }),
            Command::DisarmMotors => json!({ "disarm": CONFIRMATION }),
            Command::StartMotor(r) | Command::StopMotor(r) => json!({ "motor": r.wire_id() }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::ArmMotors => "arm",
            Command::DisarmMotors => "disarm",
            Command::StartMotor(_) => "start-motor",
            Command::StopMotor(_) => "stop-motor",
        }
    }
}

/// Server acknowledgement; the dashboard only checks that it is JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandAck {
    pub status: u16,
    pub body: Value,
}

/// One request/response cycle against the telemetry endpoint.
#[async_trait::async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<TelemetrySnapshot, TelemetryError>;
}

/// Delivers a command and waits for the acknowledgement.
#[async_trait::async_trait]
pub trait CommandTransport: Send + Sync {
    async fn send(&self, command: &Command, request_id: Uuid) -> Result<CommandAck, CommandError>;
}

/// Emitted by the poller after every tick has been applied.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Updated { seq: u64 },
    Failed { seq: u64, error: TelemetryError, consecutive: u32 },
}

pub type PollTx = crossbeam_channel::Sender<PollEvent>;
pub type PollRx = crossbeam_channel::Receiver<PollEvent>;

pub fn channel() -> (PollTx, PollRx) {
    crossbeam_channel::unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_body_carries_confirmation() {
        assert_eq!(Command::ArmMotors.body(), json!({"arm": "confirm"}));
        assert_eq!(Command::ArmMotors.path(), "/api/arm_motors");
    }

    #[test]
    fn motor_commands_carry_wire_id() {
        assert_eq!(Command::StartMotor(Rotor::R2).body(), json!({"motor": 1}));
        assert_eq!(Command::StopMotor(Rotor::R4).path(), "/api/stop_motor");
    }

    #[test]
    fn rejection_message_includes_reason() {
        let e = CommandError::Rejected { status: 400, reason: Some("missing confirmation".into()) };
        assert_eq!(e.to_string(), "server rejected the command (status 400): missing confirmation");
        let e = CommandError::Rejected { status: 403, reason: None };
        assert!(e.to_string().ends_with("no reason given"));
    }

    #[test]
    fn transient_classification() {
        assert!(TelemetryError::Timeout(Duration::from_millis(100)).is_transient());
        assert!(TelemetryError::Status(503).is_transient());
        assert!(!TelemetryError::Status(404).is_transient());
        assert!(!TelemetryError::Schema(SchemaError::Mismatch("x".into())).is_transient());
    }
}
