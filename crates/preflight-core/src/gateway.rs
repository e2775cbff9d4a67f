//! Motor command path.
//!
//! Arming is a user action only: nothing in the poll or render loops calls
//! into this module. Every command kind is single-flight (motor commands per
//! motor), a second request while one is outstanding is refused locally
//! without touching the network, and arm commands are never retried here.
//!
//! Each network call runs in its own task which also performs the state
//! transition, so a caller that drops its future cannot leave the gateway
//! stuck in `InFlight`. After [`CommandGateway::cancel`] those tasks still
//! finish their request but leave state alone.

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use uuid::Uuid;

use model::Rotor;

use crate::{Command, CommandAck, CommandError, CommandTransport};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ArmRequestState {
    #[default]
    Idle,
    InFlight,
    Armed,
    Failed(CommandError),
}

#[derive(Default)]
struct Inner {
    arm: ArmRequestState,
    /// Bumped whenever arm state is reset from outside the arm request, so a
    /// stale acknowledgement cannot re-arm.
    epoch: u64,
    disarm_in_flight: bool,
    motors_in_flight: HashSet<Command>,
    cancelled: bool,
}

#[derive(Clone)]
pub struct CommandGateway {
    transport: Arc<dyn CommandTransport>,
    inner: Arc<Mutex<Inner>>,
    timeout: Duration,
}

impl CommandGateway {
    pub fn new(transport: Arc<dyn CommandTransport>, timeout: Duration) -> Self {
        Self { transport, inner: Arc::new(Mutex::new(Inner::default())), timeout }
    }

    pub fn arm_state(&self) -> ArmRequestState {
        self.inner.lock().arm.clone()
    }

    /// Send the confirmed arm command. Valid from `Idle` or `Failed`.
    pub async fn request_arm(&self) -> Result<CommandAck, CommandError> {
        let epoch = {
            let mut g = self.inner.lock();
            if g.cancelled {
                return Err(CommandError::Cancelled);
            }
            match g.arm {
                ArmRequestState::InFlight => return Err(CommandError::AlreadyInFlight("arm")),
                ArmRequestState::Armed => return Err(CommandError::AlreadyArmed),
                ArmRequestState::Idle | ArmRequestState::Failed(_) => {}
            }
            g.arm = ArmRequestState::InFlight;
            g.epoch
        };

        let inner = self.inner.clone();
        self.dispatch(Command::ArmMotors, move |result| {
            let mut g = inner.lock();
            if g.cancelled {
                return Err(CommandError::Cancelled);
            }
            if g.epoch != epoch {
                return Err(CommandError::Superseded);
            }
            g.arm = match &result {
                Ok(_) => ArmRequestState::Armed,
                Err(e) => ArmRequestState::Failed(e.clone()),
            };
            result
        })
        .await
    }

    /// Send the disarm command. Allowed in any arm state; on success the
    /// gateway returns to `Idle` and any arm still in flight is superseded.
    pub async fn request_disarm(&self) -> Result<CommandAck, CommandError> {
        {
            let mut g = self.inner.lock();
            if g.cancelled {
                return Err(CommandError::Cancelled);
            }
            if g.disarm_in_flight {
                return Err(CommandError::AlreadyInFlight("disarm"));
            }
            g.disarm_in_flight = true;
        }

        let inner = self.inner.clone();
        self.dispatch(Command::DisarmMotors, move |result| {
            let mut g = inner.lock();
            if g.cancelled {
                return Err(CommandError::Cancelled);
            }
            g.disarm_in_flight = false;
            if result.is_ok() {
                g.arm = ArmRequestState::Idle;
                g.epoch += 1;
            }
            result
        })
        .await
    }

    pub async fn request_start_motor(&self, motor: Rotor) -> Result<CommandAck, CommandError> {
        self.motor_command(Command::StartMotor(motor)).await
    }

    pub async fn request_stop_motor(&self, motor: Rotor) -> Result<CommandAck, CommandError> {
        self.motor_command(Command::StopMotor(motor)).await
    }

    /// The flight controller was seen disarmed by some other means.
    pub fn observe_disarm(&self) {
        let mut g = self.inner.lock();
        if g.cancelled {
            return;
        }
        if matches!(g.arm, ArmRequestState::Armed | ArmRequestState::Failed(_)) {
            info!("disarm observed; arm state reset to idle");
            g.arm = ArmRequestState::Idle;
            g.epoch += 1;
        }
    }

    /// Session teardown. Outstanding requests run to completion but their
    /// results are discarded; new requests are refused.
    pub fn cancel(&self) {
        let mut g = self.inner.lock();
        if !g.cancelled {
            debug!("command gateway cancelled");
            g.cancelled = true;
        }
    }

    async fn motor_command(&self, command: Command) -> Result<CommandAck, CommandError> {
        {
            let mut g = self.inner.lock();
            if g.cancelled {
                return Err(CommandError::Cancelled);
            }
            if !g.motors_in_flight.insert(command) {
                return Err(CommandError::AlreadyInFlight(command.name()));
            }
        }

        let inner = self.inner.clone();
        self.dispatch(command, move |result| {
            let mut g = inner.lock();
            if g.cancelled {
                return Err(CommandError::Cancelled);
            }
            g.motors_in_flight.remove(&command);
            result
        })
        .await
    }

    /// Run the request and `settle` in a detached task and wait for both.
    async fn dispatch<F>(&self, command: Command, settle: F) -> Result<CommandAck, CommandError>
    where
        F: FnOnce(Result<CommandAck, CommandError>) -> Result<CommandAck, CommandError> + Send + 'static,
    {
        let transport = self.transport.clone();
        let timeout = self.timeout;
        let request_id = Uuid::new_v4();
        info!("{} request {request_id} sent", command.name());

        let task = tokio::spawn(async move {
            let result = match time::timeout(timeout, transport.send(&command, request_id)).await {
                Ok(r) => r,
                Err(_) => Err(CommandError::Timeout(timeout)),
            };
            match &result {
                Ok(ack) => info!("{} request {request_id} acknowledged ({})", command.name(), ack.status),
                Err(e) => warn!("{} request {request_id} failed: {e}", command.name()),
            }
            settle(result)
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                let error = CommandError::Aborted(e.to_string());
                self.abandon(command, error.clone());
                Err(error)
            }
        }
    }

    /// Clear in-flight markers for a request whose task died before settling.
    fn abandon(&self, command: Command, error: CommandError) {
        let mut g = self.inner.lock();
        if g.cancelled {
            return;
        }
        match command {
            Command::ArmMotors => {
                if g.arm == ArmRequestState::InFlight {
                    g.arm = ArmRequestState::Failed(error);
                }
            }
            Command::DisarmMotors => g.disarm_in_flight = false,
            Command::StartMotor(_) | Command::StopMotor(_) => {
                g.motors_in_flight.remove(&command);
            }
        }
    }
}
