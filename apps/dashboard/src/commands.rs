// Operator actions typed at the dashboard prompt.
use anyhow::Context;
use log::{debug, info};
use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use display::Field;
use model::Rotor;
use preflight_core::{CommandAck, CommandError};

use crate::session::DashboardSession;

pub const HELP: &str = "\
commands:
  arm confirm     arm the motors
  disarm          disarm the motors
  start <motor>   spin up one motor (1-4 or R1-R4)
  stop <motor>    stop one motor
  reset           mark the vehicle as disarmed without sending anything
  status          print the current readouts and arm state
  help            show this list
  quit            close the dashboard";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Arm,
    Disarm,
    Start(Rotor),
    Stop(Rotor),
    Reset,
    Status,
    Help,
    Quit,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("arming needs confirmation: type `arm confirm`")]
    Unconfirmed,
    #[error("`{0}` needs a motor (1-4 or R1-R4)")]
    MissingMotor(&'static str),
    #[error("no motor named `{0}`")]
    UnknownMotor(String),
    #[error("unknown command `{0}` (try `help`)")]
    Unknown(String),
}

/// `Ok(None)` for a blank line.
pub fn parse(line: &str) -> Result<Option<Action>, ActionError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let motor = |name: &'static str| -> Result<Rotor, ActionError> {
        match rest.as_slice() {
            [m] => Rotor::parse(m).ok_or_else(|| ActionError::UnknownMotor((*m).to_owned())),
            _ => Err(ActionError::MissingMotor(name)),
        }
    };

    let action = match verb.to_ascii_lowercase().as_str() {
        "arm" => match rest.as_slice() {
            ["confirm"] => Action::Arm,
            _ => return Err(ActionError::Unconfirmed),
        },
        "disarm" => Action::Disarm,
        "start" => Action::Start(motor("start")?),
        "stop" => Action::Stop(motor("stop")?),
        "reset" => Action::Reset,
        "status" => Action::Status,
        "help" | "?" => Action::Help,
        "quit" | "exit" | "q" => Action::Quit,
        other => return Err(ActionError::Unknown(other.to_owned())),
    };
    Ok(Some(action))
}

/// Read actions from `input` until it ends, `quit` is typed, or `interrupt`
/// completes. A read error ends the prompt with that error.
pub async fn prompt<R, I>(session: &DashboardSession, input: R, interrupt: I) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    I: Future,
{
    let mut lines = input.lines();
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            _ = &mut interrupt => {
                info!("interrupted");
                return Ok(());
            }
            line = lines.next_line() => {
                let Some(line) = line.context("read stdin")? else {
                    return Ok(());
                };
                match parse(&line) {
                    Ok(None) => {}
                    Ok(Some(Action::Quit)) => return Ok(()),
                    Ok(Some(action)) => perform(session, action),
                    Err(e) => println!("{e}"),
                }
            }
        }
    }
}

/// Carry out `action`. Motor commands run in the background so the prompt
/// stays live; their outcome is printed when it arrives.
pub fn perform(session: &DashboardSession, action: Action) {
    let gateway = session.gateway().clone();
    match action {
        Action::Arm => {
            tokio::spawn(async move { report("arm", gateway.request_arm().await) });
        }
        Action::Disarm => {
            tokio::spawn(async move { report("disarm", gateway.request_disarm().await) });
        }
        Action::Start(m) => {
            tokio::spawn(async move { report(&format!("start {m}"), gateway.request_start_motor(m).await) });
        }
        Action::Stop(m) => {
            tokio::spawn(async move { report(&format!("stop {m}"), gateway.request_stop_motor(m).await) });
        }
        Action::Reset => {
            gateway.observe_disarm();
            println!("arm state: {:?}", gateway.arm_state());
        }
        Action::Status => println!("{}", status(session)),
        Action::Help => println!("{HELP}"),
        Action::Quit => debug!("quit requested"),
    }
}

fn report(what: &str, result: Result<CommandAck, CommandError>) {
    match result {
        Ok(ack) => println!("{what}: ok ({})", ack.status),
        Err(e) => println!("{what}: {e}"),
    }
}

pub fn status(session: &DashboardSession) -> String {
    let readouts = session.readouts();
    let width = Field::ALL.iter().map(|f| f.name().len()).max().unwrap_or(0);
    let mut out: Vec<String> = readouts.entries().map(|(f, text)| format!("{:>width$}  {text}", f.name())).collect();
    out.push(format!("{:>width$}  {:?}", "arm-request", session.arm_state()));
    out.join("\n")
}
