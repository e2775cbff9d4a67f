mod commands;
mod session;
mod surfaces;

use anyhow::Context;
use clap::Parser;
use log::info;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufRead, BufReader};

use preflight_core::SessionConfig;
use session::DashboardSession;

#[derive(Parser, Debug)]
#[command(author, version, about = "Preflight telemetry dashboard for a flight controller", long_about = None)]
struct Cli {
    /// Origin of the flight controller's web server
    #[arg(long, default_value = "http://localhost")]
    url: String,

    /// Anti-forgery token sent as X-CSRFToken
    #[arg(long, env = "PREFLIGHT_CSRF_TOKEN", hide_env_values = true)]
    csrf_token: Option<String>,

    /// Telemetry poll period
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    poll_ms: u64,

    /// Per-poll fetch timeout [default: the poll period]
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_ms: Option<u64>,

    /// Attitude indicator frame interval
    #[arg(long, default_value_t = 16, value_parser = clap::value_parser!(u64).range(1..))]
    frame_ms: u64,

    /// Motor command timeout
    #[arg(long, default_value_t = 2000, value_parser = clap::value_parser!(u64).range(1..))]
    command_timeout_ms: u64,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn session_config(&self) -> SessionConfig {
        let poll_period = Duration::from_millis(self.poll_ms);
        SessionConfig {
            base_url: self.url.clone(),
            csrf_token: self.csrf_token.clone(),
            poll_period,
            fetch_timeout: self.timeout_ms.map(Duration::from_millis).unwrap_or(poll_period),
            frame_interval: Duration::from_millis(self.frame_ms),
            command_timeout: Duration::from_millis(self.command_timeout_ms),
        }
    }

    fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    TermLogger::init(cli.log_level(), Config::default(), TerminalMode::Mixed, ColorChoice::Auto)
        .context("install logger")?;

    let mut session = DashboardSession::connect(cli.session_config()).await?;
    let cfg = session.config();
    info!("polling every {:?}, frame every {:?}", cfg.poll_period, cfg.frame_interval);
    println!("{}", commands::HELP);

    let stdin = BufReader::new(tokio::io::stdin());
    run(session, stdin, tokio::signal::ctrl_c()).await
}

/// Serve the prompt, then shut the session down however the prompt ended.
async fn run<R, I>(mut session: DashboardSession, input: R, interrupt: I) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    I: Future,
{
    let outcome = commands::prompt(&session, input, interrupt).await;
    session.shutdown().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{running, Frames};
    use std::io;
    use std::pin::Pin;
    use std::task::{self, Poll};
    use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
    use tokio::time;

    /// Input that fails on every read.
    struct Broken;

    impl AsyncRead for Broken {
        fn poll_read(self: Pin<&mut Self>, _cx: &mut task::Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed")))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn read_error_still_shuts_down() {
        let frames = Frames::default();
        let session = running(frames.clone()).await;
        let input = BufReader::new((&b"status\n"[..]).chain(Broken));

        let outcome = run(session, input, std::future::pending::<()>()).await;
        assert!(outcome.is_err());

        let drawn = frames.0.lock().len();
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(frames.0.lock().len(), drawn);
    }

    #[tokio::test(start_paused = true)]
    async fn quit_ends_the_prompt() {
        let frames = Frames::default();
        let session = running(frames.clone()).await;
        let input = BufReader::new(&b"help\nquit\nlaunch\n"[..]);
        assert!(run(session, input, std::future::pending::<()>()).await.is_ok());

        let drawn = frames.0.lock().len();
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(frames.0.lock().len(), drawn);
    }
}
