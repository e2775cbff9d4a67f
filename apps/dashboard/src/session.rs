use anyhow::Context;
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread;

use display::{project, ReadoutPump, ReadoutSink, Readouts};
use preflight_core::{
    attitude_cell, channel, ArmRequestState, AttitudeReader, CommandGateway, CommandTransport, PollRx, Poller,
    PollerHandle, RenderLoop, RenderSurface, SessionConfig, TelemetrySource,
};
use preflight_http::HttpLink;

use crate::surfaces::{LogSink, TerminalSurface};

/// One dashboard page: everything started together and torn down together.
pub struct DashboardSession {
    cfg: SessionConfig,
    reader: AttitudeReader,
    poller: Option<PollerHandle>,
    render: RenderLoop,
    gateway: CommandGateway,
    pump: Option<thread::JoinHandle<()>>,
}

impl DashboardSession {
    /// Talk to the flight controller at `cfg.base_url` with terminal output.
    pub async fn connect(cfg: SessionConfig) -> anyhow::Result<Self> {
        let link = Arc::new(HttpLink::new(cfg.clone().into()).context("create telemetry link")?);
        info!("connecting to {}", link.base_url());
        Self::start(cfg, link.clone(), link, Box::new(TerminalSurface::default()), LogSink).await
    }

    pub async fn start<K>(
        cfg: SessionConfig,
        source: Arc<dyn TelemetrySource>,
        transport: Arc<dyn CommandTransport>,
        surface: Box<dyn RenderSurface>,
        sink: K,
    ) -> anyhow::Result<Self>
    where
        K: ReadoutSink + 'static,
    {
        let (writer, reader) = attitude_cell();
        let (tx, rx) = channel();

        let pump = spawn_pump(rx, reader.clone(), sink).context("spawn readout thread")?;
        let poller = Poller::new(source, writer, cfg.poll()).with_events(tx).start();
        let mut render = RenderLoop::new(reader.clone(), cfg.frame_interval);
        render.start(surface).await;
        let gateway = CommandGateway::new(transport, cfg.command_timeout);

        Ok(Self { cfg, reader, poller: Some(poller), render, gateway, pump: Some(pump) })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.cfg
    }

    pub fn gateway(&self) -> &CommandGateway {
        &self.gateway
    }

    pub fn arm_state(&self) -> ArmRequestState {
        self.gateway.arm_state()
    }

    /// Readouts for the state as of now.
    pub fn readouts(&self) -> Readouts {
        project(&self.reader.load().state)
    }

    /// Stop everything. Once this returns no poll is issued, no frame is
    /// drawn, no readout is pushed, and command results are discarded.
    pub async fn shutdown(&mut self) {
        self.gateway.cancel();
        if let Some(poller) = self.poller.take() {
            if poller.stop().await.is_none() {
                warn!("poller task ended abnormally");
            }
        }
        self.render.stop().await;
        // the pump exits once the poller's event sender is gone
        if let Some(pump) = self.pump.take() {
            match tokio::task::spawn_blocking(move || pump.join()).await {
                Ok(Ok(())) => {}
                _ => warn!("readout thread ended abnormally"),
            }
        }
        info!("session closed");
    }
}

fn spawn_pump<K: ReadoutSink + 'static>(
    rx: PollRx,
    reader: AttitudeReader,
    sink: K,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("readouts".into()).spawn(move || {
        let mut pump = ReadoutPump::new(sink);
        // draw placeholders before the first poll lands
        pump.refresh(&reader.load().state);
        while rx.recv().is_ok() {
            // drain anything queued behind this event; only the newest state matters
            while rx.try_recv().is_ok() {}
            pump.refresh(&reader.load().state);
        }
        debug!("readout thread done");
    })
}
