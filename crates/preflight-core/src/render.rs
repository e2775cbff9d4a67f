//! Attitude indicator frame loop.
//!
//! Runs on its own interval, independent of polling. Each frame takes the
//! newest published state if the cell is free and otherwise redraws the
//! previous one, so a frame never waits on the poller.
//!
//! Orientation convention: telemetry quaternions are body-to-world in NED
//! (x forward, y right, z down) and are used as sent, `w` included. The
//! scene is Y-up right-handed (x right, y up, z toward the viewer).
//! [`scene_orientation`] is the only place the axis change is applied.

use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use model::Quaternion;

use crate::state::{AttitudeReader, AttitudeState, Published};

/// Whatever turns a frame into pixels.
pub trait RenderSurface: Send + 'static {
    fn draw(&mut self, frame: &Frame);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Staleness {
    NoData,
    Fresh,
    Stale { failures: u32, age: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    /// Frames drawn by this loop so far, starting at 1.
    pub number: u64,
    /// Poll sequence the frame was built from.
    pub seq: u64,
    /// Scene-frame orientation.
    pub orientation: Quaternion,
    pub staleness: Staleness,
}

/// NED body-to-world → scene axes: (w, x, y, z) ↦ (w, y, −z, −x).
pub fn scene_orientation(q: Quaternion) -> Quaternion {
    Quaternion::new(q.w, q.y, -q.z, -q.x)
}

pub fn frame_for(published: &Published, number: u64) -> Frame {
    let staleness = match &published.state {
        AttitudeState::NeverReceived => Staleness::NoData,
        AttitudeState::Latest(_) => Staleness::Fresh,
        AttitudeState::Stale { failures, age, .. } => Staleness::Stale { failures: *failures, age: *age },
    };
    Frame {
        number,
        seq: published.seq,
        orientation: scene_orientation(published.state.orientation()),
        staleness,
    }
}

struct Running {
    stop: oneshot::Sender<()>,
    task: JoinHandle<Box<dyn RenderSurface>>,
}

/// Owns at most one running frame task.
pub struct RenderLoop {
    reader: AttitudeReader,
    interval: Duration,
    active: Option<Running>,
}

impl RenderLoop {
    pub fn new(reader: AttitudeReader, interval: Duration) -> Self {
        Self { reader, interval, active: None }
    }

    /// Start drawing on `surface`, stopping any loop already running first.
    pub async fn start(&mut self, surface: Box<dyn RenderSurface>) {
        if self.active.is_some() {
            debug!("render loop restart requested; stopping the running loop");
            self.stop().await;
        }
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(self.reader.clone(), self.interval, surface, stop_rx));
        info!("render loop started, frame interval {:?}", self.interval);
        self.active = Some(Running { stop, task });
    }

    /// Stop the running loop and hand back its surface. No frame is drawn
    /// after this returns.
    pub async fn stop(&mut self) -> Option<Box<dyn RenderSurface>> {
        let running = self.active.take()?;
        let _ = running.stop.send(());
        let surface = running.task.await.ok();
        info!("render loop stopped");
        surface
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        if let Some(running) = self.active.take() {
            running.task.abort();
        }
    }
}

async fn run(
    reader: AttitudeReader,
    interval: Duration,
    mut surface: Box<dyn RenderSurface>,
    mut stop: oneshot::Receiver<()>,
) -> Box<dyn RenderSurface> {
    let mut ticks = time::interval(interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut current: Arc<Published> = reader.load();
    let mut number = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = ticks.tick() => {}
        }
        if let Some(latest) = reader.try_load() {
            current = latest;
        }
        number += 1;
        surface.draw(&frame_for(&current, number));
    }
    surface
}
