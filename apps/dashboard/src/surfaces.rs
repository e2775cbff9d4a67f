// Terminal stand-ins for the attitude indicator and the readout panel.
use log::{debug, info, trace, warn};
use std::mem::discriminant;

use display::{Field, ReadoutSink};
use preflight_core::{Frame, RenderSurface, Staleness};

/// Logs each frame at trace level and staleness changes at info/warn.
#[derive(Default)]
pub struct TerminalSurface {
    last: Option<Staleness>,
}

impl RenderSurface for TerminalSurface {
    fn draw(&mut self, frame: &Frame) {
        let q = frame.orientation;
        trace!("frame {} (seq {}): q = [{:.3} {:.3} {:.3} {:.3}]", frame.number, frame.seq, q.w, q.x, q.y, q.z);

        let changed = match self.last {
            Some(prev) => discriminant(&prev) != discriminant(&frame.staleness),
            None => true,
        };
        if changed {
            match frame.staleness {
                Staleness::NoData => info!("attitude indicator: waiting for telemetry"),
                Staleness::Fresh => info!("attitude indicator: live"),
                Staleness::Stale { failures, age } => {
                    warn!("attitude indicator: stale, holding last attitude ({failures} failed, {age:?})")
                }
            }
        }
        self.last = Some(frame.staleness);
    }
}

/// Writes changed readouts to the log.
#[derive(Default)]
pub struct LogSink;

impl ReadoutSink for LogSink {
    fn update(&mut self, changed: &[(Field, &str)]) {
        for (field, text) in changed {
            if matches!(field, Field::LinkStatus | Field::ControlArm | Field::ControlMode) {
                info!("{} = {text}", field.name());
            }
        }
        let line: Vec<String> = changed.iter().map(|(f, t)| format!("{}={t}", f.name())).collect();
        debug!("readouts: {}", line.join(" "));
    }
}
