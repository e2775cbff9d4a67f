//! Latest-telemetry cell shared between the poller and its readers.
//!
//! The writer builds each new [`AttitudeState`] off to the side and swaps an
//! `Arc` in under a write lock held only for the pointer store, so readers
//! never observe a half-updated value. [`AttitudeWriter`] is not `Clone`:
//! there is exactly one writer per cell.

use log::debug;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

use model::{Quaternion, TelemetrySnapshot};

#[derive(Debug, Clone, PartialEq)]
pub enum AttitudeState {
    NeverReceived,
    Latest(Arc<TelemetrySnapshot>),
    Stale {
        last_good: Option<Arc<TelemetrySnapshot>>,
        /// Consecutive failed polls.
        failures: u32,
        /// `failures` poll periods.
        age: Duration,
    },
}

impl AttitudeState {
    /// The newest good snapshot, fresh or not.
    pub fn snapshot(&self) -> Option<&TelemetrySnapshot> {
        match self {
            AttitudeState::NeverReceived => None,
            AttitudeState::Latest(s) => Some(s),
            AttitudeState::Stale { last_good, .. } => last_good.as_deref(),
        }
    }

    /// Orientation to draw; identity until something arrives.
    pub fn orientation(&self) -> Quaternion {
        self.snapshot().map(|s| s.attitude).unwrap_or(Quaternion::IDENTITY)
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, AttitudeState::Stale { .. })
    }

    fn after_failure(&self, period: Duration) -> AttitudeState {
        let (last_good, failures) = match self {
            AttitudeState::NeverReceived => (None, 1),
            AttitudeState::Latest(s) => (Some(s.clone()), 1),
            AttitudeState::Stale { last_good, failures, .. } => (last_good.clone(), failures.saturating_add(1)),
        };
        AttitudeState::Stale { last_good, failures, age: period * failures }
    }
}

/// A state together with the poll sequence number that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    /// 0 before the first poll completes.
    pub seq: u64,
    pub state: AttitudeState,
}

struct Shared {
    current: RwLock<Arc<Published>>,
}

pub fn attitude_cell() -> (AttitudeWriter, AttitudeReader) {
    let shared = Arc::new(Shared {
        current: RwLock::new(Arc::new(Published { seq: 0, state: AttitudeState::NeverReceived })),
    });
    (AttitudeWriter { shared: shared.clone(), last_seq: 0 }, AttitudeReader { shared })
}

pub struct AttitudeWriter {
    shared: Arc<Shared>,
    last_seq: u64,
}

impl AttitudeWriter {
    /// Publish a successful poll. Returns false if `seq` is not newer than
    /// the last applied result; that result is dropped.
    pub fn apply_success(&mut self, seq: u64, snapshot: TelemetrySnapshot) -> bool {
        self.publish(seq, |_| AttitudeState::Latest(Arc::new(snapshot)))
    }

    /// Publish a failed poll, ageing whatever was last known.
    pub fn apply_failure(&mut self, seq: u64, period: Duration) -> bool {
        self.publish(seq, |prev| prev.after_failure(period))
    }

    pub fn reader(&self) -> AttitudeReader {
        AttitudeReader { shared: self.shared.clone() }
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    fn publish(&mut self, seq: u64, next: impl FnOnce(&AttitudeState) -> AttitudeState) -> bool {
        if seq <= self.last_seq {
            debug!("dropping superseded poll result {seq} (last applied {})", self.last_seq);
            return false;
        }
        // Only this writer stores, so the clone taken here is still current at swap time.
        let prev = self.shared.current.read().clone();
        let published = Arc::new(Published { seq, state: next(&prev.state) });
        *self.shared.current.write() = published;
        self.last_seq = seq;
        true
    }
}

#[derive(Clone)]
pub struct AttitudeReader {
    shared: Arc<Shared>,
}

impl AttitudeReader {
    pub fn load(&self) -> Arc<Published> {
        self.shared.current.read().clone()
    }

    /// Like [`load`](Self::load) but gives up instead of waiting if the
    /// writer is mid-swap.
    pub fn try_load(&self) -> Option<Arc<Published>> {
        self.shared.current.try_read().map(|g| g.clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use model::*;

    pub(crate) fn snapshot(alt: f32) -> TelemetrySnapshot {
        TelemetrySnapshot {
            attitude: Quaternion::new(0.0, 1.0, 0.0, 0.0),
            altimeter: Reading::Available(alt),
            altimeter_agl: Reading::Unavailable { reason: None },
            battery: Battery { voltage: 16.0, current: 1.5 },
            controls: Controls {
                roll: 0.0,
                pitch: 0.0,
                yaw: 0.0,
                throttle: 0.0,
                arm_status: ArmStatus::Disarmed,
                input_mode: InputMode::Acro,
            },
            link: LinkStats { rssi_1: 50, rssi_2: 55, link_quality_pct: 100, snr: 8, tx_power: TxPower::Mw25 },
        }
    }

    const PERIOD: Duration = Duration::from_millis(100);

    #[test]
    fn starts_never_received() {
        let (_w, r) = attitude_cell();
        let p = r.load();
        assert_eq!(p.seq, 0);
        assert_eq!(p.state, AttitudeState::NeverReceived);
        assert_eq!(p.state.orientation(), Quaternion::IDENTITY);
    }

    #[test]
    fn failures_age_the_last_good_snapshot() {
        let (mut w, r) = attitude_cell();
        assert!(w.apply_success(1, snapshot(10.0)));
        for seq in 2..=4 {
            assert!(w.apply_failure(seq, PERIOD));
        }
        match &r.load().state {
            AttitudeState::Stale { last_good, failures, age } => {
                assert_eq!(last_good.as_deref(), Some(&snapshot(10.0)));
                assert_eq!(*failures, 3);
                assert_eq!(*age, PERIOD * 3);
            }
            other => panic!("expected stale, got {other:?}"),
        }
        assert_eq!(r.load().state.orientation(), snapshot(10.0).attitude);

        assert!(w.apply_success(5, snapshot(11.0)));
        assert_eq!(r.load().state, AttitudeState::Latest(Arc::new(snapshot(11.0))));
    }

    #[test]
    fn failure_before_any_success_is_stale_without_data() {
        let (mut w, r) = attitude_cell();
        w.apply_failure(1, PERIOD);
        let p = r.load();
        assert_eq!(p.state, AttitudeState::Stale { last_good: None, failures: 1, age: PERIOD });
        assert_eq!(p.state.orientation(), Quaternion::IDENTITY);
    }

    #[test]
    fn results_apply_in_issue_order_only() {
        let (mut w, r) = attitude_cell();
        assert!(w.apply_success(2, snapshot(2.0)));
        assert!(!w.apply_success(1, snapshot(1.0)));
        assert!(!w.apply_failure(2, PERIOD));
        let p = r.load();
        assert_eq!(p.seq, 2);
        assert_eq!(p.state.snapshot(), Some(&snapshot(2.0)));
    }

    #[test]
    fn identical_snapshots_are_idempotent() {
        let (mut w, r) = attitude_cell();
        w.apply_success(1, snapshot(7.0));
        let first = r.load().state.clone();
        for seq in 2..10 {
            w.apply_success(seq, snapshot(7.0));
        }
        assert_eq!(r.load().state, first);
    }

    #[test]
    fn readers_keep_their_value_across_swaps() {
        let (mut w, r) = attitude_cell();
        w.apply_success(1, snapshot(1.0));
        let held = r.load();
        w.apply_success(2, snapshot(2.0));
        assert_eq!(held.state.snapshot(), Some(&snapshot(1.0)));
        assert_eq!(r.try_load().map(|p| p.seq), Some(2));
    }
}
