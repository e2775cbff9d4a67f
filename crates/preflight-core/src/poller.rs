//! Fixed-period telemetry polling.
//!
//! Each tick awaits its fetch before the next one can start, so at most one
//! request is outstanding and results reach the [`AttitudeWriter`] in issue
//! order. Failures never escape: they become `Stale` transitions and the next
//! tick simply tries again. There is no backoff; a failing link is retried
//! every period for as long as the poller runs.

use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::PollConfig;
use crate::state::AttitudeWriter;
use crate::{PollEvent, PollTx, TelemetryError, TelemetrySource};

pub struct Poller {
    source: Arc<dyn TelemetrySource>,
    writer: AttitudeWriter,
    cfg: PollConfig,
    events: Option<PollTx>,
}

impl Poller {
    pub fn new(source: Arc<dyn TelemetrySource>, writer: AttitudeWriter, cfg: PollConfig) -> Self {
        Self { source, writer, cfg, events: None }
    }

    /// Report every applied tick on `tx`.
    pub fn with_events(mut self, tx: PollTx) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn start(self) -> PollerHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        info!("poller started, period {:?}, timeout {:?}", self.cfg.period, self.cfg.timeout);
        let task = tokio::spawn(self.run(stop_rx));
        PollerHandle { stop: Some(stop_tx), task }
    }

    async fn run(mut self, mut stop: oneshot::Receiver<()>) -> AttitudeWriter {
        let mut ticks = time::interval(self.cfg.period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let first = self.writer.last_seq();
        let mut seq = first;
        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = &mut stop => break,
                _ = ticks.tick() => {}
            }
            seq += 1;

            let fetched = tokio::select! {
                biased;
                // An in-flight fetch is abandoned on stop; its result is never applied.
                _ = &mut stop => break,
                r = time::timeout(self.cfg.timeout, self.source.fetch_snapshot()) => {
                    r.unwrap_or(Err(TelemetryError::Timeout(self.cfg.timeout)))
                }
            };

            let event = match fetched {
                Ok(snapshot) => {
                    if failures > 0 {
                        info!("telemetry recovered after {failures} failed polls");
                    }
                    failures = 0;
                    self.writer.apply_success(seq, snapshot);
                    PollEvent::Updated { seq }
                }
                Err(error) => {
                    failures = failures.saturating_add(1);
                    if failures == 1 {
                        warn!("telemetry poll failed: {error}");
                    } else if !error.is_transient() {
                        warn!("telemetry poll failed ({failures} in a row): {error}");
                    } else {
                        debug!("telemetry poll failed ({failures} in a row): {error}");
                    }
                    self.writer.apply_failure(seq, self.cfg.period);
                    PollEvent::Failed { seq, error, consecutive: failures }
                }
            };
            if let Some(tx) = &self.events {
                let _ = tx.send(event);
            }
        }

        info!("poller stopped after {} ticks", seq - first);
        self.writer
    }
}

/// Running poller. Dropping the handle also stops the task.
pub struct PollerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<AttitudeWriter>,
}

impl PollerHandle {
    /// Stop polling and wait for the task to finish. Nothing is published
    /// after this returns. The writer comes back so polling can be restarted
    /// on the same cell.
    pub async fn stop(mut self) -> Option<AttitudeWriter> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        (&mut self.task).await.ok()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        if self.stop.is_some() {
            self.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{attitude_cell, tests::snapshot, AttitudeState};
    use crate::{channel, TelemetrySnapshot};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const PERIOD: Duration = Duration::from_millis(100);

    /// Plays back canned results, then keeps failing.
    struct Script {
        results: Mutex<VecDeque<Result<TelemetrySnapshot, TelemetryError>>>,
        calls: AtomicU32,
        in_flight: AtomicU32,
        delay: Duration,
    }

    impl Script {
        fn new(results: Vec<Result<TelemetrySnapshot, TelemetryError>>) -> Arc<Self> {
            Self::slow(results, Duration::ZERO)
        }

        fn slow(results: Vec<Result<TelemetrySnapshot, TelemetryError>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                calls: AtomicU32::new(0),
                in_flight: AtomicU32::new(0),
                delay,
            })
        }
    }

    #[async_trait::async_trait]
    impl TelemetrySource for Script {
        async fn fetch_snapshot(&self) -> Result<TelemetrySnapshot, TelemetryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let overlapping = self.in_flight.fetch_add(1, Ordering::SeqCst);
            assert_eq!(overlapping, 0, "fetches overlapped");
            // timed-out fetches are dropped mid-sleep
            let _guard = InFlight(&self.in_flight);
            if !self.delay.is_zero() {
                time::sleep(self.delay).await;
            }
            self.results.lock().pop_front().unwrap_or(Err(TelemetryError::Status(503)))
        }
    }

    struct InFlight<'a>(&'a AtomicU32);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn cfg() -> PollConfig {
        PollConfig { period: PERIOD, timeout: PERIOD }
    }

    #[tokio::test(start_paused = true)]
    async fn n_failures_age_by_n_periods() {
        let source = Script::new(vec![Ok(snapshot(1.0))]);
        let (writer, reader) = attitude_cell();
        let handle = Poller::new(source.clone(), writer, cfg()).start();

        // ticks at 0, 100, 200, 300 ms: one success then three failures
        time::sleep(PERIOD * 3 + PERIOD / 2).await;
        handle.stop().await.expect("poller task");

        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
        match &reader.load().state {
            AttitudeState::Stale { last_good, failures, age } => {
                assert_eq!(last_good.as_deref(), Some(&snapshot(1.0)));
                assert_eq!(*failures, 3);
                assert_eq!(*age, PERIOD * 3);
            }
            other => panic!("expected stale, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_staleness() {
        let source = Script::new(vec![Err(TelemetryError::Status(500)), Ok(snapshot(2.0))]);
        let (writer, reader) = attitude_cell();
        let (tx, rx) = channel();
        let handle = Poller::new(source, writer, cfg()).with_events(tx).start();

        time::sleep(PERIOD + PERIOD / 2).await;
        handle.stop().await;

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                PollEvent::Failed { seq: 1, error: TelemetryError::Status(500), consecutive: 1 },
                PollEvent::Updated { seq: 2 },
            ]
        );
        assert_eq!(reader.load().state.snapshot(), Some(&snapshot(2.0)));
        assert!(!reader.load().state.is_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out() {
        let source = Script::slow(vec![Ok(snapshot(1.0))], PERIOD * 5);
        let (writer, reader) = attitude_cell();
        let (tx, rx) = channel();
        let handle = Poller::new(source, writer, cfg()).with_events(tx).start();

        time::sleep(PERIOD + PERIOD / 2).await;
        handle.stop().await;

        assert_eq!(
            rx.try_iter().next(),
            Some(PollEvent::Failed { seq: 1, error: TelemetryError::Timeout(PERIOD), consecutive: 1 })
        );
        assert!(reader.load().state.is_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn late_fetches_never_overlap() {
        // each fetch takes 2.5 periods but the timeout is generous
        let results = (0..10).map(|i| Ok(snapshot(i as f32))).collect();
        let source = Script::slow(results, PERIOD * 5 / 2);
        let (writer, reader) = attitude_cell();
        let slow_cfg = PollConfig { period: PERIOD, timeout: PERIOD * 10 };
        let handle = Poller::new(source.clone(), writer, slow_cfg).start();

        time::sleep(PERIOD * 12).await;
        handle.stop().await;

        // Script asserts on overlap; the applied value must be the last one fetched
        let calls = source.calls.load(Ordering::SeqCst);
        assert!(calls >= 4 && calls <= 5, "calls = {calls}");
        let applied = reader.load();
        assert!(applied.seq >= 4);
        assert_eq!(applied.state.snapshot(), Some(&snapshot((applied.seq - 1) as f32)));
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_published_after_stop() {
        let source = Script::new((0..100).map(|i| Ok(snapshot(i as f32))).collect());
        let (writer, reader) = attitude_cell();
        let handle = Poller::new(source.clone(), writer, cfg()).start();

        time::sleep(PERIOD * 2 + PERIOD / 2).await;
        let writer = handle.stop().await.expect("poller task");
        let seq_at_stop = reader.load().seq;
        let calls_at_stop = source.calls.load(Ordering::SeqCst);

        time::sleep(PERIOD * 10).await;
        assert_eq!(reader.load().seq, seq_at_stop);
        assert_eq!(source.calls.load(Ordering::SeqCst), calls_at_stop);

        // restarting continues the sequence on the same cell
        let handle = Poller::new(source, writer, cfg()).start();
        time::sleep(PERIOD / 2).await;
        handle.stop().await;
        assert_eq!(reader.load().seq, seq_at_stop + 1);
    }
}
