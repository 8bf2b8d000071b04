//! Coalescing background capture of the element layer.

use crate::frame::Frame;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

pub const DEFAULT_MIN_INTERVAL_MS: f64 = 200.0;

/// Something that can render the element layer into a frame. Runs on the
/// rayon pool.
pub trait SnapshotSource: Send + Sync + 'static {
    fn capture(&self) -> anyhow::Result<Frame>;
}

type Completion = (u64, anyhow::Result<Frame>);

/// At most one capture is in flight. Requests made meanwhile collapse into a
/// single trailing capture, started no sooner than `min_interval_ms` after
/// the previous one. A cancelled capture still occupies the slot until its
/// worker reports back; only its result is thrown away.
pub struct SnapshotScheduler {
    source: Arc<dyn SnapshotSource>,
    min_interval_ms: f64,
    last_start_ms: Option<f64>,
    pending: bool,
    in_flight: Option<u64>,
    generation: u64,
    accept_from: u64,
    failures: u64,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
}

impl SnapshotScheduler {
    pub fn new(source: Arc<dyn SnapshotSource>, min_interval_ms: f64) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            source,
            min_interval_ms: if min_interval_ms.is_finite() { min_interval_ms.max(0.0) } else { DEFAULT_MIN_INTERVAL_MS },
            last_start_ms: None,
            pending: false,
            in_flight: None,
            generation: 0,
            accept_from: 0,
            failures: 0,
            tx,
            rx,
        }
    }

    pub fn request(&mut self) {
        self.pending = true;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Collects a finished capture and starts the next one when due.
    pub fn poll(&mut self, now_ms: f64) -> Option<Frame> {
        let mut latest = None;
        while let Ok((generation, result)) = self.rx.try_recv() {
            if self.in_flight == Some(generation) {
                self.in_flight = None;
            }
            if generation < self.accept_from {
                log::trace!("snapshot capture {generation} discarded");
                continue;
            }
            match result {
                Ok(frame) => latest = Some(frame),
                Err(err) => {
                    self.failures += 1;
                    log::warn!("snapshot capture failed, keeping previous frame: {err:#}");
                }
            }
        }
        if self.pending && self.in_flight.is_none() && self.due(now_ms) {
            self.start(now_ms);
        }
        latest
    }

    /// Drops the pending request and ignores the result of any capture still
    /// running.
    pub fn cancel(&mut self) {
        self.pending = false;
        self.accept_from = self.generation + 1;
    }

    fn due(&self, now_ms: f64) -> bool {
        match self.last_start_ms {
            Some(last) => now_ms - last >= self.min_interval_ms,
            None => true,
        }
    }

    fn start(&mut self, now_ms: f64) {
        self.generation += 1;
        let generation = self.generation;
        self.pending = false;
        self.in_flight = Some(generation);
        self.last_start_ms = Some(now_ms);
        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();
        log::trace!("snapshot capture {generation} started");
        rayon::spawn(move || {
            let result = source.capture();
            // The scheduler may be gone; nothing to report to then.
            let _ = tx.send((generation, result));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingSource {
        calls: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
        fail: bool,
    }

    impl CountingSource {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                fail,
            })
        }
    }

    impl SnapshotSource for CountingSource {
        fn capture(&self) -> anyhow::Result<Frame> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(10));
            self.running.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("element layer unavailable"));
            }
            Ok(Frame::new(2, 2, [n as f32, 0.0, 0.0, 1.0]))
        }
    }

    fn settle(scheduler: &mut SnapshotScheduler, now_ms: f64) -> Option<Frame> {
        for _ in 0..1000 {
            if let Some(frame) = scheduler.poll(now_ms) {
                return Some(frame);
            }
            if !scheduler.is_in_flight() {
                return None;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        None
    }

    #[test]
    fn requests_during_capture_coalesce() {
        let source = CountingSource::new(false);
        let mut scheduler = SnapshotScheduler::new(source.clone(), DEFAULT_MIN_INTERVAL_MS);
        scheduler.request();
        assert!(scheduler.poll(0.0).is_none());
        assert!(scheduler.is_in_flight());
        for _ in 0..5 {
            scheduler.request();
        }
        let frame = settle(&mut scheduler, 10.0).expect("first capture");
        assert_eq!(frame.get(0, 0)[0], 0.0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_pending());

        assert!(scheduler.poll(100.0).is_none());
        assert!(!scheduler.is_in_flight());
        assert!(scheduler.poll(250.0).is_none());
        assert!(scheduler.is_in_flight());
        let frame = settle(&mut scheduler, 260.0).expect("trailing capture");
        assert_eq!(frame.get(0, 0)[0], 1.0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(!scheduler.is_pending());
    }

    #[test]
    fn failures_are_counted_and_yield_nothing() {
        let source = CountingSource::new(true);
        let mut scheduler = SnapshotScheduler::new(source, DEFAULT_MIN_INTERVAL_MS);
        scheduler.request();
        scheduler.poll(0.0);
        assert!(settle(&mut scheduler, 0.0).is_none());
        assert_eq!(scheduler.failures(), 1);
    }

    #[test]
    fn cancel_discards_in_flight_result() {
        let source = CountingSource::new(false);
        let mut scheduler = SnapshotScheduler::new(source, DEFAULT_MIN_INTERVAL_MS);
        scheduler.request();
        scheduler.poll(0.0);
        scheduler.cancel();
        std::thread::sleep(Duration::from_millis(50));
        assert!(scheduler.poll(1000.0).is_none());
        assert!(!scheduler.is_in_flight());
    }

    #[test]
    fn request_after_cancel_waits_for_the_running_capture() {
        let source = CountingSource::new(false);
        let mut scheduler = SnapshotScheduler::new(source.clone(), DEFAULT_MIN_INTERVAL_MS);
        scheduler.request();
        scheduler.poll(0.0);
        scheduler.cancel();
        scheduler.request();
        scheduler.poll(1000.0);
        assert!(scheduler.is_in_flight());
        assert!(scheduler.is_pending());

        let frame = settle(&mut scheduler, 1000.0).expect("capture after cancel");
        assert_eq!(frame.get(0, 0)[0], 1.0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(source.peak.load(Ordering::SeqCst), 1);
    }
}
