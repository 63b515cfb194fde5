//! Position sources
//!
//! The device location provider is external. A source is started with a
//! [`PositionFeed`] and pushes fixes into it whenever it has one; the feed
//! does not keep the session alive and goes quiet once tracking stops.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::TrackingCadence;
use crate::error::TelemetryError;
use crate::proximity::{GeoPoint, Position};

/// Receives fixes delivered through a feed
pub(crate) trait PositionReceiver: Send + Sync {
    fn on_position(&self, generation: u64, position: Position);
}

/// Handle a source uses to deliver fixes
#[derive(Clone)]
pub struct PositionFeed {
    receiver: Weak<dyn PositionReceiver>,
    generation: u64,
}

impl PositionFeed {
    pub(crate) fn new(receiver: Weak<dyn PositionReceiver>, generation: u64) -> Self {
        Self {
            receiver,
            generation,
        }
    }

    /// Deliver one fix. Returns false once the session is gone.
    pub fn deliver(&self, position: Position) -> bool {
        match self.receiver.upgrade() {
            Some(receiver) => {
                receiver.on_position(self.generation, position);
                true
            }
            None => false,
        }
    }
}

/// Asynchronous producer of self-position fixes
pub trait PositionSource: Send + Sync {
    /// Begin delivering fixes at roughly `cadence`
    fn start(&self, cadence: TrackingCadence, feed: PositionFeed) -> Result<(), TelemetryError>;

    /// Stop delivering. Fixes already in flight may still arrive.
    fn stop(&self);
}

/// Source driven by hand, for tests and embedding
#[derive(Default)]
pub struct ManualPositionSource {
    feed: Mutex<Option<PositionFeed>>,
    cadence: Mutex<Option<TrackingCadence>>,
    start_count: AtomicUsize,
    refuse: AtomicBool,
}

impl ManualPositionSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Push a fix into the current feed. Returns false if not started.
    pub fn push(&self, position: Position) -> bool {
        let feed = self.feed.lock().clone();
        match feed {
            Some(feed) => feed.deliver(position),
            None => false,
        }
    }

    /// Push a fix taken now
    pub fn push_point(&self, latitude: f64, longitude: f64) -> bool {
        self.push(Position::now(latitude, longitude))
    }

    pub fn is_active(&self) -> bool {
        self.feed.lock().is_some()
    }

    /// Feed handed over by the last start, while still started
    pub fn feed(&self) -> Option<PositionFeed> {
        self.feed.lock().clone()
    }

    pub fn start_count(&self) -> usize {
        self.start_count.load(Ordering::SeqCst)
    }

    /// Cadence requested by the last start
    pub fn cadence(&self) -> Option<TrackingCadence> {
        *self.cadence.lock()
    }

    /// Make subsequent starts fail, as a denied location permission would
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl PositionSource for ManualPositionSource {
    fn start(&self, cadence: TrackingCadence, feed: PositionFeed) -> Result<(), TelemetryError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TelemetryError::Source("location permission denied".to_string()));
        }
        self.start_count.fetch_add(1, Ordering::SeqCst);
        *self.cadence.lock() = Some(cadence);
        *self.feed.lock() = Some(feed);
        Ok(())
    }

    fn stop(&self) {
        self.feed.lock().take();
    }
}

/// Source reporting one fixed point at the regular interval
pub struct FixedPositionSource {
    point: GeoPoint,
    running: Arc<AtomicBool>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl FixedPositionSource {
    pub fn new(point: GeoPoint) -> Self {
        Self {
            point,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: Mutex::new(None),
        }
    }
}

impl PositionSource for FixedPositionSource {
    fn start(&self, cadence: TrackingCadence, feed: PositionFeed) -> Result<(), TelemetryError> {
        if !self.point.is_valid() {
            return Err(TelemetryError::Source(format!(
                "invalid fixed position {}, {}",
                self.point.latitude, self.point.longitude
            )));
        }

        self.stop();
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let point = self.point;
        let interval = cadence.interval();

        let handle = thread::Builder::new()
            .name("position-source".to_string())
            .spawn(move || {
                let mut next = Instant::now();
                while running.load(Ordering::Relaxed) {
                    if Instant::now() >= next {
                        if !feed.deliver(Position::now(point.latitude, point.longitude)) {
                            break;
                        }
                        next = Instant::now() + interval;
                    }
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| TelemetryError::Source(e.to_string()))?;

        *self.thread_handle.lock() = Some(handle);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.thread_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for FixedPositionSource {
    fn drop(&mut self) {
        self.stop();
    }
}
