//! Bounded queue of decoded PCM frames awaiting playback
//!
//! The network side pushes without ever blocking; when playback falls
//! behind the newest frame is dropped and counted as an overflow.

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// FIFO of PCM frames shared by the receive path and the playback thread
pub struct FrameQueue {
    tx: Sender<Bytes>,
    rx: Receiver<Bytes>,
    capacity: usize,
    pushed_count: AtomicUsize,
    overflow_count: AtomicUsize,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            pushed_count: AtomicUsize::new(0),
            overflow_count: AtomicUsize::new(0),
        }
    }

    /// Enqueue a frame.
    /// Returns false if the queue is full (overflow)
    pub fn push(&self, frame: Bytes) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.pushed_count.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Wait up to `timeout` for the oldest frame
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Bytes> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drop everything still queued
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn pushed_count(&self) -> usize {
        self.pushed_count.load(Ordering::Relaxed)
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Get fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity as f32
    }
}

/// Thread-safe handle to a frame queue
pub type SharedFrameQueue = Arc<FrameQueue>;
