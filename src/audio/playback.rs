//! Playback thread draining the frame queue into the sink

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{FrameQueue, SharedFrameQueue};
use crate::audio::capture::FailureHandler;
use crate::audio::session::AudioControlState;
use crate::audio::source::PlaybackSink;
use crate::error::AudioError;

/// How long the playback thread waits for a frame before re-checking state
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A running playback thread and its input queue
pub struct PlaybackPipeline {
    queue: SharedFrameQueue,
    running: Arc<AtomicBool>,
    frames_played: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
}

impl PlaybackPipeline {
    /// Start the sink and spawn the playback thread.
    ///
    /// Volume is read from `control` once per cycle, so a change applies to
    /// the next frame written.
    pub fn start(
        mut sink: Box<dyn PlaybackSink>,
        control: Arc<Mutex<AudioControlState>>,
        queue_frames: usize,
        on_failure: FailureHandler,
    ) -> Result<Self, AudioError> {
        sink.start()?;

        let queue: SharedFrameQueue = Arc::new(FrameQueue::new(queue_frames));
        let running = Arc::new(AtomicBool::new(true));
        let frames_played = Arc::new(AtomicU64::new(0));

        let queue_for_loop = Arc::clone(&queue);
        let running_for_loop = Arc::clone(&running);
        let played_for_loop = Arc::clone(&frames_played);

        let handle = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let mut applied_volume: Option<f32> = None;
                let mut failure = None;

                while running_for_loop.load(Ordering::Acquire) {
                    let volume = control.lock().volume;
                    if applied_volume != Some(volume) {
                        sink.set_volume(volume);
                        applied_volume = Some(volume);
                    }

                    let frame = match queue_for_loop.pop_timeout(POLL_INTERVAL) {
                        Some(frame) => frame,
                        None => continue,
                    };

                    if let Err(e) = sink.write(&frame) {
                        failure = Some(e);
                        break;
                    }
                    played_for_loop.fetch_add(1, Ordering::Relaxed);
                }

                sink.stop();

                // Only a failure while still wanted is reported
                if let Some(e) = failure {
                    if running_for_loop.swap(false, Ordering::AcqRel) {
                        tracing::error!("Audio playback failed: {}", e);
                        on_failure(e);
                    }
                }
            })
            .map_err(|e| AudioError::Playback(format!("failed to spawn playback thread: {}", e)))?;

        tracing::info!("Audio playback started");

        Ok(Self {
            queue,
            running,
            frames_played,
            thread_handle: Some(handle),
        })
    }

    /// Queue a decoded frame. Returns false if it was dropped.
    pub fn push(&self, frame: Bytes) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }
        self.queue.push(frame)
    }

    /// Stop accepting frames; the thread exits within one poll interval
    pub fn halt(&self) {
        self.running.store(false, Ordering::Release);
        self.queue.clear();
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("Audio playback thread panicked");
            }
        }
    }

    /// Halt and join
    pub fn stop(&mut self) {
        self.halt();
        self.join();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Relaxed)
    }

    pub fn overflow_count(&self) -> usize {
        self.queue.overflow_count()
    }

    pub fn queue(&self) -> &FrameQueue {
        &self.queue
    }
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
