//! Capture → encrypt → send pipeline
//!
//! Runs on a dedicated thread. Each cycle reads one PCM frame from the
//! source, re-checks the gate and the microphone controls, then encrypts
//! and hands the frame to the connection. The whole check-encrypt-send
//! step happens under a read lock on the gate, so closing the gate waits
//! for an in-flight frame and blocks every later one.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::session::AudioControlState;
use crate::audio::source::CaptureSource;
use crate::config::PrivacySettings;
use crate::connection::SessionConnection;
use crate::crypto::CryptoCodec;
use crate::error::AudioError;

/// Back-off when the source has nothing to deliver
const IDLE_WAIT: Duration = Duration::from_millis(5);

/// Called at most once, from the capture thread, when the pipeline dies
pub type FailureHandler = Box<dyn FnOnce(AudioError) + Send>;

/// What the capture thread needs to produce outbound frames
pub struct CaptureContext {
    pub connection: SessionConnection,
    pub codec: Arc<CryptoCodec>,
    pub control: Arc<Mutex<AudioControlState>>,
    pub privacy: PrivacySettings,
    pub frame_bytes: usize,
    pub on_failure: FailureHandler,
}

/// Capture counters
#[derive(Debug, Default)]
pub struct CaptureStats {
    sequence: AtomicU32,
    frames_sent: AtomicU64,
    frames_suppressed: AtomicU64,
}

impl CaptureStats {
    /// Frames read from the source since start
    pub fn current_sequence(&self) -> u32 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Frames handed to the connection
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Frames dropped because the microphone was muted or sharing disabled
    pub fn frames_suppressed(&self) -> u64 {
        self.frames_suppressed.load(Ordering::Relaxed)
    }
}

/// A running capture thread
pub struct CapturePipeline {
    /// `true` while frames may be sent
    gate: Arc<RwLock<bool>>,
    stats: Arc<CaptureStats>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    /// Start the source and spawn the capture thread.
    ///
    /// Fails without spawning anything if the source cannot start.
    pub fn start(mut source: Box<dyn CaptureSource>, ctx: CaptureContext) -> Result<Self, AudioError> {
        source.start()?;

        let gate = Arc::new(RwLock::new(true));
        let stats = Arc::new(CaptureStats::default());

        let gate_for_loop = Arc::clone(&gate);
        let stats_for_loop = Arc::clone(&stats);

        let spawned = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || capture_loop(source, ctx, gate_for_loop, stats_for_loop));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                return Err(AudioError::Capture(format!(
                    "failed to spawn capture thread: {}",
                    e
                )))
            }
        };

        tracing::info!("Audio capture started");

        Ok(Self {
            gate,
            stats,
            thread_handle: Some(handle),
        })
    }

    /// Close the gate. Waits for a frame currently being sent; no frame is
    /// sent after this returns.
    pub fn halt(&self) {
        *self.gate.write() = false;
    }

    /// Wait for the capture thread to exit. Call [`halt`](Self::halt) first.
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("Audio capture thread panicked");
            }
        }
    }

    /// Halt and join
    pub fn stop(&mut self) {
        self.halt();
        self.join();
    }

    pub fn is_running(&self) -> bool {
        *self.gate.read()
            && self
                .thread_handle
                .as_ref()
                .map(|handle| !handle.is_finished())
                .unwrap_or(false)
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    mut source: Box<dyn CaptureSource>,
    ctx: CaptureContext,
    gate: Arc<RwLock<bool>>,
    stats: Arc<CaptureStats>,
) {
    let CaptureContext {
        connection,
        codec,
        control,
        privacy,
        frame_bytes,
        on_failure,
    } = ctx;

    let mut buf = vec![0u8; frame_bytes];
    let mut failure = None;

    loop {
        if !*gate.read() {
            break;
        }

        let len = match source.read_frame(&mut buf) {
            Ok(len) => len.min(buf.len()),
            Err(e) => {
                failure = Some(e);
                break;
            }
        };
        if len == 0 {
            thread::sleep(IDLE_WAIT);
            continue;
        }
        stats.sequence.fetch_add(1, Ordering::Relaxed);

        let open = gate.read();
        if !*open {
            break;
        }

        let muted = control.lock().microphone_muted;
        if muted || !privacy.audio_sharing_enabled {
            stats.frames_suppressed.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let framed = match codec.encrypt(&buf[..len]) {
            Ok(framed) => framed,
            Err(e) => {
                failure = Some(AudioError::Capture(e.to_string()));
                break;
            }
        };

        match connection.send_binary(Bytes::from(framed)) {
            Ok(()) => {
                stats.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::trace!("Dropping capture frame: {}", e);
            }
        }
    }

    source.stop();

    if let Some(e) = failure {
        // A failure racing a deliberate shutdown is not reported
        if *gate.read() {
            tracing::error!("Audio capture failed: {}", e);
            on_failure(e);
        }
    }

    tracing::debug!(
        "Audio capture stopped after {} frames ({} sent)",
        stats.current_sequence(),
        stats.frames_sent()
    );
}
