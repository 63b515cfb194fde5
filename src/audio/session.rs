//! Bidirectional encrypted audio stream over one relay connection
//!
//! ```text
//!  CaptureSource ─► [capture thread] ─ encrypt ─► SessionConnection ─► relay
//!                        ▲ gate, mic mute
//!  PlaybackSink ◄─ [playback thread] ◄─ FrameQueue ◄─ decrypt ◄─ inbound binary
//!                        ▲ volume                       ▲ speaker mute
//! ```
//!
//! The pipelines start when the connection opens and stop when it closes,
//! whatever the cause. Inbound frames that fail authentication are dropped
//! and never reach the speaker.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::audio::capture::{CaptureContext, CapturePipeline};
use crate::audio::playback::PlaybackPipeline;
use crate::audio::source::AudioBackend;
use crate::config::{AudioConfig, PrivacySettings};
use crate::connection::{
    CloseReason, ConnectionObserver, SessionConnection, SessionState, Transport,
};
use crate::crypto::{CryptoCodec, KeyProvider};
use crate::error::{AudioError, ConnError, CryptoError};
use crate::events::{Listeners, Subscription};

/// Microphone/speaker controls
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AudioControlState {
    pub microphone_muted: bool,
    pub speaker_muted: bool,
    /// Playback gain in `[0, 1]`
    pub volume: f32,
}

impl Default for AudioControlState {
    fn default() -> Self {
        Self {
            microphone_muted: false,
            speaker_muted: false,
            volume: 1.0,
        }
    }
}

/// Notifications from an [`AudioSession`]
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    ConnectionStateChanged(bool),
    ControlStateChanged(AudioControlState),
    /// A capture or playback pipeline could not start or died
    PipelineFailed(AudioError),
    /// An inbound frame was dropped
    FrameRejected(CryptoError),
}

/// Counters for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AudioStats {
    pub frames_sent: u64,
    pub frames_suppressed: u64,
    pub frames_played: u64,
    pub frames_rejected: u64,
    pub playback_overflows: usize,
}

struct AudioInner {
    config: AudioConfig,
    privacy: PrivacySettings,
    backend: Arc<dyn AudioBackend>,
    keys: Arc<dyn KeyProvider>,
    connection: SessionConnection,
    codec: RwLock<Option<Arc<CryptoCodec>>>,
    control: Arc<Mutex<AudioControlState>>,
    capture: Mutex<Option<CapturePipeline>>,
    playback: Mutex<Option<PlaybackPipeline>>,
    frames_rejected: AtomicU64,
    events: Listeners<AudioEvent>,
    this: Weak<AudioInner>,
}

/// Audio streaming session
pub struct AudioSession {
    inner: Arc<AudioInner>,
}

impl AudioSession {
    pub fn new(
        config: AudioConfig,
        privacy: PrivacySettings,
        transport: Arc<dyn Transport>,
        keys: Arc<dyn KeyProvider>,
        backend: Arc<dyn AudioBackend>,
    ) -> Self {
        let inner = Arc::new_cyclic(|this: &Weak<AudioInner>| AudioInner {
            config,
            privacy,
            backend,
            keys,
            connection: SessionConnection::new(
                "audio",
                transport,
                Arc::new(AudioObserver(this.clone())),
            ),
            codec: RwLock::new(None),
            control: Arc::new(Mutex::new(AudioControlState::default())),
            capture: Mutex::new(None),
            playback: Mutex::new(None),
            frames_rejected: AtomicU64::new(0),
            events: Listeners::new(),
            this: this.clone(),
        });
        Self { inner }
    }

    /// Connect to the relay and start both pipelines.
    ///
    /// A pipeline that cannot start is reported as
    /// [`AudioEvent::PipelineFailed`]; the connection stays up.
    pub async fn connect(&self, endpoint: &str) -> Result<(), ConnError> {
        if self.inner.connection.state() != SessionState::Disconnected {
            return Err(ConnError::AlreadyOpen);
        }

        let key = self
            .inner
            .keys
            .session_key()
            .map_err(|e| ConnError::Key(e.to_string()))?;
        *self.inner.codec.write() = Some(Arc::new(CryptoCodec::new(&key)));

        self.inner.connection.open(endpoint).await
    }

    /// Stop capture, then close the connection. Idempotent.
    ///
    /// Once this returns no further audio frame is sent.
    pub fn disconnect(&self) {
        let capture = self.inner.capture.lock().take();
        if let Some(mut capture) = capture {
            capture.stop();
        }
        self.inner.connection.close();
    }

    pub fn mute_microphone(&self, muted: bool) {
        self.update_control(|control| control.microphone_muted = muted);
    }

    pub fn mute_speaker(&self, muted: bool) {
        self.update_control(|control| control.speaker_muted = muted);
    }

    /// Set playback gain, clamped to `[0, 1]`
    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        self.update_control(|control| control.volume = volume);
    }

    pub fn control_state(&self) -> AudioControlState {
        *self.inner.control.lock()
    }

    pub fn state(&self) -> SessionState {
        self.inner.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    /// Whether the capture thread is currently producing frames
    pub fn is_capturing(&self) -> bool {
        self.inner
            .capture
            .lock()
            .as_ref()
            .map(CapturePipeline::is_running)
            .unwrap_or(false)
    }

    pub fn is_playing(&self) -> bool {
        self.inner
            .playback
            .lock()
            .as_ref()
            .map(PlaybackPipeline::is_running)
            .unwrap_or(false)
    }

    pub fn stats(&self) -> AudioStats {
        let mut stats = AudioStats {
            frames_rejected: self.inner.frames_rejected.load(Ordering::Relaxed),
            ..AudioStats::default()
        };
        if let Some(capture) = self.inner.capture.lock().as_ref() {
            stats.frames_sent = capture.stats().frames_sent();
            stats.frames_suppressed = capture.stats().frames_suppressed();
        }
        if let Some(playback) = self.inner.playback.lock().as_ref() {
            stats.frames_played = playback.frames_played();
            stats.playback_overflows = playback.overflow_count();
        }
        stats
    }

    pub fn subscribe(&self) -> Subscription<AudioEvent> {
        self.inner.events.subscribe()
    }

    fn update_control(&self, apply: impl FnOnce(&mut AudioControlState)) {
        let mut control = self.inner.control.lock();
        let before = *control;
        apply(&mut control);
        if *control != before {
            tracing::debug!("Audio controls changed: {:?}", *control);
            self.inner
                .events
                .emit(AudioEvent::ControlStateChanged(*control));
        }
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl AudioInner {
    fn handle_open(&self) {
        self.events.emit(AudioEvent::ConnectionStateChanged(true));

        let codec = match self.codec.read().clone() {
            Some(codec) => codec,
            None => return,
        };

        self.start_playback();
        self.start_capture(codec);
    }

    fn start_playback(&self) {
        let previous = self.playback.lock().take();
        if let Some(mut previous) = previous {
            previous.stop();
        }

        let started = self.backend.open_playback(&self.config).and_then(|sink| {
            PlaybackPipeline::start(
                sink,
                Arc::clone(&self.control),
                self.config.playback_queue_frames,
                self.failure_handler(),
            )
        });

        match started {
            Ok(pipeline) => *self.playback.lock() = Some(pipeline),
            Err(e) => self.report_failure(e),
        }
    }

    fn start_capture(&self, codec: Arc<CryptoCodec>) {
        let previous = self.capture.lock().take();
        if let Some(mut previous) = previous {
            previous.stop();
        }

        let started = self.backend.open_capture(&self.config).and_then(|source| {
            CapturePipeline::start(
                source,
                CaptureContext {
                    connection: self.connection.clone(),
                    codec,
                    control: Arc::clone(&self.control),
                    privacy: self.privacy,
                    frame_bytes: self.config.frame_bytes(),
                    on_failure: self.failure_handler(),
                },
            )
        });

        match started {
            Ok(pipeline) => *self.capture.lock() = Some(pipeline),
            Err(e) => self.report_failure(e),
        }
    }

    fn failure_handler(&self) -> Box<dyn FnOnce(AudioError) + Send> {
        let this = self.this.clone();
        Box::new(move |e| {
            if let Some(inner) = this.upgrade() {
                inner.events.emit(AudioEvent::PipelineFailed(e));
            }
        })
    }

    fn report_failure(&self, e: AudioError) {
        tracing::error!("Audio pipeline failed to start: {}", e);
        self.events.emit(AudioEvent::PipelineFailed(e));
    }

    fn handle_disconnected(&self) {
        // Threads are joined later; this runs on the connection's dispatch path
        if let Some(capture) = self.capture.lock().as_ref() {
            capture.halt();
        }
        if let Some(playback) = self.playback.lock().as_ref() {
            playback.halt();
        }
        self.events.emit(AudioEvent::ConnectionStateChanged(false));
    }

    fn handle_binary(&self, data: Bytes) {
        if self.control.lock().speaker_muted {
            return;
        }

        let codec = match self.codec.read().clone() {
            Some(codec) => codec,
            None => return,
        };

        match codec.decrypt(&data) {
            Ok(pcm) => {
                if let Some(playback) = self.playback.lock().as_ref() {
                    if !playback.push(Bytes::from(pcm)) {
                        tracing::trace!("Playback queue full, dropping frame");
                    }
                }
            }
            Err(e) => {
                tracing::debug!("Dropping inbound audio frame ({} bytes): {}", data.len(), e);
                self.frames_rejected.fetch_add(1, Ordering::Relaxed);
                self.events.emit(AudioEvent::FrameRejected(e));
            }
        }
    }
}

struct AudioObserver(Weak<AudioInner>);

impl ConnectionObserver for AudioObserver {
    fn on_open(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.handle_open();
        }
    }

    fn on_binary_message(&self, data: Bytes) {
        if let Some(inner) = self.0.upgrade() {
            inner.handle_binary(data);
        }
    }

    fn on_text_message(&self, text: String) {
        tracing::debug!("Ignoring {} byte text frame on audio connection", text.len());
    }

    fn on_close(&self, reason: CloseReason) {
        tracing::info!("Audio session {}", reason);
        if let Some(inner) = self.0.upgrade() {
            inner.handle_disconnected();
        }
    }

    fn on_error(&self, cause: ConnError) {
        tracing::warn!("Audio session error: {}", cause);
        if let Some(inner) = self.0.upgrade() {
            inner.handle_disconnected();
        }
    }
}
