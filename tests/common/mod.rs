//! Shared fixtures for the session integration tests

#![allow(dead_code)]

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use proximity_relay::audio::{AudioBackend, CaptureSource, PlaybackSink};
use proximity_relay::config::AudioConfig;
use proximity_relay::connection::{Frame, MemoryPeer};
use proximity_relay::crypto::{CryptoCodec, SessionKey, StaticKeyProvider};
use proximity_relay::error::AudioError;
use proximity_relay::events::Subscription;

pub const WAIT: Duration = Duration::from_secs(2);

pub fn group_key() -> SessionKey {
    SessionKey::from_bytes([0x42; 32])
}

pub fn key_provider() -> Arc<StaticKeyProvider> {
    Arc::new(StaticKeyProvider::new(group_key()))
}

/// Codec the relay-side test code uses to read and forge frames
pub fn relay_codec() -> CryptoCodec {
    CryptoCodec::new(&group_key())
}

/// Await `fut`, failing the test after [`WAIT`]
pub async fn within<F: Future>(fut: F) -> F::Output {
    timeout(WAIT, fut).await.expect("timed out")
}

/// Next event, failing the test after [`WAIT`]
pub async fn next_event<E>(events: &mut Subscription<E>) -> E {
    within(events.recv()).await.expect("event stream closed")
}

/// Skip events until one matches
pub async fn wait_for<E: std::fmt::Debug>(
    events: &mut Subscription<E>,
    mut matches: impl FnMut(&E) -> bool,
) -> E {
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}

/// Poll `condition` until it holds or [`WAIT`] passes
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Next binary frame the client sent, decrypted
pub async fn next_audio_frame(peer: &mut MemoryPeer, codec: &CryptoCodec) -> Vec<u8> {
    match within(peer.next_sent()).await {
        Some(Frame::Binary(data)) => codec.decrypt(&data).expect("frame should decrypt"),
        other => panic!("expected a binary frame, got {:?}", other),
    }
}

/// Backend whose microphone is a channel and whose speaker is a log
pub struct ScriptedBackend {
    frames: Receiver<Result<Vec<u8>, AudioError>>,
    played: Arc<Mutex<Vec<Vec<u8>>>>,
    volumes: Arc<Mutex<Vec<f32>>>,
    refuse_capture: AtomicBool,
    refuse_playback: AtomicBool,
}

/// Test-side handles to a [`ScriptedBackend`]
pub struct ScriptedAudio {
    pub backend: Arc<ScriptedBackend>,
    pub microphone: Sender<Result<Vec<u8>, AudioError>>,
    pub played: Arc<Mutex<Vec<Vec<u8>>>>,
    pub volumes: Arc<Mutex<Vec<f32>>>,
}

impl ScriptedAudio {
    pub fn new() -> Self {
        let (microphone, frames) = unbounded();
        let played = Arc::new(Mutex::new(Vec::new()));
        let volumes = Arc::new(Mutex::new(Vec::new()));
        let backend = Arc::new(ScriptedBackend {
            frames,
            played: Arc::clone(&played),
            volumes: Arc::clone(&volumes),
            refuse_capture: AtomicBool::new(false),
            refuse_playback: AtomicBool::new(false),
        });
        Self {
            backend,
            microphone,
            played,
            volumes,
        }
    }

    /// Queue one captured frame
    pub fn speak(&self, pcm: &[u8]) {
        self.microphone.send(Ok(pcm.to_vec())).expect("capture channel open");
    }

    pub fn played(&self) -> Vec<Vec<u8>> {
        self.played.lock().clone()
    }
}

impl ScriptedBackend {
    pub fn refuse_capture(&self, refuse: bool) {
        self.refuse_capture.store(refuse, Ordering::SeqCst);
    }

    pub fn refuse_playback(&self, refuse: bool) {
        self.refuse_playback.store(refuse, Ordering::SeqCst);
    }
}

impl AudioBackend for ScriptedBackend {
    fn open_capture(&self, _config: &AudioConfig) -> Result<Box<dyn CaptureSource>, AudioError> {
        if self.refuse_capture.load(Ordering::SeqCst) {
            return Err(AudioError::Capture("microphone permission denied".to_string()));
        }
        Ok(Box::new(ScriptedCapture {
            frames: self.frames.clone(),
        }))
    }

    fn open_playback(&self, _config: &AudioConfig) -> Result<Box<dyn PlaybackSink>, AudioError> {
        if self.refuse_playback.load(Ordering::SeqCst) {
            return Err(AudioError::Playback("no output device".to_string()));
        }
        Ok(Box::new(ScriptedPlayback {
            played: Arc::clone(&self.played),
            volumes: Arc::clone(&self.volumes),
        }))
    }
}

struct ScriptedCapture {
    frames: Receiver<Result<Vec<u8>, AudioError>>,
}

impl CaptureSource for ScriptedCapture {
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, AudioError> {
        match self.frames.recv_timeout(Duration::from_millis(5)) {
            Ok(Ok(pcm)) => {
                let len = pcm.len().min(buf.len());
                buf[..len].copy_from_slice(&pcm[..len]);
                Ok(len)
            }
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => {
                std::thread::sleep(Duration::from_millis(5));
                Ok(0)
            }
        }
    }
}

struct ScriptedPlayback {
    played: Arc<Mutex<Vec<Vec<u8>>>>,
    volumes: Arc<Mutex<Vec<f32>>>,
}

impl PlaybackSink for ScriptedPlayback {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        self.played.lock().push(pcm.to_vec());
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) {
        self.volumes.lock().push(volume);
    }
}
