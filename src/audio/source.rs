//! Hardware boundary: capture sources and playback sinks
//!
//! Platform glue implements [`AudioBackend`]; the session only ever sees
//! opaque PCM bytes.

use std::thread;

use crate::config::AudioConfig;
use crate::error::AudioError;

/// Opens capture/playback endpoints for a session
pub trait AudioBackend: Send + Sync {
    fn open_capture(&self, config: &AudioConfig) -> Result<Box<dyn CaptureSource>, AudioError>;
    fn open_playback(&self, config: &AudioConfig) -> Result<Box<dyn PlaybackSink>, AudioError>;
}

/// Microphone side
pub trait CaptureSource: Send {
    /// Begin capturing. An error here leaves the capture pipeline inactive.
    fn start(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    /// Fill `buf` with the next frame, blocking for at most about one frame
    /// period. `Ok(0)` means nothing was captured this cycle.
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, AudioError>;

    fn stop(&mut self) {}
}

/// Speaker side
pub trait PlaybackSink: Send {
    fn start(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError>;

    /// Linear gain in `[0, 1]`
    fn set_volume(&mut self, _volume: f32) {}

    fn stop(&mut self) {}
}

/// Backend producing silent frames at the configured cadence and discarding
/// playback. Stands in when no platform audio is wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilenceBackend;

impl AudioBackend for SilenceBackend {
    fn open_capture(&self, config: &AudioConfig) -> Result<Box<dyn CaptureSource>, AudioError> {
        Ok(Box::new(SilentCapture {
            config: config.clone(),
        }))
    }

    fn open_playback(&self, _config: &AudioConfig) -> Result<Box<dyn PlaybackSink>, AudioError> {
        Ok(Box::new(DiscardPlayback))
    }
}

struct SilentCapture {
    config: AudioConfig,
}

impl CaptureSource for SilentCapture {
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, AudioError> {
        thread::sleep(self.config.frame_duration());
        let len = buf.len().min(self.config.frame_bytes());
        buf[..len].fill(0);
        Ok(len)
    }
}

struct DiscardPlayback;

impl PlaybackSink for DiscardPlayback {
    fn write(&mut self, _pcm: &[u8]) -> Result<(), AudioError> {
        Ok(())
    }
}
