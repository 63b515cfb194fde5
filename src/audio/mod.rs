//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod playback;
pub mod session;
pub mod source;

pub use buffer::FrameQueue;
pub use capture::{CapturePipeline, CaptureStats};
pub use playback::PlaybackPipeline;
pub use session::{AudioControlState, AudioEvent, AudioSession, AudioStats};
pub use source::{AudioBackend, CaptureSource, PlaybackSink, SilenceBackend};
