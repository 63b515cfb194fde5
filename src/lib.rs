//! # Proximity Relay
//!
//! Encrypted real-time audio and location streaming between group members
//! through a relay, with peer proximity computed on the device.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                                  DEVICE                                    │
//! │                                                                            │
//! │  ┌──────────────┐  ┌──────────────┐           ┌──────────────────────┐     │
//! │  │ CaptureSource│  │ PlaybackSink │           │    PositionSource    │     │
//! │  └──────┬───────┘  └──────▲───────┘           └──────────┬───────────┘     │
//! │         │                 │                              │                 │
//! │  ┌──────▼─────────────────┴───────┐        ┌─────────────▼──────────────┐  │
//! │  │   Audio Session (audio)        │        │ Telemetry Session          │  │
//! │  │  ┌─────────┐    ┌───────────┐  │        │  (telemetry)               │  │
//! │  │  │ Capture │    │ Playback  │  │        │  ┌──────────────────────┐  │  │
//! │  │  │ Thread  │    │ Thread +  │  │        │  │ Peer Registry        │  │  │
//! │  │  │         │    │ FrameQueue│  │        │  │   + Proximity Engine │  │  │
//! │  │  └────┬────┘    └─────▲─────┘  │        │  └──────────────────────┘  │  │
//! │  └───────┼───────────────┼────────┘        └──────┬──────────────▲──────┘  │
//! │          │               │                        │              │         │
//! │  ┌───────▼───────────────┴────────────────────────▼──────────────┴──────┐  │
//! │  │              Crypto Codec (crypto) - AES-256-GCM                      │  │
//! │  │      Frames: [Nonce 12B | Ciphertext | Tag 16B]                       │  │
//! │  └───────┬───────────────▲────────────────────────┬──────────────▲──────┘  │
//! │          │ binary        │                        │ base64 text  │         │
//! │  ┌───────▼───────────────┴───────┐        ┌───────▼──────────────┴──────┐  │
//! │  │ SessionConnection "audio"     │        │ SessionConnection           │  │
//! │  │  (connection)                 │        │  "telemetry"                │  │
//! │  └───────────────┬───────────────┘        └──────────────┬──────────────┘  │
//! └──────────────────┼───────────────────────────────────────┼─────────────────┘
//!                    │ WebSocket                              │ WebSocket
//!                    ▼                                        ▼
//!             ┌─────────────────────────────────────────────────────┐
//!             │                       RELAY                          │
//!             └─────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod events;
pub mod identity;
pub mod proximity;
pub mod telemetry;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// AES-256 key length in bytes
    pub const KEY_LEN: usize = 32;

    /// GCM nonce length in bytes
    pub const NONCE_LEN: usize = 12;

    /// GCM authentication tag length in bytes
    pub const TAG_LEN: usize = 16;

    /// Mean Earth radius in meters
    pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

    /// Default capture/playback sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// 16-bit PCM
    pub const DEFAULT_BYTES_PER_SAMPLE: u16 = 2;

    /// Default frame size in milliseconds
    pub const DEFAULT_FRAME_DURATION_MS: u32 = 20;

    /// Decoded frames buffered ahead of playback
    pub const DEFAULT_PLAYBACK_QUEUE_FRAMES: usize = 64;

    /// Preferred interval between position fixes
    pub const DEFAULT_UPDATE_INTERVAL_MS: u64 = 10_000;

    /// Fastest interval the position source may deliver at
    pub const DEFAULT_FASTEST_UPDATE_INTERVAL_MS: u64 = 5_000;

    /// Upper bound of the Near bucket in meters
    pub const DEFAULT_NEAR_M: u32 = 100;

    /// Upper bound of the Medium bucket in meters
    pub const DEFAULT_MEDIUM_M: u32 = 300;

    /// Upper bound of the Far bucket in meters
    pub const DEFAULT_FAR_M: u32 = 1000;

    /// Default alert radius in meters
    pub const DEFAULT_ALERT_THRESHOLD_M: u32 = 300;
}
