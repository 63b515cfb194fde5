//! Telemetry subsystem module

pub mod message;
pub mod session;
pub mod source;

pub use message::TelemetryMessage;
pub use session::{TelemetryDeps, TelemetryEvent, TelemetrySession};
pub use source::{FixedPositionSource, ManualPositionSource, PositionFeed, PositionSource};
