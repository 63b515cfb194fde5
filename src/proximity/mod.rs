//! Local proximity detection
//!
//! The registry holds what we know about peers, the engine turns distances
//! into levels and level changes into events.

pub mod engine;
pub mod geo;
pub mod registry;

pub use engine::{ProximityEngine, ProximityEvent, ProximityLevel, ProximityThresholds};
pub use geo::{haversine_m, GeoPoint, Position};
pub use registry::{PeerPosition, PeerRegistry, ProximitySample};
