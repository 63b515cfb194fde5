//! Distance → proximity level, with single-fire transition events
//!
//! A peer's stored level only changes when the freshly computed level
//! differs, and only that change produces an event. Recomputing with an
//! unchanged distance is silent no matter how often it happens.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ProximityConfig;
use crate::error::ConfigError;
use crate::proximity::geo::GeoPoint;
use crate::proximity::registry::PeerPosition;

/// Distance buckets, nearest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProximityLevel {
    Near,
    Medium,
    Far,
    OutOfRange,
}

impl fmt::Display for ProximityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProximityLevel::Near => "near",
            ProximityLevel::Medium => "medium",
            ProximityLevel::Far => "far",
            ProximityLevel::OutOfRange => "out of range",
        };
        f.write_str(name)
    }
}

/// Upper bounds (inclusive, meters) of the Near, Medium and Far buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProximityThresholds {
    near_m: u32,
    medium_m: u32,
    far_m: u32,
}

impl ProximityThresholds {
    /// Requires `near < medium < far`
    pub fn new(near_m: u32, medium_m: u32, far_m: u32) -> Result<Self, ConfigError> {
        if near_m >= medium_m || medium_m >= far_m {
            return Err(ConfigError::Invalid(format!(
                "proximity thresholds must increase: near={} medium={} far={}",
                near_m, medium_m, far_m
            )));
        }
        Ok(Self {
            near_m,
            medium_m,
            far_m,
        })
    }

    pub fn near_m(&self) -> u32 {
        self.near_m
    }

    pub fn medium_m(&self) -> u32 {
        self.medium_m
    }

    pub fn far_m(&self) -> u32 {
        self.far_m
    }

    /// Smallest bucket whose bound is >= `distance_m`
    pub fn classify(&self, distance_m: f64) -> ProximityLevel {
        if distance_m <= self.near_m as f64 {
            ProximityLevel::Near
        } else if distance_m <= self.medium_m as f64 {
            ProximityLevel::Medium
        } else if distance_m <= self.far_m as f64 {
            ProximityLevel::Far
        } else {
            ProximityLevel::OutOfRange
        }
    }
}

impl Default for ProximityThresholds {
    fn default() -> Self {
        use crate::constants::{DEFAULT_FAR_M, DEFAULT_MEDIUM_M, DEFAULT_NEAR_M};
        Self {
            near_m: DEFAULT_NEAR_M,
            medium_m: DEFAULT_MEDIUM_M,
            far_m: DEFAULT_FAR_M,
        }
    }
}

/// Something listeners should hear about
#[derive(Debug, Clone, PartialEq)]
pub enum ProximityEvent {
    /// Peer moved into a different bucket
    LevelChanged {
        peer: PeerPosition,
        distance_m: f64,
        level: ProximityLevel,
    },
    /// Peer moved inside the alert radius
    EnteredRadius { peer: PeerPosition, distance_m: f64 },
}

/// Classification rules plus notification settings
#[derive(Debug, Clone)]
pub struct ProximityEngine {
    thresholds: ProximityThresholds,
    alert_threshold_m: u32,
    notifications_enabled: bool,
}

impl ProximityEngine {
    pub fn new(
        thresholds: ProximityThresholds,
        alert_threshold_m: u32,
        notifications_enabled: bool,
    ) -> Self {
        Self {
            thresholds,
            alert_threshold_m,
            notifications_enabled,
        }
    }

    pub fn from_config(config: &ProximityConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.thresholds()?,
            config.alert_threshold_m,
            config.notifications_enabled,
        ))
    }

    pub fn thresholds(&self) -> ProximityThresholds {
        self.thresholds
    }

    pub fn set_thresholds(&mut self, thresholds: ProximityThresholds) {
        self.thresholds = thresholds;
    }

    pub fn alert_threshold_m(&self) -> u32 {
        self.alert_threshold_m
    }

    pub fn set_alert_threshold(&mut self, meters: u32) {
        self.alert_threshold_m = meters;
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notifications_enabled
    }

    pub fn set_notifications_enabled(&mut self, enabled: bool) {
        self.notifications_enabled = enabled;
    }

    pub fn classify(&self, distance_m: f64) -> ProximityLevel {
        self.thresholds.classify(distance_m)
    }

    /// Recompute one peer against `origin`.
    ///
    /// Does nothing while `origin` is unknown; stored levels are kept as-is.
    pub fn evaluate(&self, origin: Option<&GeoPoint>, peer: &mut PeerPosition) -> Vec<ProximityEvent> {
        let origin = match origin {
            Some(origin) => origin,
            None => return Vec::new(),
        };

        let distance_m = origin.distance_to(&peer.point);
        peer.distance_m = Some(distance_m);

        let mut events = Vec::new();

        let level = self.classify(distance_m);
        if level != peer.level {
            peer.level = level;
            if self.notifications_enabled {
                events.push(ProximityEvent::LevelChanged {
                    peer: peer.clone(),
                    distance_m,
                    level,
                });
            }
        }

        let inside = distance_m <= self.alert_threshold_m as f64;
        if inside != peer.in_alert_radius {
            peer.in_alert_radius = inside;
            if inside && self.notifications_enabled {
                events.push(ProximityEvent::EnteredRadius {
                    peer: peer.clone(),
                    distance_m,
                });
            }
        }

        events
    }
}
