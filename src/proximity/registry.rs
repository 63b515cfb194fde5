//! Last-known state of every peer in the group

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::proximity::engine::ProximityLevel;
use crate::proximity::geo::GeoPoint;

/// One peer as seen from this device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerPosition {
    pub peer_id: String,
    pub display_name: String,
    pub point: GeoPoint,
    pub last_update: DateTime<Utc>,
    /// Distance from self at the last recomputation
    pub distance_m: Option<f64>,
    pub level: ProximityLevel,
    #[serde(skip)]
    pub(crate) in_alert_radius: bool,
}

impl PeerPosition {
    /// New peers start out of range until a distance is computed
    pub fn new(
        peer_id: impl Into<String>,
        display_name: impl Into<String>,
        point: GeoPoint,
        last_update: DateTime<Utc>,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            display_name: display_name.into(),
            point,
            last_update,
            distance_m: None,
            level: ProximityLevel::OutOfRange,
            in_alert_radius: false,
        }
    }

    /// Current distance/level pair, once one has been computed
    pub fn sample(&self) -> Option<ProximitySample> {
        self.distance_m.map(|distance_m| ProximitySample {
            peer_id: self.peer_id.clone(),
            distance_m,
            level: self.level,
        })
    }
}

/// Derived distance and level for one peer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProximitySample {
    pub peer_id: String,
    pub distance_m: f64,
    pub level: ProximityLevel,
}

/// Peers keyed by id, iterated in id order
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: BTreeMap<String, PeerPosition>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or move a peer. Level and distance of an existing entry are
    /// kept so the next recomputation can detect a transition.
    pub fn upsert(
        &mut self,
        peer_id: &str,
        display_name: &str,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> &mut PeerPosition {
        let entry = self
            .peers
            .entry(peer_id.to_string())
            .or_insert_with(|| PeerPosition::new(peer_id, display_name, point, at));
        entry.display_name = display_name.to_string();
        entry.point = point;
        entry.last_update = at;
        entry
    }

    pub fn get(&self, peer_id: &str) -> Option<&PeerPosition> {
        self.peers.get(peer_id)
    }

    pub fn remove(&mut self, peer_id: &str) -> Option<PeerPosition> {
        self.peers.remove(peer_id)
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerPosition> {
        self.peers.values_mut()
    }

    /// Copy of every entry, for listeners
    pub fn snapshot(&self) -> Vec<PeerPosition> {
        self.peers.values().cloned().collect()
    }
}
