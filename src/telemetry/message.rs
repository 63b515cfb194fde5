//! Telemetry wire payload
//!
//! `{"id", "name", "latitude", "longitude"}` as JSON, sealed with the
//! session codec and carried base64-encoded in a text frame.

use serde::{Deserialize, Serialize};

use crate::crypto::CryptoCodec;
use crate::error::TelemetryError;
use crate::identity::Identity;
use crate::proximity::GeoPoint;

/// One position report from a group member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMessage {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl TelemetryMessage {
    /// Report for `identity` at `point`
    pub fn new(identity: &Identity, point: GeoPoint) -> Self {
        Self {
            id: identity.peer_id.clone(),
            name: identity.display_name.clone(),
            latitude: point.latitude,
            longitude: point.longitude,
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    pub fn to_json(&self) -> Result<String, TelemetryError> {
        serde_json::to_string(self).map_err(|e| TelemetryError::Parse(e.to_string()))
    }

    /// Parse and validate a plaintext payload
    pub fn from_json(payload: &[u8]) -> Result<Self, TelemetryError> {
        let message: TelemetryMessage =
            serde_json::from_slice(payload).map_err(|e| TelemetryError::Parse(e.to_string()))?;

        if message.id.is_empty() {
            return Err(TelemetryError::Parse("empty peer id".to_string()));
        }
        if !message.point().is_valid() {
            return Err(TelemetryError::Parse(format!(
                "coordinates out of range: {}, {}",
                message.latitude, message.longitude
            )));
        }
        Ok(message)
    }

    /// Encrypt into the text-frame encoding
    pub fn seal(&self, codec: &CryptoCodec) -> Result<String, TelemetryError> {
        let json = self.to_json()?;
        Ok(codec.encrypt_text(json.as_bytes())?)
    }

    /// Decrypt and parse a text frame
    pub fn open(text: &str, codec: &CryptoCodec) -> Result<Self, TelemetryError> {
        let plaintext = codec.decrypt_text(text.trim())?;
        Self::from_json(&plaintext)
    }
}
