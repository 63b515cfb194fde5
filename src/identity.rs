//! Local identity used to tag outbound telemetry

/// Who this device is within the group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub peer_id: String,
    pub display_name: String,
}

impl Identity {
    pub fn new(peer_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Supplies the signed-in user's identity
pub trait IdentityProvider: Send + Sync {
    fn identity(&self) -> Identity;
}

/// Provider returning one fixed identity
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub Identity);

impl IdentityProvider for StaticIdentity {
    fn identity(&self) -> Identity {
        self.0.clone()
    }
}
