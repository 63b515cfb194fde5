//! Encrypted position exchange and local proximity tracking
//!
//! Self fixes flow out as sealed text frames; peer fixes flow in, update the
//! registry and are classified by the proximity engine. Registry updates and
//! the recomputation they trigger happen under one lock, so nobody sees a
//! moved peer with a stale level.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};

use crate::config::{PrivacySettings, TelemetryConfig, TrackingCadence};
use crate::connection::{
    CloseReason, ConnectionObserver, SessionConnection, SessionState, Transport,
};
use crate::crypto::{CryptoCodec, KeyProvider};
use crate::error::{ConnError, TelemetryError};
use crate::events::{Listeners, Subscription};
use crate::identity::IdentityProvider;
use crate::proximity::{
    PeerPosition, PeerRegistry, Position, ProximityEngine, ProximityEvent, ProximityLevel,
    ProximityThresholds,
};
use crate::telemetry::message::TelemetryMessage;
use crate::telemetry::source::{PositionFeed, PositionReceiver, PositionSource};

/// Notifications from a [`TelemetrySession`]
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    ConnectionStateChanged(bool),
    TrackingStateChanged(bool),
    /// A self fix was accepted
    LocationChanged(Position),
    PeersChanged(Vec<PeerPosition>),
    ProximityChanged {
        peer: PeerPosition,
        distance_m: f64,
        level: ProximityLevel,
    },
    /// A peer moved inside the alert radius
    PeerEnteredRadius { peer: PeerPosition, distance_m: f64 },
    SettingsChanged {
        threshold_m: u32,
        notifications_enabled: bool,
    },
    /// The position source could not be started
    SourceFailed(TelemetryError),
    /// An inbound frame was dropped
    FrameRejected(TelemetryError),
}

impl From<ProximityEvent> for TelemetryEvent {
    fn from(event: ProximityEvent) -> Self {
        match event {
            ProximityEvent::LevelChanged {
                peer,
                distance_m,
                level,
            } => TelemetryEvent::ProximityChanged {
                peer,
                distance_m,
                level,
            },
            ProximityEvent::EnteredRadius { peer, distance_m } => {
                TelemetryEvent::PeerEnteredRadius { peer, distance_m }
            }
        }
    }
}

struct TelemetryState {
    registry: PeerRegistry,
    engine: ProximityEngine,
    self_position: Option<Position>,
    /// The user's tracking preference
    tracking_enabled: bool,
    /// Generation of the running source, if any
    active_generation: Option<u64>,
    next_generation: u64,
}

struct TelemetryInner {
    identity: Arc<dyn IdentityProvider>,
    keys: Arc<dyn KeyProvider>,
    source: Arc<dyn PositionSource>,
    cadence: TrackingCadence,
    privacy: PrivacySettings,
    connection: SessionConnection,
    codec: RwLock<Option<Arc<CryptoCodec>>>,
    state: Mutex<TelemetryState>,
    /// Serializes source start/stop
    tracking_control: Mutex<()>,
    events: Listeners<TelemetryEvent>,
    this: Weak<TelemetryInner>,
}

/// Collaborators a telemetry session is built from
pub struct TelemetryDeps {
    pub transport: Arc<dyn Transport>,
    pub keys: Arc<dyn KeyProvider>,
    pub identity: Arc<dyn IdentityProvider>,
    pub source: Arc<dyn PositionSource>,
}

/// Telemetry streaming session
pub struct TelemetrySession {
    inner: Arc<TelemetryInner>,
}

impl TelemetrySession {
    pub fn new(
        deps: TelemetryDeps,
        engine: ProximityEngine,
        config: TelemetryConfig,
        privacy: PrivacySettings,
    ) -> Self {
        let TelemetryDeps {
            transport,
            keys,
            identity,
            source,
        } = deps;

        let inner = Arc::new_cyclic(|this: &Weak<TelemetryInner>| TelemetryInner {
            identity,
            keys,
            source,
            cadence: config.cadence,
            privacy,
            connection: SessionConnection::new(
                "telemetry",
                transport,
                Arc::new(TelemetryObserver(this.clone())),
            ),
            codec: RwLock::new(None),
            state: Mutex::new(TelemetryState {
                registry: PeerRegistry::new(),
                engine,
                self_position: None,
                tracking_enabled: config.track_on_connect,
                active_generation: None,
                next_generation: 0,
            }),
            tracking_control: Mutex::new(()),
            events: Listeners::new(),
            this: this.clone(),
        });
        Self { inner }
    }

    /// Connect to the relay. Tracking starts on open unless it was turned off.
    pub async fn connect(&self, endpoint: &str) -> Result<(), ConnError> {
        if self.inner.connection.state() != SessionState::Disconnected {
            return Err(ConnError::AlreadyOpen);
        }

        let key = self
            .inner
            .keys
            .session_key()
            .map_err(|e| ConnError::Key(e.to_string()))?;
        *self.inner.codec.write() = Some(Arc::new(CryptoCodec::new(&key)));

        self.inner.connection.open(endpoint).await
    }

    /// Stop the position source and close the connection. Idempotent.
    ///
    /// The tracking preference survives; known peers do not.
    pub fn disconnect(&self) {
        self.inner.pause_tracking();
        self.inner.connection.close();
    }

    /// Request fixes from the position source
    pub fn start_tracking(&self) -> Result<(), TelemetryError> {
        let _control = self.inner.tracking_control.lock();
        self.inner.activate_source()?;

        let mut state = self.inner.state.lock();
        if !state.tracking_enabled {
            state.tracking_enabled = true;
            tracing::info!("Location tracking enabled");
            self.inner
                .events
                .emit(TelemetryEvent::TrackingStateChanged(true));
        }
        Ok(())
    }

    /// Stop requesting fixes and forget the self position.
    /// Known peers and their levels are kept.
    pub fn stop_tracking(&self) {
        let _control = self.inner.tracking_control.lock();
        let was_active = {
            let mut state = self.inner.state.lock();
            let was_active = state.active_generation.take().is_some();
            state.self_position = None;
            if state.tracking_enabled {
                state.tracking_enabled = false;
                tracing::info!("Location tracking disabled");
                self.inner
                    .events
                    .emit(TelemetryEvent::TrackingStateChanged(false));
            }
            was_active
        };
        if was_active {
            self.inner.source.stop();
        }
    }

    /// Radius for peer-entered alerts, in meters
    pub fn set_proximity_threshold(&self, meters: u32) {
        let mut state = self.inner.state.lock();
        if state.engine.alert_threshold_m() == meters {
            return;
        }
        state.engine.set_alert_threshold(meters);
        self.inner.emit_settings(&state.engine);
    }

    pub fn set_notifications_enabled(&self, enabled: bool) {
        let mut state = self.inner.state.lock();
        if state.engine.notifications_enabled() == enabled {
            return;
        }
        state.engine.set_notifications_enabled(enabled);
        self.inner.emit_settings(&state.engine);
    }

    /// Replace the level buckets; applies from the next recomputation
    pub fn set_proximity_thresholds(&self, thresholds: ProximityThresholds) {
        let mut state = self.inner.state.lock();
        tracing::debug!("Proximity buckets set to {:?}", thresholds);
        state.engine.set_thresholds(thresholds);
    }

    /// Forget a peer that left the group
    pub fn remove_peer(&self, peer_id: &str) -> bool {
        let mut state = self.inner.state.lock();
        if state.registry.remove(peer_id).is_none() {
            return false;
        }
        tracing::debug!("Peer {} removed", peer_id);
        self.inner
            .events
            .emit(TelemetryEvent::PeersChanged(state.registry.snapshot()));
        true
    }

    pub fn peers(&self) -> Vec<PeerPosition> {
        self.inner.state.lock().registry.snapshot()
    }

    pub fn peer(&self, peer_id: &str) -> Option<PeerPosition> {
        self.inner.state.lock().registry.get(peer_id).cloned()
    }

    pub fn self_position(&self) -> Option<Position> {
        self.inner.state.lock().self_position
    }

    pub fn is_tracking_enabled(&self) -> bool {
        self.inner.state.lock().tracking_enabled
    }

    pub fn proximity_threshold(&self) -> u32 {
        self.inner.state.lock().engine.alert_threshold_m()
    }

    pub fn notifications_enabled(&self) -> bool {
        self.inner.state.lock().engine.notifications_enabled()
    }

    pub fn proximity_thresholds(&self) -> ProximityThresholds {
        self.inner.state.lock().engine.thresholds()
    }

    pub fn state(&self) -> SessionState {
        self.inner.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    pub fn subscribe(&self) -> Subscription<TelemetryEvent> {
        self.inner.events.subscribe()
    }
}

impl Drop for TelemetrySession {
    fn drop(&mut self) {
        self.inner.pause_tracking();
        self.inner.connection.close();
    }
}

impl TelemetryInner {
    /// Start the source unless already running. Caller holds `tracking_control`.
    fn activate_source(&self) -> Result<(), TelemetryError> {
        let generation = {
            let mut state = self.state.lock();
            if state.active_generation.is_some() {
                return Ok(());
            }
            state.next_generation += 1;
            state.active_generation = Some(state.next_generation);
            state.next_generation
        };

        let receiver: Weak<dyn PositionReceiver> = self.this.clone();
        let feed = PositionFeed::new(receiver, generation);

        if let Err(e) = self.source.start(self.cadence, feed) {
            let mut state = self.state.lock();
            if state.active_generation == Some(generation) {
                state.active_generation = None;
            }
            tracing::error!("Failed to start position source: {}", e);
            return Err(e);
        }
        Ok(())
    }

    fn pause_tracking(&self) {
        let _control = self.tracking_control.lock();
        let was_active = self.state.lock().active_generation.take().is_some();
        if was_active {
            self.source.stop();
        }
    }

    fn resume_tracking(&self) {
        let _control = self.tracking_control.lock();
        if !self.state.lock().tracking_enabled {
            return;
        }
        if let Err(e) = self.activate_source() {
            self.events.emit(TelemetryEvent::SourceFailed(e));
        }
    }

    fn emit_settings(&self, engine: &ProximityEngine) {
        tracing::debug!(
            "Proximity settings: threshold={}m notifications={}",
            engine.alert_threshold_m(),
            engine.notifications_enabled()
        );
        self.events.emit(TelemetryEvent::SettingsChanged {
            threshold_m: engine.alert_threshold_m(),
            notifications_enabled: engine.notifications_enabled(),
        });
    }

    fn emit_proximity(&self, events: Vec<ProximityEvent>) {
        for event in events {
            if let ProximityEvent::LevelChanged {
                peer,
                distance_m,
                level,
            } = &event
            {
                tracing::info!(
                    "{} is now {} ({:.0}m)",
                    peer.display_name,
                    level,
                    distance_m
                );
            }
            self.events.emit(event.into());
        }
    }

    fn handle_self_position(&self, generation: u64, position: Position) {
        if !position.point.is_valid() {
            tracing::debug!("Ignoring invalid self fix {:?}", position.point);
            return;
        }

        let mut state = self.state.lock();
        if state.active_generation != Some(generation) {
            tracing::trace!("Ignoring fix from stopped source");
            return;
        }

        state.self_position = Some(position);
        self.events.emit(TelemetryEvent::LocationChanged(position));

        if self.privacy.location_sharing_enabled && self.connection.is_connected() {
            self.send_position(&position);
        }

        let TelemetryState {
            registry, engine, ..
        } = &mut *state;
        if registry.is_empty() {
            return;
        }

        let mut events = Vec::new();
        for peer in registry.iter_mut() {
            events.extend(engine.evaluate(Some(&position.point), peer));
        }
        self.events
            .emit(TelemetryEvent::PeersChanged(registry.snapshot()));
        self.emit_proximity(events);
    }

    fn send_position(&self, position: &Position) {
        let codec = match self.codec.read().clone() {
            Some(codec) => codec,
            None => return,
        };

        let message = TelemetryMessage::new(&self.identity.identity(), position.point);
        let sealed = match message.seal(&codec) {
            Ok(sealed) => sealed,
            Err(e) => {
                tracing::error!("Failed to seal position: {}", e);
                return;
            }
        };

        if let Err(e) = self.connection.send_text(sealed) {
            tracing::debug!("Position not sent: {}", e);
        }
    }

    fn handle_text(&self, text: String) {
        let codec = match self.codec.read().clone() {
            Some(codec) => codec,
            None => return,
        };

        let message = match TelemetryMessage::open(&text, &codec) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("Dropping inbound telemetry frame: {}", e);
                self.events.emit(TelemetryEvent::FrameRejected(e));
                return;
            }
        };

        if message.id == self.identity.identity().peer_id {
            return;
        }

        let mut state = self.state.lock();
        let origin = state.self_position.map(|position| position.point);
        let TelemetryState {
            registry, engine, ..
        } = &mut *state;

        let peer = registry.upsert(&message.id, &message.name, message.point(), Utc::now());
        let events = engine.evaluate(origin.as_ref(), peer);

        self.events
            .emit(TelemetryEvent::PeersChanged(registry.snapshot()));
        self.emit_proximity(events);
    }

    fn handle_disconnected(&self) {
        let mut state = self.state.lock();
        if !state.registry.is_empty() {
            state.registry.clear();
            self.events.emit(TelemetryEvent::PeersChanged(Vec::new()));
        }
        self.events
            .emit(TelemetryEvent::ConnectionStateChanged(false));
    }
}

impl PositionReceiver for TelemetryInner {
    fn on_position(&self, generation: u64, position: Position) {
        self.handle_self_position(generation, position);
    }
}

struct TelemetryObserver(Weak<TelemetryInner>);

impl ConnectionObserver for TelemetryObserver {
    fn on_open(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner
                .events
                .emit(TelemetryEvent::ConnectionStateChanged(true));
            inner.resume_tracking();
        }
    }

    fn on_binary_message(&self, data: bytes::Bytes) {
        tracing::debug!("Ignoring {} byte binary frame on telemetry connection", data.len());
    }

    fn on_text_message(&self, text: String) {
        if let Some(inner) = self.0.upgrade() {
            inner.handle_text(text);
        }
    }

    fn on_close(&self, reason: CloseReason) {
        tracing::info!("Telemetry session {}", reason);
        if let Some(inner) = self.0.upgrade() {
            inner.handle_disconnected();
        }
    }

    fn on_error(&self, cause: ConnError) {
        tracing::warn!("Telemetry session error: {}", cause);
        if let Some(inner) = self.0.upgrade() {
            inner.handle_disconnected();
        }
    }
}
