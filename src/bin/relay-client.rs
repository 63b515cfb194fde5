//! Relay Client Application
//!
//! Connects the audio and telemetry sessions to the configured relay and
//! logs everything they report until Ctrl-C.
//!
//! Usage: `relay-client [CONFIG] [LATITUDE LONGITUDE]`
//!
//! The group key is read base64-encoded from `PROXIMITY_RELAY_KEY`.

use anyhow::{Context, Result};
use base64::Engine as _;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use proximity_relay::{
    audio::{AudioEvent, AudioSession, SilenceBackend},
    config::AppConfig,
    connection::WebSocketTransport,
    crypto::{SessionKey, StaticKeyProvider},
    identity::{Identity, StaticIdentity},
    proximity::{GeoPoint, ProximityEngine},
    telemetry::{
        FixedPositionSource, ManualPositionSource, PositionSource, TelemetryDeps,
        TelemetryEvent, TelemetrySession,
    },
};

const KEY_ENV: &str = "PROXIMITY_RELAY_KEY";

fn load_key() -> Result<StaticKeyProvider> {
    match std::env::var(KEY_ENV) {
        Ok(encoded) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .with_context(|| format!("{} is not valid base64", KEY_ENV))?;
            let key = SessionKey::from_slice(&bytes)?;
            Ok(StaticKeyProvider::new(key))
        }
        Err(_) => {
            tracing::warn!("{} not set, using a random key no peer will share", KEY_ENV);
            Ok(StaticKeyProvider::random()?)
        }
    }
}

fn parse_position(args: &[String]) -> Result<Option<GeoPoint>> {
    match (args.get(2), args.get(3)) {
        (Some(lat), Some(lon)) => {
            let point = GeoPoint::new(
                lat.parse().context("Invalid latitude")?,
                lon.parse().context("Invalid longitude")?,
            );
            anyhow::ensure!(point.is_valid(), "Position out of range");
            Ok(Some(point))
        }
        _ => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Proximity Relay client");

    let args: Vec<String> = std::env::args().collect();
    let config_path = args.get(1).map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref())?;
    let position = parse_position(&args)?;

    let keys = Arc::new(load_key()?);
    let user = std::env::var("USER").unwrap_or_else(|_| "relay-client".into());
    let identity = Identity::new(Uuid::new_v4().to_string(), user);
    tracing::info!("Peer id {} ({})", identity.peer_id, identity.display_name);

    let transport = Arc::new(WebSocketTransport::new());

    let audio = AudioSession::new(
        config.audio.clone(),
        config.privacy,
        transport.clone(),
        keys.clone(),
        Arc::new(SilenceBackend),
    );

    let source: Arc<dyn PositionSource> = match position {
        Some(point) => Arc::new(FixedPositionSource::new(point)),
        None => ManualPositionSource::new(),
    };
    let telemetry = TelemetrySession::new(
        TelemetryDeps {
            transport,
            keys,
            identity: Arc::new(StaticIdentity(identity)),
            source,
        },
        ProximityEngine::from_config(&config.proximity)?,
        config.telemetry.clone(),
        config.privacy,
    );

    let mut audio_events = audio.subscribe();
    let mut telemetry_events = telemetry.subscribe();

    if position.is_some() {
        telemetry.start_tracking()?;
    }

    audio
        .connect(&config.relay.audio_endpoint)
        .await
        .context("Audio connection failed")?;
    telemetry
        .connect(&config.relay.telemetry_endpoint)
        .await
        .context("Telemetry connection failed")?;

    println!("\n=== Proximity Relay ===");
    println!("  Audio:     {}", config.relay.audio_endpoint);
    println!("  Telemetry: {}", config.relay.telemetry_endpoint);
    println!("\nPress Ctrl+C to stop...\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(event) = audio_events.recv() => match event {
                AudioEvent::ConnectionStateChanged(false) => {
                    tracing::warn!("Audio connection lost");
                    break;
                }
                AudioEvent::PipelineFailed(e) => tracing::error!("Audio pipeline: {}", e),
                AudioEvent::FrameRejected(e) => tracing::debug!("Audio frame rejected: {}", e),
                other => tracing::debug!("Audio: {:?}", other),
            },
            Some(event) = telemetry_events.recv() => match event {
                TelemetryEvent::ConnectionStateChanged(false) => {
                    tracing::warn!("Telemetry connection lost");
                    break;
                }
                TelemetryEvent::ProximityChanged { peer, distance_m, level } => {
                    println!("  {} is {} ({:.0} m)", peer.display_name, level, distance_m);
                }
                TelemetryEvent::PeerEnteredRadius { peer, distance_m } => {
                    println!("  {} is within range ({:.0} m)", peer.display_name, distance_m);
                }
                TelemetryEvent::PeersChanged(peers) => {
                    tracing::info!("{} peer(s) known", peers.len());
                }
                other => tracing::debug!("Telemetry: {:?}", other),
            },
        }
    }

    tracing::info!("Shutting down...");
    telemetry.disconnect();
    audio.disconnect();

    let stats = audio.stats();
    tracing::info!(
        "Audio frames: {} played, {} rejected, {} dropped",
        stats.frames_played,
        stats.frames_rejected,
        stats.playback_overflows
    );

    Ok(())
}
