//! Telemetry session end-to-end over the in-memory relay

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use proximity_relay::config::{PrivacySettings, TelemetryConfig};
use proximity_relay::connection::{Frame, MemoryPeer, MemoryRelay, MemoryTransport, SessionState};
use proximity_relay::identity::{Identity, StaticIdentity};
use proximity_relay::proximity::{GeoPoint, ProximityEngine, ProximityLevel, ProximityThresholds};
use proximity_relay::telemetry::{
    ManualPositionSource, TelemetryDeps, TelemetryEvent, TelemetryMessage, TelemetrySession,
};

const ENDPOINT: &str = "mem://relay/location";

const SELF_SF: (f64, f64) = (37.7749, -122.4194);
const PEER_SF: (f64, f64) = (37.7749, -122.4204);

struct Harness {
    session: TelemetrySession,
    relay: MemoryRelay,
    transport: Arc<MemoryTransport>,
    source: Arc<ManualPositionSource>,
}

fn harness(privacy: PrivacySettings) -> Harness {
    let (transport, relay) = MemoryTransport::new();
    let source = ManualPositionSource::new();
    let session = TelemetrySession::new(
        TelemetryDeps {
            transport: transport.clone(),
            keys: key_provider(),
            identity: Arc::new(StaticIdentity(Identity::new("self-id", "Me"))),
            source: source.clone(),
        },
        ProximityEngine::new(ProximityThresholds::default(), 50, true),
        TelemetryConfig::default(),
        privacy,
    );
    Harness {
        session,
        relay,
        transport,
        source,
    }
}

async fn connected(h: &mut Harness) -> MemoryPeer {
    h.session.connect(ENDPOINT).await.unwrap();
    within(h.relay.accept()).await.unwrap()
}

fn peer_report(id: &str, name: &str, (lat, lon): (f64, f64)) -> Frame {
    let message = TelemetryMessage {
        id: id.to_string(),
        name: name.to_string(),
        latitude: lat,
        longitude: lon,
    };
    Frame::Text(message.seal(&relay_codec()).unwrap())
}

fn proximity_changes(events: &[TelemetryEvent]) -> Vec<(String, ProximityLevel)> {
    events
        .iter()
        .filter_map(|e| match e {
            TelemetryEvent::ProximityChanged { peer, level, .. } => {
                Some((peer.peer_id.clone(), *level))
            }
            _ => None,
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_nearby_peer_fires_single_near_event() {
    let mut h = harness(PrivacySettings::default());
    h.session.start_tracking().unwrap();
    let peer = connected(&mut h).await;
    let mut events = h.session.subscribe();

    assert!(h.source.push_point(SELF_SF.0, SELF_SF.1));
    peer.push(peer_report("alice", "Alice", PEER_SF));

    let changed = wait_for(&mut events, |e| {
        matches!(e, TelemetryEvent::ProximityChanged { .. })
    })
    .await;
    match changed {
        TelemetryEvent::ProximityChanged {
            peer,
            distance_m,
            level,
        } => {
            assert_eq!(peer.peer_id, "alice");
            assert_eq!(level, ProximityLevel::Near);
            assert!((distance_m - 88.0).abs() < 3.0, "distance {}", distance_m);
        }
        _ => unreachable!(),
    }

    // Same position again: registry updates, no new level event
    peer.push(peer_report("alice", "Alice", PEER_SF));
    wait_for(&mut events, |e| matches!(e, TelemetryEvent::PeersChanged(_))).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(proximity_changes(&events.drain()).is_empty());

    let alice = h.session.peer("alice").unwrap();
    assert_eq!(alice.level, ProximityLevel::Near);

    h.session.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_peer_walking_away_crosses_each_bucket_once() {
    let mut h = harness(PrivacySettings::default());
    h.session.start_tracking().unwrap();
    let peer = connected(&mut h).await;
    let mut events = h.session.subscribe();

    h.source.push_point(0.0, 0.0);
    // ~1.1m per 0.00001 degree of longitude at the equator
    for lon in [0.0005, 0.0006, 0.002, 0.0021, 0.005, 0.02, 0.03] {
        peer.push(peer_report("bob", "Bob", (0.0, lon)));
    }

    assert!(eventually(|| h.session.peer("bob").map(|p| p.point.longitude) == Some(0.03)).await);
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(
        proximity_changes(&events.drain()),
        vec![
            ("bob".to_string(), ProximityLevel::Near),
            ("bob".to_string(), ProximityLevel::Medium),
            ("bob".to_string(), ProximityLevel::Far),
            ("bob".to_string(), ProximityLevel::OutOfRange),
        ]
    );

    h.session.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_alert_radius_event() {
    let mut h = harness(PrivacySettings::default());
    h.session.start_tracking().unwrap();
    let peer = connected(&mut h).await;
    let mut events = h.session.subscribe();

    h.source.push_point(0.0, 0.0);
    peer.push(peer_report("cy", "Cy", (0.0, 0.0002)));

    let entered = wait_for(&mut events, |e| {
        matches!(e, TelemetryEvent::PeerEnteredRadius { .. })
    })
    .await;
    assert!(matches!(
        entered,
        TelemetryEvent::PeerEnteredRadius { ref peer, distance_m } if peer.peer_id == "cy" && distance_m < 50.0
    ));

    h.session.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_self_position_sent_sealed() {
    let mut h = harness(PrivacySettings::default());
    h.session.start_tracking().unwrap();
    let mut peer = connected(&mut h).await;
    let mut events = h.session.subscribe();

    h.source.push_point(SELF_SF.0, SELF_SF.1);

    let located = next_event(&mut events).await;
    assert!(matches!(
        located,
        TelemetryEvent::LocationChanged(p) if p.point == GeoPoint::new(SELF_SF.0, SELF_SF.1)
    ));

    let text = match within(peer.next_sent()).await {
        Some(Frame::Text(text)) => text,
        other => panic!("expected text frame, got {:?}", other),
    };
    assert!(!text.contains("self-id"));

    let message = TelemetryMessage::open(&text, &relay_codec()).unwrap();
    assert_eq!(message.id, "self-id");
    assert_eq!(message.name, "Me");
    assert_eq!(message.point(), GeoPoint::new(SELF_SF.0, SELF_SF.1));

    h.session.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_location_sharing_disabled_keeps_local_proximity() {
    let mut h = harness(PrivacySettings {
        location_sharing_enabled: false,
        ..PrivacySettings::default()
    });
    h.session.start_tracking().unwrap();
    let mut peer = connected(&mut h).await;
    let mut events = h.session.subscribe();

    h.source.push_point(SELF_SF.0, SELF_SF.1);
    peer.push(peer_report("alice", "Alice", PEER_SF));

    wait_for(&mut events, |e| {
        matches!(e, TelemetryEvent::ProximityChanged { .. })
    })
    .await;
    assert!(peer.try_sent().is_none());

    h.session.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_own_reports_are_ignored() {
    let mut h = harness(PrivacySettings::default());
    let peer = connected(&mut h).await;
    let mut events = h.session.subscribe();

    peer.push(peer_report("self-id", "Me", PEER_SF));
    peer.push(peer_report("dana", "Dana", PEER_SF));

    let changed = wait_for(&mut events, |e| matches!(e, TelemetryEvent::PeersChanged(_))).await;
    match changed {
        TelemetryEvent::PeersChanged(peers) => {
            let ids: Vec<_> = peers.iter().map(|p| p.peer_id.as_str()).collect();
            assert_eq!(ids, vec!["dana"]);
        }
        _ => unreachable!(),
    }
    assert!(h.session.peer("self-id").is_none());

    h.session.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_garbage_frames_are_dropped() {
    let mut h = harness(PrivacySettings::default());
    let peer = connected(&mut h).await;
    let mut events = h.session.subscribe();

    peer.push(Frame::Text("not base64 at all!".to_string()));
    let plaintext = relay_codec().encrypt_text(b"{\"id\":42}").unwrap();
    peer.push(Frame::Text(plaintext));
    peer.push(peer_report("erin", "Erin", PEER_SF));

    let mut rejected = 0;
    loop {
        match next_event(&mut events).await {
            TelemetryEvent::FrameRejected(_) => rejected += 1,
            TelemetryEvent::PeersChanged(peers) => {
                assert_eq!(peers.len(), 1);
                break;
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(rejected, 2);
    assert!(h.session.is_connected());

    h.session.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_peer_without_self_position_stays_out_of_range() {
    let mut h = harness(PrivacySettings::default());
    let peer = connected(&mut h).await;
    let mut events = h.session.subscribe();

    peer.push(peer_report("fay", "Fay", PEER_SF));
    wait_for(&mut events, |e| matches!(e, TelemetryEvent::PeersChanged(_))).await;

    let fay = h.session.peer("fay").unwrap();
    assert_eq!(fay.level, ProximityLevel::OutOfRange);
    assert!(fay.distance_m.is_none());
    assert!(proximity_changes(&events.drain()).is_empty());

    h.session.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_tracking_freezes_levels() {
    let mut h = harness(PrivacySettings::default());
    h.session.start_tracking().unwrap();
    let peer = connected(&mut h).await;
    let mut events = h.session.subscribe();

    h.source.push_point(SELF_SF.0, SELF_SF.1);
    peer.push(peer_report("gus", "Gus", PEER_SF));
    wait_for(&mut events, |e| {
        matches!(e, TelemetryEvent::ProximityChanged { .. })
    })
    .await;

    h.session.stop_tracking();
    assert!(!h.source.is_active());

    // Gus walks far away; without a self position nothing is recomputed
    peer.push(peer_report("gus", "Gus", (38.0, -122.0)));
    assert!(eventually(|| h.session.peer("gus").map(|p| p.point.latitude) == Some(38.0)).await);

    let gus = h.session.peer("gus").unwrap();
    assert_eq!(gus.level, ProximityLevel::Near);
    assert!(proximity_changes(&events.drain()).is_empty());

    h.session.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_notifications_disabled_updates_silently() {
    let mut h = harness(PrivacySettings::default());
    h.session.start_tracking().unwrap();
    let peer = connected(&mut h).await;
    h.session.set_notifications_enabled(false);
    let mut events = h.session.subscribe();

    h.source.push_point(SELF_SF.0, SELF_SF.1);
    peer.push(peer_report("hal", "Hal", PEER_SF));

    assert!(eventually(|| h.session.peer("hal").map(|p| p.level) == Some(ProximityLevel::Near)).await);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(proximity_changes(&events.drain()).is_empty());

    h.session.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_clears_peers_and_keeps_tracking_preference() {
    let mut h = harness(PrivacySettings::default());
    h.session.start_tracking().unwrap();
    let peer = connected(&mut h).await;
    let mut events = h.session.subscribe();

    peer.push(peer_report("ida", "Ida", PEER_SF));
    wait_for(&mut events, |e| matches!(e, TelemetryEvent::PeersChanged(_))).await;

    h.session.disconnect();
    assert_eq!(
        events.drain(),
        vec![
            TelemetryEvent::PeersChanged(Vec::new()),
            TelemetryEvent::ConnectionStateChanged(false),
        ]
    );
    assert!(h.session.peers().is_empty());
    assert!(h.session.is_tracking_enabled());
    assert!(!h.source.is_active());
    assert_eq!(h.session.state(), SessionState::Disconnected);

    // Tracking resumes with the connection
    let _peer = connected(&mut h).await;
    assert!(h.source.is_active());
    assert_eq!(h.source.start_count(), 2);
    assert_eq!(h.transport.connect_count(), 2);

    h.session.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remove_peer() {
    let mut h = harness(PrivacySettings::default());
    let peer = connected(&mut h).await;
    let mut events = h.session.subscribe();

    peer.push(peer_report("jo", "Jo", PEER_SF));
    wait_for(&mut events, |e| matches!(e, TelemetryEvent::PeersChanged(_))).await;

    assert!(h.session.remove_peer("jo"));
    assert!(!h.session.remove_peer("jo"));
    assert_eq!(next_event(&mut events).await, TelemetryEvent::PeersChanged(Vec::new()));

    h.session.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bucket_change_applies_on_next_recompute() {
    let mut h = harness(PrivacySettings::default());
    h.session.start_tracking().unwrap();
    let peer = connected(&mut h).await;
    let mut events = h.session.subscribe();

    h.source.push_point(SELF_SF.0, SELF_SF.1);
    peer.push(peer_report("kim", "Kim", PEER_SF));
    wait_for(&mut events, |e| {
        matches!(e, TelemetryEvent::ProximityChanged { .. })
    })
    .await;

    h.session
        .set_proximity_thresholds(ProximityThresholds::new(50, 300, 1000).unwrap());
    assert!(proximity_changes(&events.drain()).is_empty());

    peer.push(peer_report("kim", "Kim", PEER_SF));
    let changed = wait_for(&mut events, |e| {
        matches!(e, TelemetryEvent::ProximityChanged { .. })
    })
    .await;
    assert!(matches!(
        changed,
        TelemetryEvent::ProximityChanged { level: ProximityLevel::Medium, .. }
    ));

    h.session.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_starts_tracking_by_default() {
    let mut h = harness(PrivacySettings::default());
    assert!(h.session.is_tracking_enabled());
    assert!(!h.source.is_active());

    let mut peer = connected(&mut h).await;
    assert!(h.source.is_active());
    assert_eq!(h.source.start_count(), 1);

    assert!(h.source.push_point(37.0, -122.0));
    let text = match within(peer.next_sent()).await {
        Some(Frame::Text(text)) => text,
        other => panic!("expected text frame, got {:?}", other),
    };
    let message = TelemetryMessage::open(&text, &relay_codec()).unwrap();
    assert_eq!(message.point(), GeoPoint::new(37.0, -122.0));

    h.session.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stopped_tracking_stays_off_across_reconnects() {
    let mut h = harness(PrivacySettings::default());
    let _peer = connected(&mut h).await;
    assert!(h.source.is_active());

    h.session.stop_tracking();
    h.session.disconnect();

    let _peer = connected(&mut h).await;
    assert!(!h.session.is_tracking_enabled());
    assert!(!h.source.is_active());
    assert_eq!(h.source.start_count(), 1);

    h.session.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_failure_disconnects_once() {
    let mut h = harness(PrivacySettings::default());
    let mut peer = connected(&mut h).await;
    let mut events = h.session.subscribe();

    peer.push(peer_report("lee", "Lee", PEER_SF));
    wait_for(&mut events, |e| matches!(e, TelemetryEvent::PeersChanged(_))).await;

    peer.break_writes();
    assert!(h.source.push_point(SELF_SF.0, SELF_SF.1));

    wait_for(&mut events, |e| *e == TelemetryEvent::ConnectionStateChanged(false)).await;
    assert_eq!(h.session.state(), SessionState::Disconnected);
    assert!(h.session.peers().is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!events
        .drain()
        .iter()
        .any(|e| matches!(e, TelemetryEvent::ConnectionStateChanged(_))));

    // The source keeps running; fixes stay local until the next connect
    assert!(h.source.is_active());
    assert!(h.source.push_point(SELF_SF.0 + 0.001, SELF_SF.1));
    assert_eq!(
        h.session.self_position().map(|p| p.point),
        Some(GeoPoint::new(SELF_SF.0 + 0.001, SELF_SF.1))
    );
    assert!(peer.try_sent().is_none());

    h.session.disconnect();
    assert!(!h.source.is_active());
}
