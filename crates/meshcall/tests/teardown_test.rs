//! Peer isolation, stale callbacks, remote streams and renegotiation

mod harness;

use harness::{id, Call, ManagerHarness};
use meshcall::media::{LocalTrack, RemoteTrack, TrackKind};
use meshcall::peer::{ConnectivityState, PeerState};
use meshcall::signaling::Payload;
use meshcall::{Error, SessionEvent};

/// Answer an offer from `remote` and report connectivity
async fn connected_to(harness: &mut ManagerHarness, remote: &str) {
    harness
        .offer_from(remote, &format!("offer from {remote}"))
        .await
        .unwrap();
    harness.peer(remote).connectivity(ConnectivityState::Connected);
    harness.pump().await;
    assert_eq!(harness.state(remote), Some(PeerState::Connected));
}

#[tokio::test]
async fn test_connectivity_failure_isolated_to_one_peer() {
    harness::init_tracing();
    let mut alice = ManagerHarness::new("alice");
    connected_to(&mut alice, "bob").await;
    connected_to(&mut alice, "carol").await;
    alice.observed();

    alice.peer("bob").connectivity(ConnectivityState::Failed);
    let results = alice.pump().await;
    assert_eq!(results.len(), 1);
    assert!(matches!(
        results[0],
        Err(Error::ConnectivityFailure(ref who)) if *who == id("bob")
    ));

    assert!(!alice.manager.contains(&id("bob")));
    assert!(alice.peer("bob").is_closed());
    assert_eq!(alice.state("carol"), Some(PeerState::Connected));
    assert!(!alice.peer("carol").is_closed());

    assert!(alice.observed().contains(&SessionEvent::PeerStateChanged {
        participant: id("bob"),
        from: PeerState::Connected,
        to: PeerState::Failed,
    }));
}

#[tokio::test]
async fn test_transient_disconnect_recovers() {
    let mut alice = ManagerHarness::new("alice");
    connected_to(&mut alice, "bob").await;
    let bob = alice.peer("bob");

    bob.connectivity(ConnectivityState::Disconnected);
    alice.pump().await;
    assert_eq!(alice.state("bob"), Some(PeerState::Disconnected));

    bob.connectivity(ConnectivityState::Connected);
    alice.pump().await;
    assert_eq!(alice.state("bob"), Some(PeerState::Connected));
    assert!(!bob.is_closed());
}

#[tokio::test]
async fn test_disconnect_during_offer_keeps_offer_state() {
    let mut alice = ManagerHarness::new("alice");
    alice.manager.initiate(&id("bob")).await.unwrap();

    alice.peer("bob").connectivity(ConnectivityState::Disconnected);
    alice.pump().await;
    assert_eq!(alice.state("bob"), Some(PeerState::OfferSent));

    // The answer lands while connectivity is still down
    alice.answer_from("bob", "answer").await.unwrap();
    assert_eq!(alice.state("bob"), Some(PeerState::Disconnected));
}

#[tokio::test]
async fn test_stale_callbacks_discarded_after_recreate() {
    let mut alice = ManagerHarness::new("alice");
    alice.manager.initiate(&id("bob")).await.unwrap();
    let first = alice.manager.generation_of(&id("bob")).unwrap();

    assert!(alice.manager.close_peer(&id("bob")).await);
    assert!(!alice.manager.close_peer(&id("bob")).await);

    // Callback from the closed record before anything replaced it
    let old = alice.peer("bob");
    old.connectivity(ConnectivityState::Connected);
    for result in alice.pump().await {
        result.unwrap();
    }
    assert!(!alice.manager.contains(&id("bob")));

    alice.manager.initiate(&id("bob")).await.unwrap();
    let second = alice.manager.generation_of(&id("bob")).unwrap();
    assert!(second > first);

    // The old backend reports again: ignored
    old.connectivity(ConnectivityState::Failed);
    old.gather("stale candidate");
    alice.sent();
    for result in alice.pump().await {
        result.unwrap();
    }
    assert_eq!(alice.state("bob"), Some(PeerState::OfferSent));
    assert!(alice.sent().is_empty());
    assert_eq!(alice.connector.incarnations("bob").len(), 2);
}

#[tokio::test]
async fn test_remote_tracks_published_and_removed() {
    let mut alice = ManagerHarness::new("alice");
    connected_to(&mut alice, "bob").await;
    let mut streams = alice.registry.subscribe();

    let bob = alice.peer("bob");
    bob.receive_track(RemoteTrack::new("bob-audio", TrackKind::Audio, "bob-stream"));
    bob.receive_track(RemoteTrack::new("bob-video", TrackKind::Video, "bob-stream"));
    // Same track again: no change
    bob.receive_track(RemoteTrack::new("bob-video", TrackKind::Video, "bob-stream"));
    alice.pump().await;

    assert!(streams.has_changed().unwrap());
    let stream = alice.registry.get(&id("bob")).unwrap();
    assert_eq!(stream.tracks().len(), 2);
    assert!(stream.track(TrackKind::Video).is_some());

    alice.manager.close_peer(&id("bob")).await;
    assert!(!alice.registry.contains(&id("bob")));
    assert!(bob.is_closed());
    assert_eq!(bob.count(&Call::Close), 1);
}

#[tokio::test]
async fn test_close_all_releases_everything() {
    let mut alice = ManagerHarness::new("alice");
    connected_to(&mut alice, "bob").await;
    alice.manager.initiate(&id("carol")).await.unwrap();
    alice
        .peer("bob")
        .receive_track(RemoteTrack::new("t", TrackKind::Audio, "s"));
    alice.pump().await;

    alice.manager.close_all().await;

    assert!(alice.manager.is_empty());
    assert!(alice.registry.is_empty());
    assert!(alice.peer("bob").is_closed());
    assert!(alice.peer("carol").is_closed());
}

#[tokio::test]
async fn test_added_track_renegotiates_connected_peers() {
    let mut alice = ManagerHarness::new("alice");
    connected_to(&mut alice, "bob").await;
    alice.sent();

    let screen = LocalTrack::new(TrackKind::Video, alice.stream.id());
    let failures = alice.manager.add_local_track(screen.clone()).await;
    assert!(failures.is_empty());

    let bob = alice.peer("bob");
    assert_eq!(bob.count(&Call::AddTrack(screen.id().to_string())), 1);
    assert_eq!(alice.state("bob"), Some(PeerState::OfferSent));

    let sent = alice.sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(sent[0].payload, Payload::Offer(_)));

    // Adding the same track again changes nothing
    assert!(alice.manager.add_local_track(screen).await.is_empty());
    assert!(alice.sent().is_empty());
}

#[tokio::test]
async fn test_added_track_waits_for_negotiation_to_settle() {
    let mut alice = ManagerHarness::new("alice");
    alice.manager.initiate(&id("bob")).await.unwrap();
    alice.sent();

    let screen = LocalTrack::new(TrackKind::Video, alice.stream.id());
    alice.manager.add_local_track(screen.clone()).await;

    // Attached, but no second offer while the first is outstanding
    assert_eq!(
        alice.peer("bob").count(&Call::AddTrack(screen.id().to_string())),
        1
    );
    assert!(alice.sent().is_empty());

    alice.answer_from("bob", "answer").await.unwrap();
    alice.peer("bob").connectivity(ConnectivityState::Connected);
    alice.pump().await;

    // Connected, so the deferred offer went out
    assert_eq!(alice.state("bob"), Some(PeerState::OfferSent));
    let sent = alice.sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(sent[0].payload, Payload::Offer(_)));
    assert_eq!(alice.peer("bob").count(&Call::CreateOffer), 2);
}

#[tokio::test]
async fn test_new_records_start_with_added_tracks() {
    let mut alice = ManagerHarness::new("alice");
    let screen = LocalTrack::new(TrackKind::Video, alice.stream.id());
    alice.manager.add_local_track(screen.clone()).await;

    alice.manager.initiate(&id("dave")).await.unwrap();
    assert_eq!(
        alice.peer("dave").count(&Call::AddTrack(screen.id().to_string())),
        1
    );
    assert_eq!(alice.manager.local_tracks().len(), 3);
}

#[tokio::test]
async fn test_departure_mid_negotiation_discards_queue() {
    let mut alice = ManagerHarness::new("alice");
    alice.manager.initiate(&id("bob")).await.unwrap();
    alice.candidate_from("bob", "c1").await.unwrap();
    alice
        .peer("bob")
        .receive_track(RemoteTrack::new("early", TrackKind::Audio, "s"));
    alice.pump().await;
    assert!(alice.registry.contains(&id("bob")));
    alice.observed();

    assert!(alice.manager.close_peer(&id("bob")).await);

    assert_eq!(alice.manager.pending_candidates(&id("bob")), 0);
    assert!(!alice.registry.contains(&id("bob")));
    assert!(alice.peer("bob").applied_candidates().is_empty());
    assert_eq!(
        alice.observed(),
        vec![SessionEvent::PeerStateChanged {
            participant: id("bob"),
            from: PeerState::OfferSent,
            to: PeerState::Closed,
        }]
    );

    // Late answer for the closed record is ignored
    alice.answer_from("bob", "answer").await.unwrap();
    assert!(!alice.manager.contains(&id("bob")));
}

#[tokio::test]
async fn test_failure_before_negotiation_tears_record_down() {
    let mut alice = ManagerHarness::new("alice");
    alice.manager.ensure_record(&id("bob")).await.unwrap();
    assert_eq!(alice.state("bob"), Some(PeerState::Idle));

    alice.peer("bob").connectivity(ConnectivityState::Failed);
    let results = alice.pump().await;
    assert_eq!(results.len(), 1);
    assert!(matches!(
        results[0],
        Err(Error::ConnectivityFailure(ref who)) if *who == id("bob")
    ));

    assert!(!alice.manager.contains(&id("bob")));
    assert!(alice.peer("bob").is_closed());
    assert_eq!(alice.peer("bob").count(&Call::Close), 1);
}
