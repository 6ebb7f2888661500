//! Negotiation timer

mod harness;

use harness::{id, ManagerHarness};
use meshcall::peer::{ConnectivityState, PeerOptions, PeerState};
use meshcall::{Error, SessionEvent};
use std::time::Duration;

fn with_timeout(local: &str) -> ManagerHarness {
    ManagerHarness::with_options(
        local,
        PeerOptions {
            negotiation_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        },
    )
}

#[tokio::test(start_paused = true)]
async fn test_stalled_negotiation_is_torn_down() {
    let mut alice = with_timeout("alice");
    alice.manager.initiate(&id("bob")).await.unwrap();
    alice.observed();

    let result = alice.pump_next(Duration::from_secs(10)).await.unwrap();
    assert!(matches!(
        result,
        Err(Error::Negotiation { ref participant, .. }) if *participant == id("bob")
    ));

    assert!(!alice.manager.contains(&id("bob")));
    assert!(alice.peer("bob").is_closed());
    assert!(alice.observed().contains(&SessionEvent::PeerStateChanged {
        participant: id("bob"),
        from: PeerState::OfferSent,
        to: PeerState::Closed,
    }));
}

#[tokio::test(start_paused = true)]
async fn test_timer_cancelled_once_connected() {
    let mut alice = with_timeout("alice");
    alice.manager.initiate(&id("bob")).await.unwrap();
    alice.answer_from("bob", "answer").await.unwrap();

    alice.peer("bob").connectivity(ConnectivityState::Connected);
    alice.pump().await;
    assert_eq!(alice.state("bob"), Some(PeerState::Connected));

    assert!(alice.pump_next(Duration::from_secs(30)).await.is_none());
    assert_eq!(alice.state("bob"), Some(PeerState::Connected));
}

#[tokio::test(start_paused = true)]
async fn test_no_timer_without_timeout() {
    let mut alice = ManagerHarness::new("alice");
    alice.manager.initiate(&id("bob")).await.unwrap();

    assert!(alice.pump_next(Duration::from_secs(3600)).await.is_none());
    assert_eq!(alice.state("bob"), Some(PeerState::OfferSent));
}
