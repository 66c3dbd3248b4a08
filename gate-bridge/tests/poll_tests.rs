//! Poller tests against an `httpmock` server

use gate_bridge::poll::{fetch, resolve_pointer, PollOutcome, Poller, Resolved};
use gate_core::{
    actuator::DryRunActuator, config::PollConfig, Config, DenyReason, EntryKind, GateService,
    TransportError, Verdict,
};
use httpmock::prelude::*;
use reqwest::{Client, Url};
use std::sync::Arc;
use tempfile::TempDir;

const EVENT: &str = r#"{"event_id":1,"integrity":"HASH_OK","gate":"ALLOWED","mode":"EXPLORE_SLOW"}"#;

fn create_gate() -> (GateService, DryRunActuator, TempDir) {
    let temp = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp.path().join("gate");

    let sink = DryRunActuator::new();
    let gate = GateService::open(config, Arc::new(sink.clone())).unwrap();
    (gate, sink, temp)
}

fn poll_config(url: String) -> PollConfig {
    PollConfig {
        enabled: true,
        url: Some(url),
        interval_ms: 50,
        timeout_ms: 1_000,
    }
}

fn count_kind(gate: &GateService, kind: EntryKind) -> usize {
    gate.read_ledger()
        .unwrap()
        .iter()
        .filter(|e| e.kind == kind)
        .count()
}

#[tokio::test]
async fn test_inline_document_is_the_event() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/event");
            then.status(200).body(EVENT);
        })
        .await;

    let url = Url::parse(&server.url("/event")).unwrap();
    let resolved = resolve_pointer(&Client::new(), &url).await.unwrap();
    assert_eq!(resolved, Resolved::Inline(EVENT.as_bytes().to_vec().into()));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_pointer_is_followed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/pointer");
            then.status(200).body(r#"{"event_url":"/events/1"}"#);
        })
        .await;
    let event_mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/events/1");
            then.status(200).body(EVENT);
        })
        .await;

    let url = Url::parse(&server.url("/pointer")).unwrap();
    let client = Client::new();
    let resolved = resolve_pointer(&client, &url).await.unwrap();
    let locator = match resolved {
        Resolved::Pointer(locator) => locator,
        other => panic!("expected pointer, got {:?}", other),
    };
    assert_eq!(locator.path(), "/events/1");

    let bytes = fetch(&client, &locator).await.unwrap();
    assert_eq!(&bytes[..], EVENT.as_bytes());
    event_mock.assert_async().await;
}

#[tokio::test]
async fn test_event_with_locator_fields_stays_inline() {
    let server = MockServer::start_async().await;
    let with_url = r#"{"event_id":2,"integrity":"HASH_OK","gate":"ALLOWED","mode":"EXPLORE_SLOW","url":"/elsewhere"}"#;
    let with_event_url =
        r#"{"event_id":3,"integrity":"HASH_OK","gate":"ALLOWED","event_url":"/elsewhere"}"#;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/a");
            then.status(200).body(with_url);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/b");
            then.status(200).body(with_event_url);
        })
        .await;
    let elsewhere = server
        .mock_async(|when, then| {
            when.method(GET).path("/elsewhere");
            then.status(200).body(EVENT);
        })
        .await;

    let client = Client::new();
    let a = Url::parse(&server.url("/a")).unwrap();
    assert_eq!(
        resolve_pointer(&client, &a).await.unwrap(),
        Resolved::Inline(with_url.as_bytes().to_vec().into())
    );
    let b = Url::parse(&server.url("/b")).unwrap();
    assert_eq!(
        resolve_pointer(&client, &b).await.unwrap(),
        Resolved::Inline(with_event_url.as_bytes().to_vec().into())
    );

    // Delivered as-is, not swapped for the resource it names
    let (gate, sink, _temp) = create_gate();
    let mut poller = Poller::new(&poll_config(server.url("/a")), gate.clone()).unwrap();
    match poller.poll_once().await.unwrap() {
        PollOutcome::Delivered(delivery) => {
            assert!(matches!(delivery.verdict, Verdict::Accepted { event_id: 2, .. }));
        }
        other => panic!("expected delivery, got {:?}", other),
    }
    assert_eq!(sink.sent(), vec!["forward 20"]);
    elsewhere.assert_hits_async(0).await;

    gate.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_poller_delivers_once_per_document() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/pointer");
            then.status(200).body(r#"{"event_url":"/events/1"}"#);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/events/1");
            then.status(200).body(EVENT);
        })
        .await;

    let (gate, sink, _temp) = create_gate();
    let mut poller = Poller::new(&poll_config(server.url("/pointer")), gate.clone()).unwrap();

    match poller.poll_once().await.unwrap() {
        PollOutcome::Delivered(delivery) => {
            assert!(matches!(delivery.verdict, Verdict::Accepted { event_id: 1, .. }));
        }
        other => panic!("expected delivery, got {:?}", other),
    }
    assert_eq!(poller.poll_once().await.unwrap(), PollOutcome::Unchanged);
    assert_eq!(sink.sent(), vec!["forward 20"]);
    assert_eq!(count_kind(&gate, EntryKind::EventIngest), 1);

    gate.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_fetch_failure_fails_closed_once_per_streak() {
    let server = MockServer::start_async().await;
    let mut failing = server
        .mock_async(|when, then| {
            when.method(GET).path("/event");
            then.status(503);
        })
        .await;

    let (gate, sink, _temp) = create_gate();
    let mut poller = Poller::new(&poll_config(server.url("/event")), gate.clone()).unwrap();

    assert!(matches!(
        poller.poll_once().await.unwrap(),
        PollOutcome::Failed { reported: true, error: TransportError::Fetch(_) }
    ));
    assert!(matches!(
        poller.poll_once().await.unwrap(),
        PollOutcome::Failed { reported: false, .. }
    ));
    assert_eq!(count_kind(&gate, EntryKind::TransportFailure), 1);

    let state = gate.current_state().await.unwrap();
    assert!(state.is_safe());
    assert_eq!(state.integrity, gate_core::Integrity::Fail);
    assert_eq!(
        gate.metrics()
            .verdicts_total
            .with_label_values(&["denied", DenyReason::TransportFailure.as_str()])
            .get(),
        1
    );

    // Recovery resets the streak
    failing.delete_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/event");
            then.status(200).body(EVENT);
        })
        .await;
    assert!(matches!(
        poller.poll_once().await.unwrap(),
        PollOutcome::Delivered(_)
    ));
    assert_eq!(sink.sent().len(), 1);

    gate.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_server_is_transport_failure() {
    let (gate, sink, _temp) = create_gate();
    // Port 9 (discard) on localhost is expected to refuse connections
    let mut poller = Poller::new(&poll_config("http://127.0.0.1:9/event".to_string()), gate.clone()).unwrap();

    assert!(matches!(
        poller.poll_once().await.unwrap(),
        PollOutcome::Failed { reported: true, .. }
    ));
    assert!(sink.sent().is_empty());
    assert!(gate.current_state().await.unwrap().is_safe());

    gate.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_poller_requires_url() {
    let (gate, _sink, _temp) = create_gate();
    let config = PollConfig {
        url: None,
        ..poll_config(String::new())
    };
    assert!(Poller::new(&config, gate.clone()).is_err());

    gate.shutdown().await.unwrap();
}
