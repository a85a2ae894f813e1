//! Transport Session Integration Tests
//!
//! Runs the session against a local chart socket: keepalive echo, auth on
//! handshake, event fan-out, command delivery and close.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use chart_stream_client::{
    Command, ConnectionSettings, SessionError, SessionState, TransportSession,
};
use common::{
    drain, event_payload, handshake_payload, next_command, next_text, open_session, send_text,
    spawn_server,
};

const WAIT: Duration = Duration::from_secs(5);

async fn connect(url: &str) -> Result<TransportSession, SessionError> {
    timeout(WAIT, TransportSession::connect(&ConnectionSettings::with_url(url)))
        .await
        .expect("connect timed out")
}

#[tokio::test]
async fn keepalive_is_echoed_before_auth_token() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    let url = spawn_server(move |mut ws| async move {
        send_text(&mut ws, "~m~4~m~~h~1".to_string()).await;
        send_text(&mut ws, handshake_payload()).await;
        for _ in 0..2 {
            let text = next_text(&mut ws).await.unwrap();
            seen_tx.send(text).unwrap();
        }
        drain(&mut ws).await;
    })
    .await;

    let session = connect(&url).await.unwrap();

    assert_eq!(seen_rx.recv().await.unwrap(), "~m~4~m~~h~1");
    assert_eq!(
        seen_rx.recv().await.unwrap(),
        r#"~m~54~m~{"m":"set_auth_token","p":["unauthorized_user_token"]}"#
    );
    assert_eq!(session.state(), SessionState::Open);
    assert_eq!(session.server_session_id(), Some("<0.5124.890>_test"));
}

#[tokio::test]
async fn keepalives_are_echoed_for_the_whole_session() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    let url = spawn_server(move |mut ws| async move {
        open_session(&mut ws).await;
        send_text(&mut ws, "~m~5~m~~h~42".to_string()).await;
        seen_tx.send(next_text(&mut ws).await.unwrap()).unwrap();
        drain(&mut ws).await;
    })
    .await;

    let _session = connect(&url).await.unwrap();

    let echo = timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();
    assert_eq!(echo, "~m~5~m~~h~42");
}

#[tokio::test]
async fn events_reach_every_subscriber_in_order() {
    let url = spawn_server(|mut ws| async move {
        open_session(&mut ws).await;

        let go = next_command(&mut ws).await.unwrap();
        assert_eq!(go.name, "quote_create_session");

        let payload = format!(
            "{}{}",
            event_payload("series_loading", &json!(["cs_x", "sds_1"])),
            event_payload("series_completed", &json!(["cs_x", "sds_1"]))
        );
        send_text(&mut ws, payload).await;
        drain(&mut ws).await;
    })
    .await;

    let session = connect(&url).await.unwrap();
    let mut first = session.subscribe();
    let mut second = session.subscribe();
    let (handler_tx, mut handler_rx) = mpsc::unbounded_channel();
    let _unsubscriber = session.subscribe_fn(move |event| {
        let _ = handler_tx.send(event.name.clone());
    });

    session
        .send(&Command::new("quote_create_session", vec![json!("qs_1")]))
        .unwrap();

    for sub in [&mut first, &mut second] {
        let a = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        let b = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        assert_eq!(a.name, "series_loading");
        assert_eq!(b.name, "series_completed");
        assert_eq!(b.params, vec![json!("cs_x"), json!("sds_1")]);
    }
    assert_eq!(handler_rx.recv().await.unwrap(), "series_loading");
    assert_eq!(handler_rx.recv().await.unwrap(), "series_completed");
}

#[tokio::test]
async fn malformed_frame_is_skipped() {
    let url = spawn_server(|mut ws| async move {
        open_session(&mut ws).await;
        next_command(&mut ws).await.unwrap();
        let payload = format!(
            "~m~9~m~{{not json{}",
            event_payload("symbol_resolved", &json!(["cs_x", "sds_sym_0"]))
        );
        send_text(&mut ws, payload).await;
        drain(&mut ws).await;
    })
    .await;

    let session = connect(&url).await.unwrap();
    let mut sub = session.subscribe();
    session
        .send(&Command::new("chart_create_session", vec![json!("cs_x"), json!("")]))
        .unwrap();

    let event = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
    assert_eq!(event.name, "symbol_resolved");
    assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn close_resolves_once_transport_is_closed() {
    let url = spawn_server(|mut ws| async move {
        open_session(&mut ws).await;
        drain(&mut ws).await;
    })
    .await;

    let session = connect(&url).await.unwrap();
    let mut sub = session.subscribe();

    timeout(WAIT, session.close()).await.unwrap().unwrap();

    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(
        session.send(&Command::new("chart_create_session", vec![])),
        Err(SessionError::Closed)
    ));
    assert!(timeout(WAIT, sub.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn keepalive_in_same_payload_is_echoed_before_dispatch_continues() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    let url = spawn_server(move |mut ws| async move {
        open_session(&mut ws).await;
        next_command(&mut ws).await.unwrap();

        let payload = format!(
            "~m~4~m~~h~7{}",
            event_payload("series_loading", &json!(["cs_x", "sds_1"]))
        );
        send_text(&mut ws, payload).await;

        // The echo must arrive ahead of anything sent in reaction to the event.
        for _ in 0..2 {
            seen_tx.send(next_text(&mut ws).await.unwrap()).unwrap();
        }
        drain(&mut ws).await;
    })
    .await;

    let session = connect(&url).await.unwrap();
    let mut sub = session.subscribe();
    session
        .send(&Command::new("quote_create_session", vec![json!("qs_1")]))
        .unwrap();

    let event = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
    assert_eq!(event.name, "series_loading");
    session
        .send(&Command::new("quote_add_symbols", vec![json!("qs_1")]))
        .unwrap();

    assert_eq!(timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap(), "~m~4~m~~h~7");
    let reaction = timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();
    assert!(reaction.contains("quote_add_symbols"), "got {reaction}");
}

#[tokio::test]
async fn unacknowledged_close_fails_after_grace() {
    let url = spawn_server(|mut ws| async move {
        open_session(&mut ws).await;
        // Stop reading so the close frame is never answered.
        tokio::time::sleep(Duration::from_secs(2)).await;
        drain(&mut ws).await;
    })
    .await;

    let session = connect(&url).await.unwrap();

    let err = session
        .close_within(Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::CloseFailure(reason) if reason == "close not acknowledged"));

    timeout(WAIT, async {
        while !session.state().is_terminal() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(matches!(
        session.send(&Command::new("chart_create_session", vec![])),
        Err(SessionError::Closed)
    ));
}

#[tokio::test]
async fn socket_closed_before_handshake_is_connect_failure() {
    let url = spawn_server(|mut ws| async move {
        ws.close(None).await.unwrap();
        drain(&mut ws).await;
    })
    .await;

    let err = connect(&url).await.unwrap_err();
    assert!(matches!(err, SessionError::ConnectFailure(_)));
}

#[tokio::test]
async fn unreachable_endpoint_is_connect_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = connect(&format!("ws://{addr}")).await.unwrap_err();
    assert!(matches!(err, SessionError::ConnectFailure(_)));
}
