//! Token Exchange Integration Tests
//!
//! Exercises the session-cookie exchange against a mock disclaimer page and
//! checks the resulting token is what the session authenticates with.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use tokio::sync::oneshot;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chart_stream_client::infrastructure::protocol::{AuthError, TokenExchange};
use chart_stream_client::{ConnectionSettings, SessionCookie, SessionError, TransportSession};
use common::{drain, open_session, spawn_server};

const TIMEOUT: Duration = Duration::from_secs(5);

async fn disclaimer_page(status: u16, body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/disclaimer/"))
        .and(header("cookie", "sessionid=abc123"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(&server)
        .await;
    server
}

fn exchange_for(server: &MockServer) -> TokenExchange {
    TokenExchange::new(format!("{}/disclaimer/", server.uri()), TIMEOUT).unwrap()
}

fn cookie() -> SessionCookie {
    SessionCookie::new("abc123").unwrap()
}

#[tokio::test]
async fn token_is_extracted_from_page() {
    let server = disclaimer_page(
        200,
        r#"<html><script>var user = {"username":"u","auth_token":"eyJ.tok.123","is_pro":true};</script></html>"#,
    )
    .await;

    let token = exchange_for(&server).resolve(Some(&cookie())).await.unwrap();
    assert_eq!(token, "eyJ.tok.123");
}

#[tokio::test]
async fn non_success_status_fails() {
    let server = disclaimer_page(403, "forbidden").await;

    let err = exchange_for(&server).exchange(&cookie()).await.unwrap_err();
    assert!(matches!(err, AuthError::Status { status: 403 }));
}

#[tokio::test]
async fn page_without_token_fails() {
    let server = disclaimer_page(200, "<html>please sign in</html>").await;

    let err = exchange_for(&server).exchange(&cookie()).await.unwrap_err();
    assert!(matches!(err, AuthError::TokenNotFound));
}

#[tokio::test]
async fn failed_exchange_aborts_connect() {
    let server = disclaimer_page(500, "").await;
    let settings = ConnectionSettings {
        disclaimer_url: format!("{}/disclaimer/", server.uri()),
        http_timeout: TIMEOUT,
        ..ConnectionSettings::with_url("ws://127.0.0.1:9/unused")
    }
    .with_session(cookie());

    let err = TransportSession::connect(&settings).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::AuthExchangeFailure(AuthError::Status { status: 500 })
    ));
}

#[tokio::test]
async fn session_authenticates_with_exchanged_token() {
    let page = disclaimer_page(200, r#"{"auth_token":"account-token"}"#).await;
    let (token_tx, token_rx) = oneshot::channel();

    let url = spawn_server(move |mut ws| async move {
        let auth = open_session(&mut ws).await;
        token_tx.send(auth.params).unwrap();
        drain(&mut ws).await;
    })
    .await;

    let settings = ConnectionSettings {
        disclaimer_url: format!("{}/disclaimer/", page.uri()),
        ..ConnectionSettings::with_url(url)
    }
    .with_session(cookie());

    let _session = tokio::time::timeout(TIMEOUT, TransportSession::connect(&settings))
        .await
        .unwrap()
        .unwrap();

    let params = tokio::time::timeout(TIMEOUT, token_rx).await.unwrap().unwrap();
    assert_eq!(params, vec![serde_json::json!("account-token")]);
}
