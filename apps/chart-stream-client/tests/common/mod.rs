//! Local chart socket used by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use chart_stream_client::{Event, Frame, FrameCodec};
use chart_stream_client::infrastructure::protocol::frame;

pub type ServerSocket = WebSocketStream<TcpStream>;

/// Accept one client on a random port and hand the socket to `handler`.
///
/// Returns the `ws://` URL to connect to.
pub async fn spawn_server<F, Fut>(handler: F) -> String
where
    F: FnOnce(ServerSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        handler(ws).await;
    });

    format!("ws://{addr}")
}

/// Handshake payload as the backend sends it.
pub fn handshake_payload() -> String {
    frame(r#"{"session_id":"<0.5124.890>_test","timestamp":1700000000,"release":"registry"}"#)
}

/// Frame an event body.
pub fn event_payload(name: &str, params: &serde_json::Value) -> String {
    frame(&serde_json::json!({ "m": name, "p": params }).to_string())
}

pub async fn send_text(ws: &mut ServerSocket, payload: String) {
    ws.send(Message::Text(payload.into())).await.unwrap();
}

/// Next text payload from the client; `None` once the client closed.
pub async fn next_text(ws: &mut ServerSocket) -> Option<String> {
    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Text(text)) => return Some(text.as_str().to_owned()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

/// Next command sent by the client, skipping keepalive echoes.
pub async fn next_command(ws: &mut ServerSocket) -> Option<Event> {
    loop {
        let text = next_text(ws).await?;
        for decoded in FrameCodec::new().decode(&text) {
            if let Ok(Frame::Event(event)) = decoded {
                return Some(event);
            }
        }
    }
}

/// Send the handshake and consume the client's `set_auth_token`.
pub async fn open_session(ws: &mut ServerSocket) -> Event {
    send_text(ws, handshake_payload()).await;
    let auth = next_command(ws).await.expect("client sends set_auth_token");
    assert_eq!(auth.name, "set_auth_token");
    auth
}

/// Keep reading until the client goes away, answering its close.
pub async fn drain(ws: &mut ServerSocket) {
    while let Some(msg) = ws.next().await {
        if msg.is_err() {
            break;
        }
    }
}
