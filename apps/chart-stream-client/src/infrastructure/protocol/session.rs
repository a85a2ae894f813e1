//! Chart Transport Session
//!
//! One authenticated WebSocket connection to the chart backend.
//!
//! # Lifecycle
//!
//! 1. Resolve the auth token (anonymous or via the session cookie)
//! 2. Open the socket with the backend's `Origin`
//! 3. Echo every keepalive for the life of the session
//! 4. On the server handshake, send `set_auth_token`; `connect` resolves here
//! 5. Fan every event out to subscribers until closed
//!
//! # Tasks
//!
//! The reader task is the only place frames are decoded and dispatched. The
//! writer task owns the sink and drains a FIFO queue shared by keepalive
//! echoes, the auth command, caller commands and the close request. Both stop
//! when the session is closed or dropped.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::auth::{AuthError, TokenExchange};
use super::codec::FrameCodec;
use super::messages::{Command, Event, Frame};
use crate::application::ports::SessionPort;
use crate::infrastructure::broadcast::{SubscriberRegistry, Subscription, Unsubscriber};
use crate::infrastructure::config::ConnectionSettings;
use crate::infrastructure::metrics::{self, ConnectStage};

/// Handshake fields logged alongside the session id.
const RELEASE_FIELD: &str = "release";
const PROTOCOL_FIELD: &str = "protocol";

/// How long `close` waits for the server to acknowledge before dropping the socket.
pub const CLOSE_GRACE: Duration = Duration::from_secs(5);

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur on a transport session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// The session cookie could not be exchanged for a token.
    #[error("auth token exchange failed: {0}")]
    AuthExchangeFailure(#[from] AuthError),

    /// The socket failed before the server handshake completed.
    #[error("connect failed: {0}")]
    ConnectFailure(String),

    /// The transport reported an error while closing.
    #[error("close failed: {0}")]
    CloseFailure(String),

    /// The session no longer accepts commands.
    #[error("session is closed")]
    Closed,

    /// A command could not be framed.
    #[error("command encoding failed: {0}")]
    Encode(String),
}

// =============================================================================
// Session State
// =============================================================================

/// Observable state of a transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Socket open, waiting for the server handshake.
    Handshaking,
    /// Handshake done and auth token sent.
    Open,
    /// Transport closed cleanly.
    Closed,
    /// Transport failed.
    Failed(String),
}

impl SessionState {
    /// Whether the session has ended.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed(_))
    }
}

/// Shared state cell; terminal states are never overwritten.
#[derive(Clone)]
struct StateCell(Arc<watch::Sender<SessionState>>);

impl StateCell {
    fn new() -> (Self, watch::Receiver<SessionState>) {
        let (tx, rx) = watch::channel(SessionState::Handshaking);
        (Self(Arc::new(tx)), rx)
    }

    fn set(&self, next: SessionState) {
        self.0.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            if *current == SessionState::Open {
                metrics::adjust_open_sessions(-1.0);
            }
            if next == SessionState::Open {
                metrics::adjust_open_sessions(1.0);
            }
            *current = next;
            true
        });
    }
}

enum Outbound {
    Text(String),
    Close,
}

type HandshakeSignal = oneshot::Sender<Result<Option<String>, SessionError>>;

// =============================================================================
// Transport Session
// =============================================================================

/// Handle to one live chart socket.
///
/// Dropping the handle stops the reader and writer tasks.
pub struct TransportSession {
    registry: SubscriberRegistry,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    codec: FrameCodec,
    server_session_id: Option<String>,
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("state", &*self.state.borrow())
            .field("server_session_id", &self.server_session_id)
            .field("subscribers", &self.registry.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl TransportSession {
    /// Authenticate, open the socket and wait for the server handshake.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AuthExchangeFailure`] if the session cookie
    /// cannot be exchanged, or [`SessionError::ConnectFailure`] if the socket
    /// fails before the handshake.
    pub async fn connect(settings: &ConnectionSettings) -> Result<Self, SessionError> {
        // Already installed by an earlier connect or by the host binary.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let exchange = TokenExchange::new(&settings.disclaimer_url, settings.http_timeout)?;
        let token = exchange
            .resolve(settings.session_id.as_ref())
            .await
            .inspect_err(|e| {
                tracing::error!(error = %e, "Auth token exchange failed");
                metrics::record_connect_failure(ConnectStage::Auth);
            })?;

        let mut request = settings
            .websocket_url
            .as_str()
            .into_client_request()
            .map_err(|e| SessionError::ConnectFailure(e.to_string()))?;
        let origin = HeaderValue::from_str(&settings.origin)
            .map_err(|e| SessionError::ConnectFailure(format!("invalid origin: {e}")))?;
        request.headers_mut().insert(ORIGIN, origin);

        tracing::info!(
            url = %settings.websocket_url,
            authenticated = settings.session_id.is_some(),
            "Connecting to chart socket"
        );

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "WebSocket upgrade failed");
                metrics::record_connect_failure(ConnectStage::Upgrade);
                SessionError::ConnectFailure(e.to_string())
            })?;

        Self::start(stream, token).await
    }

    /// Run the session protocol over an already-open message stream.
    ///
    /// Resolves once the server handshake arrives and `set_auth_token` has
    /// been queued.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConnectFailure`] if the stream fails or ends
    /// before the handshake.
    pub async fn start<S>(stream: S, token: String) -> Result<Self, SessionError>
    where
        S: Stream<Item = Result<Message, tungstenite::Error>>
            + Sink<Message, Error = tungstenite::Error>
            + Send
            + Unpin
            + 'static,
    {
        let (write, read) = stream.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (state, state_rx) = StateCell::new();
        let (handshake_tx, handshake_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let registry = SubscriberRegistry::new();
        let codec = FrameCodec::new();

        tokio::spawn(write_loop(write, outbound_rx, state.clone(), cancel.clone()));

        let reader = Reader {
            codec,
            registry: registry.clone(),
            outbound: outbound.clone(),
            state,
            cancel: cancel.clone(),
            token,
            handshake: Some(handshake_tx),
        };
        tokio::spawn(reader.run(read));

        let server_session_id = match handshake_rx.await {
            Ok(Ok(session_id)) => session_id,
            Ok(Err(e)) => {
                cancel.cancel();
                metrics::record_connect_failure(ConnectStage::Handshake);
                return Err(e);
            }
            Err(_) => {
                cancel.cancel();
                metrics::record_connect_failure(ConnectStage::Handshake);
                return Err(SessionError::ConnectFailure(
                    "reader stopped before handshake".to_string(),
                ));
            }
        };

        tracing::info!(session_id = ?server_session_id, "Chart session authenticated");

        Ok(Self {
            registry,
            outbound,
            state: state_rx,
            cancel,
            codec,
            server_session_id,
        })
    }

    /// Receive all future events on a channel.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.registry.subscribe()
    }

    /// Call `handler` for all future events, on the reader task.
    #[must_use = "dropping the unsubscriber makes the handler permanent"]
    pub fn subscribe_fn<F>(&self, handler: F) -> Unsubscriber
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let unsubscriber = self.registry.subscribe_fn(handler);
        tracing::debug!(subscriber = unsubscriber.id(), "Event handler registered");
        unsubscriber
    }

    /// Frame `command` and queue it for the socket. No acknowledgement is awaited.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the session has ended.
    pub fn send(&self, command: &Command) -> Result<(), SessionError> {
        if self.state.borrow().is_terminal() {
            return Err(SessionError::Closed);
        }

        let text = self
            .codec
            .encode(command)
            .map_err(|e| SessionError::Encode(e.to_string()))?;
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| SessionError::Closed)?;

        metrics::record_command_sent(&command.name);
        tracing::debug!(command = %command.name, "Command queued");
        Ok(())
    }

    /// Close the socket and wait until the transport reports it closed.
    ///
    /// Equivalent to [`close_within`](Self::close_within) with [`CLOSE_GRACE`].
    ///
    /// # Errors
    ///
    /// See [`close_within`](Self::close_within).
    pub async fn close(&self) -> Result<(), SessionError> {
        self.close_within(CLOSE_GRACE).await
    }

    /// Close the socket and wait up to `grace` for the transport to report it closed.
    ///
    /// When the server does not acknowledge in time the socket is dropped
    /// anyway and the session ends as closed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::CloseFailure`] if the transport reports an
    /// error or the close is not acknowledged within `grace`.
    pub async fn close_within(&self, grace: Duration) -> Result<(), SessionError> {
        tracing::info!("Closing chart session");
        let _ = self.outbound.send(Outbound::Close);

        let mut state = self.state.clone();
        let settled = tokio::time::timeout(grace, async {
            state
                .wait_for(SessionState::is_terminal)
                .await
                .map(|s| s.clone())
        })
        .await;

        match settled {
            Ok(Ok(SessionState::Failed(reason))) => Err(SessionError::CloseFailure(reason)),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(SessionError::CloseFailure(
                "transport tasks stopped without reporting".to_string(),
            )),
            Err(_) => {
                tracing::warn!(grace_ms = grace.as_millis(), "Server did not acknowledge close, dropping socket");
                self.cancel.cancel();
                Err(SessionError::CloseFailure("close not acknowledged".to_string()))
            }
        }
    }

    /// Current transport state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Session id assigned by the server handshake.
    #[must_use]
    pub fn server_session_id(&self) -> Option<&str> {
        self.server_session_id.as_deref()
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry.subscriber_count()
    }
}

impl SessionPort for TransportSession {
    fn subscribe(&self) -> Subscription {
        Self::subscribe(self)
    }

    fn send(&self, command: &Command) -> Result<(), SessionError> {
        Self::send(self, command)
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Writer Task
// =============================================================================

async fn write_loop<W>(
    mut write: W,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    state: StateCell,
    cancel: CancellationToken,
) where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            next = outbound.recv() => match next {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        tracing::warn!(error = %e, "WebSocket write failed");
                        state.set(SessionState::Failed(e.to_string()));
                        cancel.cancel();
                        break;
                    }
                }
                Some(Outbound::Close) => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        tracing::warn!(error = %e, "WebSocket close failed");
                        state.set(SessionState::Failed(e.to_string()));
                        cancel.cancel();
                    }
                    break;
                }
                None => break,
            },
        }
    }

    tracing::debug!("Writer stopped");
}

// =============================================================================
// Reader Task
// =============================================================================

struct Reader {
    codec: FrameCodec,
    registry: SubscriberRegistry,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: StateCell,
    cancel: CancellationToken,
    token: String,
    handshake: Option<HandshakeSignal>,
}

impl Reader {
    async fn run<R>(mut self, mut read: R)
    where
        R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        let cancel = self.cancel.clone();
        let outcome = loop {
            tokio::select! {
                () = cancel.cancelled() => break SessionState::Closed,
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_payload(&text),
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(frame = ?frame, "Server closed chart socket");
                        break SessionState::Closed;
                    }
                    Some(Ok(_)) => {
                        // Binary and control frames carry no protocol data.
                    }
                    Some(Err(
                        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                    ))
                    | None => {
                        tracing::info!("Chart socket ended");
                        break SessionState::Closed;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Chart socket error");
                        break SessionState::Failed(e.to_string());
                    }
                },
            }
        };

        if let Some(signal) = self.handshake.take() {
            let reason = match &outcome {
                SessionState::Failed(reason) => reason.clone(),
                _ => "socket closed before handshake".to_string(),
            };
            let _ = signal.send(Err(SessionError::ConnectFailure(reason)));
        }

        self.state.set(outcome);
        // Ends every channel subscription once its queue drains.
        self.registry.clear();
        self.cancel.cancel();
        tracing::debug!("Reader stopped");
    }

    fn handle_payload(&mut self, payload: &str) {
        for decoded in self.codec.decode(payload) {
            let frame = match decoded {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed frame");
                    metrics::record_malformed_frame();
                    continue;
                }
            };

            metrics::record_frame(frame.kind());

            match frame {
                Frame::Keepalive(echo) => {
                    tracing::trace!(frame = %echo, "Echoing keepalive");
                    let _ = self.outbound.send(Outbound::Text(echo));
                    metrics::record_keepalive_echo();
                }
                Frame::SessionHandshake(handshake) => {
                    let session_id = handshake.session_id().map(str::to_string);
                    tracing::debug!(
                        session_id = ?session_id,
                        release = ?handshake.get(RELEASE_FIELD),
                        protocol = ?handshake.get(PROTOCOL_FIELD),
                        "Server handshake received"
                    );

                    let auth = Command::set_auth_token(&self.token);
                    match self.codec.encode(&auth) {
                        Ok(text) => {
                            let _ = self.outbound.send(Outbound::Text(text));
                            metrics::record_command_sent(&auth.name);
                            self.state.set(SessionState::Open);
                            if let Some(signal) = self.handshake.take() {
                                let _ = signal.send(Ok(session_id));
                            }
                        }
                        Err(e) => {
                            if let Some(signal) = self.handshake.take() {
                                let _ = signal.send(Err(SessionError::Encode(e.to_string())));
                            }
                        }
                    }
                }
                Frame::Event(event) => {
                    tracing::trace!(event = %event.name, "Dispatching event");
                    let delivered = self.registry.dispatch(event);
                    metrics::record_event_dispatched(delivered);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!SessionState::Handshaking.is_terminal());
        assert!(!SessionState::Open.is_terminal());
        assert!(SessionState::Closed.is_terminal());
        assert!(SessionState::Failed("x".to_string()).is_terminal());
    }

    #[test]
    fn terminal_state_is_sticky() {
        let (cell, rx) = StateCell::new();
        cell.set(SessionState::Open);
        cell.set(SessionState::Failed("reset".to_string()));
        cell.set(SessionState::Closed);
        assert_eq!(*rx.borrow(), SessionState::Failed("reset".to_string()));
    }
}
