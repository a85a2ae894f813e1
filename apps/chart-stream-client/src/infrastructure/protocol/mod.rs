//! Chart Protocol Adapters
//!
//! Client side of the length-prefixed chart socket protocol:
//!
//! - **Messages**: Inbound frames and outbound command builders
//! - **Codec**: `~m~<len>~m~` framing and frame classification
//! - **Auth**: Session cookie to auth token exchange
//! - **Session**: Socket lifecycle, keepalive echo and event fan-out

pub mod auth;
pub mod codec;
pub mod messages;
pub mod session;

pub use auth::{ANONYMOUS_TOKEN, AuthError, SessionCookie, TokenExchange};
pub use codec::{CodecError, FrameCodec, KEEPALIVE_MARKER, frame};
pub use messages::{Command, Event, Frame, Handshake};
pub use session::{SessionError, SessionState, TransportSession};
