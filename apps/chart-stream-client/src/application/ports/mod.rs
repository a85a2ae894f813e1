//! Port Interfaces
//!
//! Contracts between the fetch workflows and the transport that carries
//! their commands. [`TransportSession`] is the production adapter; tests
//! drive the workflows through scripted sessions.
//!
//! [`TransportSession`]: crate::infrastructure::protocol::TransportSession

use crate::infrastructure::broadcast::Subscription;
use crate::infrastructure::protocol::{Command, SessionError};

/// Command and event channel of one chart socket.
pub trait SessionPort: Send + Sync {
    /// Receive every event dispatched after this call.
    fn subscribe(&self) -> Subscription;

    /// Queue a command for the socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the session no longer accepts commands.
    fn send(&self, command: &Command) -> Result<(), SessionError>;
}
