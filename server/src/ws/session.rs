//! Per-connection lifecycle: Connecting -> Authenticated -> Active -> Closed.
//!
//! The state machine owns no socket. The WebSocket actor feeds it the verified
//! identity, the connection handle and inbound text frames, which keeps every
//! transition testable with plain channels.

use super::protocol;
use super::registry::{ConnectionHandle, ConnectionRegistry};
use super::router::{MessageRouter, RouteOutcome};
use super::Identity;

#[derive(Debug, Clone)]
pub enum SessionState {
    Connecting,
    Authenticated {
        identity: Identity,
    },
    Active {
        identity: Identity,
        handle: ConnectionHandle,
    },
    Closed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Authenticated { .. } => "authenticated",
            Self::Active { .. } => "active",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("token did not resolve to a user")]
    Rejected,
    #[error("cannot {action} a session in state {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn identity(&self) -> Option<&str> {
        match &self.state {
            SessionState::Authenticated { identity } | SessionState::Active { identity, .. } => {
                Some(identity)
            }
            _ => None,
        }
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            action,
            state: self.state.name(),
        }
    }

    /// Apply the handshake verdict. A missing identity closes the session.
    pub fn authenticate(&mut self, verified: Option<Identity>) -> Result<&str, SessionError> {
        if !matches!(self.state, SessionState::Connecting) {
            return Err(self.invalid("authenticate"));
        }

        match verified {
            Some(identity) => {
                self.state = SessionState::Authenticated { identity };
                Ok(self.identity().unwrap_or_default())
            }
            None => {
                self.state = SessionState::Closed;
                Err(SessionError::Rejected)
            }
        }
    }

    /// Register the connection and start accepting frames.
    pub fn activate(
        &mut self,
        registry: &ConnectionRegistry,
        handle: ConnectionHandle,
    ) -> Result<(), SessionError> {
        let identity = match &self.state {
            SessionState::Authenticated { identity } => identity.clone(),
            _ => return Err(self.invalid("activate")),
        };

        registry.register(&identity, handle.clone());
        self.state = SessionState::Active { identity, handle };
        Ok(())
    }

    /// Decode one inbound text frame and route it with `from` forced to this
    /// session's identity.
    ///
    /// Returns `None` when nothing was routed: the session is not active or
    /// the frame is not valid JSON for the relay protocol.
    pub fn handle_text(&self, router: &MessageRouter, text: &str) -> Option<RouteOutcome> {
        let SessionState::Active { identity, handle } = &self.state else {
            tracing::debug!(state = self.state.name(), "Frame received outside active state");
            return None;
        };

        match protocol::decode_frame(text) {
            Ok(frame) => Some(router.route(identity, frame, Some(handle))),
            Err(err) => {
                tracing::debug!(
                    identity = %identity,
                    error = %err,
                    "Ignoring malformed frame"
                );
                None
            }
        }
    }

    /// Move to Closed. Deregisters exactly once; returns true only for the call
    /// that did so.
    pub fn close(&mut self, registry: &ConnectionRegistry) -> bool {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        match previous {
            SessionState::Active { identity, handle } => {
                registry.deregister(&identity, &handle);
                true
            }
            _ => false,
        }
    }
}
