//! # Event Bus System
//!
//! Broadcast channel for credential lifecycle notifications, built on
//! `tokio::sync::broadcast`.
//!
//! Hosts subscribe to surface refresh failures and storage degradation in
//! their own UI or telemetry. Emitting with no subscribers is normal and is
//! not treated as an error by publishers.
//!
//! ```rust
//! use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
//!
//! let bus = EventBus::new(16);
//! let mut rx = bus.subscribe();
//! bus.emit(CoreEvent::Auth(AuthEvent::TokenRefreshing {
//!     provider: "claude".to_string(),
//! }))
//! .ok();
//! assert!(rx.try_recv().is_ok());
//! ```
//!
//! Slow subscribers receive `RecvError::Lagged(n)` and keep going; `Closed`
//! means every bus handle was dropped.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Top-level event enum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Auth(AuthEvent),
}

/// Credential lifecycle events, keyed by canonical provider name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuthEvent {
    /// A refresh request is about to be sent to the token endpoint
    TokenRefreshing { provider: String },

    /// A new access token was obtained; `expires_at` is unix milliseconds
    TokenRefreshed { provider: String, expires_at: i64 },

    /// Refresh failed or was suppressed by backoff
    RefreshFailed {
        provider: String,
        code: String,
        recoverable: bool,
    },

    /// A refreshed credential could not be written to any storage tier. The
    /// token is still usable for this process but will be lost on restart.
    PersistenceDegraded { provider: String, reason: String },
}

impl AuthEvent {
    pub fn provider(&self) -> &str {
        match self {
            AuthEvent::TokenRefreshing { provider }
            | AuthEvent::TokenRefreshed { provider, .. }
            | AuthEvent::RefreshFailed { provider, .. }
            | AuthEvent::PersistenceDegraded { provider, .. } => provider,
        }
    }
}

impl fmt::Display for AuthEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthEvent::TokenRefreshing { provider } => {
                write!(f, "refreshing {} token", provider)
            }
            AuthEvent::TokenRefreshed {
                provider,
                expires_at,
            } => write!(f, "{} token refreshed, expires at {}", provider, expires_at),
            AuthEvent::RefreshFailed { provider, code, .. } => {
                write!(f, "{} token refresh failed ({})", provider, code)
            }
            AuthEvent::PersistenceDegraded { provider, reason } => {
                write!(f, "{} credential not persisted: {}", provider, reason)
            }
        }
    }
}

/// Cloneable broadcast handle.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// `capacity` is the per-subscriber backlog before `Lagged` is reported.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns the number of receivers, or an error when nobody listens.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}
