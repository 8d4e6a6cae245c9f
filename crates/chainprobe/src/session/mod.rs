//! Session handles - one authenticated connection per probe role.
//!
//! The orchestrator only talks to the [`Session`] and [`Connector`] traits;
//! [`matrix`] implements them over the Matrix client-server API.

pub mod matrix;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

/// Login details for one account
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub homeserver: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(
        homeserver: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self { homeserver: homeserver.into(), username: username.into(), password: password.into() }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("homeserver", &self.homeserver)
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// A text message observed by a syncing session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMessage {
    pub room_id: String,
    pub event_id: String,
    pub sender: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Homeserver not known {0}")]
    InvalidHomeserver(String),
    #[error("Homeserver {homeserver} unreachable: {source}")]
    Unreachable {
        homeserver: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Login as {username} rejected: {reason}")]
    LoginRejected { username: String, reason: String },
    #[error("Could not send message in {room_id}: {reason}")]
    Send { room_id: String, reason: String },
    #[error("Could not mark {event_id} as read: {reason}")]
    MarkRead { event_id: String, reason: String },
    #[error("Sync failed: {0}")]
    Sync(String),
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Opens sessions for a set of credentials.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Resolve the homeserver and log in
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn Session>, SessionError>;
}

/// One logged-in account.
#[async_trait::async_trait]
pub trait Session: Send + Sync {
    /// Fully qualified user id of the logged in account
    fn user_id(&self) -> &str;

    /// Send a plain text message, returning the new event id
    async fn send_text(&self, room_id: &str, body: &str) -> Result<String, SessionError>;

    /// Move the read marker of this account to `event_id`
    async fn mark_read(&self, room_id: &str, event_id: &str) -> Result<(), SessionError>;

    /// Stream incoming room messages into `sink` until [`Session::stop_sync`] is called.
    ///
    /// Returns `Ok(())` when stopped and an error when the stream broke.
    async fn sync(&self, sink: mpsc::UnboundedSender<RoomMessage>) -> Result<(), SessionError>;

    /// Ask a running (or future) `sync` to return. Calling it twice is harmless.
    fn stop_sync(&self);

    /// Release server side resources held by the session
    async fn close(&self) -> Result<(), SessionError> {
        Ok(())
    }
}
