//! In-memory stand-in for a pair of homeservers sharing one room.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chainprobe::{Connector, Credentials, RoomMessage, Session, SessionError};
use tokio::sync::{mpsc, watch};

pub const ROOM: &str = "!probe:example.org";

/// How long a stalled homeserver keeps a request hanging
pub const STALL: Duration = Duration::from_secs(30);

/// How the fake network misbehaves
#[derive(Debug, Clone, Default)]
pub struct Behaviour {
    pub reject_users: Vec<String>,
    pub unknown_homeservers: Vec<String>,
    pub fail_send: bool,
    pub fail_mark_read: bool,
    /// Delay before sent messages reach syncing sessions, `None` drops them
    pub deliver_after: Option<Duration>,
    /// Deliver every sent message twice
    pub duplicate_delivery: bool,
    /// Messages pushed to the sink as soon as sync starts
    pub decoys: Vec<RoomMessage>,
    /// Break the sync stream after this delay
    pub sync_error_after: Option<Duration>,
    /// Users whose login hangs for [`STALL`] before failing
    pub stalled_logins: Vec<String>,
    pub send_delay: Option<Duration>,
    pub mark_read_delay: Option<Duration>,
    pub close_delay: Option<Duration>,
}

#[derive(Default)]
pub struct MockNetwork {
    pub behaviour: Behaviour,
    pub sent: Mutex<Vec<String>>,
    pub connects: Mutex<Vec<String>>,
    pub marked: Mutex<Vec<String>>,
    pub sessions: Mutex<Vec<Arc<MockSession>>>,
    pub closed: AtomicUsize,
}

impl MockNetwork {
    pub fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self { behaviour, ..Default::default() })
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }

    pub fn marked(&self) -> Vec<String> {
        self.marked.lock().unwrap().clone()
    }

    pub fn session(&self, username: &str) -> Option<Arc<MockSession>> {
        self.sessions.lock().unwrap().iter().find(|s| s.username == username).cloned()
    }
}

pub struct MockConnector {
    pub network: Arc<MockNetwork>,
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn Session>, SessionError> {
        let behaviour = &self.network.behaviour;
        self.network.connects.lock().unwrap().push(credentials.username.clone());

        if behaviour.stalled_logins.contains(&credentials.username) {
            tokio::time::sleep(STALL).await;
            return Err(SessionError::UnexpectedResponse("operation timed out".into()));
        }

        if behaviour.unknown_homeservers.contains(&credentials.homeserver) {
            return Err(SessionError::InvalidHomeserver(credentials.homeserver.clone()));
        }
        if behaviour.reject_users.contains(&credentials.username) {
            return Err(SessionError::LoginRejected {
                username: credentials.username.clone(),
                reason: "403 Forbidden M_FORBIDDEN: Invalid password".into(),
            });
        }

        let (stop, _) = watch::channel(false);
        let session = Arc::new(MockSession {
            username: credentials.username.clone(),
            user_id: format!("@{}:{}", credentials.username, credentials.homeserver),
            network: self.network.clone(),
            stop,
            stop_calls: AtomicUsize::new(0),
        });
        self.network.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}

pub struct MockSession {
    pub username: String,
    user_id: String,
    network: Arc<MockNetwork>,
    stop: watch::Sender<bool>,
    pub stop_calls: AtomicUsize,
}

impl MockSession {
    async fn feed(&self, sink: &mpsc::UnboundedSender<RoomMessage>) -> Result<(), SessionError> {
        let behaviour = &self.network.behaviour;

        for decoy in &behaviour.decoys {
            let _ = sink.send(decoy.clone());
        }

        if let Some(after) = behaviour.sync_error_after {
            tokio::time::sleep(after).await;
            return Err(SessionError::Sync("connection reset by peer".into()));
        }

        if let Some(after) = behaviour.deliver_after {
            tokio::time::sleep(after).await;
            let copies = if behaviour.duplicate_delivery { 2 } else { 1 };
            for (index, body) in self.network.sent().into_iter().enumerate() {
                for _ in 0..copies {
                    let _ = sink.send(RoomMessage {
                        room_id: ROOM.to_string(),
                        event_id: format!("$probe{index}"),
                        sender: "@sender:example.org".to_string(),
                        body: body.clone(),
                    });
                }
            }
        }

        std::future::pending::<()>().await;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Session for MockSession {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn send_text(&self, room_id: &str, body: &str) -> Result<String, SessionError> {
        if let Some(delay) = self.network.behaviour.send_delay {
            tokio::time::sleep(delay).await;
        }
        if self.network.behaviour.fail_send {
            return Err(SessionError::Send {
                room_id: room_id.to_string(),
                reason: "403 Forbidden M_FORBIDDEN".into(),
            });
        }
        self.network.sent.lock().unwrap().push(body.to_string());
        Ok("$sent".to_string())
    }

    async fn mark_read(&self, _room_id: &str, event_id: &str) -> Result<(), SessionError> {
        self.network.marked.lock().unwrap().push(event_id.to_string());
        if let Some(delay) = self.network.behaviour.mark_read_delay {
            tokio::time::sleep(delay).await;
        }
        if self.network.behaviour.fail_mark_read {
            return Err(SessionError::MarkRead {
                event_id: event_id.to_string(),
                reason: "500 Internal Server Error".into(),
            });
        }
        Ok(())
    }

    async fn sync(&self, sink: mpsc::UnboundedSender<RoomMessage>) -> Result<(), SessionError> {
        let mut stop = self.stop.subscribe();
        let stopped = async move {
            loop {
                let stopped = *stop.borrow_and_update();
                if stopped || stop.changed().await.is_err() {
                    break;
                }
            }
        };
        tokio::select! {
            _ = stopped => Ok(()),
            result = self.feed(&sink) => result,
        }
    }

    fn stop_sync(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.stop.send_replace(true);
    }

    async fn close(&self) -> Result<(), SessionError> {
        if let Some(delay) = self.network.behaviour.close_delay {
            tokio::time::sleep(delay).await;
        }
        self.network.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn message(room_id: &str, event_id: &str, body: &str) -> RoomMessage {
    RoomMessage {
        room_id: room_id.to_string(),
        event_id: event_id.to_string(),
        sender: "@stranger:example.org".to_string(),
        body: body.to_string(),
    }
}

pub fn credentials(homeserver: &str, username: &str) -> Credentials {
    Credentials::new(homeserver, username, "secret")
}
