//! Matrix client-server API session.
//!
//! Only the handful of endpoints the probe needs are implemented:
//! password login, text send, read receipts, long-poll sync and logout.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use super::{Connector, Credentials, RoomMessage, Session, SessionError};

const API_PREFIX: [&str; 3] = ["_matrix", "client", "v3"];

/// How long the server may hold a sync request open
const SYNC_LONG_POLL_MS: u64 = 30_000;

/// Timeout for every request that is not a sync
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Only timeline messages are interesting; keep the initial sync small.
const SYNC_FILTER: &str = r#"{"presence":{"types":[]},"account_data":{"types":[]},"room":{"timeline":{"types":["m.room.message"],"limit":20},"state":{"lazy_load_members":true},"ephemeral":{"types":[]},"account_data":{"types":[]}}}"#;

const DEVICE_DISPLAY_NAME: &str = "chainprobe";

/// Parse a homeserver address, defaulting to https when no scheme is given.
pub fn homeserver_url(raw: &str) -> Result<Url, SessionError> {
    let invalid = || SessionError::InvalidHomeserver(raw.to_string());

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }

    let candidate =
        if trimmed.contains("://") { trimmed.to_string() } else { format!("https://{trimmed}") };
    let url = Url::parse(&candidate).map_err(|_| invalid())?;

    match url.scheme() {
        "http" | "https" if url.host_str().is_some() && !url.cannot_be_a_base() => Ok(url),
        _ => Err(invalid()),
    }
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, SessionError> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| SessionError::InvalidHomeserver(base.to_string()))?;
        path.pop_if_empty().extend(API_PREFIX).extend(segments);
    }
    Ok(url)
}

/// Status plus the Matrix `errcode`/`error` pair when the server sent one
async fn error_reason(response: Response) -> String {
    #[derive(Deserialize)]
    struct MatrixError {
        errcode: Option<String>,
        error: Option<String>,
    }

    let status = response.status();
    match response.json::<MatrixError>().await {
        Ok(MatrixError { errcode: Some(code), error: Some(error) }) => {
            format!("{status} {code}: {error}")
        }
        Ok(MatrixError { errcode: Some(code), error: None }) => format!("{status} {code}"),
        _ => status.to_string(),
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    identifier: UserIdentifier<'a>,
    password: &'a str,
    initial_device_display_name: &'static str,
}

#[derive(Serialize)]
struct UserIdentifier<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    user: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
    user_id: String,
}

#[derive(Deserialize)]
struct EventIdResponse {
    event_id: String,
}

#[derive(Debug, Deserialize)]
struct SyncResponse {
    next_batch: String,
    #[serde(default)]
    rooms: SyncRooms,
}

#[derive(Debug, Default, Deserialize)]
struct SyncRooms {
    #[serde(default)]
    join: BTreeMap<String, JoinedRoom>,
}

#[derive(Debug, Default, Deserialize)]
struct JoinedRoom {
    #[serde(default)]
    timeline: Timeline,
}

#[derive(Debug, Default, Deserialize)]
struct Timeline {
    #[serde(default)]
    events: Vec<TimelineEvent>,
}

#[derive(Debug, Deserialize)]
struct TimelineEvent {
    #[serde(rename = "type")]
    kind: String,
    event_id: Option<String>,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    content: serde_json::Value,
}

impl SyncResponse {
    fn into_room_messages(self) -> impl Iterator<Item = RoomMessage> {
        self.rooms.join.into_iter().flat_map(|(room_id, room)| {
            room.timeline.events.into_iter().filter_map(move |event| {
                if event.kind != "m.room.message" {
                    return None;
                }
                let body = event.content.get("body")?.as_str()?.to_string();
                Some(RoomMessage {
                    room_id: room_id.clone(),
                    event_id: event.event_id?,
                    sender: event.sender,
                    body,
                })
            })
        })
    }
}

/// Creates [`MatrixSession`]s sharing one HTTP client.
#[derive(Debug, Clone)]
pub struct MatrixConnector {
    client: Client,
}

impl MatrixConnector {
    pub fn new() -> crate::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("chainprobe/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Connector for MatrixConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn Session>, SessionError> {
        let base = homeserver_url(&credentials.homeserver)?;
        let session = MatrixSession::login(self.client.clone(), base, credentials).await?;
        Ok(Arc::new(session))
    }
}

/// A logged in Matrix account
pub struct MatrixSession {
    client: Client,
    base: Url,
    user_id: String,
    access_token: String,
    stop_tx: watch::Sender<bool>,
}

impl MatrixSession {
    /// Log in with a password and keep the returned access token
    pub async fn login(
        client: Client,
        base: Url,
        credentials: &Credentials,
    ) -> Result<Self, SessionError> {
        let url = endpoint(&base, &["login"])?;
        let request = LoginRequest {
            kind: "m.login.password",
            identifier: UserIdentifier { kind: "m.id.user", user: &credentials.username },
            password: &credentials.password,
            initial_device_display_name: DEVICE_DISPLAY_NAME,
        };

        let response = client
            .post(url)
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|source| SessionError::Unreachable {
                homeserver: credentials.homeserver.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(SessionError::LoginRejected {
                username: credentials.username.clone(),
                reason: error_reason(response).await,
            });
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| SessionError::UnexpectedResponse(format!("login: {e}")))?;

        info!("Logged in as {} on {}", login.user_id, base);

        let (stop_tx, _) = watch::channel(false);
        Ok(Self { client, base, user_id: login.user_id, access_token: login.access_token, stop_tx })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.access_token)
    }

    async fn sync_once(&self, since: Option<&str>) -> Result<SyncResponse, SessionError> {
        let url = endpoint(&self.base, &["sync"])?;
        let long_poll = SYNC_LONG_POLL_MS.to_string();
        let mut query = vec![("timeout", long_poll.as_str()), ("filter", SYNC_FILTER)];
        if let Some(since) = since {
            query.push(("since", since));
        }

        let response = self
            .authorized(self.client.get(url))
            .query(&query)
            .timeout(REQUEST_TIMEOUT + Duration::from_millis(SYNC_LONG_POLL_MS))
            .send()
            .await
            .map_err(|e| SessionError::Sync(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SessionError::Sync(error_reason(response).await));
        }

        response.json().await.map_err(|e| SessionError::Sync(format!("invalid sync response: {e}")))
    }
}

#[async_trait::async_trait]
impl Session for MatrixSession {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn send_text(&self, room_id: &str, body: &str) -> Result<String, SessionError> {
        let txn_id = Uuid::new_v4().to_string();
        let url = endpoint(&self.base, &["rooms", room_id, "send", "m.room.message", &txn_id])?;
        let send_error =
            |reason: String| SessionError::Send { room_id: room_id.to_string(), reason };

        let response = self
            .authorized(self.client.put(url))
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({ "msgtype": "m.text", "body": body }))
            .send()
            .await
            .map_err(|e| send_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(send_error(error_reason(response).await));
        }

        let sent: EventIdResponse = response.json().await.map_err(|e| send_error(e.to_string()))?;
        debug!("Sent {} to {} as {}", sent.event_id, room_id, self.user_id);
        Ok(sent.event_id)
    }

    async fn mark_read(&self, room_id: &str, event_id: &str) -> Result<(), SessionError> {
        let url = endpoint(&self.base, &["rooms", room_id, "receipt", "m.read", event_id])?;
        let read_error =
            |reason: String| SessionError::MarkRead { event_id: event_id.to_string(), reason };

        let response = self
            .authorized(self.client.post(url))
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| read_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(read_error(error_reason(response).await));
        }
        Ok(())
    }

    async fn sync(&self, sink: mpsc::UnboundedSender<RoomMessage>) -> Result<(), SessionError> {
        let mut stop = self.stop_tx.subscribe();
        let mut since: Option<String> = None;

        loop {
            let stopped = *stop.borrow_and_update();
            if stopped {
                return Ok(());
            }

            let batch = tokio::select! {
                _ = stop.changed() => return Ok(()),
                batch = self.sync_once(since.as_deref()) => batch?,
            };

            debug!("Sync batch {} for {}", batch.next_batch, self.user_id);
            since = Some(batch.next_batch.clone());

            for message in batch.into_room_messages() {
                // Nobody is listening anymore
                if sink.send(message).is_err() {
                    return Ok(());
                }
            }
        }
    }

    fn stop_sync(&self) {
        self.stop_tx.send_replace(true);
    }

    async fn close(&self) -> Result<(), SessionError> {
        let url = endpoint(&self.base, &["logout"])?;
        let response = self
            .authorized(self.client.post(url))
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| SessionError::UnexpectedResponse(format!("logout: {e}")))?;

        if !response.status().is_success() {
            return Err(SessionError::UnexpectedResponse(format!(
                "logout: {}",
                error_reason(response).await
            )));
        }
        info!("Logged out {}", self.user_id);
        Ok(())
    }
}
