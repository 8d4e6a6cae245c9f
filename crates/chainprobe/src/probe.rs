//! Probe orchestration - the send / receive round trip.
//!
//! The orchestrator:
//! - logs in the sending account and posts a uniquely tagged message
//! - logs in the receiving account and starts its sync stream
//! - races "message observed" against the timeout
//! - folds every failure met on the way into a [`Ledger`]
//!
//! The timeout is one deadline for the whole run: setup steps and the race
//! all end by `start + timeout`, and only the short receipt and teardown
//! graces come on top.
//!
//! Background tasks never decide the outcome. They only push observations
//! into an unbounded channel and fire the one-shot "matched" signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::ledger::{Ledger, Observation};
use crate::session::{Connector, Credentials, RoomMessage, Session, SessionError};
use crate::severity::{Severity, SeverityPolicy};
use crate::token::{DEFAULT_PREFIX, ProbeToken};
use crate::DEFAULT_TIMEOUT_SECONDS;

/// Time pending read receipts get to finish once the race is decided
const RECEIPT_GRACE: Duration = Duration::from_millis(500);

/// Upper bound for logging out both accounts once the run is decided
const TEARDOWN_GRACE: Duration = Duration::from_millis(1500);

/// Everything a single probe run needs
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub sender: Credentials,
    pub receiver: Credentials,
    pub room_id: String,
    pub timeout: Duration,
    pub message_prefix: String,
    pub policy: SeverityPolicy,
}

impl ProbeConfig {
    /// Config with the default timeout, prefix and severity policy
    pub fn new(sender: Credentials, receiver: Credentials, room_id: impl Into<String>) -> Self {
        Self {
            sender,
            receiver,
            room_id: room_id.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            message_prefix: DEFAULT_PREFIX.to_string(),
            policy: SeverityPolicy::default(),
        }
    }
}

/// Progress of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Init,
    SenderReady,
    Sent,
    ReceiverReady,
    Racing,
    Matched,
    TimedOut,
    Failed,
    Done,
}

/// Terminal state a run reached before teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The receiver saw the probe message in time
    Matched,
    /// The timeout fired first
    TimedOut,
    /// Setup (login or send) failed, nothing was raced
    Failed,
}

#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub outcome: Outcome,
    pub ledger: Ledger,
}

impl ProbeReport {
    pub fn severity(&self) -> Severity {
        self.ledger.worst()
    }
}

/// Run one probe and return everything it observed.
///
/// Never fails: every problem ends up as an observation in the ledger.
pub async fn run_probe<C>(connector: &C, config: &ProbeConfig) -> ProbeReport
where
    C: Connector + ?Sized,
{
    let mut run = ProbeRun::new(config);
    let outcome = run.execute(connector).await;
    run.close_sessions().await;
    run.transition(ProbeState::Done);

    ProbeReport { outcome, ledger: run.ledger }
}

struct ProbeRun<'a> {
    config: &'a ProbeConfig,
    deadline: Instant,
    state: ProbeState,
    ledger: Ledger,
    sessions: Vec<Arc<dyn Session>>,
}

impl<'a> ProbeRun<'a> {
    fn new(config: &'a ProbeConfig) -> Self {
        Self {
            config,
            deadline: Instant::now() + config.timeout,
            state: ProbeState::Init,
            ledger: Ledger::new(),
            sessions: Vec::new(),
        }
    }

    fn transition(&mut self, next: ProbeState) {
        debug!("Probe state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn fail(&mut self, message: String) -> Outcome {
        warn!("{message}");
        self.ledger.record(self.config.policy.setup_failure, message);
        self.transition(ProbeState::Failed);
        Outcome::Failed
    }

    async fn execute<C>(&mut self, connector: &C) -> Outcome
    where
        C: Connector + ?Sized,
    {
        let config = self.config;

        let sender = match timeout_at(self.deadline, connector.connect(&config.sender)).await {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => return self.fail(connect_failure(&config.sender, &err)),
            Err(_) => return self.fail(connect_timeout(&config.sender)),
        };
        self.sessions.push(sender.clone());
        self.transition(ProbeState::SenderReady);

        let token = ProbeToken::generate(&config.message_prefix);
        match timeout_at(self.deadline, sender.send_text(&config.room_id, token.body())).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                return self.fail(format!("Could not send message in {} ({err})", config.room_id));
            }
            Err(_) => return self.fail(format!("Timed out sending message in {}", config.room_id)),
        }
        let sent_at = Instant::now();
        info!("Probe message sent to {} as {}", config.room_id, sender.user_id());
        self.transition(ProbeState::Sent);

        let receiver = match timeout_at(self.deadline, connector.connect(&config.receiver)).await {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => return self.fail(connect_failure(&config.receiver, &err)),
            Err(_) => return self.fail(connect_timeout(&config.receiver)),
        };
        self.sessions.push(receiver.clone());
        self.transition(ProbeState::ReceiverReady);

        self.race(receiver, token, sent_at).await
    }

    async fn race(&mut self, receiver: Arc<dyn Session>, token: ProbeToken, sent_at: Instant) -> Outcome {
        let policy = self.config.policy;
        let (observation_tx, mut observation_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (matched_tx, mut matched_rx) = oneshot::channel();

        let mut watcher = tokio::spawn(watch_messages(
            MessageWatch {
                session: receiver.clone(),
                room_id: self.config.room_id.clone(),
                token,
                sent_at,
                read_failure: policy.runtime_failure,
                observations: observation_tx.clone(),
                matched: matched_tx,
            },
            message_rx,
        ));

        let syncer = {
            let receiver = receiver.clone();
            tokio::spawn(async move {
                if let Err(err) = receiver.sync(message_tx).await {
                    warn!("Sync of {} stopped: {err}", receiver.user_id());
                    let message = format!("sync stopped with error ({err})");
                    let _ = observation_tx.send(Observation::new(policy.runtime_failure, message));
                }
            })
        };
        self.transition(ProbeState::Racing);

        // A dropped matched sender (watcher ended without a match) disables
        // that branch, leaving the timeout to decide.
        let outcome = tokio::select! {
            Ok(()) = &mut matched_rx => Outcome::Matched,
            _ = sleep_until(self.deadline) => Outcome::TimedOut,
        };
        receiver.stop_sync();

        // The watcher ends once the sync stream closes and its receipts settle.
        if timeout(RECEIPT_GRACE, &mut watcher).await.is_err() {
            debug!("Read receipts still pending after {:?}", RECEIPT_GRACE);
        }

        if outcome == Outcome::TimedOut {
            let message = format!("Message was not received within {:?}", self.config.timeout);
            warn!("{message}");
            self.ledger.record(policy.timeout, message);
        }

        while let Ok(observation) = observation_rx.try_recv() {
            self.ledger.push(observation);
        }

        watcher.abort();
        syncer.abort();

        self.transition(match outcome {
            Outcome::Matched => ProbeState::Matched,
            Outcome::TimedOut => ProbeState::TimedOut,
            Outcome::Failed => ProbeState::Failed,
        });
        outcome
    }

    async fn close_sessions(&mut self) {
        let sessions = std::mem::take(&mut self.sessions);
        let closing = async {
            for session in &sessions {
                if let Err(err) = session.close().await {
                    warn!("Could not close session of {}: {err}", session.user_id());
                }
            }
        };
        if timeout(TEARDOWN_GRACE, closing).await.is_err() {
            warn!("Closing sessions timed out after {:?}", TEARDOWN_GRACE);
        }
    }
}

fn connect_failure(credentials: &Credentials, err: &SessionError) -> String {
    match err {
        SessionError::InvalidHomeserver(_) => {
            format!("Homeserver not known {}", credentials.homeserver)
        }
        _ => format!(
            "Could not login as {} to {} ({err})",
            credentials.username, credentials.homeserver
        ),
    }
}

fn connect_timeout(credentials: &Credentials) -> String {
    format!("Timed out logging in as {} to {}", credentials.username, credentials.homeserver)
}

struct MessageWatch {
    session: Arc<dyn Session>,
    room_id: String,
    token: ProbeToken,
    sent_at: Instant,
    read_failure: Severity,
    observations: mpsc::UnboundedSender<Observation>,
    matched: oneshot::Sender<()>,
}

/// Acknowledge every message of the probe room and stop at the first match.
///
/// Receipts run in the background so a slow receipt endpoint never holds up
/// the comparison. The watcher waits for them before returning.
async fn watch_messages(watch: MessageWatch, mut messages: mpsc::UnboundedReceiver<RoomMessage>) {
    let MessageWatch { session, room_id, token, sent_at, read_failure, observations, matched } = watch;
    let mut receipts = JoinSet::new();

    while let Some(message) = messages.recv().await {
        if message.room_id != room_id {
            continue;
        }

        receipts.spawn({
            let session = session.clone();
            let observations = observations.clone();
            let (room_id, event_id) = (message.room_id.clone(), message.event_id.clone());
            async move {
                if let Err(err) = session.mark_read(&room_id, &event_id).await {
                    warn!("{err}");
                    let _ = observations
                        .send(Observation::new(read_failure, "Could not mark message as read"));
                }
            }
        });

        if !token.matches(&message.body) {
            debug!("Ignoring unrelated message {} from {}", message.event_id, message.sender);
            continue;
        }

        let elapsed = sent_at.elapsed();
        info!("Probe message {} received after {:?}", message.event_id, elapsed);
        let _ = observations.send(Observation::ok(format!(
            "The chain check was successful ({:.1}s)",
            elapsed.as_secs_f64()
        )));
        let _ = matched.send(());
        break;
    }

    while receipts.join_next().await.is_some() {}
}
