//! Primary logic of a spatial cell: presence, proximity, and signaling for
//! the players inside one cubic region of the world.
//!
//! Each cell is owned by a single actor task. Admission pre-registers
//! pending sessions through [`ShardHandle::prepare`]; upgraded sockets are
//! handed over whole through [`ShardHandle::accept`]. Frames from every
//! socket, timer fires, and prepare calls are serialized through one
//! mailbox, so between any two awaits the cell's state is consistent and no
//! locking exists anywhere in the actor.
//!
//! # Implementation flow
//!
//! A socket starts anonymous: it owns nothing but a connection id. Its first
//! valid `register` consumes a pending session and promotes it to a player
//! connection, displacing any prior connection for the same player. From
//! then on every inbound frame refreshes liveness; `position` frames are
//! rate limited and feed the proximity pass; `signal` frames are relayed to
//! their target's socket without inspecting the payload.
//!
//! Any event that can change the peer topology arms a short one-shot
//! debounce timer; when it fires, one recomputation pass diffs every
//! observer's in-range peer set against the last frame that observer was
//! sent, and emits only frames that carry news. A slower sweep disconnects
//! connections that have gone silent past the heartbeat timeout.

use crate::{
    proximity::{self, Neighbor, PeerView},
    session::PendingSessions,
};
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use earshot_model::{
    event::{
        ClientEvent, ErrorReply, PositionUpdate, Register, Registered, ServerEvent,
        SignalDelivery, SignalDeliveryFailed, SignalRequest, CLOSE_GOING_AWAY,
        CLOSE_INVALID_SESSION,
    },
    geometry::{CellId, Vec3, DISTANCE_CHANGE_EPSILON, PROXIMITY_RADIUS_METERS},
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::{
    borrow::Cow,
    collections::HashMap,
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
    time::Duration,
};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    time::{self, Instant},
};

/// Timers and thresholds governing a cell.
///
/// The defaults are the production values; the integration suite compresses
/// them to keep wall-clock time reasonable.
#[derive(Clone, Debug)]
pub struct ShardConfig {
    /// How long a pending session may wait to be consumed by a register.
    pub pending_session_ttl: Duration,
    /// Silence on a registered connection past this is a forced disconnect.
    pub heartbeat_timeout: Duration,
    /// Minimum spacing between accepted position frames per connection.
    pub position_min_interval: Duration,
    /// Coalescing window between a topology change and the recomputation
    /// pass it schedules.
    pub proximity_debounce: Duration,
    /// Audibility radius in world units.
    pub proximity_radius: f64,
    /// Minimum distance change before an otherwise-unchanged view is worth
    /// re-emitting.
    pub distance_epsilon: f64,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            pending_session_ttl: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(30),
            position_min_interval: Duration::from_millis(100),
            proximity_debounce: Duration::from_millis(50),
            proximity_radius: PROXIMITY_RADIUS_METERS,
            distance_epsilon: DISTANCE_CHANGE_EPSILON,
        }
    }
}

/// Pre-registering a pending session with a cell failed.
#[derive(Debug)]
pub struct PrepareError {
    pub(crate) kind: PrepareErrorType,
    pub(crate) source: Option<Box<dyn Error + Send + Sync>>,
}

impl PrepareError {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &PrepareErrorType {
        &self.kind
    }

    /// Consume the error, returning the owned error type and the source error.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (PrepareErrorType, Option<Box<dyn Error + Send + Sync>>) {
        (self.kind, self.source)
    }
}

impl Display for PrepareError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.kind {
            PrepareErrorType::CellUnavailable => f.write_str("cell actor isn't running"),
        }
    }
}

impl Error for PrepareError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

/// Type of [`PrepareError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum PrepareErrorType {
    /// The cell's actor task has stopped, such as during shutdown.
    CellUnavailable,
}

/// Handle to a cell's actor.
///
/// Cloning is cheap; all clones post to the same mailbox.
#[derive(Clone, Debug)]
pub struct ShardHandle {
    cell: CellId,
    mailbox: UnboundedSender<ShardMessage>,
}

impl ShardHandle {
    /// Spawn the actor for a cell and return a handle to it.
    pub fn spawn(cell: CellId, config: ShardConfig) -> Self {
        let (mailbox, rx) = mpsc::unbounded_channel();
        let handle = Self {
            cell: cell.clone(),
            mailbox: mailbox.clone(),
        };

        tokio::spawn(
            WorldShard {
                cell,
                config,
                rx,
                mailbox,
                pending: PendingSessions::new(),
                connections: HashMap::new(),
                players: HashMap::new(),
                views: HashMap::new(),
                next_connection_id: 0,
                recalc_at: None,
                cleanup_at: None,
            }
            .run(),
        );

        handle
    }

    /// The cell this handle belongs to.
    pub const fn cell(&self) -> &CellId {
        &self.cell
    }

    /// Store a pending `(player, session token)` pair for the cell.
    ///
    /// The pair is a one-time capability: it becomes a live connection only
    /// when a socket registers with it before the TTL lapses. Nothing is
    /// authenticated here.
    ///
    /// # Errors
    ///
    /// Returns a [`PrepareErrorType::CellUnavailable`] error type if the
    /// cell's actor has stopped.
    pub async fn prepare(
        &self,
        player_id: String,
        session_token: String,
    ) -> Result<(), PrepareError> {
        let (tx, rx) = oneshot::channel();

        self.mailbox
            .send(ShardMessage::Prepare {
                player_id,
                session_token,
                tx,
            })
            .map_err(|_| PrepareError {
                kind: PrepareErrorType::CellUnavailable,
                source: None,
            })?;

        rx.await.map_err(|source| PrepareError {
            kind: PrepareErrorType::CellUnavailable,
            source: Some(Box::new(source)),
        })
    }

    /// Hand a freshly upgraded socket to the cell.
    ///
    /// The socket starts anonymous and must register within the pending
    /// session TTL to become a player connection.
    pub fn accept(&self, socket: WebSocket) {
        if self
            .mailbox
            .send(ShardMessage::Accept { socket })
            .is_err()
        {
            tracing::warn!(cell = %self.cell, "socket dropped: cell actor isn't running");
        }
    }
}

/// Message posted to a cell's mailbox.
enum ShardMessage {
    Prepare {
        player_id: String,
        session_token: String,
        tx: oneshot::Sender<()>,
    },
    Accept {
        socket: WebSocket,
    },
    Inbound {
        connection_id: u64,
        frame: Inbound,
    },
}

/// What a socket reader observed.
enum Inbound {
    Text(String),
    Binary,
    Closed,
}

/// A socket the cell has accepted, registered or not.
#[derive(Debug)]
struct Connection {
    tx: UnboundedSender<Message>,
    /// Present once a register has been accepted.
    player_id: Option<String>,
    last_seen: Instant,
    last_position_at: Option<Instant>,
    position: Option<Vec3>,
}

/// The actor owning one cell's state.
struct WorldShard {
    cell: CellId,
    config: ShardConfig,
    rx: UnboundedReceiver<ShardMessage>,
    /// Cloned into socket readers so frames land in the same mailbox.
    mailbox: UnboundedSender<ShardMessage>,
    pending: PendingSessions,
    connections: HashMap<u64, Connection>,
    /// Registered player to its live connection. At most one per player.
    players: HashMap<String, u64>,
    /// Committed per-observer views; diffs are taken against these.
    views: HashMap<String, PeerView>,
    next_connection_id: u64,
    /// Armed while a proximity pass is scheduled.
    recalc_at: Option<Instant>,
    /// Armed while registered connections exist.
    cleanup_at: Option<Instant>,
}

impl WorldShard {
    async fn run(mut self) {
        tracing::debug!(cell = %self.cell, "cell actor started");

        loop {
            let recalc_deadline = self.recalc_at.unwrap_or_else(Instant::now);
            let cleanup_deadline = self.cleanup_at.unwrap_or_else(Instant::now);

            tokio::select! {
                message = self.rx.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
                _ = time::sleep_until(recalc_deadline), if self.recalc_at.is_some() => {
                    self.recalc_at = None;
                    self.run_proximity_pass();
                }
                _ = time::sleep_until(cleanup_deadline), if self.cleanup_at.is_some() => {
                    self.run_cleanup();
                }
            }
        }

        tracing::debug!(cell = %self.cell, "cell actor stopped");
    }

    fn handle(&mut self, message: ShardMessage) {
        match message {
            ShardMessage::Prepare {
                player_id,
                session_token,
                tx,
            } => {
                self.prepare(player_id, session_token);
                let _ = tx.send(());
            }
            ShardMessage::Accept { socket } => self.accept(socket),
            ShardMessage::Inbound {
                connection_id,
                frame,
            } => self.inbound(connection_id, frame),
        }
    }

    fn prepare(&mut self, player_id: String, session_token: String) {
        let now = Instant::now();

        self.pending.prune(self.config.pending_session_ttl, now);
        self.pending.insert(player_id, session_token, now);
    }

    fn accept(&mut self, socket: WebSocket) {
        let connection_id = self.next_connection_id;
        self.next_connection_id += 1;

        let (sink, stream) = socket.split();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(write_frames(sink, rx));
        tokio::spawn(read_frames(stream, connection_id, self.mailbox.clone()));

        self.connections.insert(
            connection_id,
            Connection {
                tx,
                player_id: None,
                last_seen: Instant::now(),
                last_position_at: None,
                position: None,
            },
        );

        tracing::debug!(cell = %self.cell, connection_id, "socket accepted");
    }

    fn inbound(&mut self, connection_id: u64, frame: Inbound) {
        let Some(connection) = self.connections.get_mut(&connection_id) else {
            return;
        };

        // Silence is measured against any inbound frame, not only
        // heartbeats.
        connection.last_seen = Instant::now();
        let registered = connection.player_id.is_some();

        let text = match frame {
            Inbound::Text(text) => text,
            Inbound::Binary => {
                send_event(
                    &connection.tx,
                    &ErrorReply::new("binary frames are not supported").into(),
                );

                return;
            }
            Inbound::Closed => {
                self.disconnect(connection_id);

                return;
            }
        };

        let event = match serde_json::from_str::<ClientEvent>(&text) {
            Ok(event) => event,
            Err(source) => {
                if registered {
                    tracing::trace!(connection_id, %source, "dropping unrecognized frame");
                } else {
                    send_event(
                        &connection.tx,
                        &ErrorReply::new("unrecognized frame").into(),
                    );
                }

                return;
            }
        };

        match event {
            ClientEvent::Register(register) => self.register(connection_id, register),
            ClientEvent::Heartbeat => {}
            ClientEvent::Position(update) => self.position(connection_id, update),
            ClientEvent::Signal(request) => self.signal(connection_id, request),
            other => tracing::trace!(connection_id, ?other, "ignoring unsupported frame"),
        }
    }

    fn register(&mut self, connection_id: u64, register: Register) {
        let now = Instant::now();

        self.pending.prune(self.config.pending_session_ttl, now);

        let valid = self
            .pending
            .get(&register.session_token)
            .is_some_and(|session| session.player_id == register.player_id);

        if !valid {
            tracing::debug!(cell = %self.cell, connection_id, "register with invalid session");

            if let Some(connection) = self.connections.get(&connection_id) {
                send_event(
                    &connection.tx,
                    &ErrorReply::new("invalid session token").into(),
                );
            }
            self.close(connection_id, CLOSE_INVALID_SESSION, "invalid session token");

            return;
        }

        // One-shot: the session disappears from both indexes here.
        self.pending.consume(&register.session_token);

        let player_id = register.player_id;

        let Some(connection) = self.connections.get_mut(&connection_id) else {
            return;
        };

        // A socket re-registering under a new identity drops its old one.
        if let Some(previous) = connection.player_id.take() {
            if previous != player_id && self.players.get(&previous) == Some(&connection_id) {
                self.players.remove(&previous);
                self.views.remove(&previous);
            }
        }

        connection.player_id = Some(player_id.clone());
        connection.last_seen = now;

        // A register racing an existing connection for the same player: the
        // later one wins and the earlier socket is closed cleanly. The
        // player is repointed before the close so the teardown path doesn't
        // mistake the swap for a departure; the committed view dies with
        // the old socket so the new one gets a full first frame.
        let superseded = self.players.insert(player_id.clone(), connection_id);
        if let Some(old_id) = superseded.filter(|old_id| *old_id != connection_id) {
            tracing::debug!(cell = %self.cell, player = %player_id, "connection superseded");
            self.close(old_id, CLOSE_GOING_AWAY, "superseded by a newer register");
            self.views.remove(&player_id);
        }

        if self.cleanup_at.is_none() {
            self.cleanup_at = Some(now + self.config.heartbeat_timeout);
        }
        self.schedule_recalc();

        if let Some(connection) = self.connections.get(&connection_id) {
            send_event(&connection.tx, &Registered::new(player_id.clone()).into());
        }
        tracing::debug!(cell = %self.cell, player = %player_id, connection_id, "registered");
    }

    fn position(&mut self, connection_id: u64, update: PositionUpdate) {
        let Some(connection) = self.connections.get_mut(&connection_id) else {
            return;
        };

        if connection.player_id.is_none() {
            return;
        }

        let now = Instant::now();
        let accept = connection.last_position_at.map_or(true, |at| {
            now.saturating_duration_since(at) >= self.config.position_min_interval
        });

        // Frames inside the rate-limit window refreshed liveness above and
        // are otherwise dropped.
        if accept {
            connection.position = Some(update.position);
            connection.last_position_at = Some(now);
            self.schedule_recalc();
        }
    }

    fn signal(&mut self, connection_id: u64, request: SignalRequest) {
        let Some(connection) = self.connections.get(&connection_id) else {
            return;
        };

        let from = connection.player_id.clone();
        let target = self
            .players
            .get(&request.target_id)
            .and_then(|id| self.connections.get(id));

        match (from, target) {
            (Some(from), Some(target)) => {
                send_event(
                    &target.tx,
                    &SignalDelivery::new(from, request.payload).into(),
                );
            }
            _ => {
                send_event(
                    &connection.tx,
                    &SignalDeliveryFailed::new(request.target_id).into(),
                );
            }
        }
    }

    /// Remove a connection after its socket closed or errored.
    fn disconnect(&mut self, connection_id: u64) {
        let Some(connection) = self.connections.remove(&connection_id) else {
            return;
        };

        if let Some(player_id) = connection.player_id {
            // Only the connection currently owning the player tears its
            // state down; a superseded socket must not.
            if self.players.get(&player_id) == Some(&connection_id) {
                self.players.remove(&player_id);
                self.views.remove(&player_id);
                self.schedule_recalc();
            }

            tracing::debug!(cell = %self.cell, player = %player_id, connection_id, "disconnected");
        }
    }

    /// Send a close frame and tear the connection down.
    fn close(&mut self, connection_id: u64, code: u16, reason: &'static str) {
        if let Some(connection) = self.connections.get(&connection_id) {
            let _ = connection.tx.send(Message::Close(Some(CloseFrame {
                code,
                reason: Cow::Borrowed(reason),
            })));
        }

        self.disconnect(connection_id);
    }

    fn schedule_recalc(&mut self) {
        if self.recalc_at.is_none() {
            self.recalc_at = Some(Instant::now() + self.config.proximity_debounce);
        }
    }

    /// One recomputation pass over a consistent snapshot.
    fn run_proximity_pass(&mut self) {
        let positioned: Vec<(String, Vec3)> = self
            .players
            .iter()
            .filter_map(|(player_id, connection_id)| {
                let position = self.connections.get(connection_id)?.position?;

                Some((player_id.clone(), position))
            })
            .collect();
        let total_players = self.players.len();

        let mut frames: Vec<(u64, HashMap<String, Neighbor>, ServerEvent)> = Vec::new();

        for (observer_id, observer_position) in &positioned {
            let next = proximity::neighbors_within(
                observer_id,
                *observer_position,
                &positioned,
                self.config.proximity_radius,
            );
            let previous = self.views.get(observer_id).cloned().unwrap_or_default();

            if let Some(frame) =
                proximity::diff(&previous, &next, self.config.distance_epsilon, total_players)
            {
                if let Some(connection_id) = self.players.get(observer_id) {
                    frames.push((*connection_id, next, frame.into()));
                }
            }
        }

        for (connection_id, next, frame) in frames {
            if let Some(connection) = self.connections.get(&connection_id) {
                send_event(&connection.tx, &frame);

                if let Some(player_id) = &connection.player_id {
                    self.views.insert(player_id.clone(), proximity::commit(&next));
                }
            }
        }
    }

    /// Disconnect registered connections that went silent, then reschedule
    /// while any remain.
    fn run_cleanup(&mut self) {
        let now = Instant::now();

        let silent: Vec<u64> = self
            .connections
            .iter()
            .filter(|(_, connection)| {
                connection.player_id.is_some()
                    && now.saturating_duration_since(connection.last_seen)
                        > self.config.heartbeat_timeout
            })
            .map(|(id, _)| *id)
            .collect();

        for connection_id in silent {
            tracing::debug!(cell = %self.cell, connection_id, "heartbeat timeout");
            self.close(connection_id, CLOSE_GOING_AWAY, "heartbeat timeout");
        }

        self.cleanup_at = self
            .connections
            .values()
            .any(|connection| connection.player_id.is_some())
            .then(|| now + self.config.heartbeat_timeout);
    }
}

/// Serialize an event and enqueue it on a connection's writer.
///
/// Failure means the writer is gone; the reader's close notification is
/// already on its way to the mailbox.
fn send_event(tx: &UnboundedSender<Message>, event: &ServerEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            let _ = tx.send(Message::Text(json));
        }
        Err(source) => tracing::error!(%source, "failed to serialize server event"),
    }
}

/// Forward enqueued frames to the socket until it closes.
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: UnboundedReceiver<Message>,
) {
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, Message::Close(_));

        if sink.send(message).await.is_err() || closing {
            break;
        }
    }
}

/// Forward socket frames into the cell's mailbox until the socket closes.
async fn read_frames(
    mut stream: SplitStream<WebSocket>,
    connection_id: u64,
    mailbox: UnboundedSender<ShardMessage>,
) {
    loop {
        let frame = match stream.next().await {
            Some(Ok(Message::Text(text))) => Inbound::Text(text),
            Some(Ok(Message::Binary(_))) => Inbound::Binary,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => Inbound::Closed,
        };

        let closed = matches!(frame, Inbound::Closed);

        if mailbox
            .send(ShardMessage::Inbound {
                connection_id,
                frame,
            })
            .is_err()
            || closed
        {
            break;
        }
    }
}
