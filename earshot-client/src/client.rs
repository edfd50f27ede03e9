//! The cell channel session: socket driver, cadences, and dispatch.

use crate::{
    config::Config,
    error::{ConnectError, ConnectErrorType, SendError, SendErrorType},
    event::Event,
    listener::{EventStream, Listeners},
    selector::{PeerSelector, PeerTransition},
};
use earshot_model::{
    event::{ClientEvent, PositionUpdate, Register, ServerEvent, SignalRequest},
    geometry::Vec3,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Instant;
use tokio::{
    net::TcpStream,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::{self, Instant as TokioInstant},
};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

/// A session over one cell channel.
///
/// Connecting opens the channel and immediately registers with the one-time
/// session token from admission; from then on a background driver owns the
/// socket, heartbeats while the channel is open, polls the configured
/// position source, and dispatches the cell's frames to subscribers. When a
/// selector is configured, its connect/disconnect decisions are dispatched
/// alongside the cell's frames.
///
/// # Examples
///
/// Join a cell and log every signaling payload relayed to us:
///
/// ```no_run
/// use earshot_client::{CellClient, Config, Event};
///
/// # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::builder(
///     "ws://localhost:8787/cell/cell:0:0:0",
///     "alice",
///     "token-from-admission",
/// )
/// .position_source(|| earshot_model::geometry::Vec3::new(0.0, 0.0, 0.0))
/// .build();
///
/// let client = CellClient::connect(config).await?;
/// let mut events = client.events();
///
/// while let Some(event) = events.next().await {
///     if let Event::Signal(signal) = event {
///         println!("{} sent {:?}", signal.from, signal.payload);
///     }
/// }
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct CellClient {
    command_tx: UnboundedSender<Command>,
    listeners: Listeners<Event>,
    player_id: String,
}

impl CellClient {
    /// Open the cell channel and register.
    ///
    /// Registration is acknowledged asynchronously: subscribe via
    /// [`events`] to observe the `registered` frame (or the error and close
    /// that follow an invalid token).
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectErrorType::UrlInvalid`] error type if the
    /// configured URL can't be parsed.
    ///
    /// Returns a [`ConnectErrorType::Establishing`] error type if the
    /// connection couldn't be established.
    ///
    /// [`events`]: Self::events
    pub async fn connect(config: Config) -> Result<Self, ConnectError> {
        if Url::parse(config.url()).is_err() {
            return Err(ConnectError {
                kind: ConnectErrorType::UrlInvalid {
                    url: config.url().to_owned(),
                },
                source: None,
            });
        }

        tracing::debug!(url = %config.url(), "connecting to cell");
        let (connection, _) = tokio_tungstenite::connect_async(config.url())
            .await
            .map_err(|source| ConnectError {
                kind: ConnectErrorType::Establishing,
                source: Some(Box::new(source)),
            })?;
        tracing::debug!(url = %config.url(), "connected to cell");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let listeners = Listeners::default();
        let player_id = config.player_id().to_owned();
        let selector = config.selector().cloned().map(PeerSelector::new);

        tokio::spawn(
            Driver {
                config,
                connection,
                command_rx,
                listeners: listeners.clone(),
                registered: false,
                selector,
            }
            .run(),
        );

        Ok(Self {
            command_tx,
            listeners,
            player_id,
        })
    }

    /// The player this session registers as.
    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    /// Subscribe to the session's events.
    ///
    /// Dropping the returned stream unsubscribes it.
    pub fn events(&self) -> EventStream<Event> {
        self.listeners.add()
    }

    /// Send a frame over the channel.
    ///
    /// # Errors
    ///
    /// Returns a [`SendErrorType::Sending`] error type if the channel has
    /// closed.
    pub fn send(&self, event: ClientEvent) -> Result<(), SendError> {
        self.command_tx
            .send(Command::Send(event))
            .map_err(|_| SendError {
                kind: SendErrorType::Sending,
                source: None,
            })
    }

    /// Relay an opaque signaling payload to another player in the cell.
    ///
    /// # Errors
    ///
    /// Refer to [`send`] for possible errors.
    ///
    /// [`send`]: Self::send
    pub fn send_signal(
        &self,
        target_id: impl Into<String>,
        payload: Value,
    ) -> Result<(), SendError> {
        self.send(SignalRequest::new(target_id, payload).into())
    }

    /// Report a position outside the configured polling cadence.
    ///
    /// # Errors
    ///
    /// Refer to [`send`] for possible errors.
    ///
    /// [`send`]: Self::send
    pub fn send_position(&self, position: Vec3) -> Result<(), SendError> {
        self.send(PositionUpdate::new(position).into())
    }

    /// Close the channel, stopping every timer the session owns.
    pub fn close(&self) {
        let _ = self.command_tx.send(Command::Close);
    }
}

/// Request from the client handle to the driver.
enum Command {
    Send(ClientEvent),
    Close,
}

/// Owner of the socket and of every session timer.
struct Driver {
    config: Config,
    connection: WebSocketStream<MaybeTlsStream<TcpStream>>,
    command_rx: UnboundedReceiver<Command>,
    listeners: Listeners<Event>,
    registered: bool,
    selector: Option<PeerSelector>,
}

impl Driver {
    async fn run(mut self) {
        let register = Register::new(
            self.config.player_id().to_owned(),
            self.config.session_token().to_owned(),
        );
        if let Err(source) = self.send_frame(&register.into()).await {
            tracing::warn!(%source, "failed to register");
            self.finish(None);

            return;
        }

        let mut heartbeat = time::interval_at(
            TokioInstant::now() + self.config.heartbeat_interval(),
            self.config.heartbeat_interval(),
        );
        let mut position_poll = time::interval(self.config.position_interval());

        let close_code = loop {
            let selector_deadline = self
                .selector
                .as_ref()
                .and_then(PeerSelector::next_evaluation)
                .map(TokioInstant::from_std);

            tokio::select! {
                message = self.connection.next() => match message {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|frame| frame.code.into());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(source)) => {
                        tracing::warn!(%source, "cell channel failed");

                        break None;
                    }
                    None => break None,
                },
                command = self.command_rx.recv() => match command {
                    Some(Command::Send(event)) => {
                        if let Err(source) = self.send_frame(&event).await {
                            tracing::warn!(%source, "failed to send frame");

                            break None;
                        }
                    }
                    Some(Command::Close) | None => {
                        let _ = self.connection.send(Message::Close(None)).await;

                        break None;
                    }
                },
                _ = heartbeat.tick() => {
                    if let Err(source) = self.send_frame(&ClientEvent::Heartbeat).await {
                        tracing::warn!(%source, "failed to heartbeat");

                        break None;
                    }
                }
                _ = position_poll.tick(), if self.config.position_source().is_some() => {
                    if let Err(source) = self.poll_position().await {
                        tracing::warn!(%source, "failed to send position");

                        break None;
                    }
                }
                _ = time::sleep_until(selector_deadline.unwrap_or_else(TokioInstant::now)),
                    if selector_deadline.is_some() =>
                {
                    self.run_selector();
                }
            }
        };

        self.finish(close_code);
    }

    /// Dispatch the close and end every subscriber stream.
    fn finish(&mut self, close_code: Option<u16>) {
        self.listeners.send(Event::Closed(close_code));
        self.listeners.close();
    }

    fn handle_text(&mut self, text: &str) {
        let event = match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => event,
            Err(source) => {
                tracing::warn!(%source, "unrecognized frame from cell");

                return;
            }
        };

        match &event {
            ServerEvent::Registered(_) => self.registered = true,
            ServerEvent::Peers(diff) => {
                if let Some(selector) = self.selector.as_mut() {
                    selector.apply_peer_diff(diff, Instant::now());
                }
            }
            _ => {}
        }

        self.listeners.send(Event::from(event));
    }

    /// Poll the position source, reporting to the cell and the selector.
    ///
    /// Quiet until the cell has acknowledged our register.
    async fn poll_position(&mut self) -> Result<(), SendError> {
        if !self.registered {
            return Ok(());
        }

        let Some(source) = self.config.position_source().cloned() else {
            return Ok(());
        };
        let position = source.position();

        self.send_frame(&PositionUpdate::new(position).into()).await?;

        if let Some(selector) = self.selector.as_mut() {
            selector.update_local_position(position, Instant::now());
        }

        Ok(())
    }

    fn run_selector(&mut self) {
        let Some(selector) = self.selector.as_mut() else {
            return;
        };

        for transition in selector.evaluate_due(Instant::now()) {
            let event = match transition {
                PeerTransition::Connect(id) => Event::PeerConnect(id),
                PeerTransition::Disconnect(id) => Event::PeerDisconnect(id),
            };

            self.listeners.send(event);
        }
    }

    async fn send_frame(&mut self, event: &ClientEvent) -> Result<(), SendError> {
        let json = serde_json::to_string(event).map_err(|source| SendError {
            kind: SendErrorType::Serializing,
            source: Some(Box::new(source)),
        })?;

        self.connection
            .send(Message::Text(json))
            .await
            .map_err(|source| SendError {
                kind: SendErrorType::Sending,
                source: Some(Box::new(source)),
            })
    }
}
