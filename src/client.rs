//! Async driver tying the socket, the session and the UI together.
//!
//! The protocol core is synchronous. [`Client`] owns it and serializes
//! everything that can touch it through one `tokio::select!` loop:
//!
//! ```text
//!   transport task ──(generation, TransportEvent)──┐
//!   channel bindings ──(topic, ServerEvent)────────┼──► Client::run ──► Socket
//!   ClientHandle ──ClientCommand───────────────────┘          │
//!                                                              └──► SessionManager ──► UiSink
//! ```
//!
//! Binding callbacks never reach back into the socket; they parse the
//! payload into a [`ServerEvent`] and forward it on an unbounded channel.
//! The socket's send and message hooks forward frame text the same way; it
//! is drained into the UI after every step so log lines keep wire order.
//!
//! Reconnecting is the driver's policy: after an unexpected close it waits
//! `reconnect_delay` and calls `connect()` again, up to `reconnect_attempts`
//! consecutive failures.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::{Config, Flow};
use crate::protocol::{Frame, ServerEvent, PHX_REPLY};
use crate::session::{Outcome, SessionManager, SessionStore};
use crate::socket::{ChannelId, JoinParams, Socket, SocketError, SocketOptions, SocketState};
use crate::transport::websocket::EventReceiver;
use crate::transport::{Connector, Generation, TransportEvent};
use crate::ui::{Direction, Level, UiEvent, UiSink};

/// Events bound on the user channel.
const USER_EVENTS: [&str; 4] = [PHX_REPLY, "profile_update", "auth_success", "auth_error"];

/// Events bound on the echo channel.
const ECHO_EVENTS: [&str; 5] = [PHX_REPLY, "echo", "update", "auth_success", "auth_error"];

/// Driver tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Channel to join once a session exists.
    pub flow: Flow,
    /// Consecutive failed connects before [`Client::run`] gives up.
    pub reconnect_attempts: u32,
    /// Fixed delay before each reconnect.
    pub reconnect_delay: Duration,
    /// Passed to the socket.
    pub socket: SocketOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ClientOptions {
    fn from(config: &Config) -> Self {
        Self {
            flow: config.flow,
            reconnect_attempts: config.reconnect_attempts,
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            socket: SocketOptions {
                max_buffered_frames: config.max_buffered_frames,
            },
        }
    }
}

/// Requests sent to a running [`Client`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    /// Push an application event on the session channel.
    Push {
        /// Event name.
        event: String,
        /// Payload.
        payload: Value,
    },
    /// Clear the session and reset the socket.
    Logout,
    /// Close the connection and return from [`Client::run`].
    Shutdown,
}

/// Cloneable sender for [`ClientCommand`]s.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: mpsc::UnboundedSender<ClientCommand>,
}

impl ClientHandle {
    /// Queue `command`. Returns `false` if the client is gone.
    pub fn send(&self, command: ClientCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    /// Queue a push on the session channel.
    pub fn push(&self, event: impl Into<String>, payload: Value) -> bool {
        self.send(ClientCommand::Push {
            event: event.into(),
            payload,
        })
    }

    /// Queue a logout.
    pub fn logout(&self) -> bool {
        self.send(ClientCommand::Logout)
    }

    /// Queue a shutdown.
    pub fn shutdown(&self) -> bool {
        self.send(ClientCommand::Shutdown)
    }
}

/// A typed event forwarded by a channel binding.
#[derive(Debug)]
struct ChannelMessage {
    topic: String,
    event: ServerEvent,
}

/// Owner of the socket, the session and the UI sink.
pub struct Client<C: Connector, S: SessionStore, U: UiSink> {
    socket: Socket<C>,
    transport_rx: EventReceiver,
    session: SessionManager<S>,
    ui: U,
    options: ClientOptions,

    channel_tx: mpsc::UnboundedSender<ChannelMessage>,
    channel_rx: mpsc::UnboundedReceiver<ChannelMessage>,
    frame_rx: mpsc::UnboundedReceiver<(Direction, String)>,
    command_tx: mpsc::UnboundedSender<ClientCommand>,
    command_rx: mpsc::UnboundedReceiver<ClientCommand>,

    session_channel: Option<ChannelId>,
    reconnect_at: Option<Instant>,
    failed_connects: u32,
}

impl<C: Connector, S: SessionStore, U: UiSink> std::fmt::Debug for Client<C, S, U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.socket.state())
            .field("session_channel", &self.session_channel)
            .field("options", &self.options)
            .field("failed_connects", &self.failed_connects)
            .finish_non_exhaustive()
    }
}

impl<C: Connector, S: SessionStore, U: UiSink> Client<C, S, U> {
    /// Build a client. `transport_rx` must be the queue `connector`'s
    /// transports report into.
    pub fn new(
        connector: C,
        transport_rx: EventReceiver,
        session: SessionManager<S>,
        ui: U,
        options: ClientOptions,
    ) -> Self {
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();

        let mut socket = Socket::with_options(connector, options.socket);
        for direction in [Direction::Outgoing, Direction::Incoming] {
            let tx = frame_tx.clone();
            let forward = move |frame: &Frame| {
                if let Ok(text) = frame.encode() {
                    let _ = tx.send((direction, text));
                }
            };
            match direction {
                Direction::Outgoing => socket.on_send(forward),
                Direction::Incoming => socket.on_message(forward),
            }
        }

        Self {
            socket,
            transport_rx,
            session,
            ui,
            options,
            channel_tx,
            channel_rx,
            frame_rx,
            command_tx,
            command_rx,
            session_channel: None,
            reconnect_at: None,
            failed_connects: 0,
        }
    }

    /// Handle for sending commands to the running loop.
    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            tx: self.command_tx.clone(),
        }
    }

    /// The socket.
    pub fn socket(&self) -> &Socket<C> {
        &self.socket
    }

    /// The session manager.
    pub fn session(&self) -> &SessionManager<S> {
        &self.session
    }

    /// The UI sink.
    pub fn ui(&self) -> &U {
        &self.ui
    }

    /// Channel currently carrying the session, if any.
    pub fn session_channel(&self) -> Option<ChannelId> {
        self.session_channel
    }

    /// Join the session channel (if a session exists) and connect.
    ///
    /// The join is buffered until the transport opens.
    pub fn start(&mut self) -> Result<()> {
        self.attach_session_channel()
            .context("Failed to join session channel")?;
        if let Err(e) = self.socket.connect() {
            self.ui.emit(UiEvent::message(Level::Error, format!("Connection error: {e}")));
            self.schedule_reconnect();
        }
        self.drain_frames();
        Ok(())
    }

    /// Run until shutdown, or until reconnecting gives up.
    ///
    /// # Errors
    ///
    /// Returns an error once `reconnect_attempts` consecutive connects have
    /// failed, or if the session store fails.
    pub async fn run(&mut self) -> Result<()> {
        self.start()?;

        loop {
            let deadline = self.reconnect_at.unwrap_or_else(Instant::now);

            tokio::select! {
                Some((generation, event)) = self.transport_rx.recv() => {
                    self.on_transport_event(generation, event)?;
                }

                Some(message) = self.channel_rx.recv() => {
                    self.on_channel_message(message)?;
                }

                Some(command) = self.command_rx.recv() => {
                    if !self.on_command(command)? {
                        return Ok(());
                    }
                }

                _ = tokio::time::sleep_until(deadline), if self.reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    log::info!(
                        "[Client] Reconnecting (attempt {}/{})",
                        self.failed_connects,
                        self.options.reconnect_attempts
                    );
                    if let Err(e) = self.socket.connect() {
                        self.ui.emit(UiEvent::message(Level::Error, format!("Connection error: {e}")));
                        self.schedule_reconnect();
                    }
                }

                else => {
                    log::info!("[Client] All event sources closed");
                    return Ok(());
                }
            }

            if self.gave_up() {
                anyhow::bail!(
                    "Gave up after {} failed connection attempts",
                    self.failed_connects
                );
            }
        }
    }

    fn on_transport_event(&mut self, generation: Generation, event: TransportEvent) -> Result<()> {
        let current = generation == self.socket.generation();
        if current {
            match &event {
                TransportEvent::Open => self.frame(Direction::Incoming, "WebSocket connected"),
                TransportEvent::Message(_) => {}
                TransportEvent::Unsent(texts) => self.ui.emit(UiEvent::message(
                    Level::Info,
                    format!("Re-queued {} unsent frame(s)", texts.len()),
                )),
                TransportEvent::Close { code, .. } => {
                    self.frame(Direction::Incoming, &format!("WebSocket closed ({code})"));
                }
                TransportEvent::Error(msg) => {
                    self.frame(Direction::Incoming, &format!("WebSocket error: {msg}"));
                }
            }
        }

        let before = self.socket.state();
        self.socket.handle_event(generation, event);
        let after = self.socket.state();
        self.drain_frames();

        if after == SocketState::Open && before != SocketState::Open {
            self.failed_connects = 0;
            self.reconnect_at = None;
        }
        if after == SocketState::Closed && before != SocketState::Closed {
            self.schedule_reconnect();
        }
        Ok(())
    }

    fn on_channel_message(&mut self, message: ChannelMessage) -> Result<()> {
        let ChannelMessage { topic, event } = message;
        log::debug!("[Client] '{}' on {}", event.name(), topic);

        if self.options.flow == Flow::Echo {
            if let ServerEvent::JoinReply(reply) = &event {
                self.ui.emit(UiEvent::message(
                    Level::Info,
                    format!("{topic} join reply: {}", reply.raw),
                ));
                return Ok(());
            }
        }

        match self.session.apply(&event, &mut self.ui)? {
            Outcome::Invalidated => {
                if let Some(id) = self.session_channel.take() {
                    self.socket.remove_channel(id);
                }
            }
            Outcome::Authenticated if self.session_channel.is_none() => {
                self.attach_session_channel()?;
            }
            _ => {}
        }
        self.drain_frames();
        Ok(())
    }

    /// Returns `false` when the loop should stop.
    fn on_command(&mut self, command: ClientCommand) -> Result<bool> {
        match command {
            ClientCommand::Push { event, payload } => {
                let Some(mut channel) = self
                    .session_channel
                    .and_then(|id| self.socket.channel_mut(id))
                else {
                    self.ui.emit(UiEvent::message(
                        Level::Error,
                        format!("Cannot push '{event}': no session channel"),
                    ));
                    return Ok(true);
                };
                if let Err(e) = channel.push(&event, payload) {
                    self.ui.emit(UiEvent::message(Level::Error, format!("Push failed: {e}")));
                }
                self.drain_frames();
                Ok(true)
            }
            ClientCommand::Logout => {
                self.session.logout(&mut self.ui)?;
                self.session_channel = None;
                self.socket.reset();
                self.reconnect_at = None;
                self.failed_connects = 0;
                if let Err(e) = self.socket.connect() {
                    self.ui.emit(UiEvent::message(Level::Error, format!("Connection error: {e}")));
                    self.schedule_reconnect();
                }
                Ok(true)
            }
            ClientCommand::Shutdown => {
                log::info!("[Client] Shutting down");
                self.reconnect_at = None;
                self.socket.disconnect();
                Ok(false)
            }
        }
    }

    /// Attach and join the channel for the configured flow.
    fn attach_session_channel(&mut self) -> Result<(), SocketError> {
        let session = self.session.session();
        let (topic, params, credential, events): (_, _, _, &'static [&'static str]) = match self.options.flow {
            Flow::User => (
                session.user_topic(),
                JoinParams::default(),
                session.credential.clone(),
                &USER_EVENTS,
            ),
            Flow::Echo => (session.echo_topic(), JoinParams::Empty, None, &ECHO_EVENTS),
        };
        let Some(topic) = topic else {
            self.ui.emit(UiEvent::message(
                Level::Info,
                "No session found, not joining a channel",
            ));
            return Ok(());
        };

        let mut channel = self.socket.channel(topic.clone());
        channel.params(params);
        for &event in events {
            let tx = self.channel_tx.clone();
            let topic = topic.clone();
            channel.on(event, move |payload| {
                let _ = tx.send(ChannelMessage {
                    topic: topic.clone(),
                    event: ServerEvent::parse(event, payload),
                });
            });
        }
        channel.on_close(|topic| log::debug!("[Channel] {topic} lost its transport"));

        let id = channel.id();
        channel.join(credential.as_deref())?;
        log::info!("[Client] Joining {topic}");
        self.session_channel = Some(id);
        Ok(())
    }

    fn schedule_reconnect(&mut self) {
        self.failed_connects += 1;
        if self.gave_up() {
            return;
        }
        log::info!(
            "[Client] Connection lost, retrying in {}ms",
            self.options.reconnect_delay.as_millis()
        );
        self.reconnect_at = Some(Instant::now() + self.options.reconnect_delay);
    }

    fn gave_up(&self) -> bool {
        self.failed_connects > self.options.reconnect_attempts
    }

    /// Move frame lines queued by the socket hooks into the UI.
    fn drain_frames(&mut self) {
        while let Ok((direction, text)) = self.frame_rx.try_recv() {
            self.ui.emit(UiEvent::Frame { direction, text });
        }
    }

    fn frame(&mut self, direction: Direction, text: &str) {
        self.ui.emit(UiEvent::Frame {
            direction,
            text: text.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PHX_JOIN;
    use crate::session::{Exchange, MemoryStore};
    use crate::transport::memory::{MemoryConnector, MemoryWire};
    use serde_json::json;

    fn logged_in_client(flow: Flow) -> (Client<MemoryConnector, MemoryStore, Vec<UiEvent>>, MemoryWire) {
        let (connector, wire) = MemoryConnector::new();
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut session = SessionManager::new(MemoryStore::new());
        let mut ui: Vec<UiEvent> = Vec::new();
        session
            .establish(
                Exchange {
                    credential: "jwt-42".into(),
                    identity: json!({"id": 42}),
                },
                &mut ui,
            )
            .unwrap();
        let options = ClientOptions {
            flow,
            ..ClientOptions::default()
        };
        (Client::new(connector, rx, session, Vec::new(), options), wire)
    }

    fn open(client: &mut Client<MemoryConnector, MemoryStore, Vec<UiEvent>>) {
        client.start().unwrap();
        let generation = client.socket().generation();
        client.on_transport_event(generation, TransportEvent::Open).unwrap();
    }

    /// Deliver a server frame and apply whatever the bindings forwarded.
    fn deliver(client: &mut Client<MemoryConnector, MemoryStore, Vec<UiEvent>>, frame: Frame) {
        let generation = client.socket().generation();
        client
            .on_transport_event(generation, TransportEvent::Message(frame.encode().unwrap()))
            .unwrap();
        while let Ok(message) = client.channel_rx.try_recv() {
            client.on_channel_message(message).unwrap();
        }
    }

    fn frame_lines(client: &Client<MemoryConnector, MemoryStore, Vec<UiEvent>>, want: Direction) -> Vec<String> {
        client
            .ui()
            .iter()
            .filter_map(|e| match e {
                UiEvent::Frame { direction, text } if *direction == want => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_options_from_config() {
        let config = Config {
            flow: Flow::Echo,
            reconnect_attempts: 2,
            reconnect_delay_ms: 250,
            max_buffered_frames: Some(8),
            ..Config::default()
        };
        let options = ClientOptions::from(&config);
        assert_eq!(options.flow, Flow::Echo);
        assert_eq!(options.reconnect_delay, Duration::from_millis(250));
        assert_eq!(options.socket.max_buffered_frames, Some(8));
    }

    #[test]
    fn test_echo_flow_auth_error_logs_out() {
        let (mut client, _wire) = logged_in_client(Flow::Echo);
        open(&mut client);

        deliver(
            &mut client,
            Frame::new("echo:42", "auth_error", json!({"message": "bad sig"})),
        );

        assert!(client.ui().contains(&UiEvent::LoggedOut));
    }

    #[test]
    fn test_echo_flow_auth_success_stores_credential() {
        let (mut client, _wire) = logged_in_client(Flow::Echo);
        open(&mut client);

        deliver(
            &mut client,
            Frame::new(
                "echo:42",
                "auth_success",
                json!({"token": "jwt-new", "user": {"id": 42, "points": 1}}),
            ),
        );

        assert_eq!(
            client.session().session().credential.as_deref(),
            Some("jwt-new")
        );
        assert!(client.session_channel().is_some());
    }

    #[test]
    fn test_outgoing_frames_reach_the_ui() {
        let (mut client, wire) = logged_in_client(Flow::User);
        open(&mut client);

        let written = wire.sent_texts();
        assert_eq!(written.len(), 1);
        let outgoing = frame_lines(&client, Direction::Outgoing);
        assert_eq!(outgoing, written);
        assert_eq!(Frame::decode(&outgoing[0]).unwrap().event, PHX_JOIN);
    }

    #[test]
    fn test_incoming_frames_reach_the_ui_once() {
        let (mut client, _wire) = logged_in_client(Flow::User);
        open(&mut client);

        deliver(
            &mut client,
            Frame::new("user:9", "profile_update", json!({"user": {"id": 9}})),
        );

        let incoming = frame_lines(&client, Direction::Incoming);
        assert_eq!(incoming.len(), 2);
        assert_eq!(incoming[0], "WebSocket connected");
        assert_eq!(Frame::decode(&incoming[1]).unwrap().topic, "user:9");
    }

    #[test]
    fn test_start_without_session_joins_nothing() {
        let (connector, _wire) = crate::transport::memory::MemoryConnector::new();
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut client = Client::new(
            connector,
            rx,
            SessionManager::new(MemoryStore::new()),
            Vec::<UiEvent>::new(),
            ClientOptions::default(),
        );
        client.start().unwrap();

        assert_eq!(client.session_channel(), None);
        assert_eq!(client.socket().state(), SocketState::Connecting);
        assert!(matches!(client.ui()[0], UiEvent::Message { level: Level::Info, .. }));
    }
}
