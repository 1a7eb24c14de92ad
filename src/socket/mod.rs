//! Connection multiplexer.
//!
//! [`Socket`] owns one [`Transport`] and any number of [`Channel`]s layered
//! over it. It hands out frame refs, buffers outbound frames while the
//! transport is not open, and routes inbound frames to every channel whose
//! topic matches.
//!
//! # Architecture
//!
//! ```text
//!   Socket                         Channel ("user:42")
//!     │  channel(topic) ─────────►   on("phx_reply", cb)
//!     │                              join(Some(jwt))  ──► phx_join frame
//!     │
//!     │  handle_event(Open)      ──► flush buffer (FIFO), rejoin channels
//!     │  handle_event(Message)   ──► decode, route by topic, fire bindings
//!     │  handle_event(Unsent)    ──► re-buffer at the front
//!     │  handle_event(Close)     ──► channels' on_close hooks
//!     │  handle_event(Error)     ──► error hooks (no retry)
//! ```
//!
//! The socket is synchronous and performs no I/O of its own. Whoever owns it
//! (see [`Client`](crate::client::Client)) pumps [`TransportEvent`]s into
//! [`Socket::handle_event`]. Reconnection is the owner's decision: the
//! socket never calls `connect()` on its own.
//!
//! # Usage
//!
//! ```ignore
//! let (connector, events) = WsConnector::new("wss://example.com/socket/websocket");
//! let mut socket = Socket::new(connector);
//!
//! let mut channel = socket.channel("user:42");
//! channel.on("profile_update", |payload| println!("{payload}"));
//! channel.join(Some("jwt"))?;          // buffered until open
//!
//! socket.connect()?;
//! while let Some((generation, event)) = events.recv().await {
//!     socket.handle_event(generation, event);
//! }
//! ```

pub mod channel;

use std::collections::{HashSet, VecDeque};

use serde_json::Value;

use crate::protocol::{Frame, Ref, PHX_LEAVE};
use crate::transport::{Connector, Generation, Transport, TransportError, TransportEvent};

pub use channel::{Binding, Channel, ChannelId, CloseHook, JoinParams, JoinState};

/// Socket connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketState {
    /// `connect()` never called.
    #[default]
    Disconnected,
    /// Transport created, waiting for open.
    Connecting,
    /// Transport open; frames are written immediately.
    Open,
    /// Transport closed or failed; frames are buffered.
    Closed,
}

/// Errors surfaced by the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketError {
    /// The connector could not create a transport.
    ConnectFailed(String),
    /// The transport reported a failure.
    Transport(String),
    /// An inbound frame was not valid JSON of the frame shape.
    Decode(String),
    /// An outbound frame could not be serialized.
    Encode(String),
    /// The outbound buffer is at its configured capacity.
    BufferFull {
        /// Configured capacity.
        capacity: usize,
    },
}

impl std::fmt::Display for SocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectFailed(msg) => write!(f, "Connect failed: {msg}"),
            Self::Transport(msg) => write!(f, "Transport error: {msg}"),
            Self::Decode(msg) => write!(f, "Invalid inbound frame: {msg}"),
            Self::Encode(msg) => write!(f, "Could not encode frame: {msg}"),
            Self::BufferFull { capacity } => {
                write!(f, "Send buffer full ({capacity} frames)")
            }
        }
    }
}

impl std::error::Error for SocketError {}

impl From<TransportError> for SocketError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConnectFailed(msg) => Self::ConnectFailed(msg),
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Tunables for a [`Socket`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketOptions {
    /// Maximum frames held while not open. `None` = unbounded.
    pub max_buffered_frames: Option<usize>,
}

type OpenHook = Box<dyn FnMut() + Send>;
type SocketCloseHook = Box<dyn FnMut(u16, &str) + Send>;
type ErrorHook = Box<dyn FnMut(&SocketError) + Send>;
type MessageHook = Box<dyn FnMut(&Frame) + Send>;
type SendHook = Box<dyn FnMut(&Frame) + Send>;

/// Connection multiplexer over a single transport.
pub struct Socket<C: Connector> {
    connector: C,
    transport: Option<C::Transport>,
    generation: Generation,
    state: SocketState,
    options: SocketOptions,

    /// Last ref handed out; refs start at 1.
    last_ref: Ref,
    send_buffer: VecDeque<Frame>,

    channels: Vec<Channel>,
    next_channel_id: u64,

    open_hooks: Vec<OpenHook>,
    close_hooks: Vec<SocketCloseHook>,
    error_hooks: Vec<ErrorHook>,
    message_hooks: Vec<MessageHook>,
    send_hooks: Vec<SendHook>,
}

impl<C: Connector + std::fmt::Debug> std::fmt::Debug for Socket<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("connector", &self.connector)
            .field("generation", &self.generation)
            .field("state", &self.state)
            .field("last_ref", &self.last_ref)
            .field("buffered", &self.send_buffer.len())
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Socket<C> {
    /// Create a disconnected socket.
    pub fn new(connector: C) -> Self {
        Self::with_options(connector, SocketOptions::default())
    }

    /// Create a disconnected socket with explicit options.
    pub fn with_options(connector: C, options: SocketOptions) -> Self {
        Self {
            connector,
            transport: None,
            generation: 0,
            state: SocketState::Disconnected,
            options,
            last_ref: 0,
            send_buffer: VecDeque::new(),
            channels: Vec::new(),
            next_channel_id: 0,
            open_hooks: Vec::new(),
            close_hooks: Vec::new(),
            error_hooks: Vec::new(),
            message_hooks: Vec::new(),
            send_hooks: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// (Re)establish the transport.
    ///
    /// No-op while connecting or open. Any previous transport is closed and
    /// replaced; events it still emits are ignored. The open event arrives
    /// later through [`Self::handle_event`].
    pub fn connect(&mut self) -> Result<(), SocketError> {
        if matches!(self.state, SocketState::Connecting | SocketState::Open) {
            log::debug!("[Socket] connect() ignored, already {:?}", self.state);
            return Ok(());
        }

        if let Some(mut old) = self.transport.take() {
            old.close();
        }

        self.generation += 1;
        match self.connector.connect(self.generation) {
            Ok(transport) => {
                log::debug!("[Socket] Connecting (generation {})", self.generation);
                self.transport = Some(transport);
                self.state = SocketState::Connecting;
                Ok(())
            }
            Err(e) => {
                let err = SocketError::from(e);
                log::warn!("[Socket] {err}");
                self.fire_error(&err);
                Err(err)
            }
        }
    }

    /// Close the transport. Channels keep their bindings and join state.
    pub fn disconnect(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        transport.close();
        let was_live = matches!(self.state, SocketState::Connecting | SocketState::Open);
        self.state = SocketState::Closed;
        if was_live {
            self.notify_closed(1000, "client disconnect");
        }
    }

    /// Disconnect and forget every channel and buffered frame.
    ///
    /// The ref counter is kept; refs are never reused.
    pub fn reset(&mut self) {
        self.disconnect();
        self.channels.clear();
        self.send_buffer.clear();
        log::info!("[Socket] Reset");
    }

    /// Feed one transport event into the socket.
    ///
    /// Events whose `generation` does not match the current transport are
    /// dropped.
    pub fn handle_event(&mut self, generation: Generation, event: TransportEvent) {
        if self.transport.is_none() || generation != self.generation {
            log::debug!(
                "[Socket] Ignoring {:?} from stale transport {} (current {})",
                event,
                generation,
                self.generation
            );
            return;
        }

        match event {
            TransportEvent::Open => self.handle_open(),
            TransportEvent::Message(text) => self.handle_message(&text),
            TransportEvent::Unsent(texts) => self.handle_unsent(texts),
            TransportEvent::Close { code, reason } => {
                log::info!("[Socket] Transport closed ({code}) {reason}");
                self.transport = None;
                self.state = SocketState::Closed;
                self.notify_closed(code, &reason);
            }
            TransportEvent::Error(msg) => {
                log::warn!("[Socket] Transport error: {msg}");
                self.fire_error(&SocketError::Transport(msg));
            }
        }
    }

    fn handle_open(&mut self) {
        log::info!("[Socket] Open, flushing {} buffered frame(s)", self.send_buffer.len());
        self.state = SocketState::Open;

        let flushed_joins = self.flush_send_buffer();

        for index in 0..self.channels.len() {
            let channel = &self.channels[index];
            match channel.join_ref() {
                None => continue,
                Some(join_ref) if flushed_joins.contains(&join_ref) => continue,
                Some(_) => {}
            }
            if let Err(e) = self.rejoin_at(index) {
                log::warn!("[Socket] Rejoin of {} failed: {e}", self.channels[index].topic());
            }
        }

        for hook in &mut self.open_hooks {
            hook();
        }
    }

    /// Write buffered frames in FIFO order. Returns the refs of the
    /// `phx_join` frames that went out.
    fn flush_send_buffer(&mut self) -> HashSet<Ref> {
        let mut joined = HashSet::new();
        let mut failure = None;

        while let Some(frame) = self.send_buffer.pop_front() {
            let Some(transport) = self.transport.as_mut() else {
                self.send_buffer.push_front(frame);
                break;
            };
            let text = match frame.encode() {
                Ok(text) => text,
                Err(e) => {
                    log::warn!("[Socket] Dropping unencodable buffered frame: {e}");
                    continue;
                }
            };
            if let Err(e) = transport.send_text(text) {
                self.send_buffer.push_front(frame);
                failure = Some(SocketError::from(e));
                break;
            }
            if frame.is_join() {
                joined.extend(frame.msg_ref);
            }
            self.fire_sent(&frame);
        }

        if let Some(err) = failure {
            log::warn!("[Socket] Flush interrupted: {err}");
            self.fire_error(&err);
        }
        joined
    }

    fn handle_message(&mut self, text: &str) {
        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                let err = SocketError::Decode(e.to_string());
                log::warn!("[Socket] {err}");
                self.fire_error(&err);
                return;
            }
        };

        for hook in &mut self.message_hooks {
            hook(&frame);
        }

        let mut delivered = 0usize;
        for channel in self.channels.iter_mut().filter(|c| c.topic() == frame.topic) {
            channel.trigger(&frame);
            delivered += 1;
        }
        if delivered == 0 {
            log::debug!(
                "[Socket] No channel for topic {}, dropping '{}'",
                frame.topic,
                frame.event
            );
        }
    }

    /// Put frames the transport accepted but never wrote back at the head
    /// of the buffer, ahead of anything queued since. The capacity limit
    /// does not apply to them.
    fn handle_unsent(&mut self, texts: Vec<String>) {
        log::warn!("[Socket] Re-buffering {} unsent frame(s)", texts.len());
        for text in texts.into_iter().rev() {
            match Frame::decode(&text) {
                Ok(frame) => self.send_buffer.push_front(frame),
                Err(e) => log::warn!("[Socket] Dropping undecodable unsent frame: {e}"),
            }
        }
    }

    fn notify_closed(&mut self, code: u16, reason: &str) {
        for channel in &mut self.channels {
            channel.handle_close();
        }
        for hook in &mut self.close_hooks {
            hook(code, reason);
        }
    }

    fn fire_error(&mut self, err: &SocketError) {
        for hook in &mut self.error_hooks {
            hook(err);
        }
    }

    fn fire_sent(&mut self, frame: &Frame) {
        for hook in &mut self.send_hooks {
            hook(frame);
        }
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Hand out a fresh ref. Strictly increasing, starting at 1.
    pub fn next_ref(&mut self) -> Ref {
        self.last_ref += 1;
        self.last_ref
    }

    /// Send a frame now if open, otherwise buffer it.
    ///
    /// A write the transport rejects is buffered for the next open and the
    /// failure goes to the error hooks.
    pub fn send(&mut self, frame: Frame) -> Result<(), SocketError> {
        if self.state == SocketState::Open {
            if let Some(transport) = self.transport.as_mut() {
                let text = frame
                    .encode()
                    .map_err(|e| SocketError::Encode(e.to_string()))?;
                log::trace!("[Socket] -> {text}");
                match transport.send_text(text) {
                    Ok(()) => {
                        self.fire_sent(&frame);
                        return Ok(());
                    }
                    Err(e) => {
                        let err = SocketError::from(e);
                        log::warn!("[Socket] {err}, buffering '{}'", frame.event);
                        self.fire_error(&err);
                    }
                }
            }
        }
        self.buffer(frame)
    }

    fn buffer(&mut self, frame: Frame) -> Result<(), SocketError> {
        if let Some(capacity) = self.options.max_buffered_frames {
            if self.send_buffer.len() >= capacity {
                log::warn!("[Socket] Send buffer full, dropping '{}' on {}", frame.event, frame.topic);
                return Err(SocketError::BufferFull { capacity });
            }
        }
        self.send_buffer.push_back(frame);
        Ok(())
    }

    fn join_at(&mut self, index: usize, credential: Option<String>) -> Result<Ref, SocketError> {
        let join_ref = self.next_ref();
        let frame = self.channels[index].prepare_join(join_ref, credential);
        log::debug!("[Channel] Joining {} (ref {})", frame.topic, join_ref);
        self.send(frame)?;
        Ok(join_ref)
    }

    fn rejoin_at(&mut self, index: usize) -> Result<Option<Ref>, SocketError> {
        if self.channels[index].join_ref().is_none() {
            return Ok(None);
        }
        let credential = self.channels[index].credential().map(str::to_string);
        self.join_at(index, credential).map(Some)
    }

    fn push_at(&mut self, index: usize, event: &str, payload: Value) -> Result<Ref, SocketError> {
        let msg_ref = self.next_ref();
        let frame = Frame::new(self.channels[index].topic(), event, payload).with_ref(msg_ref);
        self.send(frame)?;
        Ok(msg_ref)
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    /// Create and attach a channel for `topic`. No join is sent.
    pub fn channel(&mut self, topic: impl Into<String>) -> ChannelMut<'_, C> {
        let id = ChannelId(self.next_channel_id);
        self.next_channel_id += 1;
        self.channels.push(Channel::new(id, topic.into()));
        let index = self.channels.len() - 1;
        ChannelMut {
            socket: self,
            index,
        }
    }

    /// Re-borrow an attached channel.
    pub fn channel_mut(&mut self, id: ChannelId) -> Option<ChannelMut<'_, C>> {
        let index = self.channels.iter().position(|c| c.id() == id)?;
        Some(ChannelMut {
            socket: self,
            index,
        })
    }

    /// First attached channel with `topic`.
    pub fn find_channel(&mut self, topic: &str) -> Option<ChannelMut<'_, C>> {
        let index = self.channels.iter().position(|c| c.topic() == topic)?;
        Some(ChannelMut {
            socket: self,
            index,
        })
    }

    /// Detach a channel. Its callbacks never fire again.
    pub fn remove_channel(&mut self, id: ChannelId) -> Option<Channel> {
        let index = self.channels.iter().position(|c| c.id() == id)?;
        Some(self.channels.remove(index))
    }

    /// Attached channels.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    // ------------------------------------------------------------------
    // Hooks
    // ------------------------------------------------------------------

    /// Run `hook` after every open (after flush and rejoin).
    pub fn on_open(&mut self, hook: impl FnMut() + Send + 'static) {
        self.open_hooks.push(Box::new(hook));
    }

    /// Run `hook` when the transport closes, with code and reason.
    pub fn on_close(&mut self, hook: impl FnMut(u16, &str) + Send + 'static) {
        self.close_hooks.push(Box::new(hook));
    }

    /// Run `hook` on transport, connect and decode failures.
    pub fn on_error(&mut self, hook: impl FnMut(&SocketError) + Send + 'static) {
        self.error_hooks.push(Box::new(hook));
    }

    /// Observe every decoded inbound frame before dispatch.
    pub fn on_message(&mut self, hook: impl FnMut(&Frame) + Send + 'static) {
        self.message_hooks.push(Box::new(hook));
    }

    /// Observe every frame handed to the transport, including flushed and
    /// rejoin frames. Buffered frames are reported when they go out.
    pub fn on_send(&mut self, hook: impl FnMut(&Frame) + Send + 'static) {
        self.send_hooks.push(Box::new(hook));
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Current connection state.
    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Whether frames are written immediately.
    pub fn is_open(&self) -> bool {
        self.state == SocketState::Open
    }

    /// Generation of the current (or last) transport.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Frames waiting for the next open, oldest first.
    pub fn buffered(&self) -> impl Iterator<Item = &Frame> {
        self.send_buffer.iter()
    }

    /// The connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }
}

/// Mutable view of one channel, borrowing its socket.
///
/// Returned by [`Socket::channel`], [`Socket::channel_mut`] and
/// [`Socket::find_channel`].
pub struct ChannelMut<'a, C: Connector> {
    socket: &'a mut Socket<C>,
    index: usize,
}

impl<C: Connector> std::fmt::Debug for ChannelMut<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ChannelMut").field(self.channel()).finish()
    }
}

impl<C: Connector> ChannelMut<'_, C> {
    fn channel(&self) -> &Channel {
        &self.socket.channels[self.index]
    }

    fn channel_mut(&mut self) -> &mut Channel {
        &mut self.socket.channels[self.index]
    }

    /// Channel handle.
    pub fn id(&self) -> ChannelId {
        self.channel().id()
    }

    /// Topic.
    pub fn topic(&self) -> &str {
        self.channel().topic()
    }

    /// Join state.
    pub fn state(&self) -> JoinState {
        self.channel().state()
    }

    /// Ref of the latest join attempt.
    pub fn join_ref(&self) -> Option<Ref> {
        self.channel().join_ref()
    }

    /// Replace the join payload builder.
    pub fn params(&mut self, params: JoinParams) -> &mut Self {
        self.channel_mut().set_params(params);
        self
    }

    /// Bind `callback` to `event`. Callbacks for one event fire in the
    /// order they were bound.
    pub fn on(
        &mut self,
        event: impl Into<String>,
        callback: impl FnMut(&Value) + Send + 'static,
    ) -> &mut Self {
        self.channel_mut().bind(event.into(), Box::new(callback));
        self
    }

    /// Run `hook` when the transport under this channel closes.
    pub fn on_close(&mut self, hook: impl FnMut(&str) + Send + 'static) -> &mut Self {
        self.channel_mut().bind_close(Box::new(hook));
        self
    }

    /// Send `phx_join` with a fresh ref.
    ///
    /// No idempotency guard: joining twice sends two frames.
    pub fn join(&mut self, credential: Option<&str>) -> Result<Ref, SocketError> {
        self.socket
            .join_at(self.index, credential.map(str::to_string))
    }

    /// Join again with the last credential, if a join was ever attempted.
    pub fn rejoin(&mut self) -> Result<Option<Ref>, SocketError> {
        self.socket.rejoin_at(self.index)
    }

    /// Send an application event on this topic with a fresh ref.
    pub fn push(&mut self, event: &str, payload: Value) -> Result<Ref, SocketError> {
        self.socket.push_at(self.index, event, payload)
    }

    /// Send `phx_leave` and detach the channel.
    pub fn leave(self) -> Result<Ref, SocketError> {
        let msg_ref = self
            .socket
            .push_at(self.index, PHX_LEAVE, serde_json::json!({}));
        let id = self.socket.channels[self.index].id();
        self.socket.remove_channel(id);
        msg_ref
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PHX_JOIN, PHX_REPLY};
    use crate::transport::memory::{MemoryConnector, MemoryWire};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn socket() -> (Socket<MemoryConnector>, MemoryWire) {
        let (connector, wire) = MemoryConnector::new();
        (Socket::new(connector), wire)
    }

    fn open(socket: &mut Socket<MemoryConnector>) {
        socket.connect().unwrap();
        let generation = socket.generation();
        socket.handle_event(generation, TransportEvent::Open);
    }

    fn inbound(socket: &mut Socket<MemoryConnector>, frame: &Frame) {
        let generation = socket.generation();
        socket.handle_event(generation, TransportEvent::Message(frame.encode().unwrap()));
    }

    #[test]
    fn test_next_ref_strictly_increasing() {
        let (mut socket, _wire) = socket();
        let refs: Vec<Ref> = (0..50).map(|_| socket.next_ref()).collect();
        assert_eq!(refs[0], 1);
        assert!(refs.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_send_buffers_until_open_fifo() {
        let (mut socket, wire) = socket();
        for n in 0..5 {
            socket
                .send(Frame::new("t", format!("e{n}"), json!(n)))
                .unwrap();
        }
        assert_eq!(socket.buffered().count(), 5);
        assert!(wire.sent_texts().is_empty());

        open(&mut socket);

        let events: Vec<String> = wire.sent_frames().into_iter().map(|f| f.event).collect();
        assert_eq!(events, vec!["e0", "e1", "e2", "e3", "e4"]);
        assert_eq!(socket.buffered().count(), 0);
    }

    #[test]
    fn test_send_while_open_is_immediate() {
        let (mut socket, wire) = socket();
        open(&mut socket);
        socket.send(Frame::new("t", "e", json!({}))).unwrap();
        assert_eq!(wire.sent_frames().len(), 1);
        assert_eq!(socket.buffered().count(), 0);
    }

    #[test]
    fn test_connect_is_noop_while_connecting() {
        let (mut socket, wire) = socket();
        socket.connect().unwrap();
        socket.connect().unwrap();
        assert_eq!(wire.connects(), vec![1]);
        assert_eq!(socket.state(), SocketState::Connecting);
    }

    #[test]
    fn test_connect_failure_reports_error() {
        let (mut socket, wire) = socket();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        socket.on_error(move |e| sink.lock().unwrap().push(e.clone()));

        wire.fail_next_connect("refused");
        let result = socket.connect();

        assert_eq!(result, Err(SocketError::ConnectFailed("refused".into())));
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert_eq!(socket.state(), SocketState::Disconnected);
    }

    #[test]
    fn test_buffer_limit() {
        let (connector, _wire) = MemoryConnector::new();
        let mut socket = Socket::with_options(
            connector,
            SocketOptions {
                max_buffered_frames: Some(2),
            },
        );
        socket.send(Frame::new("t", "a", json!({}))).unwrap();
        socket.send(Frame::new("t", "b", json!({}))).unwrap();
        assert_eq!(
            socket.send(Frame::new("t", "c", json!({}))),
            Err(SocketError::BufferFull { capacity: 2 })
        );
        assert_eq!(socket.buffered().count(), 2);
    }

    #[test]
    fn test_topic_isolation() {
        let (mut socket, _wire) = socket();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let a = Arc::clone(&seen);
        socket.channel("a").on("msg", move |_| a.lock().unwrap().push("a"));
        let b = Arc::clone(&seen);
        socket.channel("b").on("msg", move |_| b.lock().unwrap().push("b"));

        open(&mut socket);
        inbound(&mut socket, &Frame::new("a", "msg", json!({})));

        assert_eq!(*seen.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_frame_reaches_every_channel_with_topic() {
        let (mut socket, _wire) = socket();
        let count = Arc::new(Mutex::new(0));
        for _ in 0..2 {
            let count = Arc::clone(&count);
            socket
                .channel("user:42")
                .on("ping", move |_| *count.lock().unwrap() += 1);
        }
        open(&mut socket);
        inbound(&mut socket, &Frame::new("user:42", "ping", json!({})));
        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[test]
    fn test_unmatched_topic_is_dropped_silently() {
        let (mut socket, _wire) = socket();
        let fired = Arc::new(Mutex::new(false));
        let errors = Arc::new(Mutex::new(0));

        let f = Arc::clone(&fired);
        socket
            .channel("user:42")
            .on("phx_reply", move |_| *f.lock().unwrap() = true);
        let e = Arc::clone(&errors);
        socket.on_error(move |_| *e.lock().unwrap() += 1);

        open(&mut socket);
        inbound(&mut socket, &Frame::new("user:999", PHX_REPLY, json!({"status": "ok"})));

        assert!(!*fired.lock().unwrap());
        assert_eq!(*errors.lock().unwrap(), 0);
    }

    #[test]
    fn test_decode_error_goes_to_error_hooks() {
        let (mut socket, _wire) = socket();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        socket.on_error(move |e| sink.lock().unwrap().push(e.clone()));
        open(&mut socket);

        let generation = socket.generation();
        socket.handle_event(generation, TransportEvent::Message("not json".into()));

        assert!(matches!(errors.lock().unwrap()[0], SocketError::Decode(_)));
    }

    #[test]
    fn test_join_twice_sends_two_frames_with_distinct_refs() {
        let (mut socket, wire) = socket();
        open(&mut socket);
        let mut channel = socket.channel("user:42");
        let first = channel.join(Some("jwt")).unwrap();
        let second = channel.join(Some("jwt")).unwrap();
        assert_ne!(first, second);

        let joins: Vec<Frame> = wire.sent_frames().into_iter().filter(Frame::is_join).collect();
        assert_eq!(joins.len(), 2);
        assert_eq!(joins[0].msg_ref, Some(first));
        assert_eq!(joins[1].msg_ref, Some(second));
        assert_eq!(socket.find_channel("user:42").unwrap().join_ref(), Some(second));
    }

    #[test]
    fn test_rejoin_after_reconnect_resends_credential() {
        let (mut socket, wire) = socket();
        open(&mut socket);
        let id = socket.channel("user:42").id();
        socket.channel_mut(id).unwrap().join(Some("jwt-1")).unwrap();

        let first_generation = socket.generation();
        socket.handle_event(
            first_generation,
            TransportEvent::Close {
                code: 1006,
                reason: "gone".into(),
            },
        );
        assert_eq!(
            socket.channel_mut(id).unwrap().state(),
            JoinState::Closed { join_ref: 1 }
        );

        open(&mut socket);

        let rejoins = wire.sent_frames_for(socket.generation());
        assert_eq!(rejoins.len(), 1);
        assert_eq!(rejoins[0].event, PHX_JOIN);
        assert_eq!(rejoins[0].topic, "user:42");
        assert_eq!(rejoins[0].payload, json!({"jwt": "jwt-1"}));
        assert_eq!(
            socket.channel_mut(id).unwrap().state(),
            JoinState::Pending { join_ref: 2 }
        );
    }

    #[test]
    fn test_open_does_not_rejoin_unjoined_channels() {
        let (mut socket, wire) = socket();
        socket.channel("user:42");
        open(&mut socket);
        assert!(wire.sent_frames().is_empty());
    }

    #[test]
    fn test_buffered_join_is_not_sent_twice_on_open() {
        let (mut socket, wire) = socket();
        socket.channel("user:42").join(Some("jwt")).unwrap();
        open(&mut socket);

        let joins: Vec<Frame> = wire.sent_frames().into_iter().filter(Frame::is_join).collect();
        assert_eq!(joins.len(), 1);
    }

    #[test]
    fn test_buffered_join_on_shared_topic_does_not_suppress_rejoin() {
        let (mut socket, wire) = socket();
        open(&mut socket);
        let a = socket.channel("user:42").id();
        socket.channel_mut(a).unwrap().join(Some("jwt-a")).unwrap();
        let generation = socket.generation();
        socket.handle_event(
            generation,
            TransportEvent::Close {
                code: 1006,
                reason: "gone".into(),
            },
        );

        let b_ref = socket.channel("user:42").join(Some("jwt-b")).unwrap();
        open(&mut socket);

        let joins = wire.sent_frames_for(socket.generation());
        assert_eq!(joins.len(), 2);
        assert_eq!(joins[0].msg_ref, Some(b_ref));
        assert_eq!(joins[1].payload, json!({"jwt": "jwt-a"}));
        assert_eq!(socket.channel_mut(a).unwrap().join_ref(), joins[1].msg_ref);
    }

    #[test]
    fn test_open_hooks_run_after_flush_and_rejoin() {
        let (mut socket, wire) = socket();
        open(&mut socket);
        socket.channel("user:42").join(Some("jwt")).unwrap();
        let generation = socket.generation();
        socket.handle_event(
            generation,
            TransportEvent::Close {
                code: 1006,
                reason: "gone".into(),
            },
        );
        socket.send(Frame::new("t", "queued", json!({}))).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (sink, hook_wire) = (Arc::clone(&seen), wire.clone());
        socket.on_open(move || {
            let events: Vec<String> = hook_wire.sent_frames().into_iter().map(|f| f.event).collect();
            sink.lock().unwrap().push(events);
        });
        open(&mut socket);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![vec![PHX_JOIN.to_string(), "queued".to_string(), PHX_JOIN.to_string()]]
        );
    }

    #[test]
    fn test_message_hooks_see_unmatched_topics() {
        let (mut socket, _wire) = socket();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        socket.on_message(move |frame| sink.lock().unwrap().push(frame.topic.clone()));
        socket.channel("user:42");
        open(&mut socket);

        inbound(&mut socket, &Frame::new("user:42", "ping", json!({})));
        inbound(&mut socket, &Frame::new("user:999", PHX_REPLY, json!({"status": "ok"})));

        assert_eq!(*seen.lock().unwrap(), vec!["user:42", "user:999"]);
    }

    #[test]
    fn test_send_hooks_report_written_frames_only() {
        let (mut socket, wire) = socket();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        socket.on_send(move |frame| sink.lock().unwrap().push(frame.event.clone()));

        socket.send(Frame::new("t", "early", json!({}))).unwrap();
        assert!(seen.lock().unwrap().is_empty());

        open(&mut socket);
        socket.send(Frame::new("t", "live", json!({}))).unwrap();
        wire.set_fail_sends(true);
        socket.send(Frame::new("t", "rejected", json!({}))).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["early", "live"]);
    }

    #[test]
    fn test_unsent_frames_go_back_to_the_head_of_the_buffer() {
        let (connector, _wire) = MemoryConnector::new();
        let mut socket = Socket::with_options(
            connector,
            SocketOptions {
                max_buffered_frames: Some(1),
            },
        );
        open(&mut socket);
        let generation = socket.generation();
        let unsent = vec![
            Frame::new("t", "a", json!({})).with_ref(1).encode().unwrap(),
            "garbage".to_string(),
            Frame::new("t", "b", json!({})).with_ref(2).encode().unwrap(),
        ];
        socket.handle_event(generation, TransportEvent::Unsent(unsent));
        socket.handle_event(
            generation,
            TransportEvent::Close {
                code: 1006,
                reason: "reset".into(),
            },
        );

        let events: Vec<&str> = socket.buffered().map(|f| f.event.as_str()).collect();
        assert_eq!(events, vec!["a", "b"]);
    }

    #[test]
    fn test_stale_generation_events_ignored() {
        let (mut socket, _wire) = socket();
        open(&mut socket);
        socket.disconnect();
        socket.connect().unwrap();

        socket.handle_event(1, TransportEvent::Open);
        assert_eq!(socket.state(), SocketState::Connecting);

        socket.handle_event(2, TransportEvent::Open);
        assert_eq!(socket.state(), SocketState::Open);
    }

    #[test]
    fn test_close_notifies_channels_and_hooks() {
        let (mut socket, _wire) = socket();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = Arc::clone(&log);
        socket
            .channel("user:42")
            .on_close(move |topic| l.lock().unwrap().push(format!("channel {topic}")));
        let l = Arc::clone(&log);
        socket.on_close(move |code, _| l.lock().unwrap().push(format!("socket {code}")));

        open(&mut socket);
        let generation = socket.generation();
        socket.handle_event(
            generation,
            TransportEvent::Close {
                code: 1001,
                reason: "going away".into(),
            },
        );

        assert_eq!(
            *log.lock().unwrap(),
            vec!["channel user:42".to_string(), "socket 1001".to_string()]
        );
        assert_eq!(socket.state(), SocketState::Closed);
    }

    #[test]
    fn test_transport_error_does_not_change_state() {
        let (mut socket, _wire) = socket();
        open(&mut socket);
        let generation = socket.generation();
        socket.handle_event(generation, TransportEvent::Error("boom".into()));
        assert!(socket.is_open());
    }

    #[test]
    fn test_failed_write_is_buffered() {
        let (mut socket, wire) = socket();
        open(&mut socket);
        wire.set_fail_sends(true);
        socket.send(Frame::new("t", "e", json!({}))).unwrap();
        assert_eq!(socket.buffered().count(), 1);
    }

    #[test]
    fn test_push_carries_topic_and_fresh_ref() {
        let (mut socket, wire) = socket();
        open(&mut socket);
        let mut channel = socket.channel("echo:7");
        let a = channel.push("echo", json!({"x": 1})).unwrap();
        let b = channel.push("echo", json!({"x": 2})).unwrap();
        assert!(b > a);

        let frames = wire.sent_frames();
        assert!(frames.iter().all(|f| f.topic == "echo:7"));
        assert_eq!(frames[1].msg_ref, Some(b));
    }

    #[test]
    fn test_leave_detaches_channel() {
        let (mut socket, wire) = socket();
        open(&mut socket);
        let channel = socket.channel("user:42");
        channel.leave().unwrap();

        assert_eq!(socket.channels().count(), 0);
        assert_eq!(wire.sent_frames()[0].event, PHX_LEAVE);
    }

    #[test]
    fn test_reset_keeps_ref_counter() {
        let (mut socket, _wire) = socket();
        socket.channel("user:42").join(None).unwrap();
        socket.reset();
        assert_eq!(socket.channels().count(), 0);
        assert_eq!(socket.buffered().count(), 0);
        assert_eq!(socket.next_ref(), 2);
    }

    #[test]
    fn test_empty_join_params() {
        let (mut socket, wire) = socket();
        open(&mut socket);
        socket
            .channel("echo:7")
            .params(JoinParams::Empty)
            .join(Some("ignored"))
            .unwrap();
        assert_eq!(wire.sent_frames()[0].payload, json!({}));
    }
}
