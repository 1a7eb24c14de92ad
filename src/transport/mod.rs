//! Transport abstraction for the socket.
//!
//! The [`Socket`](crate::socket::Socket) never performs I/O itself. It asks a
//! [`Connector`] for a fresh [`Transport`] on every `connect()`, writes text
//! frames into it, and is fed [`TransportEvent`]s by whoever drives the
//! event loop.
//!
//! # Architecture
//!
//! ```text
//! Socket::connect()
//!     │
//!     ├── Connector::connect(generation) ──► Transport (send_text / close)
//!     │                                          │
//!     │                                  background I/O (websocket task)
//!     │                                          │
//!     └── Socket::handle_event(generation, ev) ◄─┘  Open / Message / Unsent / Close / Error
//! ```
//!
//! Each transport is tagged with a `generation`. Events from a transport the
//! socket has since replaced carry an old generation and are ignored.
//!
//! Implementations:
//! - [`websocket`] - tokio-tungstenite, one background task per connection
//! - [`memory`] - in-process transport that records written frames

pub mod memory;
pub mod websocket;

/// Identifies one transport instance created by a [`Connector`].
pub type Generation = u64;

/// Lifecycle and data events produced by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established; frames can be written.
    Open,
    /// A text frame arrived.
    Message(String),
    /// Connection closed (by either side).
    Close {
        /// WebSocket close code (1000 = normal, 1006 = abnormal).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
    /// A transport-level failure. Not followed by a retry.
    Error(String),
    /// Text frames accepted by `send_text` that never reached the wire,
    /// oldest first. Emitted before the transport's `Close`.
    Unsent(Vec<String>),
}

/// Errors raised by transports and connectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport could not be created.
    ConnectFailed(String),
    /// A frame could not be written.
    SendFailed(String),
    /// The transport is already closed.
    Closed,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectFailed(msg) => write!(f, "Connect failed: {msg}"),
            Self::SendFailed(msg) => write!(f, "Send failed: {msg}"),
            Self::Closed => write!(f, "Transport closed"),
        }
    }
}

impl std::error::Error for TransportError {}

/// A bidirectional, text-framed connection owned by the socket.
pub trait Transport: Send {
    /// Write one text frame.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` if the connection is gone or
    /// `TransportError::SendFailed` if the write was rejected.
    fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Begin a graceful close. Further sends fail.
    fn close(&mut self);
}

/// Factory for transports.
///
/// A connector knows the endpoint and where to deliver the events of the
/// transports it creates.
pub trait Connector: Send {
    /// Transport type produced by this connector.
    type Transport: Transport;

    /// Start connecting a new transport tagged with `generation`.
    ///
    /// The returned transport is not open yet; an
    /// [`TransportEvent::Open`] for `generation` follows once it is.
    fn connect(&mut self, generation: Generation) -> Result<Self::Transport, TransportError>;
}
