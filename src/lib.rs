//! phx-client - Phoenix channel client.
//!
//! This crate speaks the Phoenix channel protocol over a single WebSocket,
//! multiplexes topic channels over it, and runs the session handshake that
//! authenticates a user channel with a stored credential.
//!
//! # Architecture
//!
//! The protocol core is synchronous and performs no I/O:
//!
//! - **Socket** - owns the transport, hands out refs, buffers while offline,
//!   routes inbound frames by topic
//! - **Channel** - event bindings and join lifecycle for one topic
//! - **SessionManager** - credential, user id and identity; interprets join
//!   replies and auth events
//!
//! The async **Client** driver owns all three and feeds them from the
//! WebSocket task, channel bindings and user commands.
//!
//! # Modules
//!
//! - [`protocol`] - wire frames and typed server events
//! - [`transport`] - transport traits, WebSocket and in-memory transports
//! - [`socket`] - connection multiplexer and channels
//! - [`session`] - session state, handshake and durable store
//! - [`client`] - async event loop
//! - [`api`] - REST login exchanges and profile calls
//! - [`config`] - configuration loading/saving

pub mod api;
pub mod client;
pub mod commands;
pub mod config;
pub mod constants;
pub mod protocol;
pub mod session;
pub mod socket;
pub mod transport;
pub mod ui;

pub use api::{ApiClient, ApiError};
pub use client::{Client, ClientCommand, ClientHandle, ClientOptions};
pub use config::{Config, Flow};
pub use protocol::{Frame, Ref, ServerEvent};
pub use session::{Exchange, FileStore, MemoryStore, Outcome, Session, SessionManager, SessionStore};
pub use socket::{ChannelMut, JoinParams, JoinState, Socket, SocketError, SocketOptions, SocketState};
pub use transport::{Connector, Transport, TransportError, TransportEvent};
pub use ui::{UiEvent, UiSink};
