//! Phoenix channel wire protocol.
//!
//! Every message on the socket is a JSON text frame:
//!
//! ```text
//! { "topic": "user:42", "event": "phx_join", "payload": {...}, "ref": 7 }
//! ```
//!
//! `ref` correlates a reply with the frame that caused it. Dispatch in this
//! crate is keyed on `topic` alone; the ref is only compared against a
//! channel's join-ref to detect a successful join.
//!
//! Inbound payloads are decoded into [`ServerEvent`] variants at the
//! dispatch boundary, see [`events`].

pub mod events;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use events::{Reply, ServerEvent};

/// Client → server: join a topic.
pub const PHX_JOIN: &str = "phx_join";
/// Server → client: reply to a join or push.
pub const PHX_REPLY: &str = "phx_reply";
/// Client → server: leave a topic.
pub const PHX_LEAVE: &str = "phx_leave";
/// Server → client: the channel was closed.
pub const PHX_CLOSE: &str = "phx_close";
/// Server → client: the channel process crashed.
pub const PHX_ERROR: &str = "phx_error";

/// Monotonic frame reference issued by the socket.
pub type Ref = u64;

/// A single message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Topic the frame is scoped to (e.g. `user:42`).
    pub topic: String,
    /// Event name; reserved `phx_*` names or an application event.
    pub event: String,
    /// Arbitrary JSON payload.
    #[serde(default)]
    pub payload: Value,
    /// Reference for reply correlation. Serialized as `null` when absent.
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<Ref>,
}

impl Frame {
    /// Create a frame without a ref.
    pub fn new(topic: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            event: event.into(),
            payload,
            msg_ref: None,
        }
    }

    /// Attach a ref.
    #[must_use]
    pub fn with_ref(mut self, msg_ref: Ref) -> Self {
        self.msg_ref = Some(msg_ref);
        self
    }

    /// Whether this is a `phx_join` frame.
    pub fn is_join(&self) -> bool {
        self.event == PHX_JOIN
    }

    /// Encode to the JSON text sent over the transport.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Topic naming helpers.
///
/// Topics are opaque strings to the socket; these only build the two
/// conventions the session handshake uses.
pub mod topics {
    /// `user:{id}`: the user-scoped channel joined with a credential.
    pub fn user(user_id: &str) -> String {
        format!("user:{user_id}")
    }

    /// `echo:{id}`: the echo channel joined without a credential.
    pub fn echo(user_id: &str) -> String {
        format!("echo:{user_id}")
    }
}
