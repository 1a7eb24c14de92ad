//! Per-topic channel state.
//!
//! A [`Channel`] holds everything the socket needs to route frames for one
//! topic: the event bindings, the close hooks, and the join lifecycle.
//! Operations that put frames on the wire (`join`, `rejoin`, `push`) go
//! through [`ChannelMut`](super::ChannelMut), which borrows the owning
//! socket.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use crate::protocol::{Frame, Ref, Reply, PHX_JOIN, PHX_REPLY};

/// Callback fired for every inbound frame whose event matches a binding.
pub type Binding = Box<dyn FnMut(&Value) + Send>;

/// Callback fired when the transport under a channel closes. Receives the topic.
pub type CloseHook = Box<dyn FnMut(&str) + Send>;

/// Stable handle for a channel attached to a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub(crate) u64);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch_{}", self.0)
    }
}

/// Join lifecycle of a channel.
///
/// ```text
/// Unjoined ──join──► Pending ──ok reply──► Joined
///                      ▲                      │
///                      └──rejoin── Closed ◄───┘ transport closed
/// ```
///
/// Informational: `join` is accepted from every state and always sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinState {
    /// No join attempted yet.
    #[default]
    Unjoined,
    /// Join sent (or buffered), no successful reply seen.
    Pending {
        /// Ref of the latest join frame.
        join_ref: Ref,
    },
    /// The server replied `ok` to the latest join.
    Joined {
        /// Ref of the join that succeeded.
        join_ref: Ref,
    },
    /// The transport closed after a join attempt.
    Closed {
        /// Ref of the latest join frame.
        join_ref: Ref,
    },
}

impl JoinState {
    /// Ref of the latest join attempt; `None` iff no join was ever attempted.
    pub fn join_ref(&self) -> Option<Ref> {
        match *self {
            Self::Unjoined => None,
            Self::Pending { join_ref } | Self::Joined { join_ref } | Self::Closed { join_ref } => {
                Some(join_ref)
            }
        }
    }
}

/// How a channel builds its `phx_join` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinParams {
    /// `{ <key>: credential }`; `{}` when joined without a credential.
    Credential {
        /// Payload field carrying the credential.
        key: String,
    },
    /// Always `{}`.
    Empty,
}

impl Default for JoinParams {
    fn default() -> Self {
        Self::Credential {
            key: "jwt".to_string(),
        }
    }
}

impl JoinParams {
    /// Build the join payload.
    pub fn payload(&self, credential: Option<&str>) -> Value {
        match (self, credential) {
            (Self::Credential { key }, Some(credential)) => {
                let mut map = Map::new();
                map.insert(key.clone(), Value::String(credential.to_string()));
                Value::Object(map)
            }
            _ => json!({}),
        }
    }
}

/// One topic subscription.
pub struct Channel {
    id: ChannelId,
    topic: String,
    bindings: HashMap<String, Vec<Binding>>,
    close_hooks: Vec<CloseHook>,
    state: JoinState,
    params: JoinParams,
    credential: Option<String>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("state", &self.state)
            .field("params", &self.params)
            .field("events", &self.bindings.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub(crate) fn new(id: ChannelId, topic: String) -> Self {
        Self {
            id,
            topic,
            bindings: HashMap::new(),
            close_hooks: Vec::new(),
            state: JoinState::Unjoined,
            params: JoinParams::default(),
            credential: None,
        }
    }

    /// Channel handle.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Topic this channel is bound to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Current join state.
    pub fn state(&self) -> JoinState {
        self.state
    }

    /// Ref of the latest join attempt.
    pub fn join_ref(&self) -> Option<Ref> {
        self.state.join_ref()
    }

    /// Whether the latest join was acknowledged.
    pub fn is_joined(&self) -> bool {
        matches!(self.state, JoinState::Joined { .. })
    }

    /// Join payload builder.
    pub fn params(&self) -> &JoinParams {
        &self.params
    }

    /// Number of callbacks bound to `event`.
    pub fn binding_count(&self, event: &str) -> usize {
        self.bindings.get(event).map_or(0, Vec::len)
    }

    pub(crate) fn set_params(&mut self, params: JoinParams) {
        self.params = params;
    }

    pub(crate) fn bind(&mut self, event: String, callback: Binding) {
        self.bindings.entry(event).or_default().push(callback);
    }

    pub(crate) fn bind_close(&mut self, hook: CloseHook) {
        self.close_hooks.push(hook);
    }

    /// Credential to resend on rejoin.
    pub(crate) fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    /// Record a join attempt and build its frame.
    pub(crate) fn prepare_join(&mut self, join_ref: Ref, credential: Option<String>) -> Frame {
        let payload = self.params.payload(credential.as_deref());
        self.credential = credential;
        self.state = JoinState::Pending { join_ref };
        Frame::new(self.topic.clone(), PHX_JOIN, payload).with_ref(join_ref)
    }

    /// Deliver a frame whose topic matches this channel.
    ///
    /// Every callback bound to `frame.event` fires, in registration order,
    /// with the same payload.
    pub(crate) fn trigger(&mut self, frame: &Frame) {
        if frame.event == PHX_REPLY {
            if let JoinState::Pending { join_ref } = self.state {
                if frame.msg_ref == Some(join_ref) && Reply::from_payload(&frame.payload).is_ok() {
                    log::debug!("[Channel] {} joined (ref {})", self.topic, join_ref);
                    self.state = JoinState::Joined { join_ref };
                }
            }
        }

        let Some(callbacks) = self.bindings.get_mut(&frame.event) else {
            log::trace!("[Channel] {} has no binding for '{}'", self.topic, frame.event);
            return;
        };
        for callback in callbacks.iter_mut() {
            callback(&frame.payload);
        }
    }

    /// The transport under this channel closed.
    pub(crate) fn handle_close(&mut self) {
        if let Some(join_ref) = self.state.join_ref() {
            self.state = JoinState::Closed { join_ref };
        }
        for hook in &mut self.close_hooks {
            hook(&self.topic);
        }
    }
}
