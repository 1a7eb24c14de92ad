//! Typed server events.
//!
//! Payloads arrive as untyped JSON. [`ServerEvent::parse`] turns the
//! `(event, payload)` pair into a variant per known event name so the
//! session handshake can match on it exhaustively.

use serde_json::Value;

use super::PHX_REPLY;

/// Join reasons that mean the credential is no longer usable.
pub const INVALIDATING_REASONS: [&str; 2] = ["join crashed", "user not found"];

/// Reply to a join or push (`phx_reply`).
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// `"ok"` or `"error"`; `None` when the server omitted it.
    pub status: Option<String>,
    /// The `response` object, `Value::Null` when absent.
    pub response: Value,
    /// The whole payload as received.
    pub raw: Value,
}

impl Reply {
    /// Parse a `phx_reply` payload.
    pub fn from_payload(payload: &Value) -> Self {
        Self {
            status: payload
                .get("status")
                .and_then(Value::as_str)
                .map(str::to_string),
            response: payload.get("response").cloned().unwrap_or(Value::Null),
            raw: payload.clone(),
        }
    }

    /// The `response` object, or the whole payload when there is none.
    pub fn body(&self) -> &Value {
        if self.response.is_null() {
            &self.raw
        } else {
            &self.response
        }
    }

    /// Whether the server reported `status: "ok"`.
    pub fn is_ok(&self) -> bool {
        self.status.as_deref() == Some("ok")
    }

    /// The `response.reason` string, if any.
    pub fn reason(&self) -> Option<&str> {
        self.response.get("reason").and_then(Value::as_str)
    }

    /// The reason if it invalidates the held credential.
    pub fn rejection_reason(&self) -> Option<&str> {
        self.reason()
            .filter(|reason| INVALIDATING_REASONS.contains(reason))
    }
}

/// An inbound event after payload decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// `phx_reply`.
    JoinReply(Reply),
    /// `profile_update` with the new user profile.
    ProfileUpdate {
        /// Updated profile (`payload.user`).
        user: Value,
    },
    /// `update` with refreshed user data.
    Update {
        /// Updated profile (`payload.user_data`).
        user_data: Value,
    },
    /// `echo` payload from the echo channel.
    Echo(EchoMessage),
    /// `auth_success`: login completed over the socket.
    AuthSuccess {
        /// New credential, when the server sent one.
        token: Option<String>,
        /// User profile, when the server sent one.
        user: Option<Value>,
    },
    /// `auth_error`: login over the socket failed.
    AuthError {
        /// Human-readable failure message.
        message: String,
    },
    /// Any other application event.
    Other {
        /// Event name.
        event: String,
        /// Raw payload.
        payload: Value,
    },
}

/// Payload of an `echo` event.
#[derive(Debug, Clone, PartialEq)]
pub enum EchoMessage {
    /// `{type: "points_update", points}`.
    PointsUpdate {
        /// New point balance.
        points: Value,
    },
    /// Anything else echoed back.
    Raw(Value),
}

impl ServerEvent {
    /// Decode an `(event, payload)` pair.
    pub fn parse(event: &str, payload: &Value) -> Self {
        match event {
            PHX_REPLY => Self::JoinReply(Reply::from_payload(payload)),
            "profile_update" => Self::ProfileUpdate {
                user: payload.get("user").cloned().unwrap_or(Value::Null),
            },
            "update" => Self::Update {
                user_data: payload.get("user_data").cloned().unwrap_or(Value::Null),
            },
            "echo" => Self::Echo(EchoMessage::parse(payload)),
            "auth_success" => Self::AuthSuccess {
                token: payload
                    .get("token")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                user: payload.get("user").filter(|u| !u.is_null()).cloned(),
            },
            "auth_error" => Self::AuthError {
                message: payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            },
            other => Self::Other {
                event: other.to_string(),
                payload: payload.clone(),
            },
        }
    }

    /// Event name this variant was decoded from.
    pub fn name(&self) -> &str {
        match self {
            Self::JoinReply(_) => PHX_REPLY,
            Self::ProfileUpdate { .. } => "profile_update",
            Self::Update { .. } => "update",
            Self::Echo(_) => "echo",
            Self::AuthSuccess { .. } => "auth_success",
            Self::AuthError { .. } => "auth_error",
            Self::Other { event, .. } => event,
        }
    }
}

impl EchoMessage {
    fn parse(payload: &Value) -> Self {
        match payload.get("type").and_then(Value::as_str) {
            Some("points_update") => match payload.get("points") {
                Some(points) if !points.is_null() => Self::PointsUpdate {
                    points: points.clone(),
                },
                _ => Self::Raw(payload.clone()),
            },
            _ => Self::Raw(payload.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_user_not_found_is_rejection() {
        let event = ServerEvent::parse(
            "phx_reply",
            &json!({"status": "error", "response": {"reason": "user not found"}}),
        );
        let ServerEvent::JoinReply(reply) = event else {
            panic!("expected JoinReply");
        };
        assert!(!reply.is_ok());
        assert_eq!(reply.rejection_reason(), Some("user not found"));
    }

    #[test]
    fn test_reply_join_crashed_is_rejection() {
        let reply = Reply::from_payload(&json!({"response": {"reason": "join crashed"}}));
        assert_eq!(reply.rejection_reason(), Some("join crashed"));
    }

    #[test]
    fn test_reply_other_reason_is_not_rejection() {
        let reply = Reply::from_payload(&json!({"status": "error", "response": {"reason": "unauthorized"}}));
        assert_eq!(reply.reason(), Some("unauthorized"));
        assert_eq!(reply.rejection_reason(), None);
    }

    #[test]
    fn test_reply_without_response() {
        let reply = Reply::from_payload(&json!({"status": "ok"}));
        assert!(reply.is_ok());
        assert_eq!(reply.response, Value::Null);
        assert_eq!(reply.reason(), None);
        assert_eq!(reply.body(), &json!({"status": "ok"}));
    }

    #[test]
    fn test_parse_profile_update() {
        let event = ServerEvent::parse("profile_update", &json!({"user": {"id": 1}}));
        assert_eq!(event, ServerEvent::ProfileUpdate { user: json!({"id": 1}) });
        assert_eq!(event.name(), "profile_update");
    }

    #[test]
    fn test_parse_auth_success_partial() {
        let event = ServerEvent::parse("auth_success", &json!({"token": "t"}));
        assert_eq!(
            event,
            ServerEvent::AuthSuccess {
                token: Some("t".into()),
                user: None
            }
        );
    }

    #[test]
    fn test_parse_auth_error_message() {
        let event = ServerEvent::parse("auth_error", &json!({"message": "bad signature"}));
        assert_eq!(
            event,
            ServerEvent::AuthError {
                message: "bad signature".into()
            }
        );
    }

    #[test]
    fn test_parse_echo_points_update() {
        let event = ServerEvent::parse("echo", &json!({"type": "points_update", "points": 12}));
        assert_eq!(
            event,
            ServerEvent::Echo(EchoMessage::PointsUpdate { points: json!(12) })
        );
    }

    #[test]
    fn test_parse_echo_without_points_is_raw() {
        let payload = json!({"type": "points_update"});
        let event = ServerEvent::parse("echo", &payload);
        assert_eq!(event, ServerEvent::Echo(EchoMessage::Raw(payload)));
    }

    #[test]
    fn test_parse_unknown_event() {
        let event = ServerEvent::parse("presence_diff", &json!({"joins": {}}));
        assert_eq!(event.name(), "presence_diff");
        assert!(matches!(event, ServerEvent::Other { .. }));
    }
}
