//! UI signals.
//!
//! The session handshake and the client driver never print. They emit
//! [`UiEvent`]s into a [`UiSink`]; the binary renders them on stdout with
//! [`ConsoleUi`], tests collect them in a `Vec<UiEvent>`.

use serde_json::Value;

/// Severity of a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Neutral progress.
    Info,
    /// An operation completed.
    Success,
    /// An operation failed.
    Error,
}

impl Level {
    fn label(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "ok",
            Self::Error => "error",
        }
    }
}

/// Direction of a logged frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Server to client.
    Incoming,
    /// Client to server.
    Outgoing,
}

/// Something the user should see.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// The identity (user profile) changed.
    Identity(Value),
    /// A session was established.
    LoggedIn,
    /// The session is gone.
    LoggedOut,
    /// A status line.
    Message {
        /// Severity.
        level: Level,
        /// Text.
        text: String,
    },
    /// A raw frame or connection event for the message log.
    Frame {
        /// Which way it went.
        direction: Direction,
        /// Frame text.
        text: String,
    },
}

impl UiEvent {
    /// Shorthand for a [`UiEvent::Message`].
    pub fn message(level: Level, text: impl Into<String>) -> Self {
        Self::Message {
            level,
            text: text.into(),
        }
    }
}

/// Receiver of UI signals.
pub trait UiSink: Send {
    /// Deliver one event.
    fn emit(&mut self, event: UiEvent);
}

impl UiSink for Vec<UiEvent> {
    fn emit(&mut self, event: UiEvent) {
        self.push(event);
    }
}

/// Prints events to stdout.
#[derive(Debug, Clone, Default)]
pub struct ConsoleUi {
    /// Also print the frame log.
    pub show_frames: bool,
}

impl ConsoleUi {
    /// Console sink; `show_frames` enables the frame log.
    pub fn new(show_frames: bool) -> Self {
        Self { show_frames }
    }
}

impl UiSink for ConsoleUi {
    fn emit(&mut self, event: UiEvent) {
        match event {
            UiEvent::Frame { .. } if !self.show_frames => {}
            other => println!("{}", render(&other)),
        }
    }
}

/// Render an event as one timestamped line.
pub fn render(event: &UiEvent) -> String {
    let timestamp = chrono::Local::now().format("%H:%M:%S");
    match event {
        UiEvent::Identity(identity) => {
            let pretty =
                serde_json::to_string_pretty(identity).unwrap_or_else(|_| identity.to_string());
            format!("[{timestamp}] identity:\n{pretty}")
        }
        UiEvent::LoggedIn => format!("[{timestamp}] logged in"),
        UiEvent::LoggedOut => format!("[{timestamp}] logged out"),
        UiEvent::Message { level, text } => format!("[{timestamp}] {}: {text}", level.label()),
        UiEvent::Frame { direction, text } => {
            let arrow = match direction {
                Direction::Incoming => "<-",
                Direction::Outgoing => "->",
            };
            format!("[{timestamp}] {arrow} {text}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vec_sink_collects_in_order() {
        let mut sink: Vec<UiEvent> = Vec::new();
        sink.emit(UiEvent::LoggedIn);
        sink.emit(UiEvent::message(Level::Error, "boom"));
        assert_eq!(
            sink,
            vec![
                UiEvent::LoggedIn,
                UiEvent::Message {
                    level: Level::Error,
                    text: "boom".into()
                }
            ]
        );
    }

    #[test]
    fn test_render_frame_has_timestamp_and_arrow() {
        let line = render(&UiEvent::Frame {
            direction: Direction::Incoming,
            text: "hello".into(),
        });
        assert!(line.starts_with('['));
        assert!(line.ends_with("<- hello"));
    }

    #[test]
    fn test_render_identity_is_pretty_json() {
        let line = render(&UiEvent::Identity(json!({"id": 42})));
        assert!(line.contains("\"id\": 42"));
    }
}
