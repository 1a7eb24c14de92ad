//! In-process transport.
//!
//! [`MemoryConnector`] hands out [`MemoryTransport`]s that append every
//! written frame to a shared [`MemoryWire`]. Nothing is delivered anywhere;
//! the owner of the wire inspects what was sent and feeds
//! [`TransportEvent`](super::TransportEvent)s to the socket by hand. Useful
//! for embedding the socket in hosts that own their own I/O, and for tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Connector, Generation, Transport, TransportError};
use crate::protocol::Frame;

#[derive(Debug, Default)]
struct WireState {
    sent: Vec<(Generation, String)>,
    connects: Vec<Generation>,
    closed: Vec<Generation>,
    fail_next_connect: Option<String>,
    fail_sends: bool,
}

/// Shared record of everything the memory transports did.
#[derive(Debug, Clone, Default)]
pub struct MemoryWire {
    state: Arc<Mutex<WireState>>,
}

impl MemoryWire {
    /// Create an empty wire.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WireState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All text frames written so far, oldest first.
    pub fn sent_texts(&self) -> Vec<String> {
        self.lock().sent.iter().map(|(_, text)| text.clone()).collect()
    }

    /// All written frames decoded. Undecodable texts are skipped.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.lock()
            .sent
            .iter()
            .filter_map(|(_, text)| Frame::decode(text).ok())
            .collect()
    }

    /// Frames written by the transport of one generation.
    pub fn sent_frames_for(&self, generation: Generation) -> Vec<Frame> {
        self.lock()
            .sent
            .iter()
            .filter(|(g, _)| *g == generation)
            .filter_map(|(_, text)| Frame::decode(text).ok())
            .collect()
    }

    /// Generations passed to `connect`, in call order.
    pub fn connects(&self) -> Vec<Generation> {
        self.lock().connects.clone()
    }

    /// Generations whose transport was closed by the socket.
    pub fn closed(&self) -> Vec<Generation> {
        self.lock().closed.clone()
    }

    /// Make the next `connect` fail with `reason`.
    pub fn fail_next_connect(&self, reason: impl Into<String>) {
        self.lock().fail_next_connect = Some(reason.into());
    }

    /// Make every send fail until reset.
    pub fn set_fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }
}

/// Connector producing [`MemoryTransport`]s bound to one wire.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    wire: MemoryWire,
}

impl MemoryConnector {
    /// Create a connector and return it with its wire.
    pub fn new() -> (Self, MemoryWire) {
        let wire = MemoryWire::new();
        (Self { wire: wire.clone() }, wire)
    }
}

impl Connector for MemoryConnector {
    type Transport = MemoryTransport;

    fn connect(&mut self, generation: Generation) -> Result<MemoryTransport, TransportError> {
        let mut state = self.wire.lock();
        if let Some(reason) = state.fail_next_connect.take() {
            return Err(TransportError::ConnectFailed(reason));
        }
        state.connects.push(generation);
        drop(state);

        Ok(MemoryTransport {
            generation,
            wire: self.wire.clone(),
            closed: false,
        })
    }
}

/// Transport that records frames on a [`MemoryWire`].
#[derive(Debug)]
pub struct MemoryTransport {
    generation: Generation,
    wire: MemoryWire,
    closed: bool,
}

impl Transport for MemoryTransport {
    fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut state = self.wire.lock();
        if state.fail_sends {
            return Err(TransportError::SendFailed("memory wire rejected frame".into()));
        }
        state.sent.push((self.generation, text));
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.wire.lock().closed.push(self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_records_generation() {
        let (mut connector, wire) = MemoryConnector::new();
        let mut transport = connector.connect(4).unwrap();
        transport
            .send_text(r#"{"topic":"t","event":"e","payload":{},"ref":1}"#.into())
            .unwrap();

        assert_eq!(wire.connects(), vec![4]);
        assert_eq!(wire.sent_frames_for(4).len(), 1);
        assert!(wire.sent_frames_for(5).is_empty());
    }

    #[test]
    fn test_send_after_close_fails() {
        let (mut connector, wire) = MemoryConnector::new();
        let mut transport = connector.connect(1).unwrap();
        transport.close();
        transport.close();

        assert_eq!(transport.send_text("x".into()), Err(TransportError::Closed));
        assert_eq!(wire.closed(), vec![1]);
    }

    #[test]
    fn test_fail_next_connect_is_one_shot() {
        let (mut connector, wire) = MemoryConnector::new();
        wire.fail_next_connect("refused");

        assert!(matches!(
            connector.connect(1),
            Err(TransportError::ConnectFailed(reason)) if reason == "refused"
        ));
        assert!(connector.connect(2).is_ok());
        assert_eq!(wire.connects(), vec![2]);
    }

    #[test]
    fn test_fail_sends() {
        let (mut connector, wire) = MemoryConnector::new();
        let mut transport = connector.connect(1).unwrap();
        wire.set_fail_sends(true);
        assert!(matches!(
            transport.send_text("x".into()),
            Err(TransportError::SendFailed(_))
        ));
        wire.set_fail_sends(false);
        assert!(transport.send_text("x".into()).is_ok());
    }
}
