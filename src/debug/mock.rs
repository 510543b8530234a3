//! In-memory transport for deterministic debug-mirror tests
//!
//! [`MockTransport`] implements [`Transport`] without touching the network.
//! The paired [`MockPeer`] plays the debugger: it can queue directives, read
//! back every envelope the component sent, and drop the connection.
//!
//! # Example
//! ```no_run
//! use tealoop::debug::mock::MockTransport;
//! use tealoop::debug::ComponentId;
//! use serde_json::json;
//!
//! # async fn demo() {
//! let (transport, peer) = MockTransport::new();
//! let id = ComponentId::new("counter").unwrap();
//! peer.apply_state(&id, json!(10));
//! // hand `transport` to DebugSettings::with_transport ...
//! let envelopes = peer.wait_for_envelopes(1).await;
//! # }
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use super::protocol::{
    ClientDirective, ClientEnvelope, ComponentId, Json, ServerEnvelope,
};
use super::transport::{Connection, FrameSink, FrameSource, Transport, TransportError};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct MockState {
    sent: Mutex<Vec<String>>,
    sent_notify: Notify,
    connect_urls: Mutex<Vec<String>>,
    connects: AtomicUsize,
    closed: AtomicBool,
    fail_sends: AtomicBool,
}

/// Transport double handing out one in-memory session.
pub struct MockTransport {
    state: Arc<MockState>,
    incoming: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    connect_error: Option<TransportError>,
}

impl MockTransport {
    /// Create a transport and the peer controlling it.
    pub fn new() -> (Self, MockPeer) {
        let state = Arc::new(MockState::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            state: state.clone(),
            incoming: Mutex::new(Some(rx)),
            connect_error: None,
        };
        let peer = MockPeer {
            state,
            tx: Mutex::new(Some(tx)),
        };
        (transport, peer)
    }

    /// Transport whose `connect` always fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> (Self, MockPeer) {
        let (mut transport, peer) = Self::new();
        transport.connect_error = Some(TransportError::Open {
            url: "mock".to_string(),
            reason: reason.into(),
        });
        (transport, peer)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> Result<Connection, TransportError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state.connect_urls.lock().push(url.to_string());

        if let Some(err) = &self.connect_error {
            return Err(err.clone());
        }

        let incoming = self.incoming.lock().take().ok_or_else(|| TransportError::Open {
            url: url.to_string(),
            reason: "mock session already in use".to_string(),
        })?;

        Ok(Connection {
            sink: Box::new(MockSink {
                state: self.state.clone(),
            }),
            source: Box::new(MockSource { incoming }),
        })
    }
}

struct MockSink {
    state: Arc<MockState>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        if self.state.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("mock connection reset".to_string()));
        }
        self.state.sent.lock().push(frame);
        self.state.sent_notify.notify_waiters();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockSink {
    fn drop(&mut self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

struct MockSource {
    incoming: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameSource for MockSource {
    async fn receive(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.incoming.recv().await)
    }
}

/// The debugger side of a [`MockTransport`].
pub struct MockPeer {
    state: Arc<MockState>,
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl MockPeer {
    /// Queue a raw frame for the component.
    pub fn send_frame(&self, frame: impl Into<String>) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(frame.into());
        }
    }

    pub fn send_envelope(&self, envelope: &ClientEnvelope) {
        if let Ok(frame) = envelope.to_frame() {
            self.send_frame(frame);
        }
    }

    pub fn apply_message(&self, component_id: &ComponentId, message: Json) {
        self.send_envelope(&ClientEnvelope::new(
            component_id.clone(),
            ClientDirective::ApplyMessage { message },
        ));
    }

    pub fn apply_state(&self, component_id: &ComponentId, state: Json) {
        self.send_envelope(&ClientEnvelope::new(
            component_id.clone(),
            ClientDirective::ApplyState { state },
        ));
    }

    /// End the session from the debugger side.
    pub fn disconnect(&self) {
        self.tx.lock().take();
    }

    /// Make every further send fail, as if the connection dropped.
    pub fn fail_sends(&self) {
        self.state.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Envelopes sent so far, in order.
    pub fn envelopes(&self) -> Vec<ServerEnvelope> {
        self.state
            .sent
            .lock()
            .iter()
            .filter_map(|frame| ServerEnvelope::from_frame(frame).ok())
            .collect()
    }

    pub fn frames_sent(&self) -> usize {
        self.state.sent.lock().len()
    }

    /// Wait until at least `count` envelopes were sent, then return all of
    /// them. Panics after a few seconds without progress.
    pub async fn wait_for_envelopes(&self, count: usize) -> Vec<ServerEnvelope> {
        let wait = async {
            loop {
                let notified = self.state.sent_notify.notified();
                if self.frames_sent() >= count {
                    return self.envelopes();
                }
                notified.await;
            }
        };
        match tokio::time::timeout(WAIT_TIMEOUT, wait).await {
            Ok(envelopes) => envelopes,
            Err(_) => panic!(
                "expected {count} envelopes, got {}",
                self.frames_sent()
            ),
        }
    }

    /// Whether the component closed or dropped its side of the session.
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn connect_urls(&self) -> Vec<String> {
        self.state.connect_urls.lock().clone()
    }
}
