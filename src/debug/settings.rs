use std::sync::Arc;

use super::codec::ComponentCodec;
use super::protocol::ComponentId;
use super::transport::{Transport, WebSocketTransport};

/// Address a debugger listens on unless configured otherwise.
pub const DEFAULT_DEBUG_URL: &str = "localhost:8080";

/// How a component reaches its remote debugger.
pub struct DebugSettings<M, S, C> {
    pub url: String,
    pub component_id: ComponentId,
    pub codec: Arc<dyn ComponentCodec<M, S, C>>,
    pub transport: Arc<dyn Transport>,
}

impl<M, S, C> DebugSettings<M, S, C> {
    /// Settings for the default WebSocket debugger at [`DEFAULT_DEBUG_URL`].
    pub fn new(component_id: ComponentId, codec: impl ComponentCodec<M, S, C> + 'static) -> Self {
        Self {
            url: DEFAULT_DEBUG_URL.to_string(),
            component_id,
            codec: Arc::new(codec),
            transport: Arc::new(WebSocketTransport),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Arc::new(transport);
        self
    }
}

impl<M, S, C> Clone for DebugSettings<M, S, C> {
    fn clone(&self) -> Self {
        Self {
            url: self.url.clone(),
            component_id: self.component_id.clone(),
            codec: self.codec.clone(),
            transport: self.transport.clone(),
        }
    }
}
