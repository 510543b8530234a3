use crate::debug::transport::TransportError;

/// Terminal failure of a component run.
///
/// Every variant is fatal to the run that produced it. The error is cloned to
/// each active subscriber, so causes are kept as rendered strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComponentError {
    /// The updater rejected a message.
    #[error("Update failed: {0}")]
    Update(String),

    /// A resolver invocation failed or its task panicked.
    #[error("Command resolution failed: {0}")]
    Resolve(String),

    /// The initializer could not produce a starting snapshot.
    #[error("Initialization failed: {0}")]
    Initialize(String),

    /// An incoming directive could not be turned into a message or state.
    #[error("Failed to decode directive for component {component_id}: {reason}")]
    Decode {
        component_id: String,
        reason: String,
    },

    /// A snapshot could not be serialized for the debug peer.
    #[error("Failed to encode notification: {0}")]
    Encode(String),

    /// The debug session could not be opened or was lost.
    #[error("Debug connection failed: {0}")]
    Connection(#[from] TransportError),
}

impl ComponentError {
    pub(crate) fn update(err: anyhow::Error) -> Self {
        ComponentError::Update(format!("{err:#}"))
    }

    pub(crate) fn resolve(err: anyhow::Error) -> Self {
        ComponentError::Resolve(format!("{err:#}"))
    }

    pub(crate) fn initialize(err: anyhow::Error) -> Self {
        ComponentError::Initialize(format!("{err:#}"))
    }

    /// True for faults caused by the debug transport rather than by
    /// application logic.
    pub fn is_connection(&self) -> bool {
        matches!(self, ComponentError::Connection(_))
    }
}
