//! JSON encoding of component payloads for the debug wire.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::protocol::{Json, ServerNotification};
use crate::component::Snapshot;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Failed to encode value: {0}")]
    Encode(String),

    #[error("Failed to decode value: {0}")]
    Decode(String),
}

/// Converts one payload type to and from JSON.
pub trait JsonCodec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Json, CodecError>;
    fn decode(&self, json: Json) -> Result<T, CodecError>;
}

/// `serde_json`-backed codec for any serde type.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerdeJsonCodec;

impl<T: Serialize + DeserializeOwned> JsonCodec<T> for SerdeJsonCodec {
    fn encode(&self, value: &T) -> Result<Json, CodecError> {
        serde_json::to_value(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, json: Json) -> Result<T, CodecError> {
        serde_json::from_value(json).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Everything the debug mirror needs to encode or decode for one component.
///
/// Implemented automatically for any codec that handles the message, state
/// and command types.
pub trait ComponentCodec<M, S, C>: Send + Sync {
    fn encode_message(&self, message: &M) -> Result<Json, CodecError>;
    fn decode_message(&self, json: Json) -> Result<M, CodecError>;
    fn encode_state(&self, state: &S) -> Result<Json, CodecError>;
    fn decode_state(&self, json: Json) -> Result<S, CodecError>;
    fn encode_command(&self, command: &C) -> Result<Json, CodecError>;

    /// Notification describing `snapshot`: `Attached` for initial snapshots,
    /// `Snapshot` for regular ones.
    fn notification(&self, snapshot: &Snapshot<M, S, C>) -> Result<ServerNotification, CodecError> {
        let notification = match snapshot {
            Snapshot::Initial(initial) => ServerNotification::Attached {
                state: self.encode_state(&initial.state)?,
                commands: self.encode_commands(&initial.commands)?,
            },
            Snapshot::Regular(regular) => ServerNotification::Snapshot {
                message: self.encode_message(&regular.message)?,
                old_state: self.encode_state(&regular.previous_state)?,
                new_state: self.encode_state(&regular.current_state)?,
                commands: self.encode_commands(&regular.commands)?,
            },
        };
        Ok(notification)
    }

    fn encode_commands(&self, commands: &[C]) -> Result<Vec<Json>, CodecError> {
        commands.iter().map(|c| self.encode_command(c)).collect()
    }
}

impl<X, M, S, C> ComponentCodec<M, S, C> for X
where
    X: JsonCodec<M> + JsonCodec<S> + JsonCodec<C>,
{
    fn encode_message(&self, message: &M) -> Result<Json, CodecError> {
        <X as JsonCodec<M>>::encode(self, message)
    }

    fn decode_message(&self, json: Json) -> Result<M, CodecError> {
        <X as JsonCodec<M>>::decode(self, json)
    }

    fn encode_state(&self, state: &S) -> Result<Json, CodecError> {
        <X as JsonCodec<S>>::encode(self, state)
    }

    fn decode_state(&self, json: Json) -> Result<S, CodecError> {
        <X as JsonCodec<S>>::decode(self, json)
    }

    fn encode_command(&self, command: &C) -> Result<Json, CodecError> {
        <X as JsonCodec<C>>::encode(self, command)
    }
}
