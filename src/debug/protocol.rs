//! Wire types exchanged with a remote debugger.
//!
//! Every frame is one JSON-encoded envelope. The component sends
//! [`ServerEnvelope`]s and receives [`ClientEnvelope`]s; both carry the
//! [`ComponentId`] so several components can share one connection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Encoded message, state or command.
pub type Json = serde_json::Value;

/// Non-blank identity of one component on a debug connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ComponentId(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("component id must not be blank")]
pub struct InvalidComponentId;

impl ComponentId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidComponentId> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(InvalidComponentId);
        }
        Ok(Self(id))
    }

    /// Id known to be non-blank at compile time.
    pub(crate) fn from_static(id: &'static str) -> Self {
        debug_assert!(!id.trim().is_empty());
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ComponentId {
    type Error = InvalidComponentId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ComponentId> for String {
    fn from(id: ComponentId) -> Self {
        id.0
    }
}

impl FromStr for ComponentId {
    type Err = InvalidComponentId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Notification sent to the debugger for every snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerNotification {
    /// A run started (or restarted from a forced state).
    #[serde(rename_all = "camelCase")]
    Attached { state: Json, commands: Vec<Json> },

    /// One message was applied.
    #[serde(rename_all = "camelCase")]
    Snapshot {
        message: Json,
        old_state: Json,
        new_state: Json,
        commands: Vec<Json>,
    },
}

/// Instruction received from the debugger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientDirective {
    /// Inject a message as if the application had sent it.
    ApplyMessage { message: Json },

    /// Replace the current state without running the updater.
    ApplyState { state: Json },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEnvelope {
    pub message_id: Uuid,
    pub component_id: ComponentId,
    pub payload: ServerNotification,
}

impl ServerEnvelope {
    pub fn new(component_id: ComponentId, payload: ServerNotification) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            component_id,
            payload,
        }
    }

    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_frame(frame: &str) -> serde_json::Result<Self> {
        serde_json::from_str(frame)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEnvelope {
    pub message_id: Uuid,
    pub component_id: ComponentId,
    pub payload: ClientDirective,
}

impl ClientEnvelope {
    pub fn new(component_id: ComponentId, payload: ClientDirective) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            component_id,
            payload,
        }
    }

    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_frame(frame: &str) -> serde_json::Result<Self> {
        serde_json::from_str(frame)
    }
}
