//! Remote debugging for components.
//!
//! When a component is built with [`DebugSettings`], every run is mirrored to
//! a debugger over a [`Transport`]: each snapshot is sent as a
//! [`ServerNotification`] and [`ClientDirective`]s received from the debugger
//! are applied to the run.

pub mod codec;
pub mod mirror;
pub mod mock;
pub mod protocol;
pub mod settings;
pub mod tape;
pub mod transport;

pub use codec::{CodecError, ComponentCodec, JsonCodec, SerdeJsonCodec};
pub use protocol::{
    ClientDirective, ClientEnvelope, ComponentId, InvalidComponentId, Json, ServerEnvelope,
    ServerNotification,
};
pub use settings::{DebugSettings, DEFAULT_DEBUG_URL};
pub use tape::{SnapshotTape, TapeEntry, TapeRecorder, TapeWriter};
pub use transport::{
    normalize_url, Connection, FrameSink, FrameSource, Transport, TransportError,
    WebSocketTransport,
};
