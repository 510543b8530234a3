//! JSONL snapshot tape.
//!
//! A tape holds one header line followed by one entry per snapshot, each
//! carrying the same [`ServerNotification`] a debugger would receive. Tapes
//! are written live by [`TapeRecorder`] and can be read back to replay a run
//! offline.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::codec::{CodecError, ComponentCodec};
use super::protocol::{ComponentId, Json, ServerNotification};
use crate::component::{Interceptor, Snapshot};

pub const SNAPSHOT_TAPE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TapeEntry {
    pub seq: u64,
    pub ts_ms: u64,
    pub component_id: ComponentId,
    pub notification: ServerNotification,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TapeJsonlLine {
    Header {
        schema_version: u32,
        created_at_ms: u64,
    },
    Entry {
        entry: TapeEntry,
    },
}

#[derive(Debug, Clone)]
pub struct SnapshotTape {
    pub schema_version: u32,
    pub created_at_ms: u64,
    pub entries: Vec<TapeEntry>,
}

impl SnapshotTape {
    pub fn new() -> Self {
        Self {
            schema_version: SNAPSHOT_TAPE_SCHEMA_VERSION,
            created_at_ms: now_ms(),
            entries: Vec::new(),
        }
    }

    pub fn write_jsonl_to_path(&self, path: &Path) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        write_line(
            &mut writer,
            &TapeJsonlLine::Header {
                schema_version: self.schema_version,
                created_at_ms: self.created_at_ms,
            },
        )?;
        for entry in &self.entries {
            write_line(
                &mut writer,
                &TapeJsonlLine::Entry {
                    entry: entry.clone(),
                },
            )?;
        }
        writer.flush()
    }

    pub fn read_jsonl_from_path(path: &Path) -> io::Result<Self> {
        let reader = BufReader::new(File::open(path)?);

        let mut header: Option<(u32, u64)> = None;
        let mut entries = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed: TapeJsonlLine =
                serde_json::from_str(&line).map_err(|e| io::Error::other(format!("line {}: {e}", idx + 1)))?;
            match parsed {
                TapeJsonlLine::Header {
                    schema_version,
                    created_at_ms,
                } => {
                    if idx != 0 {
                        return Err(io::Error::other("tape header must be the first JSONL line"));
                    }
                    header = Some((schema_version, created_at_ms));
                }
                TapeJsonlLine::Entry { entry } => entries.push(entry),
            }
        }

        let (schema_version, created_at_ms) =
            header.ok_or_else(|| io::Error::other("missing tape header"))?;
        if schema_version > SNAPSHOT_TAPE_SCHEMA_VERSION {
            return Err(io::Error::other(format!(
                "unsupported tape schema version {schema_version}"
            )));
        }

        Ok(Self {
            schema_version,
            created_at_ms,
            entries,
        })
    }

    /// Entries recorded for `component_id`, in sequence order.
    pub fn entries_for<'a>(
        &'a self,
        component_id: &'a ComponentId,
    ) -> impl Iterator<Item = &'a TapeEntry> + 'a {
        self.entries
            .iter()
            .filter(move |entry| &entry.component_id == component_id)
    }

    /// Decoded messages of every regular snapshot recorded for `component_id`.
    ///
    /// This includes messages produced by resolved commands, so a replay
    /// should feed them to a component whose resolver emits nothing.
    pub fn messages<M, S, C>(
        &self,
        component_id: &ComponentId,
        codec: &dyn ComponentCodec<M, S, C>,
    ) -> Result<Vec<M>, CodecError> {
        self.entries_for(component_id)
            .filter_map(|entry| match &entry.notification {
                ServerNotification::Snapshot { message, .. } => Some(message.clone()),
                ServerNotification::Attached { .. } => None,
            })
            .map(|message| codec.decode_message(message))
            .collect()
    }

    /// Encoded state after each recorded snapshot for `component_id`.
    pub fn states(&self, component_id: &ComponentId) -> Vec<Json> {
        self.entries_for(component_id)
            .map(|entry| match &entry.notification {
                ServerNotification::Attached { state, .. } => state.clone(),
                ServerNotification::Snapshot { new_state, .. } => new_state.clone(),
            })
            .collect()
    }
}

impl Default for SnapshotTape {
    fn default() -> Self {
        Self::new()
    }
}

/// Append-only tape file, safe to share between components.
pub struct TapeWriter {
    created_at_ms: u64,
    seq: AtomicU64,
    writer: Mutex<BufWriter<File>>,
}

impl TapeWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        let created_at_ms = now_ms();
        write_line(
            &mut writer,
            &TapeJsonlLine::Header {
                schema_version: SNAPSHOT_TAPE_SCHEMA_VERSION,
                created_at_ms,
            },
        )?;
        writer.flush()?;
        Ok(Self {
            created_at_ms,
            seq: AtomicU64::new(1),
            writer: Mutex::new(writer),
        })
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    pub fn append(&self, entry: TapeEntry) -> io::Result<()> {
        let json = serde_json::to_string(&TapeJsonlLine::Entry { entry }).map_err(io::Error::other)?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{json}")?;
        writer.flush()
    }
}

/// Interceptor writing every snapshot of one component to a tape.
///
/// Recording failures are logged and never interrupt the run.
pub struct TapeRecorder<M, S, C> {
    writer: Arc<TapeWriter>,
    component_id: ComponentId,
    codec: Arc<dyn ComponentCodec<M, S, C>>,
}

impl<M, S, C> TapeRecorder<M, S, C> {
    pub fn new(
        writer: Arc<TapeWriter>,
        component_id: ComponentId,
        codec: impl ComponentCodec<M, S, C> + 'static,
    ) -> Self {
        Self {
            writer,
            component_id,
            codec: Arc::new(codec),
        }
    }

    fn record(&self, snapshot: &Snapshot<M, S, C>) -> io::Result<()> {
        let notification = self
            .codec
            .notification(snapshot)
            .map_err(io::Error::other)?;
        self.writer.append(TapeEntry {
            seq: self.writer.next_seq(),
            ts_ms: now_ms(),
            component_id: self.component_id.clone(),
            notification,
        })
    }
}

impl<M, S, C> Interceptor<M, S, C> for TapeRecorder<M, S, C> {
    fn intercept(&self, snapshot: &Snapshot<M, S, C>) {
        if let Err(err) = self.record(snapshot) {
            tracing::warn!(
                component_id = %self.component_id,
                error = %err,
                "Failed to record snapshot"
            );
        }
    }
}

fn write_line(writer: &mut impl Write, line: &TapeJsonlLine) -> io::Result<()> {
    let json = serde_json::to_string(line).map_err(io::Error::other)?;
    writeln!(writer, "{json}")
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
