//! Downstream channel: where resubmitted records go for matching/linking.
//!
//! Submissions are fire-and-forget. A returned `Ok` only means the write call succeeded;
//! nothing here takes part in store transactions.

use crate::record::Record;
use crate::util::create_with_backoff;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use zstd::stream::write::Encoder as ZstdEncoder;

/// Operation tag carried by every resubmitted record.
pub const MANUALLY_TRIGGERED: &str = "MANUALLY_TRIGGERED";

pub trait ChannelSubmitter: Send + Sync {
    fn submit(&self, record: &Record) -> Result<()>;
}

/// Message shape written to the channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub operation: String,
    pub resource_type: String,
    pub id: String,
    pub submitted_at: String,
    pub resource: Value,
}

impl Envelope {
    pub fn for_record(record: &Record) -> Self {
        let submitted_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        Self {
            operation: MANUALLY_TRIGGERED.to_string(),
            resource_type: record.id.record_type.clone(),
            id: record.id.id.clone(),
            submitted_at,
            resource: record.body.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelFormat {
    Jsonl,
    Zst,
}

enum Sink {
    Jsonl(BufWriter<File>),
    Zst(ZstdEncoder<'static, BufWriter<File>>),
}

impl Sink {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Sink::Jsonl(w) => w,
            Sink::Zst(enc) => enc,
        }
    }
}

/// Writes one envelope per line to a file, optionally zstd-compressed.
pub struct NdjsonChannel {
    path: PathBuf,
    sink: Mutex<Option<Sink>>,
}

impl NdjsonChannel {
    pub fn create(path: &Path, format: ChannelFormat, buf_bytes: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = create_with_backoff(path, 16, 50).with_context(|| format!("create {}", path.display()))?;
        let w = BufWriter::with_capacity(buf_bytes.max(8 * 1024), file);
        let sink = match format {
            ChannelFormat::Jsonl => Sink::Jsonl(w),
            ChannelFormat::Zst => Sink::Zst(ZstdEncoder::new(w, 3)?),
        };
        Ok(Self { path: path.to_path_buf(), sink: Mutex::new(Some(sink)) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and, for zstd, write the frame epilogue. Later submits fail.
    pub fn finish(&self) -> Result<()> {
        match self.sink.lock().take() {
            Some(Sink::Jsonl(mut w)) => w.flush()?,
            Some(Sink::Zst(enc)) => enc.finish()?.flush()?,
            None => {}
        }
        Ok(())
    }
}

impl ChannelSubmitter for NdjsonChannel {
    fn submit(&self, record: &Record) -> Result<()> {
        let mut guard = self.sink.lock();
        let sink = guard
            .as_mut()
            .with_context(|| format!("channel {} is already finished", self.path.display()))?;
        let w = sink.writer();
        serde_json::to_writer(&mut *w, &Envelope::for_record(record))?;
        w.write_all(b"\n")?;
        Ok(())
    }
}

/// Keeps envelopes in memory.
#[derive(Default)]
pub struct MemoryChannel {
    sent: Mutex<Vec<Envelope>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

impl ChannelSubmitter for MemoryChannel {
    fn submit(&self, record: &Record) -> Result<()> {
        self.sent.lock().push(Envelope::for_record(record));
        Ok(())
    }
}
