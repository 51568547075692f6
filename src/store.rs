//! File-backed record store: one NDJSON file per record type under a store directory.
//!
//! `<store_dir>/<Type>.ndjson`, one JSON object per line with `resourceType` and `id`.
//! Files are append-only; a later line with the same id supersedes earlier ones for
//! direct reads. A record's `Pid` is the byte offset of its line.

use crate::config::TargetTypes;
use crate::cursor::ResultCursor;
use crate::dao::{DaoRegistry, RecordDao};
use crate::query::QuerySpec;
use crate::record::{resource_type, Pid, Record, RecordId};
use crate::tx::{TransactionManager, TxId};
use crate::util::{append_with_backoff, open_with_backoff};
use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use walkdir::WalkDir;

const STORE_EXT: &str = "ndjson";

/// Header fields only; lets direct reads skip a full parse of non-matching lines.
#[derive(Debug, Deserialize)]
struct RecordHeader {
    #[serde(rename = "resourceType")]
    resource_type: Option<String>,
    id: Option<String>,
}

/// File lengths captured when a transaction began.
struct Pin {
    tx: TxId,
    lengths: HashMap<String, u64>,
}

struct StoreInner {
    dir: PathBuf,
    read_buf: usize,
    pins: Mutex<Vec<Pin>>,
    next_tx: AtomicU64,
}

impl StoreInner {
    fn path_for(&self, record_type: &str) -> PathBuf {
        self.dir.join(format!("{record_type}.{STORE_EXT}"))
    }

    /// Readable length for `record_type`: pinned by the innermost transaction, else the live size.
    fn visible_len(&self, record_type: &str, path: &Path) -> io::Result<Option<u64>> {
        if let Some(pin) = self.pins.lock().last() {
            return Ok(Some(pin.lengths.get(record_type).copied().unwrap_or(0)));
        }
        match fs::metadata(path) {
            Ok(m) => Ok(Some(m.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn snapshot(&self) -> Result<HashMap<String, u64>> {
        let mut lengths = HashMap::new();
        for (record_type, path) in scan_dir(&self.dir)? {
            let len = fs::metadata(&path).with_context(|| format!("stat {}", path.display()))?.len();
            lengths.insert(record_type, len);
        }
        Ok(lengths)
    }
}

/// Cheap to clone; clones share transaction state.
#[derive(Clone)]
pub struct FileStore {
    inner: Arc<StoreInner>,
}

impl FileStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_read_buffer(dir, 64 * 1024)
    }

    pub fn with_read_buffer(dir: impl AsRef<Path>, read_buf: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("create store dir {}", dir.display()))?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                dir,
                read_buf: read_buf.max(8 * 1024),
                pins: Mutex::new(Vec::new()),
                next_tx: AtomicU64::new(1),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn dao(&self, record_type: impl Into<String>) -> Arc<FileDao> {
        let record_type = record_type.into();
        Arc::new(FileDao {
            path: self.inner.path_for(&record_type),
            record_type,
            inner: self.inner.clone(),
        })
    }

    /// One dao per allow-listed type.
    pub fn registry(&self, types: &TargetTypes) -> DaoRegistry {
        let mut reg = DaoRegistry::new();
        for t in types.iter() {
            reg.register(self.dao(t));
        }
        reg
    }

    /// Types that currently have a file, sorted by name.
    pub fn discover_types(&self) -> Result<Vec<String>> {
        Ok(scan_dir(&self.inner.dir)?.into_iter().map(|(t, _)| t).collect())
    }

    /// Append one record body; it must carry `resourceType` and `id`.
    pub fn append(&self, body: &Value) -> Result<Pid> {
        let record = Record::from_body(body.clone())
            .ok_or_else(|| anyhow!("record body needs resourceType and id"))?;
        let path = self.inner.path_for(record.record_type());
        let mut f = append_with_backoff(&path, 16, 50).with_context(|| format!("open {}", path.display()))?;
        let offset = f.seek(SeekFrom::End(0))?;
        let mut line = serde_json::to_vec(body)?;
        line.push(b'\n');
        f.write_all(&line).with_context(|| format!("append to {}", path.display()))?;
        Ok(Pid(offset))
    }
}

impl TransactionManager for FileStore {
    fn begin(&self) -> Result<TxId> {
        let lengths = self.inner.snapshot()?;
        let tx = TxId(self.inner.next_tx.fetch_add(1, Ordering::Relaxed));
        self.inner.pins.lock().push(Pin { tx, lengths });
        Ok(tx)
    }

    fn commit(&self, tx: TxId) -> Result<()> {
        let mut pins = self.inner.pins.lock();
        let before = pins.len();
        pins.retain(|p| p.tx != tx);
        if pins.len() == before {
            return Err(anyhow!("transaction {} is not active", tx.0));
        }
        Ok(())
    }

    fn rollback(&self, tx: TxId) {
        // Read-only pins: nothing to undo beyond releasing the snapshot.
        self.inner.pins.lock().retain(|p| p.tx != tx);
    }
}

fn scan_dir(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    if !dir.is_dir() {
        return Err(anyhow!("store dir {} is missing", dir.display()));
    }
    let mut out = Vec::new();
    for ent in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let ent = ent.with_context(|| format!("list {}", dir.display()))?;
        let path = ent.path();
        if !ent.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some(STORE_EXT) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            out.push((stem.to_string(), path.to_path_buf()));
        }
    }
    out.sort();
    Ok(out)
}

/// Decode one store line. `None` for blank lines and, with a warning, for lines
/// that are not UTF-8 or not JSON.
fn parse_line(raw: &[u8], path: &Path, offset: u64) -> Option<Value> {
    let text = match std::str::from_utf8(raw) {
        Ok(t) => t.trim(),
        Err(e) => {
            tracing::warn!(path = %path.display(), offset, error = %e, "skipping store line that is not UTF-8");
            return None;
        }
    };
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str(text) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(path = %path.display(), offset, error = %e, "skipping unparseable store line");
            None
        }
    }
}

pub struct FileDao {
    record_type: String,
    path: PathBuf,
    inner: Arc<StoreInner>,
}

impl FileDao {
    fn open_reader(&self) -> io::Result<Option<BufReader<File>>> {
        match open_with_backoff(&self.path, 16, 50) {
            Ok(f) => Ok(Some(BufReader::with_capacity(self.inner.read_buf, f))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl RecordDao for FileDao {
    fn record_type(&self) -> &str {
        &self.record_type
    }

    fn search(&self, spec: &QuerySpec) -> Result<Box<dyn ResultCursor + '_>> {
        if spec.record_type != self.record_type {
            return Err(anyhow!("query for {} sent to the {} store", spec.record_type, self.record_type));
        }
        let limit = self
            .inner
            .visible_len(&self.record_type, &self.path)
            .with_context(|| format!("stat {}", self.path.display()))?
            .unwrap_or(0);
        let reader = if limit == 0 {
            None
        } else {
            self.open_reader().with_context(|| format!("open {}", self.path.display()))?
        };
        let cursor = FileCursor::start(reader, limit, spec.clone(), self.path.clone())?;
        Ok(Box::new(cursor))
    }

    fn load(&self, pids: &[Pid]) -> Result<Vec<Record>> {
        if pids.is_empty() {
            return Ok(Vec::new());
        }
        let Some(mut reader) = self.open_reader().with_context(|| format!("open {}", self.path.display()))? else {
            tracing::warn!(path = %self.path.display(), "store file vanished before load");
            return Ok(Vec::new());
        };

        let mut out = Vec::with_capacity(pids.len());
        let mut line = Vec::new();
        for &pid in pids {
            reader.seek(SeekFrom::Start(pid.0))?;
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                tracing::warn!(pid = pid.0, "no record at offset");
                continue;
            }
            let resolved = parse_line(&line, &self.path, pid.0)
                .filter(|v| resource_type(v) == Some(self.record_type.as_str()))
                .and_then(Record::from_body);
            match resolved {
                Some(r) => out.push(r),
                None => tracing::warn!(pid = pid.0, path = %self.path.display(), "offset does not resolve to a record"),
            }
        }
        Ok(out)
    }

    fn read(&self, id: &RecordId) -> Result<Option<Record>> {
        if id.record_type != self.record_type {
            return Ok(None);
        }
        let Some(mut reader) = self.open_reader().with_context(|| format!("open {}", self.path.display()))? else {
            return Ok(None);
        };

        let mut found: Option<Vec<u8>> = None;
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .with_context(|| format!("read {}", self.path.display()))?;
            if n == 0 {
                break;
            }
            let Ok(head) = serde_json::from_slice::<RecordHeader>(&line) else { continue };
            if head.id.as_deref() == Some(id.id.as_str())
                && head.resource_type.as_deref() == Some(self.record_type.as_str())
            {
                found = Some(line.clone());
            }
        }

        match found {
            Some(line) => {
                let body: Value = serde_json::from_slice(&line)?;
                Ok(Record::from_body(body))
            }
            None => Ok(None),
        }
    }
}

/// Streams one type file, filtering as it goes, with one match of look-ahead so
/// `has_more` turns false exactly when the last batch is handed out.
struct FileCursor {
    reader: Option<BufReader<File>>,
    offset: u64,
    limit: u64,
    spec: QuerySpec,
    path: PathBuf,
    lookahead: Option<Pid>,
    line: Vec<u8>,
}

impl FileCursor {
    fn start(reader: Option<BufReader<File>>, limit: u64, spec: QuerySpec, path: PathBuf) -> Result<Self> {
        let mut c = Self { reader, offset: 0, limit, spec, path, lookahead: None, line: Vec::new() };
        c.lookahead = c.scan_next()?;
        Ok(c)
    }

    fn scan_next(&mut self) -> Result<Option<Pid>> {
        let Some(reader) = self.reader.as_mut() else { return Ok(None) };
        loop {
            if self.offset >= self.limit {
                return Ok(None);
            }
            self.line.clear();
            let n = reader
                .read_until(b'\n', &mut self.line)
                .with_context(|| format!("read {}", self.path.display()))? as u64;
            let start = self.offset;
            self.offset += n;
            // EOF, or a line that ends past the visible length (appended after the
            // cursor opened, or after the transaction's pin).
            if n == 0 || self.offset > self.limit {
                return Ok(None);
            }

            let Some(body) = parse_line(&self.line, &self.path, start) else { continue };
            if resource_type(&body) != Some(self.spec.record_type.as_str()) {
                tracing::debug!(offset = start, "skipping line of another type");
                continue;
            }
            if self.spec.matches(&body) {
                return Ok(Some(Pid(start)));
            }
        }
    }
}

impl ResultCursor for FileCursor {
    fn next_batch(&mut self, max: usize) -> Result<Vec<Pid>> {
        let mut batch = Vec::with_capacity(max.min(1024));
        while batch.len() < max {
            let Some(pid) = self.lookahead.take() else { break };
            batch.push(pid);
            self.lookahead = self.scan_next()?;
        }
        Ok(batch)
    }

    fn has_more(&self) -> bool {
        self.lookahead.is_some()
    }

    fn close(&mut self) {
        self.reader = None;
        self.lookahead = None;
    }
}
