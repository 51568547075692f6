#![allow(dead_code)]

use anyhow::{anyhow, Result};
use relink::{ChannelSubmitter, Pid, QuerySpec, Record, RecordDao, RecordId, ResultCursor, TransactionManager, TxId};
use serde_json::{json, Value};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

// ----------------------------- Store fixtures ------------------------------------

pub fn patient(i: usize) -> Value {
    let family = if i % 2 == 0 { "Smith" } else { "Jones" };
    json!({
        "resourceType": "Patient",
        "id": format!("p{i}"),
        "active": true,
        "gender": if i % 3 == 0 { "female" } else { "male" },
        "name": [{ "family": family, "given": [format!("Pat{i}")] }],
        "birthDate": format!("19{:02}-01-01", 50 + (i % 40))
    })
}

pub fn practitioner(i: usize) -> Value {
    json!({
        "resourceType": "Practitioner",
        "id": format!("d{i}"),
        "name": [{ "family": "House", "given": [format!("Greg{i}")] }]
    })
}

/// Append bodies as NDJSON lines to `<dir>/<record_type>.ndjson`.
pub fn write_records(dir: &Path, record_type: &str, bodies: &[Value]) {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("{record_type}.ndjson"));
    let mut f = fs::OpenOptions::new().create(true).append(true).open(path).unwrap();
    for b in bodies {
        writeln!(&mut f, "{}", b).unwrap();
    }
}

/// Fresh store directory with `patients` Patient and `practitioners` Practitioner records.
pub fn make_store(patients: usize, practitioners: usize) -> PathBuf {
    let dir = tempfile::tempdir().unwrap().into_path();
    let p: Vec<Value> = (0..patients).map(patient).collect();
    let d: Vec<Value> = (0..practitioners).map(practitioner).collect();
    if patients > 0 {
        write_records(&dir, "Patient", &p);
    }
    if practitioners > 0 {
        write_records(&dir, "Practitioner", &d);
    }
    dir
}

pub fn read_jsonl_values(path: &Path) -> Vec<Value> {
    let r = BufReader::new(File::open(path).unwrap());
    r.lines()
        .map(|l| l.unwrap())
        .filter(|s| !s.is_empty())
        .map(|s| serde_json::from_str(&s).unwrap())
        .collect()
}

pub fn decompress_zst_values(path: &Path) -> Vec<Value> {
    let dec = zstd::stream::read::Decoder::new(File::open(path).unwrap()).unwrap();
    BufReader::new(dec)
        .lines()
        .map(|l| l.unwrap())
        .filter(|s| !s.is_empty())
        .map(|s| serde_json::from_str(&s).unwrap())
        .collect()
}

// ----------------------------- Probing dao ------------------------------------

/// Call counters shared by a `ProbeDao` and the cursors it hands out.
#[derive(Default)]
pub struct Stats {
    pub searches: AtomicU64,
    pub advances: AtomicU64,
    pub closes: AtomicU64,
    pub loads: AtomicU64,
    pub reads: AtomicU64,
}

impl Stats {
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::SeqCst)
    }
    pub fn searches(&self) -> u64 { Self::get(&self.searches) }
    pub fn advances(&self) -> u64 { Self::get(&self.advances) }
    pub fn closes(&self) -> u64 { Self::get(&self.closes) }
    pub fn loads(&self) -> u64 { Self::get(&self.loads) }
    pub fn reads(&self) -> u64 { Self::get(&self.reads) }
    pub fn store_calls(&self) -> u64 {
        self.searches() + self.advances() + self.loads() + self.reads()
    }
}

/// Wraps a real dao, counting calls and failing on request.
pub struct ProbeDao {
    inner: Arc<dyn RecordDao>,
    pub stats: Arc<Stats>,
    pub fail_search: bool,
    /// 1-based cursor advance that errors.
    pub fail_advance_at: Option<u64>,
    /// 1-based load call that errors.
    pub fail_load_at: Option<u64>,
    /// Drop the first resolved record of every load.
    pub drop_first_loaded: bool,
}

impl ProbeDao {
    pub fn new(inner: Arc<dyn RecordDao>) -> Self {
        Self {
            inner,
            stats: Arc::new(Stats::default()),
            fail_search: false,
            fail_advance_at: None,
            fail_load_at: None,
            drop_first_loaded: false,
        }
    }
}

impl RecordDao for ProbeDao {
    fn record_type(&self) -> &str {
        self.inner.record_type()
    }

    fn search(&self, spec: &QuerySpec) -> Result<Box<dyn ResultCursor + '_>> {
        self.stats.searches.fetch_add(1, Ordering::SeqCst);
        if self.fail_search {
            return Err(anyhow!("store unavailable"));
        }
        let inner = self.inner.search(spec)?;
        Ok(Box::new(ProbeCursor { inner, stats: self.stats.clone(), fail_at: self.fail_advance_at }))
    }

    fn load(&self, pids: &[Pid]) -> Result<Vec<Record>> {
        let n = self.stats.loads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_load_at == Some(n) {
            return Err(anyhow!("load {n} failed"));
        }
        let mut out = self.inner.load(pids)?;
        if self.drop_first_loaded && !out.is_empty() {
            out.remove(0);
        }
        Ok(out)
    }

    fn read(&self, id: &RecordId) -> Result<Option<Record>> {
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(id)
    }
}

struct ProbeCursor<'a> {
    inner: Box<dyn ResultCursor + 'a>,
    stats: Arc<Stats>,
    fail_at: Option<u64>,
}

impl ResultCursor for ProbeCursor<'_> {
    fn next_batch(&mut self, max: usize) -> Result<Vec<Pid>> {
        let n = self.stats.advances.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_at == Some(n) {
            return Err(anyhow!("I/O failure on advance {n}"));
        }
        self.inner.next_batch(max)
    }

    fn has_more(&self) -> bool {
        self.inner.has_more()
    }

    fn close(&mut self) {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close();
    }
}

// ----------------------------- Channels ------------------------------------

/// Records submitted ids; optionally fails on the n-th call (1-based).
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<RecordId>>,
    calls: AtomicU64,
    pub fail_at: Option<u64>,
}

impl RecordingChannel {
    pub fn failing_at(n: u64) -> Self {
        Self { fail_at: Some(n), ..Default::default() }
    }
    pub fn sent(&self) -> Vec<RecordId> {
        self.sent.lock().unwrap().clone()
    }
    pub fn sent_strings(&self) -> Vec<String> {
        self.sent().iter().map(|id| id.to_string()).collect()
    }
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ChannelSubmitter for RecordingChannel {
    fn submit(&self, record: &Record) -> Result<()> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_at == Some(n) {
            return Err(anyhow!("broker rejected message {n}"));
        }
        self.sent.lock().unwrap().push(record.id.clone());
        Ok(())
    }
}

// ----------------------------- Transactions ------------------------------------

/// Logs begin/commit/rollback as strings like "begin 1".
#[derive(Default)]
pub struct RecordingTx {
    next: AtomicU64,
    pub events: Mutex<Vec<String>>,
}

impl RecordingTx {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl TransactionManager for RecordingTx {
    fn begin(&self) -> Result<TxId> {
        let id = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        self.events.lock().unwrap().push(format!("begin {id}"));
        Ok(TxId(id))
    }
    fn commit(&self, tx: TxId) -> Result<()> {
        self.events.lock().unwrap().push(format!("commit {}", tx.0));
        Ok(())
    }
    fn rollback(&self, tx: TxId) {
        self.events.lock().unwrap().push(format!("rollback {}", tx.0));
    }
}

// ----------------------------- Log capture ------------------------------------

/// Cloneable in-memory writer for a `tracing_subscriber::fmt` subscriber.
#[derive(Clone, Default)]
pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn capture_dispatch() -> (tracing::Dispatch, SharedBuf) {
    let buf = SharedBuf::default();
    let writer = buf.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(move || writer.clone())
        .finish();
    (tracing::Dispatch::new(subscriber), buf)
}
