mod config;
mod error;
mod query;
mod record;

mod cursor;
mod dao;
mod store;
mod tx;

mod channel;
mod progress;
mod util;
mod pipeline;

pub use crate::config::{SubmitOptions, TargetTypes};
pub use crate::error::SubmitError;
pub use crate::pipeline::{Resubmitter, PATIENT, PRACTITIONER};
pub use crate::query::{Modifier, Predicate, QuerySpec, DEFAULT_PAGE_SIZE};
pub use crate::record::{Pid, Record, RecordId};

// Store seams: cursor + per-type dao + registry, and the file-backed implementation.
pub use crate::cursor::{CursorGuard, ResultCursor};
pub use crate::dao::{DaoRegistry, RecordDao};
pub use crate::store::{FileDao, FileStore};

// Transaction scoping (read consistency for cursors only).
pub use crate::tx::{Propagation, TransactionManager, TxId, TxScope};

// Downstream channel implementations.
pub use crate::channel::{ChannelFormat, ChannelSubmitter, Envelope, MemoryChannel, NdjsonChannel, MANUALLY_TRIGGERED};

// Logging setup for binaries.
pub use crate::util::init_tracing_once;
