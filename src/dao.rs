//! Per-type store capabilities and the registry that dispatches to them by type name.

use crate::cursor::ResultCursor;
use crate::query::QuerySpec;
use crate::record::{Pid, Record, RecordId};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// What the submit pipeline needs from the store for one record type.
pub trait RecordDao: Send + Sync {
    fn record_type(&self) -> &str;

    /// Begin executing `spec`. Errors here mean the store could not start the query.
    fn search(&self, spec: &QuerySpec) -> Result<Box<dyn ResultCursor + '_>>;

    /// Resolve identifiers to bodies. Each pid yields at most one record; pids that
    /// no longer resolve may be skipped.
    fn load(&self, pids: &[Pid]) -> Result<Vec<Record>>;

    /// Direct read by logical id, bypassing the cursor machinery.
    fn read(&self, id: &RecordId) -> Result<Option<Record>>;
}

#[derive(Clone, Default)]
pub struct DaoRegistry {
    daos: HashMap<String, Arc<dyn RecordDao>>,
}

impl DaoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the dao's own type name, replacing any previous entry.
    pub fn register(&mut self, dao: Arc<dyn RecordDao>) -> &mut Self {
        self.daos.insert(dao.record_type().to_string(), dao);
        self
    }

    pub fn with(mut self, dao: Arc<dyn RecordDao>) -> Self {
        self.register(dao);
        self
    }

    pub fn get(&self, record_type: &str) -> Option<&Arc<dyn RecordDao>> {
        self.daos.get(record_type)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.daos.keys().map(String::as_str)
    }
}
