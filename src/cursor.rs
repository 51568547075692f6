//! Paginated result cursors and the guard that guarantees they get closed.

use crate::record::Pid;
use anyhow::Result;

/// Pull interface over a store-side query execution.
pub trait ResultCursor {
    /// Up to `max` identifiers in store order. Fewer than `max` only on the final batch.
    fn next_batch(&mut self, max: usize) -> Result<Vec<Pid>>;

    /// True until the result set is exhausted.
    fn has_more(&self) -> bool;

    /// Release store resources. Must be idempotent.
    fn close(&mut self);
}

/// Owns a cursor for one submit run: closes it after the first error, on exhaustion,
/// and on drop, so no exit path leaks store resources.
pub struct CursorGuard<'a> {
    inner: Box<dyn ResultCursor + 'a>,
    closed: bool,
    advances: u64,
}

impl<'a> CursorGuard<'a> {
    pub fn new(inner: Box<dyn ResultCursor + 'a>) -> Self {
        Self { inner, closed: false, advances: 0 }
    }

    pub fn has_more(&self) -> bool {
        !self.closed && self.inner.has_more()
    }

    /// An empty batch once closed; errors close the cursor before propagating.
    pub fn next_batch(&mut self, max: usize) -> Result<Vec<Pid>> {
        if self.closed {
            return Ok(Vec::new());
        }
        self.advances += 1;
        match self.inner.next_batch(max) {
            Ok(mut batch) => {
                // Hold the store to its page bound.
                batch.truncate(max);
                if !self.inner.has_more() {
                    self.close();
                }
                Ok(batch)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    pub fn advances(&self) -> u64 {
        self.advances
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.close();
            tracing::debug!(advances = self.advances, "cursor closed");
        }
    }
}

impl Drop for CursorGuard<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
