//! The state kept for each outstanding query.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::answer::Answer;
use crate::error::Error;

/// The result of a query as delivered to its owner.
pub type QueryResult = Result<Answer, Error>;

/// The function called with the result of an asynchronous query.
pub type Callback = Box<dyn FnOnce(QueryResult) + Send + 'static>;

//------------ QueryRecord ---------------------------------------------------

/// An outstanding query.
///
/// Records live in the context’s index from admission until their result
/// arrives, they are cancelled, or the context goes away.
pub(crate) struct QueryRecord {
    mode: Mode,
}

/// How the result of a query is delivered.
enum Mode {
    /// A caller is blocked waiting for the result.
    Sync(Arc<SyncSlot>),

    /// The callback gets the result.
    Async(Callback),
}

impl QueryRecord {
    pub fn new_sync(slot: Arc<SyncSlot>) -> Self {
        QueryRecord {
            mode: Mode::Sync(slot),
        }
    }

    pub fn new_async(callback: Callback) -> Self {
        QueryRecord {
            mode: Mode::Async(callback),
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self.mode, Mode::Async(_))
    }

    /// Returns whether this is the sync record waiting on `slot`.
    pub fn has_slot(&self, slot: &Arc<SyncSlot>) -> bool {
        match self.mode {
            Mode::Sync(ref own) => Arc::ptr_eq(own, slot),
            Mode::Async(_) => false,
        }
    }

    /// Hands the result to the owner of the query.
    ///
    /// Consumes the record, so this happens at most once. Must not be
    /// called with the context lock held since the callback may well
    /// call back into the context.
    pub fn deliver(self, result: QueryResult) {
        match self.mode {
            Mode::Sync(slot) => slot.fill(result),
            Mode::Async(callback) => callback(result),
        }
    }

    /// Drops the record without telling its owner.
    ///
    /// A sync waiter is still woken up with `Error::Cancelled` since it
    /// would otherwise wait forever.
    pub fn discard(self) {
        if let Mode::Sync(slot) = self.mode {
            slot.fill(Err(Error::Cancelled))
        }
    }
}

//------------ SyncSlot ------------------------------------------------------

/// The place where a blocked caller finds its result.
#[derive(Debug, Default)]
pub(crate) struct SyncSlot {
    result: Mutex<Option<QueryResult>>,
    filled: Condvar,
}

impl SyncSlot {
    pub fn fill(&self, result: QueryResult) {
        *self.result.lock() = Some(result);
        self.filled.notify_all();
    }

    pub fn take(&self) -> Option<QueryResult> {
        self.result.lock().take()
    }

    /// Waits until the slot is filled and takes the result.
    ///
    /// Only call this once the record has left the index, otherwise
    /// nobody may ever fill the slot.
    pub fn wait(&self) -> QueryResult {
        let mut result = self.result.lock();
        loop {
            if let Some(res) = result.take() {
                return res;
            }
            self.filled.wait(&mut result);
        }
    }
}

//============ Tests =========================================================
