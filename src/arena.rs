//! Per-worker arenas.
//!
//! Every active worker owns exactly one [`Arena`] which it uses as scratch
//! space while resolving queries and encoding answers. When a worker exits,
//! its arena goes back into the [`ArenaPool`] and is handed to the next
//! worker that starts, keeping whatever memory it has grown into.
//!
//! Arenas are carved from a [`RootAlloc`] shared by the whole context. A
//! pooled arena is detached from the root and attached again when handed
//! out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::vec::Vec;

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::trace;

//------------ RootAlloc -----------------------------------------------------

/// The root allocator all arenas of a context come from.
#[derive(Debug)]
pub struct RootAlloc {
    /// Initial capacity of new arenas.
    capacity: usize,

    /// The identifier of the next arena to be created.
    next_id: AtomicUsize,
}

impl RootAlloc {
    pub fn new(capacity: usize) -> Self {
        RootAlloc {
            capacity,
            next_id: AtomicUsize::new(0),
        }
    }

    /// Creates a fresh arena.
    fn create(self: &Arc<Self>) -> Arena {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Arena {
            id,
            scratch: BytesMut::with_capacity(self.capacity),
            root: Some(self.clone()),
        }
    }

    /// Returns the number of arenas created so far.
    pub fn created(&self) -> usize {
        self.next_id.load(Ordering::Relaxed)
    }
}

//------------ Arena ---------------------------------------------------------

/// A region of memory owned by a single worker.
#[derive(Debug)]
pub struct Arena {
    /// The identifier of the arena, unique within its root.
    id: usize,

    /// Scratch space.
    scratch: BytesMut,

    /// The root allocator while the arena is in use.
    root: Option<Arc<RootAlloc>>,
}

impl Arena {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns the scratch space, emptied.
    pub fn scratch(&mut self) -> &mut BytesMut {
        self.scratch.clear();
        &mut self.scratch
    }

    /// Returns the capacity the arena has grown into.
    pub fn capacity(&self) -> usize {
        self.scratch.capacity()
    }

    /// Returns whether the arena is attached to a root allocator.
    pub fn is_attached(&self) -> bool {
        self.root.is_some()
    }
}

//------------ ArenaPool -----------------------------------------------------

/// The arenas of a context not currently used by a worker.
#[derive(Debug)]
pub struct ArenaPool {
    root: Arc<RootAlloc>,
    state: Mutex<PoolState>,
}

#[derive(Debug, Default)]
struct PoolState {
    /// Arenas ready for reuse.
    free: Vec<Arena>,

    /// Number of arenas currently handed out.
    in_use: usize,
}

impl ArenaPool {
    pub fn new(capacity: usize) -> Self {
        ArenaPool {
            root: Arc::new(RootAlloc::new(capacity)),
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Hands out an arena for a worker.
    ///
    /// Reuses a pooled arena if there is one, otherwise creates a new one.
    pub fn acquire(&self) -> Arena {
        let mut state = self.state.lock();
        state.in_use += 1;
        match state.free.pop() {
            Some(mut arena) => {
                arena.root = Some(self.root.clone());
                trace!("reusing arena {}", arena.id);
                arena
            }
            None => {
                drop(state);
                let arena = self.root.create();
                trace!("created arena {}", arena.id);
                arena
            }
        }
    }

    /// Returns an arena to the pool.
    ///
    /// The arena keeps its memory for the next worker.
    pub fn release(&self, mut arena: Arena) {
        arena.root = None;
        arena.scratch.clear();
        let mut state = self.state.lock();
        state.in_use = state.in_use.saturating_sub(1);
        state.free.push(arena);
    }

    /// Frees all pooled arenas.
    pub fn clear(&self) {
        self.state.lock().free.clear()
    }

    /// Returns the number of arenas currently used by workers.
    pub fn in_use(&self) -> usize {
        self.state.lock().in_use
    }

    /// Returns the number of arenas waiting for reuse.
    pub fn free(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Returns the number of arenas ever created.
    pub fn created(&self) -> usize {
        self.root.created()
    }
}

//============ Tests =========================================================
