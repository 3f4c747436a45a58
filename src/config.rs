//! Configuration of a resolver context.
//!
//! A [`Config`] is owned by the context and can only be changed before the
//! context is finalized. Numeric values are kept within sane limits: values
//! that are out of range are quietly trimmed.

use std::cmp;
use std::vec::Vec;

use bytes::Bytes;

//------------ Configuration Constants ----------------------------------------

/// Number of worker threads.
const NUM_WORKERS: DefMinMax<usize> = DefMinMax::new(1, 1, 64);

/// Initial capacity of a worker arena’s scratch space.
const ARENA_CAPACITY: DefMinMax<usize> = DefMinMax::new(4096, 512, 1 << 20);

//------------ WorkerMode ----------------------------------------------------

/// How workers are started.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum WorkerMode {
    /// Workers are threads sharing the process’s memory.
    #[default]
    Threaded,

    /// A single worker process is forked off the caller’s process.
    ///
    /// The process only shares what was copied at fork time and talks to
    /// the context through the channels alone.
    Forked,
}

//------------ Config --------------------------------------------------------

/// Configuration for a resolver context.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// How workers are started.
    mode: WorkerMode,

    /// Number of workers to start at finalize.
    num_workers: Option<usize>,

    /// Initial arena capacity.
    arena_capacity: Option<usize>,

    /// Local data added before finalize.
    local_data: Vec<LocalData>,
}

impl Config {
    /// Creates a new, default config.
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the worker mode.
    pub fn worker_mode(&self) -> WorkerMode {
        self.mode
    }

    /// Sets the worker mode.
    pub fn set_worker_mode(&mut self, mode: WorkerMode) {
        self.mode = mode
    }

    /// Returns the number of workers started at finalize.
    pub fn num_workers(&self) -> usize {
        self.num_workers.unwrap_or(NUM_WORKERS.default())
    }

    /// Sets the number of workers.
    ///
    /// Excessive values are quietly trimmed.
    pub fn set_num_workers(&mut self, value: usize) {
        self.num_workers = Some(NUM_WORKERS.limit(value))
    }

    /// Returns the initial capacity of a freshly created arena.
    pub fn arena_capacity(&self) -> usize {
        self.arena_capacity.unwrap_or(ARENA_CAPACITY.default())
    }

    /// Sets the initial arena capacity.
    ///
    /// Excessive values are quietly trimmed.
    pub fn set_arena_capacity(&mut self, value: usize) {
        self.arena_capacity = Some(ARENA_CAPACITY.limit(value))
    }

    /// Returns the local data entries.
    pub fn local_data(&self) -> &[LocalData] {
        &self.local_data
    }

    /// Adds a local data entry.
    pub fn add_local_data(&mut self, data: LocalData) {
        self.local_data.push(data)
    }

    /// Checks that the configuration can be used to finalize a context.
    pub(crate) fn check(&self) -> Result<(), &'static str> {
        if self.mode == WorkerMode::Forked && self.num_workers() > 1 {
            return Err("forked mode supports a single worker process");
        }
        Ok(())
    }
}

//------------ LocalData -----------------------------------------------------

/// A single record served by the workers without consulting the modules.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalData {
    /// The owner name.
    pub name: String,

    /// The record type.
    pub rtype: u16,

    /// The record class.
    pub rclass: u16,

    /// The time to live of the record.
    pub ttl: u32,

    /// The record data in wire format.
    pub rdata: Bytes,
}

//------------ DefMinMax -----------------------------------------------------

/// The default, minimum, and maximum values for a config variable.
#[derive(Clone, Copy)]
struct DefMinMax<T> {
    def: T,
    min: T,
    max: T,
}

impl<T: Copy + Ord> DefMinMax<T> {
    const fn new(def: T, min: T, max: T) -> Self {
        Self { def, min, max }
    }

    fn default(self) -> T {
        self.def
    }

    fn limit(self, value: T) -> T {
        cmp::max(self.min, cmp::min(self.max, value))
    }
}

//============ Tests =========================================================
