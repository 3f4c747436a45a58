//! The resolver context.
//!
//! A [`Context`] ties everything together. It owns the configuration, the
//! channels to the workers, the workers themselves, and the index of all
//! outstanding queries.
//!
//! A context starts out unconfigured. In this state, its configuration can
//! be changed but no queries can be run. Finalizing it, either explicitly
//! via [`Context::finalize`] or implicitly with the first query, checks the
//! configuration, initializes the module stack, and starts the workers.
//! From then on, the configuration is fixed.
//!
//! Queries can be run synchronously with [`Context::resolve`], which
//! blocks until the answer is there, or asynchronously with
//! [`Context::resolve_async`], which returns immediately and later calls
//! a callback with the answer. For the callback to be called, someone has
//! to drain the result channel via [`Context::poll_result`],
//! [`Context::process`], or [`Context::wait`]. The descriptor returned by
//! [`Context::fd`] becomes readable when there is something to drain.
//!
//! All configuration-scope state, i.e., the configuration, whether the
//! context is finalized, the query index, and the count of asynchronous
//! queries, is protected by a single lock. The two channels have locks of
//! their own so that traffic on them never waits for that lock or for each
//! other. When a cancellation and the result for the same query race, the
//! one that gets the context lock first wins: either the result is
//! discarded on arrival or the cancellation does nothing.

use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::vec::Vec;

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::arena::ArenaPool;
use crate::channel::{channel, Receiver, Sender};
use crate::config::{Config, LocalData, WorkerMode};
use crate::error::Error;
use crate::local::LocalZones;
use crate::modules::ModuleStack;
use crate::queries::{Queries, QueryId};
use crate::query::{QueryRecord, QueryResult, SyncSlot};
use crate::question::Question;
use crate::wire;
use crate::worker::{Worker, WorkerHandle};

//------------ Context -------------------------------------------------------

/// A resolver context.
///
/// The context can be shared between threads, typically behind an arc.
/// Dropping it tears it down.
pub struct Context {
    /// Configuration-scope state.
    inner: Mutex<Inner>,

    /// Our end of the request channel.
    requests: Sender,

    /// Our end of the result channel.
    results: Receiver,

    /// The module stack used by all workers.
    modules: Arc<dyn ModuleStack>,
}

/// The state protected by the context lock.
struct Inner {
    /// Where in its life the context is.
    state: State,

    /// The configuration.
    config: Config,

    /// Has the module stack been initialized?
    modules_ready: bool,

    /// The worker ends of both channels until all workers are started.
    worker_ends: Option<WorkerEnds>,

    /// The sequence number of the next worker.
    next_worker_num: usize,

    /// The started workers.
    workers: Vec<WorkerHandle>,

    /// The arenas for the workers, created at finalize.
    arenas: Option<Arc<ArenaPool>>,

    /// The outstanding queries.
    queries: Queries<QueryRecord>,

    /// The number of outstanding asynchronous queries.
    num_async: usize,
}

#[derive(Clone)]
struct WorkerEnds {
    requests: Arc<Receiver>,
    results: Arc<Sender>,
}

impl WorkerEnds {
    /// Gives up the context’s references to the worker ends.
    ///
    /// Threaded workers share our sender, so whoever lets go of it last
    /// closes the channel. A forked worker has its own copy and closes it
    /// itself; closing ours would cut it off.
    fn release(self, mode: WorkerMode) {
        if mode == WorkerMode::Threaded {
            Sender::close_last(self.results)
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Unconfigured,
    Finalized,
    TornDown,
}

impl Context {
    /// Creates a new context with default configuration.
    pub fn new(modules: impl ModuleStack + 'static) -> Result<Self, Error> {
        Self::with_config(Config::default(), modules)
    }

    /// Creates a new context with the given configuration.
    pub fn with_config(
        config: Config,
        modules: impl ModuleStack + 'static,
    ) -> Result<Self, Error> {
        let (requests, worker_requests) = channel()?;
        let (worker_results, results) = channel()?;
        Ok(Context {
            inner: Mutex::new(Inner {
                state: State::Unconfigured,
                config,
                modules_ready: false,
                worker_ends: Some(WorkerEnds {
                    requests: Arc::new(worker_requests),
                    results: Arc::new(worker_results),
                }),
                next_worker_num: 0,
                workers: Vec::new(),
                arenas: None,
                queries: Queries::new(),
                num_async: 0,
            }),
            requests,
            results,
            modules: Arc::new(modules),
        })
    }

    /// Creates a context whose identifiers only go up to `max`.
    #[cfg(test)]
    pub(crate) fn with_id_space(
        config: Config,
        modules: impl ModuleStack + 'static,
        max: u32,
    ) -> Result<Self, Error> {
        let res = Self::with_config(config, modules)?;
        res.inner.lock().queries = Queries::with_max(max);
        Ok(res)
    }
}

/// # Configuration
///
impl Context {
    /// Returns a copy of the current configuration.
    pub fn config(&self) -> Config {
        self.inner.lock().config.clone()
    }

    /// Changes the configuration.
    ///
    /// Fails with [`Error::AfterFinal`] once the context was finalized.
    pub fn configure<F>(&self, op: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Config),
    {
        let mut inner = self.inner.lock();
        if inner.state != State::Unconfigured {
            return Err(Error::AfterFinal);
        }
        op(&mut inner.config);
        Ok(())
    }

    pub fn set_worker_mode(&self, mode: WorkerMode) -> Result<(), Error> {
        self.configure(|config| config.set_worker_mode(mode))
    }

    pub fn set_num_workers(&self, value: usize) -> Result<(), Error> {
        self.configure(|config| config.set_num_workers(value))
    }

    /// Adds a record to be served from local data.
    pub fn add_local_data(&self, data: LocalData) -> Result<(), Error> {
        self.configure(|config| config.add_local_data(data))
    }

    /// Finalizes the context.
    ///
    /// Checks the configuration, initializes the module stack, and starts
    /// the workers. Does nothing if the context already is finalized. If
    /// finalizing fails, the context stays unconfigured and finalizing can
    /// be tried again after fixing the configuration.
    pub fn finalize(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Finalized => return Ok(()),
            State::TornDown => return Err(Error::ChannelClosed),
            State::Unconfigured => {}
        }
        inner
            .config
            .check()
            .map_err(|msg| Error::InitFail(msg.into()))?;
        let local = LocalZones::from_config(inner.config.local_data())
            .map_err(|err| Error::InitFail(format!("bad local data: {err}")))?;
        if !inner.modules_ready {
            self.modules.init(&inner.config).map_err(|err| {
                Error::InitFail(format!("module initialization: {err}"))
            })?;
            inner.modules_ready = true;
        }
        let ends = inner
            .worker_ends
            .clone()
            .ok_or_else(|| Error::InitFail("worker channels gone".into()))?;
        let capacity = inner.config.arena_capacity();
        let arenas = inner
            .arenas
            .get_or_insert_with(|| Arc::new(ArenaPool::new(capacity)))
            .clone();
        let local = Arc::new(local);
        let mode = inner.config.worker_mode();

        // Workers started by an earlier, failed attempt are kept.
        while inner.workers.len() < inner.config.num_workers() {
            let num = inner.next_worker_num;
            inner.next_worker_num += 1;
            let worker = Worker::new(
                num,
                ends.requests.clone(),
                ends.results.clone(),
                self.modules.clone(),
                local.clone(),
                arenas.clone(),
            );
            let handle = worker.spawn(mode).map_err(|err| {
                Error::InitFail(format!("cannot start worker: {err}"))
            })?;
            inner.workers.push(handle);
        }

        // Only the workers may hold their ends now, so that we see
        // end-of-stream on the result channel once they are all gone.
        drop(ends);
        if let Some(ends) = inner.worker_ends.take() {
            ends.release(mode);
        }
        inner.state = State::Finalized;
        debug!(
            "context finalized with {} {:?} worker(s)",
            inner.workers.len(),
            mode
        );
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.inner.lock().state == State::Finalized
    }
}

/// # Queries
///
impl Context {
    /// Resolves a question, waiting for the answer.
    ///
    /// While waiting, the calling thread takes part in draining the result
    /// channel. Results for other queries it comes across are delivered
    /// as usual, which may mean calling their callbacks.
    pub fn resolve(&self, question: &Question) -> QueryResult {
        let slot = Arc::new(SyncSlot::default());
        let id = self.new_query(question, QueryRecord::new_sync(slot.clone()))?;
        loop {
            if let Some(res) = slot.take() {
                return res;
            }
            let mut results = self.results.lock();
            // Someone else may have delivered our result while we waited
            // for the lock.
            if let Some(res) = slot.take() {
                results.unlock_fair();
                return res;
            }
            let msg = results.receive();
            results.unlock_fair();
            let err = match self.dispatch(msg) {
                Ok(Delivery::Closed) => Error::ChannelClosed,
                Ok(_) => continue,
                Err(err) => err,
            };
            if self.withdraw(id, &slot) {
                return Err(err);
            }
            // Whoever took the record is about to fill the slot.
            return slot.wait();
        }
    }

    /// Starts resolving a question, calling `callback` with the result.
    ///
    /// Returns the identifier of the query which can be used to cancel
    /// it. The callback is called at most once, from whichever thread
    /// drains the result channel.
    pub fn resolve_async<F>(
        &self,
        question: &Question,
        callback: F,
    ) -> Result<QueryId, Error>
    where
        F: FnOnce(QueryResult) + Send + 'static,
    {
        self.new_query(question, QueryRecord::new_async(Box::new(callback)))
    }

    /// Admits a new query and sends it to the workers.
    ///
    /// Finalizes the context if necessary. On failure, nothing of the
    /// query remains.
    fn new_query(
        &self,
        question: &Question,
        record: QueryRecord,
    ) -> Result<QueryId, Error> {
        self.finalize()?;
        let is_async = record.is_async();
        let id = {
            let mut inner = self.inner.lock();
            if inner.state != State::Finalized {
                return Err(Error::ChannelClosed);
            }
            let id = inner.queries.insert(record).map_err(|_| {
                warn!("no free query identifiers");
                Error::NoMem
            })?;
            if is_async {
                inner.num_async += 1;
            }
            id
        };

        let mut buf = BytesMut::new();
        let res = wire::encode_query(id, question, &mut buf)
            .and_then(|()| self.requests.send(&buf));
        if let Err(err) = res {
            warn!("cannot send query {id}: {err}");
            let mut inner = self.inner.lock();
            if inner.queries.remove(id).is_some() && is_async {
                inner.num_async -= 1;
            }
            return Err(err);
        }
        trace!("admitted query {id} for {question}");
        Ok(id)
    }

    /// Cancels an outstanding query.
    ///
    /// The callback of an asynchronous query will not be called. Returns
    /// whether there was such a query; cancelling an unknown identifier is
    /// fine.
    pub fn cancel(&self, id: QueryId) -> bool {
        let record = {
            let mut inner = self.inner.lock();
            let record = inner.queries.remove(id);
            if record.as_ref().is_some_and(QueryRecord::is_async) {
                inner.num_async -= 1;
            }
            record
        };
        match record {
            Some(record) => {
                debug!("cancelled query {id}");
                record.discard();
                true
            }
            None => false,
        }
    }

    /// Removes a sync query unless its result has been delivered already.
    ///
    /// Returns whether the query was removed.
    fn withdraw(&self, id: QueryId, slot: &Arc<SyncSlot>) -> bool {
        let mut inner = self.inner.lock();
        let ours = inner
            .queries
            .get(id)
            .is_some_and(|record| record.has_slot(slot));
        if ours {
            inner.queries.remove(id);
        }
        ours
    }
}

/// # Draining Results
///
impl Context {
    /// Receives and delivers a single result.
    ///
    /// Blocks until a result arrives. If the result channel has ended or
    /// the context isn’t finalized, returns [`Delivery::Closed`]: no more
    /// results will arrive and outstanding queries stay where they are
    /// until the context is torn down.
    pub fn poll_result(&self) -> Result<Delivery, Error> {
        if self.inner.lock().state == State::Unconfigured {
            return Ok(Delivery::Closed);
        }
        let mut results = self.results.lock();
        let msg = results.receive();
        results.unlock_fair();
        self.dispatch(msg)
    }

    /// Delivers all results that can be received without blocking.
    pub fn process(&self) -> Result<(), Error> {
        while self.poll()? {
            if let Delivery::Closed = self.poll_result()? {
                break;
            }
        }
        Ok(())
    }

    /// Delivers results until no asynchronous query is outstanding.
    pub fn wait(&self) -> Result<(), Error> {
        while self.num_async() > 0 {
            if let Delivery::Closed = self.poll_result()? {
                break;
            }
        }
        Ok(())
    }

    /// Returns whether a result can be received without blocking.
    pub fn poll(&self) -> Result<bool, Error> {
        self.results.is_ready()
    }

    /// Returns the descriptor of the result channel.
    ///
    /// It becomes readable when a result is ready.
    pub fn fd(&self) -> RawFd {
        self.results.as_raw_fd()
    }

    /// Handles a message received from the result channel.
    fn dispatch(
        &self,
        msg: Result<bytes::Bytes, Error>,
    ) -> Result<Delivery, Error> {
        let msg = match msg {
            Ok(msg) => msg,
            Err(Error::ChannelClosed) => {
                let inner = self.inner.lock();
                if inner.queries.is_empty() {
                    debug!("result channel closed");
                } else {
                    warn!(
                        "result channel closed with {} queries outstanding",
                        inner.queries.len()
                    );
                }
                return Ok(Delivery::Closed);
            }
            Err(err) => return Err(err),
        };
        let (id, result) = wire::decode_answer(msg)?;
        let record = {
            let mut inner = self.inner.lock();
            let record = inner.queries.remove(id);
            if record.as_ref().is_some_and(QueryRecord::is_async) {
                inner.num_async -= 1;
            }
            record
        };
        match record {
            Some(record) => {
                trace!("delivering result for query {id}");
                record.deliver(result);
                Ok(Delivery::Delivered(id))
            }
            None => {
                debug!("discarding result for cancelled query {id}");
                Ok(Delivery::Discarded(id))
            }
        }
    }
}

/// # Statistics
///
impl Context {
    /// Returns the number of outstanding queries.
    pub fn outstanding(&self) -> usize {
        self.inner.lock().queries.len()
    }

    /// Returns the number of outstanding asynchronous queries.
    pub fn num_async(&self) -> usize {
        self.inner.lock().num_async
    }

    /// Returns the number of started workers.
    pub fn num_workers(&self) -> usize {
        self.inner.lock().workers.len()
    }

    /// Returns the arena pool once the context was finalized.
    pub fn arenas(&self) -> Option<Arc<ArenaPool>> {
        self.inner.lock().arenas.clone()
    }
}

/// # Teardown
///
impl Context {
    /// Tears down the context.
    ///
    /// All outstanding queries are abandoned: asynchronous ones have their
    /// callback called with [`Error::Cancelled`], synchronous waiters return
    /// the same error. The workers are told to stop and waited for, which
    /// includes waiting for whatever they are resolving right now.
    ///
    /// This happens automatically when the context is dropped. Afterwards,
    /// no new queries are accepted.
    pub fn teardown(&self) {
        let (records, workers, modules_ready) = {
            let mut inner = self.inner.lock();
            if inner.state == State::TornDown {
                return;
            }
            inner.state = State::TornDown;
            inner.num_async = 0;
            if let Some(ends) = inner.worker_ends.take() {
                ends.release(inner.config.worker_mode());
            }
            let records: Vec<_> = inner.queries.drain().collect();
            (
                records,
                mem::take(&mut inner.workers),
                mem::take(&mut inner.modules_ready),
            )
        };
        debug!(
            "tearing down context with {} outstanding queries",
            records.len()
        );

        self.requests.close();
        for (id, record) in records {
            trace!("abandoning query {id}");
            record.deliver(Err(Error::Cancelled));
        }

        // Keep draining so no worker is stuck on a full result channel.
        if !workers.is_empty() {
            loop {
                match self.results.receive() {
                    Ok(_) => {}
                    Err(Error::ChannelClosed) => break,
                    Err(err) => {
                        warn!("draining results during teardown: {err}");
                        break;
                    }
                }
            }
        }
        for worker in workers {
            worker.join();
        }
        if modules_ready {
            self.modules.deinit();
        }
        if let Some(arenas) = self.inner.lock().arenas.as_ref() {
            arenas.clear();
        }
        debug!("context torn down");
    }
}

//--- Drop

impl Drop for Context {
    fn drop(&mut self) {
        self.teardown()
    }
}

//------------ Delivery ------------------------------------------------------

/// What happened to a result received from the workers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Delivery {
    /// The result was handed to the owner of the query.
    Delivered(QueryId),

    /// The query had been cancelled, so the result was dropped.
    Discarded(QueryId),

    /// No more results will arrive.
    Closed,
}

//------------ Future-based lookups ------------------------------------------

#[cfg(feature = "tokio")]
impl Context {
    /// Resolves a question, returning the answer through a future.
    ///
    /// Some other task or thread must drain the result channel for the
    /// future to complete. Dropping the future cancels the query.
    pub async fn lookup(&self, question: &Question) -> QueryResult {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let id = self.resolve_async(question, move |res| {
            // The receiver may be gone if the lookup was dropped.
            let _ = tx.send(res);
        })?;
        let mut guard = CancelOnDrop {
            context: self,
            id: Some(id),
        };
        let res = rx.await.unwrap_or(Err(Error::Cancelled));
        guard.id = None;
        res
    }
}

/// Cancels a query if a lookup is dropped before it completed.
#[cfg(feature = "tokio")]
struct CancelOnDrop<'a> {
    context: &'a Context,
    id: Option<QueryId>,
}

#[cfg(feature = "tokio")]
impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.context.cancel(id);
        }
    }
}

//============ Tests =========================================================
