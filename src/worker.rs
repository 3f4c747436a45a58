//! Workers resolving queries in the background.
//!
//! A worker reads new queries from the request channel, answers them from
//! local data or via the module stack, and writes the answers to the
//! result channel. It ends when the request channel is closed.
//!
//! How a worker is started depends on the [`WorkerMode`]: as a thread
//! sharing the context’s memory, or as a forked process that only has
//! the channels in common with it. The worker itself does not care.

use std::io;
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, trace, warn};

use crate::answer::Answer;
use crate::arena::{Arena, ArenaPool};
use crate::channel::{Receiver, Sender};
use crate::config::WorkerMode;
use crate::error::Error;
use crate::local::LocalZones;
use crate::modules::ModuleStack;
use crate::question::Question;
use crate::wire;

//------------ Worker --------------------------------------------------------

/// Everything a worker needs to run.
pub(crate) struct Worker {
    /// The worker’s sequence number within its context.
    num: usize,

    /// Where new queries come from.
    requests: Arc<Receiver>,

    /// Where answers go.
    results: Arc<Sender>,

    /// The modules to resolve with.
    modules: Arc<dyn ModuleStack>,

    /// Local data consulted first.
    local: Arc<LocalZones>,

    /// The pool the worker’s arena comes from.
    arenas: Arc<ArenaPool>,
}

impl Worker {
    pub fn new(
        num: usize,
        requests: Arc<Receiver>,
        results: Arc<Sender>,
        modules: Arc<dyn ModuleStack>,
        local: Arc<LocalZones>,
        arenas: Arc<ArenaPool>,
    ) -> Self {
        Worker {
            num,
            requests,
            results,
            modules,
            local,
            arenas,
        }
    }

    /// Starts the worker in the given mode.
    pub fn spawn(self, mode: WorkerMode) -> Result<WorkerHandle, Error> {
        match mode {
            WorkerMode::Threaded => self.spawn_thread(),
            WorkerMode::Forked => self.spawn_process(),
        }
    }

    fn spawn_thread(self) -> Result<WorkerHandle, Error> {
        let num = self.num;
        let handle = thread::Builder::new()
            .name(format!("resolv-worker-{num}"))
            .spawn(move || self.run(WorkerMode::Threaded))?;
        debug!("started worker thread {num}");
        Ok(WorkerHandle::Thread(handle))
    }

    fn spawn_process(self) -> Result<WorkerHandle, Error> {
        // SAFETY: The child only runs the worker loop, which touches the
        // channels, the module stack, and its own copy of the arena pool,
        // and then exits without returning into the caller’s code.
        let pid = unsafe { libc::fork() };
        match pid {
            -1 => Err(io::Error::last_os_error().into()),
            0 => {
                // Other threads of the parent may have held the logging
                // machinery’s locks when we forked.
                let none = tracing::Dispatch::none();
                tracing::dispatcher::with_default(&none, || {
                    self.run(WorkerMode::Forked)
                });
                // SAFETY: Ends the child without running the parent’s
                // atexit handlers or destructors.
                unsafe { libc::_exit(0) }
            }
            pid => {
                debug!("started worker {} as process {pid}", self.num);
                Ok(WorkerHandle::Process(pid))
            }
        }
    }

    /// Runs the worker loop until the request channel closes.
    ///
    /// On the way out, the result channel is closed once no other worker
    /// of the context can write to it anymore. Processes forked off the
    /// caller’s process, whether by this context or any other, hold copies
    /// of its descriptor, so merely dropping it is not enough for the
    /// context to see end-of-stream.
    pub fn run(self, mode: WorkerMode) {
        let mut arena = self.arenas.acquire();
        trace!("worker {} uses arena {}", self.num, arena.id());
        loop {
            let msg = match self.requests.receive() {
                Ok(msg) => msg,
                Err(Error::ChannelClosed) => break,
                Err(err) => {
                    error!("worker {}: reading request failed: {err}", self.num);
                    break;
                }
            };
            let (id, question) = match wire::decode_query(msg) {
                Ok(res) => res,
                Err(err) => {
                    warn!("worker {}: dropping bad request: {err}", self.num);
                    continue;
                }
            };
            let result = question
                .and_then(|question| self.resolve(&question, &mut arena));
            trace!("worker {}: answering query {id}", self.num);
            let buf = arena.scratch();
            let res = match wire::encode_answer(id, &result, buf) {
                Ok(()) => Ok(()),
                Err(err) => {
                    // The answer didn’t fit the message format or the
                    // channel. Let the owner know instead of leaving the
                    // query hanging.
                    warn!("worker {}: cannot encode answer: {err}", self.num);
                    wire::encode_answer(id, &Err(Error::ServFail), buf)
                }
            }
            .and_then(|()| self.results.send(&buf[..]));
            if let Err(err) = res {
                error!("worker {}: sending answer failed: {err}", self.num);
                break;
            }
        }
        debug!("worker {} exits", self.num);
        self.arenas.release(arena);
        match mode {
            // The only writer. Our copy of the reference count includes
            // the parent’s references, so it is never the last.
            WorkerMode::Forked => self.results.close(),
            WorkerMode::Threaded => Sender::close_last(self.results),
        }
    }

    /// Resolves a single question.
    fn resolve(
        &self,
        question: &Question,
        arena: &mut Arena,
    ) -> Result<Answer, Error> {
        if let Some(answer) = self.local.answer(question) {
            trace!("worker {}: {question} answered locally", self.num);
            return Ok(answer);
        }
        self.modules.resolve(question, arena)
    }
}

//------------ WorkerHandle --------------------------------------------------

/// A started worker.
#[derive(Debug)]
pub(crate) enum WorkerHandle {
    Thread(thread::JoinHandle<()>),
    Process(libc::pid_t),
}

impl WorkerHandle {
    /// Waits for the worker to end.
    ///
    /// The request channel must have been closed before or this may wait
    /// forever.
    pub fn join(self) {
        match self {
            WorkerHandle::Thread(handle) => {
                if handle.join().is_err() {
                    error!("worker thread panicked");
                }
            }
            WorkerHandle::Process(pid) => {
                let mut status = 0;
                loop {
                    // SAFETY: `status` is a valid location for the call to
                    // write to.
                    let res = unsafe { libc::waitpid(pid, &mut status, 0) };
                    if res >= 0 {
                        break;
                    }
                    let err = io::Error::last_os_error();
                    if err.kind() != io::ErrorKind::Interrupted {
                        error!("waiting for worker process {pid} failed: {err}");
                        break;
                    }
                }
            }
        }
    }
}
