use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use rstest::rstest;
use tracing_subscriber::EnvFilter;

use resolv_ctx::arena::Arena;
use resolv_ctx::question::{rtype, CLASS_IN};
use resolv_ctx::{
    Answer, Config, Context, Delivery, Error, LocalData, ModuleStack,
    QueryId, Question, WorkerMode,
};

//------------ Test Module Stacks --------------------------------------------

/// Holds workers back until opened.
#[derive(Clone, Default)]
struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    fn opened() -> Self {
        let res = Self::default();
        res.open();
        res
    }

    fn open(&self) {
        *self.0 .0.lock() = true;
        self.0 .1.notify_all();
    }

    fn pass(&self) {
        let mut open = self.0 .0.lock();
        while !*open {
            self.0 .1.wait(&mut open);
        }
    }
}

/// Answers every question with its own name as data.
///
/// Names starting with `fail` end in a server failure, names starting
/// with `big` get an answer too large for the result channel.
#[derive(Clone)]
struct Echo {
    gate: Gate,
    resolved: Arc<AtomicUsize>,
    deinit: Arc<AtomicUsize>,
}

impl Echo {
    fn new() -> Self {
        Self::gated(Gate::opened())
    }

    fn gated(gate: Gate) -> Self {
        Echo {
            gate,
            resolved: Default::default(),
            deinit: Default::default(),
        }
    }
}

impl ModuleStack for Echo {
    fn resolve(
        &self,
        question: &Question,
        arena: &mut Arena,
    ) -> Result<Answer, Error> {
        self.gate.pass();
        self.resolved.fetch_add(1, Ordering::SeqCst);
        if question.qname().starts_with("fail") {
            return Err(Error::ServFail);
        }
        if question.qname().starts_with("big") {
            let mut answer = Answer::new(question.clone());
            answer.set_packet(Bytes::from(vec![0u8; (1 << 24) + 1]));
            return Ok(answer);
        }
        let scratch = arena.scratch();
        scratch.extend_from_slice(question.qname().as_bytes());
        let mut answer = Answer::new(question.clone());
        answer.push_data(scratch.split().freeze());
        answer.set_ttl(60);
        Ok(answer)
    }

    fn deinit(&self) {
        self.deinit.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sets up logging controlled by RUST_LOG, captured per test.
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_thread_names(true)
        .without_time()
        .try_init()
        .ok();
}

fn question(name: &str) -> Question {
    Question::new_in(name, rtype::A).unwrap()
}

fn context(mode: WorkerMode, workers: usize, stack: Echo) -> Arc<Context> {
    init_logging();
    let mut config = Config::new();
    config.set_worker_mode(mode);
    config.set_num_workers(workers);
    Arc::new(Context::with_config(config, stack).unwrap())
}

//------------ Tests ---------------------------------------------------------

#[rstest]
fn sync_resolve(
    #[values(WorkerMode::Threaded, WorkerMode::Forked)] mode: WorkerMode,
) {
    let ctx = context(mode, 1, Echo::new());
    let answer = ctx.resolve(&question("www.example.com")).unwrap();
    assert_eq!(answer.question().qname(), "www.example.com");
    assert_eq!(answer.data(), &[Bytes::from_static(b"www.example.com")]);
    assert_eq!(answer.ttl(), 60);
    assert!(answer.havedata());
    assert_eq!(ctx.outstanding(), 0);
    assert_eq!(ctx.num_workers(), 1);
}

#[rstest]
fn async_resolve(
    #[values(WorkerMode::Threaded, WorkerMode::Forked)] mode: WorkerMode,
) {
    let ctx = context(mode, 1, Echo::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let id = ctx
        .resolve_async(&question("example.com"), move |res| {
            assert_eq!(res.unwrap().question().qname(), "example.com");
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(id, QueryId::from_int(1));
    assert_eq!(ctx.num_async(), 1);
    assert!(ctx.is_finalized());
    ctx.wait().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.num_async(), 0);
    assert_eq!(ctx.outstanding(), 0);
}

#[test]
fn unique_identifiers() {
    let ctx = context(WorkerMode::Threaded, 2, Echo::new());
    let mut ids = HashSet::new();
    for i in 0..100 {
        let id = ctx
            .resolve_async(&question(&format!("host{i}.test")), |_| ())
            .unwrap();
        assert!(ids.insert(id));
        assert_ne!(id.into_int(), 0);
    }
    assert_eq!(ctx.num_async(), 100);
    ctx.wait().unwrap();
    assert_eq!(ctx.outstanding(), 0);
}

#[test]
fn many_threads() {
    let ctx = context(WorkerMode::Threaded, 4, Echo::new());
    let delivered = Arc::new(AtomicUsize::new(0));
    let ids = Arc::new(Mutex::new(HashSet::new()));

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let ctx = ctx.clone();
            let delivered = delivered.clone();
            let ids = ids.clone();
            thread::spawn(move || {
                for i in 0..125 {
                    let name = format!("async{i}.thread{t}.test");
                    let expected = name.clone();
                    let delivered = delivered.clone();
                    let id = ctx
                        .resolve_async(&question(&name), move |res| {
                            let answer = res.unwrap();
                            assert_eq!(answer.question().qname(), expected);
                            delivered.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                    assert!(ids.lock().insert(id));

                    let name = format!("sync{i}.thread{t}.test");
                    let answer = ctx.resolve(&question(&name)).unwrap();
                    assert_eq!(answer.data()[0], Bytes::from(name));
                }
            })
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }

    ctx.wait().unwrap();
    assert_eq!(delivered.load(Ordering::SeqCst), 500);
    assert_eq!(ctx.num_async(), 0);
    assert_eq!(ctx.outstanding(), 0);
}

#[test]
fn thousand_before_any_answer() {
    let gate = Gate::default();
    let ctx = context(WorkerMode::Threaded, 4, Echo::gated(gate.clone()));
    ctx.finalize().unwrap();
    let delivered = Arc::new(AtomicUsize::new(0));

    let threads: Vec<_> = (0..8)
        .map(|t| {
            let ctx = ctx.clone();
            let delivered = delivered.clone();
            thread::spawn(move || {
                (0..125)
                    .map(|i| {
                        let delivered = delivered.clone();
                        let name = format!("q{i}.t{t}.test");
                        ctx.resolve_async(&question(&name), move |res| {
                            assert!(res.is_ok());
                            delivered.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let mut ids = HashSet::new();
    for handle in threads {
        for id in handle.join().unwrap() {
            assert!(ids.insert(id));
        }
    }
    assert_eq!(ids.len(), 1000);
    assert_eq!(ctx.num_async(), 1000);
    assert_eq!(ctx.outstanding(), 1000);

    gate.open();
    ctx.wait().unwrap();
    assert_eq!(delivered.load(Ordering::SeqCst), 1000);
    assert_eq!(ctx.num_async(), 0);
    assert_eq!(ctx.outstanding(), 0);
}

#[test]
fn cancel_unknown_is_fine() {
    let ctx = context(WorkerMode::Threaded, 1, Echo::new());
    assert!(!ctx.cancel(QueryId::from_int(42)));
    ctx.finalize().unwrap();
    assert!(!ctx.cancel(QueryId::from_int(42)));
}

#[test]
fn cancel_before_result() {
    let gate = Gate::default();
    let ctx = context(WorkerMode::Threaded, 1, Echo::gated(gate.clone()));
    let id = ctx
        .resolve_async(&question("example.com"), |_| panic!("called"))
        .unwrap();
    assert!(ctx.cancel(id));
    assert!(!ctx.cancel(id));
    assert_eq!(ctx.num_async(), 0);
    assert_eq!(ctx.outstanding(), 0);

    gate.open();
    assert_eq!(ctx.poll_result().unwrap(), Delivery::Discarded(id));
}

#[test]
fn result_before_cancel() {
    let ctx = context(WorkerMode::Threaded, 1, Echo::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let id = ctx
        .resolve_async(&question("example.com"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(ctx.poll_result().unwrap(), Delivery::Delivered(id));
    assert!(!ctx.cancel(id));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn failure_is_a_result() {
    let ctx = context(WorkerMode::Threaded, 1, Echo::new());
    assert!(matches!(
        ctx.resolve(&question("fail.example.com")),
        Err(Error::ServFail)
    ));

    let failed = Arc::new(AtomicUsize::new(0));
    let counter = failed.clone();
    ctx.resolve_async(&question("fail.example.com"), move |res| {
        assert!(matches!(res, Err(Error::ServFail)));
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    ctx.wait().unwrap();
    assert_eq!(failed.load(Ordering::SeqCst), 1);
}

#[test]
fn oversized_answer_fails_query_only() {
    let ctx = context(WorkerMode::Threaded, 1, Echo::new());
    assert!(matches!(
        ctx.resolve(&question("big.example.com")),
        Err(Error::ServFail)
    ));
    let answer = ctx.resolve(&question("small.example.com")).unwrap();
    assert_eq!(answer.data(), &[Bytes::from_static(b"small.example.com")]);
    assert_eq!(ctx.outstanding(), 0);
}

#[test]
fn syntax_error_admits_nothing() {
    let ctx = context(WorkerMode::Threaded, 1, Echo::new());
    assert!(matches!(
        Question::new("bad..name", rtype::A, CLASS_IN),
        Err(Error::Syntax(_))
    ));
    assert!(!ctx.is_finalized());
    assert_eq!(ctx.outstanding(), 0);
}

#[test]
fn local_data() {
    let stack = Echo::new();
    let ctx = context(WorkerMode::Threaded, 1, stack.clone());
    ctx.add_local_data(LocalData {
        name: "router.home.".into(),
        rtype: rtype::A,
        rclass: CLASS_IN,
        ttl: 3600,
        rdata: Bytes::from_static(&[192, 168, 1, 1]),
    })
    .unwrap();

    let answer = ctx.resolve(&question("Router.Home")).unwrap();
    assert_eq!(answer.data(), &[Bytes::from_static(&[192, 168, 1, 1])]);
    assert_eq!(answer.ttl(), 3600);

    let answer = ctx.resolve(&question("printer.home")).unwrap();
    assert_eq!(answer.data(), &[Bytes::from_static(b"printer.home")]);
    assert_eq!(stack.resolved.load(Ordering::SeqCst), 1);

    assert!(matches!(
        ctx.add_local_data(LocalData {
            name: "late.home".into(),
            rtype: rtype::A,
            rclass: CLASS_IN,
            ttl: 1,
            rdata: Bytes::new(),
        }),
        Err(Error::AfterFinal)
    ));
}

#[test]
fn process_without_blocking() {
    let ctx = context(WorkerMode::Threaded, 1, Echo::new());
    assert!(ctx.fd() >= 0);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    ctx.resolve_async(&question("example.com"), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    while !ctx.poll().unwrap() {
        thread::sleep(Duration::from_millis(1));
    }
    ctx.process().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!ctx.poll().unwrap());
    ctx.process().unwrap();
}

#[rstest]
fn teardown_abandons_outstanding(
    #[values(WorkerMode::Threaded, WorkerMode::Forked)] mode: WorkerMode,
) {
    let workers = match mode {
        WorkerMode::Threaded => 2,
        WorkerMode::Forked => 1,
    };
    let stack = Echo::new();
    let ctx = context(mode, workers, stack.clone());

    // Nobody drains the results, so all five stay outstanding.
    let cancelled = Arc::new(AtomicUsize::new(0));
    for i in 0..5 {
        let cancelled = cancelled.clone();
        ctx.resolve_async(&question(&format!("q{i}.test")), move |res| {
            assert!(matches!(res, Err(Error::Cancelled)));
            cancelled.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }
    assert_eq!(ctx.num_async(), 5);
    let arenas = ctx.arenas().unwrap();

    ctx.teardown();
    assert_eq!(cancelled.load(Ordering::SeqCst), 5);
    assert_eq!(ctx.num_async(), 0);
    assert_eq!(ctx.outstanding(), 0);
    assert_eq!(ctx.num_workers(), 0);
    assert_eq!(arenas.in_use(), 0);
    assert_eq!(arenas.free(), 0);
    if mode == WorkerMode::Threaded {
        assert_eq!(arenas.created(), 2);
    }
    assert_eq!(stack.deinit.load(Ordering::SeqCst), 1);

    assert!(matches!(
        ctx.resolve_async(&question("late.test"), |_| ()),
        Err(Error::ChannelClosed)
    ));
}

#[test]
fn teardown_abandons_sync_and_async() {
    let gate = Gate::default();
    let ctx = context(WorkerMode::Threaded, 1, Echo::gated(gate.clone()));

    let waiters: Vec<_> = (0..2)
        .map(|i| {
            let ctx = ctx.clone();
            thread::spawn(move || ctx.resolve(&question(&format!("s{i}.test"))))
        })
        .collect();

    // The last async callback lets the worker go so teardown can finish.
    let cancelled = Arc::new(AtomicUsize::new(0));
    for i in 0..3 {
        let cancelled = cancelled.clone();
        let gate = gate.clone();
        ctx.resolve_async(&question(&format!("a{i}.test")), move |res| {
            assert!(matches!(res, Err(Error::Cancelled)));
            if cancelled.fetch_add(1, Ordering::SeqCst) == 2 {
                gate.open();
            }
        })
        .unwrap();
    }
    while ctx.outstanding() < 5 {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(ctx.num_async(), 3);
    let arenas = ctx.arenas().unwrap();

    ctx.teardown();
    for waiter in waiters {
        assert!(matches!(waiter.join().unwrap(), Err(Error::Cancelled)));
    }
    assert_eq!(cancelled.load(Ordering::SeqCst), 3);
    assert_eq!(ctx.outstanding(), 0);
    assert_eq!(arenas.in_use(), 0);
}

#[test]
fn cancel_sync_from_other_thread() {
    let gate = Gate::default();
    let ctx = context(WorkerMode::Threaded, 1, Echo::gated(gate.clone()));
    let waiter = {
        let ctx = ctx.clone();
        thread::spawn(move || ctx.resolve(&question("example.com")))
    };
    while ctx.outstanding() == 0 {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(ctx.cancel(QueryId::from_int(1)));
    assert_eq!(ctx.outstanding(), 0);

    // The waiter notices with the next message it reads.
    gate.open();
    assert!(matches!(waiter.join().unwrap(), Err(Error::Cancelled)));
}

#[test]
fn threaded_teardown_with_forked_sibling() {
    let threaded = context(WorkerMode::Threaded, 2, Echo::new());
    threaded.finalize().unwrap();
    let forked = context(WorkerMode::Forked, 1, Echo::new());
    forked.finalize().unwrap();

    // The forked worker holds copies of the threaded workers' descriptors.
    let (tx, rx) = mpsc::channel();
    let dropper = thread::spawn(move || {
        drop(threaded);
        tx.send(()).unwrap();
    });
    assert!(rx.recv_timeout(Duration::from_secs(10)).is_ok());
    dropper.join().unwrap();

    let answer = forked.resolve(&question("example.com")).unwrap();
    assert_eq!(answer.question().qname(), "example.com");
}

#[test]
fn teardown_wakes_sync_waiter() {
    let gate = Gate::default();
    let ctx = context(WorkerMode::Threaded, 1, Echo::gated(gate.clone()));

    let waiter = {
        let ctx = ctx.clone();
        thread::spawn(move || ctx.resolve(&question("example.com")))
    };
    while ctx.outstanding() == 0 {
        thread::sleep(Duration::from_millis(1));
    }
    let opener = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        gate.open();
    });
    ctx.teardown();
    assert!(matches!(waiter.join().unwrap(), Err(Error::Cancelled)));
    opener.join().unwrap();
}

#[test]
fn drop_tears_down() {
    let stack = Echo::new();
    let ctx = context(WorkerMode::Threaded, 3, stack.clone());
    ctx.finalize().unwrap();
    drop(ctx);
    assert_eq!(stack.deinit.load(Ordering::SeqCst), 1);
}

#[cfg(feature = "tokio")]
#[tokio::test(flavor = "multi_thread")]
async fn lookup() {
    let ctx = context(WorkerMode::Threaded, 1, Echo::new());
    ctx.finalize().unwrap();
    let drainer = {
        let ctx = ctx.clone();
        thread::spawn(move || ctx.poll_result())
    };
    let answer = ctx.lookup(&question("example.com")).await.unwrap();
    assert_eq!(answer.question().qname(), "example.com");
    assert!(matches!(drainer.join().unwrap(), Ok(Delivery::Delivered(_))));
}

#[cfg(feature = "tokio")]
#[tokio::test(flavor = "multi_thread")]
async fn dropped_lookup_cancels() {
    let gate = Gate::default();
    let ctx = context(WorkerMode::Threaded, 1, Echo::gated(gate.clone()));
    let res = tokio::time::timeout(
        Duration::from_millis(20),
        ctx.lookup(&question("example.com")),
    )
    .await;
    assert!(res.is_err());
    assert_eq!(ctx.outstanding(), 0);
    assert_eq!(ctx.num_async(), 0);
    gate.open();
}
