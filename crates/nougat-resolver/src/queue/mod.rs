//! Priority-ordered cooperative request pool.
//!
//! Oracle requests run on a bounded set of workers served from a
//! priority-minimum queue. Priorities are mutable after submission so the
//! resolver can raise a prefetch to blocking when it actually needs the
//! answer. One mutex spans the pending list and the waiter list.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use nougat_core::{NougatError, NougatResult};

/// Default number of queue workers
pub const DEFAULT_WORKER_COUNT: usize = 6;

/// Environment variable overriding the worker count
pub const WORKER_COUNT_ENV: &str = "PAKET_RESOLVER_WORKERS";

/// Request priority; workers always pick the lowest value first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkPriority {
    /// The resolver is waiting on this right now
    BlockingWork,
    /// Will almost certainly be needed soon
    LikelyRequired,
    /// Speculative, but plausible
    MightBeRequired,
    /// Opportunistic prefetch
    BackgroundWork,
}

impl WorkPriority {
    pub fn value(self) -> u8 {
        match self {
            WorkPriority::BlockingWork => 1,
            WorkPriority::LikelyRequired => 3,
            WorkPriority::MightBeRequired => 5,
            WorkPriority::BackgroundWork => 10,
        }
    }
}

/// Shared completion state between a handle and its queued job
struct RequestShared<T> {
    result: Mutex<Option<NougatResult<T>>>,
    done: Notify,
    timed_out_before: AtomicBool,
}

impl<T: Clone> RequestShared<T> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            done: Notify::new(),
            timed_out_before: AtomicBool::new(false),
        }
    }

    /// First completion wins; later ones are dropped
    fn complete(&self, result: NougatResult<T>) {
        let mut slot = self.result.lock().unwrap();
        if slot.is_none() {
            *slot = Some(result);
            drop(slot);
            self.done.notify_waiters();
        }
    }

    fn peek(&self) -> Option<NougatResult<T>> {
        self.result.lock().unwrap().clone()
    }

    async fn wait(&self) -> NougatResult<T> {
        loop {
            // register interest before checking so a completion between the
            // check and the await is not missed
            let notified = self.done.notified();
            if let Some(result) = self.peek() {
                return result;
            }
            notified.await;
        }
    }
}

/// A reprioritizable, awaitable promise for a submitted request
pub struct WorkHandle<T> {
    priority: Arc<Mutex<WorkPriority>>,
    shared: Arc<RequestShared<T>>,
}

impl<T> Clone for WorkHandle<T> {
    fn clone(&self) -> Self {
        Self {
            priority: self.priority.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone> WorkHandle<T> {
    /// Await the request's completion
    pub async fn task(&self) -> NougatResult<T> {
        self.shared.wait().await
    }

    /// The result, if the request already completed
    pub fn try_result(&self) -> Option<NougatResult<T>> {
        self.shared.peek()
    }

    pub fn is_completed(&self) -> bool {
        self.shared.result.lock().unwrap().is_some()
    }

    /// Unconditionally change the pending priority
    pub fn reprioritize(&self, priority: WorkPriority) {
        *self.priority.lock().unwrap() = priority;
    }

    /// Change the pending priority; with `only_higher` the change is
    /// applied only when it moves the request forward
    pub fn try_reprioritize(&self, only_higher: bool, priority: WorkPriority) -> bool {
        let mut current = self.priority.lock().unwrap();
        if !only_higher || priority.value() < current.value() {
            *current = priority;
            true
        } else {
            false
        }
    }

    /// Whether a blocking wait already gave up on this request once
    pub(crate) fn timed_out_before(&self) -> bool {
        self.shared.timed_out_before.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_timed_out(&self) {
        self.shared.timed_out_before.store(true, Ordering::Relaxed);
    }
}

/// A submitted request waiting for a worker
struct QueuedJob {
    priority: Arc<Mutex<WorkPriority>>,
    run: Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>,
    abandon: Box<dyn FnOnce() + Send>,
}

struct QueueState {
    pending: Vec<QueuedJob>,
    waiters: VecDeque<oneshot::Sender<QueuedJob>>,
    closed: bool,
}

/// Bounded worker pool over a priority-minimum queue
pub struct WorkQueue {
    state: Mutex<QueueState>,
    cancel: CancellationToken,
}

impl WorkQueue {
    /// Start the pool with the given worker count, governed by `cancel`
    pub fn start(worker_count: usize, cancel: CancellationToken) -> Arc<Self> {
        let queue = Arc::new(Self {
            state: Mutex::new(QueueState {
                pending: Vec::new(),
                waiters: VecDeque::new(),
                closed: false,
            }),
            cancel,
        });

        for worker in 0..worker_count {
            let queue = queue.clone();
            tokio::spawn(async move {
                debug!(worker, "resolver worker started");
                while let Some(job) = queue.get_work().await {
                    queue.execute(job).await;
                }
                debug!(worker, "resolver worker stopped");
            });
        }

        queue
    }

    /// Submit a request. A parked worker gets it directly; otherwise it
    /// joins the pending list.
    pub fn add_work<T, F>(&self, priority: WorkPriority, work: F) -> WorkHandle<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Future<Output = NougatResult<T>> + Send + 'static,
    {
        let shared = Arc::new(RequestShared::new());
        let priority = Arc::new(Mutex::new(priority));
        let handle = WorkHandle {
            priority: priority.clone(),
            shared: shared.clone(),
        };

        let run_shared = shared.clone();
        let abandon_shared = shared;
        let mut job = QueuedJob {
            priority,
            run: Box::new(move |token| execute_request(work, token, run_shared).boxed()),
            abandon: Box::new(move || abandon_shared.complete(Err(NougatError::QueueShutDown))),
        };

        let mut state = self.state.lock().unwrap();
        if state.closed {
            drop(state);
            (job.abandon)();
            return handle;
        }

        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(job) {
                Ok(()) => return handle,
                // the waiter gave up in the meantime, try the next one
                Err(returned) => job = returned,
            }
        }

        state.pending.push(job);
        handle
    }

    /// Stop the pool and fail everything still pending
    pub fn shutdown(&self) {
        self.cancel.cancel();

        let abandoned: Vec<QueuedJob> = {
            let mut state = self.state.lock().unwrap();
            state.closed = true;
            state.waiters.clear();
            std::mem::take(&mut state.pending)
        };

        for job in abandoned {
            (job.abandon)();
        }
    }

    /// Take the lowest-valued pending job, or park until one arrives.
    /// Returns `None` once the pool is cancelled.
    async fn get_work(&self) -> Option<QueuedJob> {
        let mut receiver = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return None;
            }
            if let Some(job) = pop_min(&mut state.pending) {
                return Some(job);
            }
            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            receiver
        };

        tokio::select! {
            job = &mut receiver => job.ok(),
            _ = self.cancel.cancelled() => {
                // a job may have been handed over in the same instant
                if let Ok(job) = receiver.try_recv() {
                    (job.abandon)();
                }
                None
            }
        }
    }

    /// Run one job with the cancellation discipline: pool cancellation
    /// cancels the job's linked token 500 ms later, and the job wrapper
    /// gives the work one more second before failing the handle
    async fn execute(&self, job: QueuedJob) {
        let linked = self.cancel.child_token();

        let soft_deadline = {
            let pool = self.cancel.clone();
            let linked = linked.clone();
            tokio::spawn(async move {
                pool.cancelled().await;
                tokio::time::sleep(Duration::from_millis(500)).await;
                linked.cancel();
            })
        };

        (job.run)(linked).await;
        soft_deadline.abort();
    }
}

fn pop_min(pending: &mut Vec<QueuedJob>) -> Option<QueuedJob> {
    let mut best: Option<(usize, u8)> = None;
    for (index, job) in pending.iter().enumerate() {
        let value = job.priority.lock().unwrap().value();
        if best.map(|(_, b)| value < b).unwrap_or(true) {
            best = Some((index, value));
        }
    }
    best.map(|(index, _)| pending.remove(index))
}

/// The execution wrapper: the real work runs on its own task so a
/// cancelled worker does not tear it down mid-request; the handle fails
/// after a one-second grace even though the work may still finish
async fn execute_request<T, F>(work: F, token: CancellationToken, shared: Arc<RequestShared<T>>)
where
    T: Clone + Send + Sync + 'static,
    F: Future<Output = NougatResult<T>> + Send + 'static,
{
    let (sender, mut receiver) = oneshot::channel();
    tokio::spawn(async move {
        let _ = sender.send(work.await);
    });

    tokio::select! {
        result = &mut receiver => {
            shared.complete(result.unwrap_or(Err(NougatError::QueueShutDown)));
        }
        _ = token.cancelled() => {
            // the timeout fault releases the handle; the spawned work may
            // still finish in the background
            match tokio::time::timeout(Duration::from_secs(1), &mut receiver).await {
                Ok(result) => shared.complete(result.unwrap_or(Err(NougatError::QueueShutDown))),
                Err(_) => shared.complete(Err(NougatError::CancellationTimeout)),
            }
        }
    }
}

/// Worker count from the environment, with a warning on invalid values
pub fn worker_count_from_env() -> usize {
    match std::env::var(WORKER_COUNT_ENV) {
        Err(_) => DEFAULT_WORKER_COUNT,
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(count) if count > 0 => count,
            _ => {
                warn!(value = %raw, "Invalid {} value, using default of {}", WORKER_COUNT_ENV, DEFAULT_WORKER_COUNT);
                DEFAULT_WORKER_COUNT
            }
        },
    }
}
