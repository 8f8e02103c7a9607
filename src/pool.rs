use super::{
    collector::{self, OutcomeSender, Results},
    errors::{ConfigError, DispatchError, LifecycleError, TaskError},
    gate::RateGate,
    handle::Submitter,
    lifecycle::{Lifecycle, WorkerBarrier},
    model::{
        Capacity,
        DispatcherMetrics,
        DispatcherState,
        Outcome,
        Task,
        TaskId,
        WorkerState,
    },
    queue::TaskQueue,
};
use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU8, AtomicUsize, Ordering},
        Arc,
        Mutex,
        PoisonError,
    },
};
use futures::FutureExt;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};


/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub num_workers: usize,
    /// Minimum spacing between task admissions. `None` admits immediately.
    pub rate: Option<Duration>,
    pub queue_capacity: Capacity,
    pub result_capacity: Capacity,
}

impl Default for Config {
    fn default() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            num_workers: num_cpus * 2, // work is usually I/O-bound
            rate: None,
            queue_capacity: Capacity::Bounded(num_cpus * 20),
            result_capacity: Capacity::Unbounded,
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            num_workers: num_cpus,
            rate: None,
            queue_capacity: Capacity::Bounded(num_cpus * 10),
            result_capacity: Capacity::Unbounded,
        }
    }

    pub fn io_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            num_workers: num_cpus * 2,
            rate: None,
            queue_capacity: Capacity::Unbounded,
            result_capacity: Capacity::Unbounded,
        }
    }

    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_rate(mut self, period: Duration) -> Self {
        self.rate = Some(period);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: Capacity) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_result_capacity(mut self, capacity: Capacity) -> Self {
        self.result_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.queue_capacity == Capacity::Bounded(0) {
            return Err(ConfigError::ZeroCapacity("queue"));
        }
        if self.result_capacity == Capacity::Bounded(0) {
            return Err(ConfigError::ZeroCapacity("result"));
        }
        if self.rate == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }
}


#[derive(Default)]
pub(crate) struct Counters {
    pub submitted: AtomicUsize,
    pub executing: AtomicUsize,
    pub idle_workers: AtomicUsize,
    pub succeeded: AtomicUsize,
    pub failed: AtomicUsize,
    pub cancelled: AtomicUsize,
}

/// State shared by the dispatcher, its submit handles, workers and the
/// supervisor.
pub(crate) struct Shared<T> {
    pub queue: TaskQueue<T>,
    pub lifecycle: Lifecycle,
    pub barrier: WorkerBarrier,
    pub cancel: CancellationToken,
    pub producers: AtomicUsize,
    pub counters: Counters,
    worker_states: Vec<AtomicU8>,
}

impl<T> Shared<T> {
    pub fn close_input(&self) -> Result<(), LifecycleError> {
        if !self.queue.close() {
            return Err(LifecycleError::AlreadyClosed);
        }
        if self.lifecycle.begin_draining() {
            debug!("input closed, draining");
        } else {
            debug!("input closed");
        }
        Ok(())
    }

    /// Close without complaining if someone already did.
    pub fn seal(&self) {
        if self.queue.close() {
            self.lifecycle.begin_draining();
            debug!("last producer handle dropped, input sealed");
        }
    }

    #[inline]
    fn set_worker_state(&self, worker_id: usize, state: WorkerState) {
        if let Some(slot) = self.worker_states.get(worker_id) {
            slot.store(state as u8, Ordering::Relaxed);
        }
    }

    fn metrics(&self) -> DispatcherMetrics {
        let c = &self.counters;
        DispatcherMetrics {
            state: self.lifecycle.state(),
            submitted: c.submitted.load(Ordering::Relaxed),
            queued: self.queue.len(),
            executing: c.executing.load(Ordering::Relaxed),
            idle_workers: c.idle_workers.load(Ordering::Relaxed),
            live_workers: self.barrier.live(),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
        }
    }
}


/// Bounded concurrent task dispatcher.
///
/// Fans tasks out to a fixed set of workers, optionally paced by a rate
/// gate, and fans one [`Outcome`] per task back into [`Results`]. The
/// result stream ends once the input is closed and every worker has
/// published its last outcome.
///
/// A dispatcher dropped or cancelled before `start` still reports every task
/// it accepted, as `TaskError::Cancelled`.
pub struct Dispatcher<T, R, E>
where
    T: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    input: Submitter<T>,
    shared: Arc<Shared<T>>,
    config: Config,
    // held until `start` hands it to the workers
    outcomes: Mutex<Option<OutcomeSender<R, E>>>,
    started: bool,
}

impl<T, R, E> Dispatcher<T, R, E>
where
    T: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    /// Build an idle dispatcher. Tasks may be submitted before `start`, but
    /// with a bounded queue they only drain once workers are running.
    pub fn new(config: Config) -> Result<(Self, Results<R, E>), ConfigError> {
        Self::with_token(config, CancellationToken::new())
    }

    /// Like `new`, cancelled together with the caller's `token`. Cancelling
    /// the dispatcher itself leaves `token` untouched.
    pub fn with_token(config: Config, token: CancellationToken) -> Result<(Self, Results<R, E>), ConfigError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            queue: TaskQueue::new(config.queue_capacity),
            lifecycle: Lifecycle::new(),
            barrier: WorkerBarrier::new(),
            cancel: token.child_token(),
            producers: AtomicUsize::new(0),
            counters: Counters::default(),
            worker_states: (0..config.num_workers)
                .map(|_| AtomicU8::new(WorkerState::Idle as u8))
                .collect(),
        });
        let (outcomes, results) = collector::channel(config.result_capacity);

        let dispatcher = Self {
            input: Submitter::new(shared.clone()),
            shared,
            config,
            outcomes: Mutex::new(Some(outcomes)),
            started: false,
        };
        Ok((dispatcher, results))
    }

    /// `new` followed by `start`.
    pub fn spawn<F, Fut>(config: Config, work: F) -> Result<(Self, Results<R, E>), DispatchError>
    where
        F: Fn(TaskId, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let (mut dispatcher, results) = Self::new(config)?;
        dispatcher.start(work)?;
        Ok((dispatcher, results))
    }

    /// Launch the workers. Must be called from within a tokio runtime.
    /// Fails with `Cancelled` once the dispatcher was cancelled while idle.
    pub fn start<F, Fut>(&mut self, work: F) -> Result<(), LifecycleError>
    where
        F: Fn(TaskId, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let held = self.outcomes.get_mut().unwrap_or_else(PoisonError::into_inner);
        if held.is_none() && !self.started {
            return Err(LifecycleError::Cancelled);
        }
        self.shared.lifecycle.start()?;
        let outcomes = held.take().ok_or(LifecycleError::AlreadyStarted)?;
        self.started = true;
        if self.shared.queue.is_closed() {
            self.shared.lifecycle.begin_draining();
        }

        let gate = self.config.rate.map(|period| Arc::new(RateGate::new(period)));
        let work = Arc::new(work);
        let num_workers = self.config.num_workers;

        debug!(
            workers = num_workers,
            rate = ?gate.as_ref().map(|g| g.period()),
            "starting dispatcher"
        );

        // registered before spawning so the supervisor cannot see zero early
        self.shared.barrier.register(num_workers);
        for worker_id in 0..num_workers {
            let shared = self.shared.clone();
            let gate = gate.clone();
            let work = work.clone();
            let outcomes = outcomes.clone();
            tokio::spawn(async move {
                worker_loop(worker_id, shared, gate, work, outcomes).await;
            });
        }

        let shared = self.shared.clone();
        tokio::spawn(async move {
            supervise(shared, outcomes).await;
        });
        Ok(())
    }

    /// Enqueue one task. Suspends while a bounded queue is full.
    #[inline]
    pub async fn submit(&self, task: Task<T>) -> Result<(), LifecycleError> {
        self.input.submit(task).await
    }

    pub async fn submit_all<I>(&self, tasks: I) -> Result<usize, LifecycleError>
    where
        I: IntoIterator<Item = Task<T>>,
    {
        self.input.submit_all(tasks).await
    }

    /// Declare submission complete. A second call is an error.
    #[inline]
    pub fn close_input(&self) -> Result<(), LifecycleError> {
        self.shared.close_input()
    }

    /// Another producer handle for multi-source fan-in.
    pub fn submitter(&self) -> Submitter<T> {
        self.input.clone()
    }

    /// Stop claiming new tasks. Executing tasks still finish and publish;
    /// queued ones come back as `TaskError::Cancelled`. On a dispatcher that
    /// was never started this drains it for good.
    pub fn cancel(&self) {
        debug!("dispatcher cancelled");
        self.shared.cancel.cancel();
        self.release_unstarted();
    }

    /// Report every task accepted while idle and end the result stream.
    /// No-op once the workers own the outcome sender.
    fn release_unstarted(&self) {
        let held = self
            .outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(outcomes) = held else { return };
        if !self.shared.lifecycle.abandon() {
            return;
        }

        // unblocks submits still waiting on a full bounded queue
        self.shared.cancel.cancel();
        self.shared.queue.close();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(supervise(self.shared.clone(), outcomes));
            }
            Err(_) => sweep_detached(&self.shared, outcomes),
        }
    }

    #[inline]
    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    #[inline]
    pub fn state(&self) -> DispatcherState {
        self.shared.lifecycle.state()
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.shared
            .worker_states
            .iter()
            .map(|s| WorkerState::from_u8(s.load(Ordering::Relaxed)))
            .collect()
    }

    #[inline]
    pub fn metrics(&self) -> DispatcherMetrics {
        self.shared.metrics()
    }

    /// Resolves once the dispatcher is `Drained`. Never resolves for a
    /// dispatcher that was neither started nor cancelled. With a bounded
    /// result capacity the results must be drained concurrently.
    pub async fn wait_drained(&self) {
        self.shared.lifecycle.wait_drained().await
    }

    /// Close the input (if still open) and wait for the drain.
    pub async fn shutdown(&self) {
        self.shared.seal();
        if self.state() == DispatcherState::Idle {
            return;
        }
        self.wait_drained().await;
    }

    /// `shutdown` with a deadline. On expiry the dispatcher is cancelled and
    /// `false` is returned.
    pub async fn shutdown_timeout(&self, timeout: Duration) -> bool {
        if tokio::time::timeout(timeout, self.shutdown()).await.is_ok() {
            return true;
        }
        self.cancel();
        false
    }

    /// Periodically hand a metrics snapshot to `callback`.
    /// Cancel the returned token to stop monitoring.
    pub fn start_monitoring<F>(&self, interval: Duration, callback: F) -> CancellationToken
    where
        F: Fn(DispatcherMetrics) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let token = CancellationToken::new();
        let token_clone = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        callback(shared.metrics());
                    }
                    _ = token_clone.cancelled() => {
                        drop(shared);
                        break;
                    }
                }
            }
        });

        token
    }
}

impl<T, R, E> Drop for Dispatcher<T, R, E>
where
    T: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    fn drop(&mut self) {
        self.release_unstarted();
    }
}


async fn worker_loop<T, R, E, F, Fut>(
    worker_id: usize,
    shared: Arc<Shared<T>>,
    gate: Option<Arc<RateGate>>,
    work: Arc<F>,
    outcomes: OutcomeSender<R, E>,
) where
    F: Fn(TaskId, T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let _live = shared.barrier.guard();
    let counters = &shared.counters;
    debug!(worker_id, "worker started");

    counters.idle_workers.fetch_add(1, Ordering::Relaxed);
    while let Some(task) = shared.queue.claim(&shared.cancel).await {
        let Task { id, source, payload } = task;

        if let Some(gate) = &gate {
            if gate.admit(&shared.cancel).await.is_err() {
                counters.cancelled.fetch_add(1, Ordering::Relaxed);
                deliver(&outcomes, Outcome::cancelled(id, source, Some(worker_id))).await;
                continue;
            }
        }

        counters.idle_workers.fetch_sub(1, Ordering::Relaxed);
        counters.executing.fetch_add(1, Ordering::Relaxed);
        shared.set_worker_state(worker_id, WorkerState::Executing);
        trace!(worker_id, task_id = id, "executing task");

        let started = Instant::now();
        let call = &*work;
        let result = match AssertUnwindSafe(async move { call(id, payload).await })
            .catch_unwind()
            .await
        {
            Ok(Ok(value)) => {
                counters.succeeded.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                Err(TaskError::Failed(e))
            }
            Err(panic) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                let message = panic_message(panic.as_ref());
                warn!(worker_id, task_id = id, %message, "task panicked");
                Err(TaskError::Panicked(message))
            }
        };
        let elapsed = started.elapsed();

        counters.executing.fetch_sub(1, Ordering::Relaxed);
        counters.idle_workers.fetch_add(1, Ordering::Relaxed);
        shared.set_worker_state(worker_id, WorkerState::Idle);
        trace!(worker_id, task_id = id, ok = result.is_ok(), ?elapsed, "task finished");

        let outcome = Outcome {
            task_id: id,
            source,
            worker_id: Some(worker_id),
            elapsed,
            result,
        };
        deliver(&outcomes, outcome).await;
    }
    counters.idle_workers.fetch_sub(1, Ordering::Relaxed);

    shared.set_worker_state(worker_id, WorkerState::Terminated);
    debug!(worker_id, "worker terminated");
}


/// Closes the outcome stream exactly once, after every worker is gone.
async fn supervise<T, R, E>(shared: Arc<Shared<T>>, outcomes: OutcomeSender<R, E>) {
    shared.barrier.wait().await;

    // Workers only leave work behind when cancelled. Make sure nothing is
    // still landing, then report the leftovers.
    shared.queue.close();
    shared.queue.settle().await;

    let mut swept = 0usize;
    while let Some(task) = shared.queue.steal() {
        shared.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        deliver(&outcomes, Outcome::cancelled(task.id, task.source, None)).await;
        swept += 1;
    }
    if swept > 0 {
        debug!(swept, "unclaimed tasks reported as cancelled");
    }

    shared.lifecycle.finish();
    drop(outcomes);
    debug!("dispatcher drained");
}


/// `supervise` for an unstarted dispatcher dropped outside any runtime.
/// Nothing can still be submitting, so the sweep runs inline.
fn sweep_detached<T, R, E>(shared: &Shared<T>, outcomes: OutcomeSender<R, E>) {
    while let Some(task) = shared.queue.steal() {
        shared.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        if let Err(lost) = outcomes.try_publish(Outcome::cancelled(task.id, task.source, None)) {
            warn!(task_id = lost.task_id, "result stream full or dropped, outcome discarded");
        }
    }
    shared.lifecycle.finish();
    debug!("unstarted dispatcher drained");
}

async fn deliver<R, E>(outcomes: &OutcomeSender<R, E>, outcome: Outcome<R, E>) {
    if let Err(lost) = outcomes.publish(outcome).await {
        warn!(task_id = lost.task_id, "result stream dropped, outcome discarded");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
