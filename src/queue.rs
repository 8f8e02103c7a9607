use super::{
    errors::LifecycleError,
    model::{Capacity, Task},
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use crossbeam::deque::{Injector, Steal};
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;


/// FIFO task source shared by producers and workers.
///
/// The queue is *exhausted* only once it is closed, no submit is still in
/// flight and nothing is left to claim. A submit that passed the closed check
/// before `close` always lands, so closing never races the last hand-off.
pub(crate) struct TaskQueue<T> {
    inject: Injector<Task<T>>,
    notify: Notify,
    slots: Option<Semaphore>,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    queued: AtomicUsize,
}

struct InFlight<'a, T>(&'a TaskQueue<T>);

impl<T> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        let queue = self.0;
        queue.in_flight.fetch_sub(1, Ordering::SeqCst);
        if queue.closed.load(Ordering::SeqCst) {
            queue.notify.notify_waiters();
        }
    }
}

impl<T> TaskQueue<T> {
    pub fn new(capacity: Capacity) -> Self {
        let slots = match capacity {
            Capacity::Unbounded => None,
            Capacity::Bounded(n) => Some(Semaphore::new(n)),
        };
        Self {
            inject: Injector::new(),
            notify: Notify::new(),
            slots,
            closed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
        }
    }

    /// Enqueue a task, suspending while a bounded queue is full.
    pub async fn push(&self, task: Task<T>, cancel: &CancellationToken) -> Result<(), LifecycleError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight(self);

        if cancel.is_cancelled() {
            return Err(LifecycleError::Cancelled);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(LifecycleError::InputClosed);
        }

        if let Some(slots) = &self.slots {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LifecycleError::Cancelled),
                permit = slots.acquire() => permit.map_err(|_| LifecycleError::InputClosed)?,
            };
            // the slot is handed back when a worker claims the task
            permit.forget();
        }

        self.queued.fetch_add(1, Ordering::Relaxed);
        self.inject.push(task);
        self.notify.notify_one();
        Ok(())
    }

    /// Next task in FIFO order. `None` once the queue is exhausted or the
    /// token is cancelled.
    pub async fn claim(&self, cancel: &CancellationToken) -> Option<Task<T>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if cancel.is_cancelled() {
                return None;
            }
            if let Some(task) = self.steal() {
                return Some(task);
            }
            if self.is_exhausted() {
                return None;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// Non-blocking claim, used when sweeping leftovers after cancellation.
    pub fn steal(&self) -> Option<Task<T>> {
        let task = std::iter::repeat_with(|| self.inject.steal())
            .find(|s| !s.is_retry())
            .and_then(Steal::success)?;

        self.queued.fetch_sub(1, Ordering::Relaxed);
        if let Some(slots) = &self.slots {
            slots.add_permits(1);
        }
        Some(task)
    }

    /// Mark end of input. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        first
    }

    /// Wait until every submit that slipped in before `close` has landed.
    pub async fn settle(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_exhausted(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
            && self.in_flight.load(Ordering::SeqCst) == 0
            && self.inject.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }
}
