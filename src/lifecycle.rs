use super::{
    errors::LifecycleError,
    model::DispatcherState,
};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use tokio::sync::Notify;


/// Dispatcher state machine. Transitions only move forward.
pub(crate) struct Lifecycle {
    state: AtomicU8,
    drained: Notify,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(DispatcherState::Idle as u8),
            drained: Notify::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `Idle -> Running`.
    pub fn start(&self) -> Result<(), LifecycleError> {
        self.state
            .compare_exchange(
                DispatcherState::Idle as u8,
                DispatcherState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|_| LifecycleError::AlreadyStarted)
    }

    /// `Running -> Draining`. A no-op in any other state, so input closed
    /// while still `Idle` has to be re-applied right after `start`.
    pub fn begin_draining(&self) -> bool {
        self.state
            .compare_exchange(
                DispatcherState::Running as u8,
                DispatcherState::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// `Idle -> Draining` for a dispatcher that will never start.
    pub fn abandon(&self) -> bool {
        self.state
            .compare_exchange(
                DispatcherState::Idle as u8,
                DispatcherState::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Terminal. Goes through `Draining` first so the state never skips it.
    pub fn finish(&self) {
        self.begin_draining();
        self.state.store(DispatcherState::Drained as u8, Ordering::Release);
        self.drained.notify_waiters();
    }

    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state() == DispatcherState::Drained {
                return;
            }
            notified.await;
        }
    }
}


/// Supervisory barrier counting live workers. The supervisor waits on it
/// before closing the outcome stream, so a worker can never publish into a
/// closed collector.
pub(crate) struct WorkerBarrier {
    live: AtomicUsize,
    done: Notify,
}

/// Held by a worker for as long as it runs; released even if the worker
/// task unwinds.
pub(crate) struct BarrierGuard<'a> {
    barrier: &'a WorkerBarrier,
}

impl WorkerBarrier {
    pub fn new() -> Self {
        Self {
            live: AtomicUsize::new(0),
            done: Notify::new(),
        }
    }

    /// Register `n` workers up front, before any of them is spawned.
    pub fn register(&self, n: usize) {
        self.live.fetch_add(n, Ordering::SeqCst);
    }

    /// Claim one of the registered slots.
    pub fn guard(&self) -> BarrierGuard<'_> {
        BarrierGuard { barrier: self }
    }

    #[inline]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.live.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for BarrierGuard<'_> {
    fn drop(&mut self) {
        if self.barrier.live.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.barrier.done.notify_waiters();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, time::Duration};

    #[test]
    fn start_only_once() {
        let lc = Lifecycle::new();
        assert_eq!(lc.state(), DispatcherState::Idle);
        assert!(lc.start().is_ok());
        assert_eq!(lc.start(), Err(LifecycleError::AlreadyStarted));
        assert!(lc.begin_draining());
        assert!(!lc.begin_draining());
        lc.finish();
        assert_eq!(lc.state(), DispatcherState::Drained);
    }

    #[test]
    fn abandon_only_from_idle() {
        let lc = Lifecycle::new();
        assert!(lc.abandon());
        assert_eq!(lc.state(), DispatcherState::Draining);
        assert_eq!(lc.start(), Err(LifecycleError::AlreadyStarted));
        lc.finish();
        assert_eq!(lc.state(), DispatcherState::Drained);

        let running = Lifecycle::new();
        running.start().unwrap();
        assert!(!running.abandon());
        assert_eq!(running.state(), DispatcherState::Running);
    }

    #[tokio::test]
    async fn barrier_releases_after_last_guard() {
        let barrier = Arc::new(WorkerBarrier::new());
        barrier.register(3);

        for i in 0..3u64 {
            let b = barrier.clone();
            tokio::spawn(async move {
                let _guard = b.guard();
                tokio::time::sleep(Duration::from_millis(10 * (i + 1))).await;
            });
        }

        tokio::time::timeout(Duration::from_secs(1), barrier.wait())
            .await
            .expect("barrier should open");
        assert_eq!(barrier.live(), 0);
    }
}
