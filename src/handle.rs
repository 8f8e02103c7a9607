use super::{
    errors::LifecycleError,
    model::Task,
    pool::Shared,
};
use std::sync::{
    atomic::Ordering,
    Arc,
};
use tracing::trace;


/// Producer handle onto a dispatcher's task queue.
///
/// Handles are cheap to clone, one per source when fanning in from several
/// producers. The input closes on an explicit `close_input`, or implicitly
/// once the last handle (the dispatcher's own included) is dropped.
pub struct Submitter<T> {
    shared: Arc<Shared<T>>,
    source: Option<Arc<str>>,
}

impl<T> Submitter<T> {
    pub(crate) fn new(shared: Arc<Shared<T>>) -> Self {
        shared.producers.fetch_add(1, Ordering::SeqCst);
        Self {
            shared,
            source: None,
        }
    }

    /// Tag every task submitted through this handle that has no source yet.
    pub fn with_source(mut self, source: impl Into<Arc<str>>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[inline]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub async fn submit(&self, mut task: Task<T>) -> Result<(), LifecycleError> {
        if task.source.is_none() {
            task.source = self.source.clone();
        }
        let id = task.id;

        self.shared.queue.push(task, &self.shared.cancel).await?;
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        trace!(task_id = id, source = ?self.source(), "task submitted");
        Ok(())
    }

    /// Submit in order, stopping at the first rejected task.
    pub async fn submit_all<I>(&self, tasks: I) -> Result<usize, LifecycleError>
    where
        I: IntoIterator<Item = Task<T>>,
    {
        let mut count = 0;
        for task in tasks {
            self.submit(task).await?;
            count += 1;
        }
        Ok(count)
    }

    #[inline]
    pub fn close_input(&self) -> Result<(), LifecycleError> {
        self.shared.close_input()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.shared.queue.is_closed()
    }
}

impl<T> Clone for Submitter<T> {
    fn clone(&self) -> Self {
        self.shared.producers.fetch_add(1, Ordering::SeqCst);
        Self {
            shared: self.shared.clone(),
            source: self.source.clone(),
        }
    }
}

impl<T> Drop for Submitter<T> {
    fn drop(&mut self) {
        if self.shared.producers.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.seal();
        }
    }
}
