use super::errors::TaskError;
use std::{
    sync::Arc,
    time::Duration,
};


/// Caller-assigned task identity.
pub type TaskId = u64;

/// A unit of work waiting in the queue. Immutable once submitted.
#[derive(Debug, Clone)]
pub struct Task<T> {
    pub id: TaskId,
    pub source: Option<Arc<str>>,
    pub payload: T,
}

impl<T> Task<T> {
    pub fn new(id: TaskId, payload: T) -> Self {
        Self {
            id,
            source: None,
            payload,
        }
    }

    pub fn with_source(mut self, source: impl Into<Arc<str>>) -> Self {
        self.source = Some(source.into());
        self
    }
}


/// Exactly one of these is produced for every submitted task.
#[derive(Debug)]
pub struct Outcome<R, E> {
    pub task_id: TaskId,
    pub source: Option<Arc<str>>,
    /// `None` when the task never reached a worker (cancelled while queued).
    pub worker_id: Option<usize>,
    pub elapsed: Duration,
    pub result: Result<R, TaskError<E>>,
}

impl<R, E> Outcome<R, E> {
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    #[inline]
    pub fn is_err(&self) -> bool {
        self.result.is_err()
    }

    pub fn value(&self) -> Option<&R> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&TaskError<E>> {
        self.result.as_ref().err()
    }

    pub(crate) fn cancelled(task_id: TaskId, source: Option<Arc<str>>, worker_id: Option<usize>) -> Self {
        Self {
            task_id,
            source,
            worker_id,
            elapsed: Duration::ZERO,
            result: Err(TaskError::Cancelled),
        }
    }
}


/// Capacity of the task queue or of the outcome channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    Unbounded,
    Bounded(usize),
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Executing = 1,
    Terminated = 2,
}

impl WorkerState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => WorkerState::Idle,
            1 => WorkerState::Executing,
            _ => WorkerState::Terminated,
        }
    }
}


/// Dispatcher-level state machine: `Idle -> Running -> Draining -> Drained`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum DispatcherState {
    Idle = 0,
    Running = 1,
    Draining = 2,
    Drained = 3,
}

impl DispatcherState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => DispatcherState::Idle,
            1 => DispatcherState::Running,
            2 => DispatcherState::Draining,
            _ => DispatcherState::Drained,
        }
    }
}


#[derive(Debug, Clone)]
pub struct DispatcherMetrics {
    pub state: DispatcherState,
    pub submitted: usize,
    pub queued: usize,
    pub executing: usize,
    pub idle_workers: usize,
    pub live_workers: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl DispatcherMetrics {
    pub fn utilization(&self) -> f64 {
        if self.executing + self.idle_workers == 0 {
            return 0.0;
        }
        self.executing as f64 / (self.executing + self.idle_workers) as f64
    }

    /// Outcomes produced so far, of any kind.
    pub fn accounted(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.accounted();
        if total == 0 {
            return 1.0;
        }
        self.succeeded as f64 / total as f64
    }
}
