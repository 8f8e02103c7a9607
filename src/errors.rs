use thiserror::Error;


/// Misuse of the dispatcher lifecycle. These indicate a caller bug rather than
/// a transient fault, and are reported the same way every time.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum LifecycleError {
    #[error("input is closed, no further tasks can be submitted")]
    InputClosed,
    #[error("input was already closed")]
    AlreadyClosed,
    #[error("workers were already started")]
    AlreadyStarted,
    #[error("dispatcher was cancelled")]
    Cancelled,
}

#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("worker count must be at least 1")]
    ZeroWorkers,
    #[error("{0} capacity must be at least 1, use Capacity::Unbounded instead")]
    ZeroCapacity(&'static str),
    #[error("rate interval must be non-zero")]
    ZeroInterval,
}

/// Why a single task did not produce a value. Never fatal to the pool.
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum TaskError<E> {
    #[error("task failed: {0}")]
    Failed(E),
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task cancelled before execution")]
    Cancelled,
}

impl<E> TaskError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }

    /// The error returned by the work function, if that is what happened.
    pub fn failure(&self) -> Option<&E> {
        match self {
            TaskError::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Anything that can stop a dispatcher from being built and started.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}
