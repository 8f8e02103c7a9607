//! Bounded concurrent task dispatcher for tokio
//!
//! # Features
//! - Fixed pool of workers pulling from a FIFO queue (bounded or unbounded)
//! - Optional rate gate pacing hand-off of tasks to workers
//! - Exactly one `Outcome` per submitted task, success or error, in completion order
//! - Multi-source fan-in through cloneable, labelled submit handles
//! - Cooperative cancellation, panics in work functions reported as task errors
//! - Metrics snapshots and periodic monitoring

pub mod collector;
pub mod demo;
pub mod errors;
pub mod handle;
pub mod model;
pub mod pool;

mod gate;
mod lifecycle;
mod queue;

pub use collector::Results;
pub use errors::{ConfigError, DispatchError, LifecycleError, TaskError};
pub use handle::Submitter;
pub use model::{
    Capacity,
    DispatcherMetrics,
    DispatcherState,
    Outcome,
    Task,
    TaskId,
    WorkerState,
};
pub use pool::{Config, Dispatcher};
