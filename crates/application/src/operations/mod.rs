//! Asynchronous operation subsystem
//!
//! Worker pools, the scheduler that runs storage actions under durable
//! operations, and the maintainer that sweeps up after them.

pub mod maintainer;
pub mod pool;
pub mod scheduler;
pub mod settings;

pub use maintainer::{OperationMaintainer, RescheduleHandler, SweepStats};
pub use pool::WorkerPool;
pub use scheduler::{CancellationSignal, CancellationSource, OperationScheduler};
pub use settings::{OperationSettings, PoolSettings};
