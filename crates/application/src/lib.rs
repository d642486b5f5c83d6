//! Application services of the service manager
//!
//! The operation scheduler and maintainer plus the OSB-backed actions they
//! execute for instances and bindings.

pub mod instances;
pub mod operations;

pub use instances::OsbActions;
pub use operations::{OperationMaintainer, OperationScheduler, OperationSettings};
