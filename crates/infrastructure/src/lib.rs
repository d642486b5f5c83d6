//! Infrastructure adapters of the service manager
//!
//! The PostgreSQL repository, the interceptor machinery with the broker
//! reconciliation and visibility interceptors, and the OSB HTTP client.

pub mod interceptors;
pub mod osb;
pub mod persistence;
