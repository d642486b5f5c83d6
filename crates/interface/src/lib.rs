//! HTTP interface of the service manager

pub mod http;

pub use http::{router, ApiState};

// Re-export for the server binary.
pub use axum;
