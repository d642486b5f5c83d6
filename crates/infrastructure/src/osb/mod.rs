//! Outbound OSB transport

mod client;

pub use client::{HttpClientSettings, ReqwestOsbClient, BROKER_API_VERSION};
