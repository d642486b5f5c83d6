//! Test support for the service manager
//!
//! An in-memory transactional repository, a stub OSB broker server and
//! generators for catalogs and request bodies. Production code never links
//! this crate.

pub mod broker_server;
pub mod catalogs;
pub mod memory_repository;

pub use broker_server::BrokerServer;
pub use memory_repository::InMemoryRepository;
