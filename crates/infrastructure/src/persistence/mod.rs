//! Storage adapters

pub mod interceptable;
pub mod postgres;

pub use interceptable::InterceptableRepository;
pub use postgres::{DatabaseConfig, PostgresRepository};
