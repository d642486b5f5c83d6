//! Server configuration
//!
//! Layered through the config crate: built-in defaults, optional config
//! files, then `SM_`-prefixed environment variables. Validation failures at
//! boot are fatal.

use std::env;
use std::time::Duration;

use serde::Deserialize;

use sm_application::operations::{OperationSettings, PoolSettings};
use sm_infrastructure::osb::HttpClientSettings;
use sm_infrastructure::persistence::DatabaseConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_server_port")]
    pub port: u16,
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,
    #[serde(default = "default_connection_timeout_secs")]
    pub database_connection_timeout_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub broker_connect_timeout_secs: u64,
    #[serde(default = "default_response_header_timeout_secs")]
    pub broker_response_header_timeout_secs: u64,

    #[serde(default)]
    pub operations: OperationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OperationConfig {
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,
    #[serde(default = "default_reconciliation_timeout_secs")]
    pub reconciliation_operation_timeout_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_lifespan_secs")]
    pub lifespan_secs: u64,
    #[serde(default = "default_one_sec")]
    pub rescheduling_interval_secs: u64,
    #[serde(default = "default_one_sec")]
    pub polling_interval_secs: u64,
    #[serde(default = "default_pool_size")]
    pub default_pool_size: usize,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoolConfig {
    pub resource: String,
    pub size: usize,
}

impl Default for OperationConfig {
    fn default() -> Self {
        OperationConfig {
            action_timeout_secs: default_action_timeout_secs(),
            reconciliation_operation_timeout_secs: default_reconciliation_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            lifespan_secs: default_lifespan_secs(),
            rescheduling_interval_secs: default_one_sec(),
            polling_interval_secs: default_one_sec(),
            default_pool_size: default_pool_size(),
            pools: Vec::new(),
        }
    }
}

fn default_server_port() -> u16 {
    8080
}

fn default_max_connections() -> u32 {
    20
}

fn default_connection_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_response_header_timeout_secs() -> u64 {
    60
}

fn default_action_timeout_secs() -> u64 {
    12 * 60 * 60
}

fn default_reconciliation_timeout_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_cleanup_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_lifespan_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_one_sec() -> u64 {
    1
}

fn default_pool_size() -> usize {
    20
}

impl ServerConfig {
    pub fn new() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(config::Environment::with_prefix("SM").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    pub fn database(&self) -> DatabaseConfig {
        DatabaseConfig {
            url: self.database_url.clone(),
            max_connections: self.database_max_connections,
            connection_timeout: Duration::from_secs(self.database_connection_timeout_secs),
        }
    }

    pub fn http_client(&self) -> HttpClientSettings {
        HttpClientSettings {
            connect_timeout: Duration::from_secs(self.broker_connect_timeout_secs),
            response_header_timeout: Duration::from_secs(self.broker_response_header_timeout_secs),
        }
    }

    pub fn operation_settings(&self) -> OperationSettings {
        OperationSettings {
            action_timeout: Duration::from_secs(self.operations.action_timeout_secs),
            reconciliation_operation_timeout: Duration::from_secs(
                self.operations.reconciliation_operation_timeout_secs,
            ),
            cleanup_interval: Duration::from_secs(self.operations.cleanup_interval_secs),
            lifespan: Duration::from_secs(self.operations.lifespan_secs),
            rescheduling_interval: Duration::from_secs(self.operations.rescheduling_interval_secs),
            polling_interval: Duration::from_secs(self.operations.polling_interval_secs),
            default_pool_size: self.operations.default_pool_size,
            pools: self
                .operations
                .pools
                .iter()
                .map(|pool| PoolSettings {
                    resource: pool.resource.clone(),
                    size: pool.size,
                })
                .collect(),
        }
    }
}
