//! Operation subsystem settings

use std::time::Duration;

use sm_domain::errors::{DomainError, Result};

const MIN_TIME_PERIOD: Duration = Duration::from_nanos(1);

/// Settings of the scheduler and maintainer. Loaded from the environment by
/// the server binary and validated fatally at boot.
#[derive(Debug, Clone)]
pub struct OperationSettings {
    /// Timeout for a single async action run.
    pub action_timeout: Duration,
    /// Upper bound for auto rescheduling of operation actions, measured from
    /// operation creation.
    pub reconciliation_operation_timeout: Duration,
    /// Interval between maintainer sweeps.
    pub cleanup_interval: Duration,
    /// Operations older than this are eligible for cleanup regardless of
    /// state.
    pub lifespan: Duration,
    /// Delay before a retryable action runs again.
    pub rescheduling_interval: Duration,
    /// Delay between polls of a broker's last_operation endpoint.
    pub polling_interval: Duration,
    pub default_pool_size: usize,
    pub pools: Vec<PoolSettings>,
}

impl Default for OperationSettings {
    fn default() -> Self {
        OperationSettings {
            action_timeout: Duration::from_secs(12 * 60 * 60),
            reconciliation_operation_timeout: Duration::from_secs(7 * 24 * 60 * 60),
            cleanup_interval: Duration::from_secs(24 * 60 * 60),
            lifespan: Duration::from_secs(7 * 24 * 60 * 60),
            rescheduling_interval: Duration::from_secs(1),
            polling_interval: Duration::from_secs(1),
            default_pool_size: 20,
            pools: Vec::new(),
        }
    }
}

impl OperationSettings {
    pub fn validate(&self) -> Result<()> {
        if self.action_timeout < MIN_TIME_PERIOD {
            return Err(validation_error("action_timeout"));
        }
        if self.reconciliation_operation_timeout < MIN_TIME_PERIOD {
            return Err(validation_error("reconciliation_operation_timeout"));
        }
        if self.cleanup_interval < MIN_TIME_PERIOD {
            return Err(validation_error("cleanup_interval"));
        }
        if self.lifespan < MIN_TIME_PERIOD {
            return Err(validation_error("lifespan"));
        }
        if self.rescheduling_interval < MIN_TIME_PERIOD {
            return Err(validation_error("rescheduling_interval"));
        }
        if self.polling_interval < MIN_TIME_PERIOD {
            return Err(validation_error("polling_interval"));
        }
        if self.default_pool_size == 0 {
            return Err(DomainError::bad_request(
                "validate operation settings: default_pool_size must be larger than 0",
            ));
        }
        for pool in &self.pools {
            pool.validate()?;
        }
        Ok(())
    }
}

fn validation_error(field: &str) -> DomainError {
    DomainError::bad_request(format!(
        "validate operation settings: {} must be larger than 0",
        field
    ))
}

/// Settings for one worker pool override.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Resource the pool serves, e.g. `service_instances`.
    pub resource: String,
    pub size: usize,
}

impl PoolSettings {
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(DomainError::bad_request(format!(
                "validate operation settings: pool size for resource '{}' must be larger than 0",
                self.resource
            )));
        }
        Ok(())
    }
}
