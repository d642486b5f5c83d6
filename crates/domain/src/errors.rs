//! Domain error taxonomy
//!
//! Every error that crosses a component boundary is a [`DomainError`]. The
//! variant decides the wire representation (`error` + `description`) and the
//! HTTP status the interface layer maps it to.

use std::time::Duration;

/// Errors of the service manager domain
#[derive(thiserror::Error, Debug, Clone)]
pub enum DomainError {
    #[error("could not find {entity}")]
    NotFound { entity: String },

    #[error("found more than one {entity} matching the criteria")]
    MultipleFound { entity: String },

    #[error("{message}")]
    Conflict { message: String },

    #[error("could not delete {entity}: existing entities reference it")]
    ExistingReferenceEntity { entity: String },

    #[error("another operation is already in progress for resource {resource_id}")]
    ConcurrentOperationInProgress { resource_id: String },

    #[error("{message}")]
    BadRequest { message: String },

    #[error("could not reach service broker at {broker_url}: {message}")]
    BrokerUnreachable { broker_url: String, message: String },

    #[error("error fetching catalog from broker: status {status}: {message}")]
    CatalogFetch { status: u16, message: String },

    #[error("service broker returned status {status}: {message}")]
    BrokerRequestFailed { status: u16, message: String },

    #[error("unsupported media type")]
    UnsupportedMediaType,

    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("no capacity left in the {resource} worker pool")]
    QueueFull { resource: String },

    #[error("operation is still in progress at the broker")]
    OperationPending { last_operation: Option<String> },

    #[error("request was cancelled before the operation completed")]
    RequestCancelled,

    #[error("operation exceeded its deadline of {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("storage error: {message}")]
    Storage { message: String, retryable: bool },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl DomainError {
    /// Stable wire identifier, the `error` field of error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::NotFound { .. } => "NotFound",
            DomainError::MultipleFound { .. } => "BadRequest",
            DomainError::Conflict { .. } => "Conflict",
            DomainError::ExistingReferenceEntity { .. } => "ExistingReferenceEntity",
            DomainError::ConcurrentOperationInProgress { .. } => "ConcurrentOperationInProgress",
            DomainError::BadRequest { .. } => "BadRequest",
            DomainError::BrokerUnreachable { .. } => "BadGateway",
            DomainError::CatalogFetch { .. } => "BadRequest",
            DomainError::BrokerRequestFailed { .. } => "BadGateway",
            DomainError::UnsupportedMediaType => "UnsupportedMediaType",
            DomainError::Unauthorized { .. } => "Unauthorized",
            DomainError::Forbidden { .. } => "Forbidden",
            DomainError::QueueFull { .. } => "ServiceUnavailable",
            DomainError::OperationPending { .. } => "OperationInProgress",
            DomainError::RequestCancelled => "RequestCancelled",
            DomainError::Timeout { .. } => "Timeout",
            DomainError::Storage { .. } => "InternalServerError",
            DomainError::Internal { .. } => "InternalServerError",
        }
    }

    /// Whether the scheduler may retry the action that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DomainError::Storage { retryable: true, .. } | DomainError::OperationPending { .. }
        )
    }

    pub fn not_found(entity: impl Into<String>) -> Self {
        DomainError::NotFound { entity: entity.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        DomainError::BadRequest { message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        DomainError::Conflict { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        DomainError::Internal { message: message.into() }
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(error: serde_json::Error) -> Self {
        DomainError::Internal {
            message: format!("serialization error: {}", error),
        }
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;
