//! API error mapping
//!
//! Every handler error is a [`DomainError`]; the wire shape is always
//! `{ "error": <stable kind>, "description": <human text> }` with the status
//! code decided by the kind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use sm_domain::errors::DomainError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Standard JSON error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub description: String,
}

#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(error: DomainError) -> Self {
        ApiError(error)
    }
}

fn status_for(error: &DomainError) -> StatusCode {
    match error {
        DomainError::NotFound { .. } => StatusCode::NOT_FOUND,
        DomainError::Conflict { .. }
        | DomainError::ExistingReferenceEntity { .. }
        | DomainError::ConcurrentOperationInProgress { .. } => StatusCode::CONFLICT,
        DomainError::BadRequest { .. }
        | DomainError::MultipleFound { .. }
        | DomainError::CatalogFetch { .. } => StatusCode::BAD_REQUEST,
        DomainError::BrokerUnreachable { .. } | DomainError::BrokerRequestFailed { .. } => {
            StatusCode::BAD_GATEWAY
        }
        DomainError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        DomainError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        DomainError::Forbidden { .. } => StatusCode::FORBIDDEN,
        DomainError::QueueFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
        DomainError::OperationPending { .. }
        | DomainError::RequestCancelled
        | DomainError::Timeout { .. }
        | DomainError::Storage { .. }
        | DomainError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = ApiErrorBody {
            error: self.0.kind().to_string(),
            description: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
