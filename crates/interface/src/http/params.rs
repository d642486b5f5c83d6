//! Request parameter handling
//!
//! The list/delete query language (`fieldQuery`, `labelQuery`), the `async`
//! switch, and a JSON extractor that keeps the error wire shape: missing
//! JSON content type is 415, a broken body is 400.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::Deserialize;

use sm_domain::errors::{DomainError, Result};
use sm_domain::query::{parse_field_query, parse_label_query, Criterion};

use super::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(rename = "fieldQuery")]
    pub field_query: Option<String>,
    #[serde(rename = "labelQuery")]
    pub label_query: Option<String>,
    #[serde(rename = "async")]
    pub run_async: Option<String>,
}

impl ListParams {
    pub fn criteria(&self) -> Result<Vec<Criterion>> {
        let mut criteria = Vec::new();
        if let Some(field_query) = &self.field_query {
            criteria.extend(parse_field_query(field_query)?);
        }
        if let Some(label_query) = &self.label_query {
            criteria.extend(parse_label_query(label_query)?);
        }
        Ok(criteria)
    }

    pub fn is_async(&self) -> bool {
        self.run_async.as_deref() == Some("true")
    }
}

/// JSON body extractor with service manager error semantics.
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(JsonRejection::MissingJsonContentType(_)) => {
                Err(ApiError(DomainError::UnsupportedMediaType))
            }
            Err(rejection) => Err(ApiError(DomainError::bad_request(format!(
                "invalid request body: {}",
                rejection
            )))),
        }
    }
}
