//! Operation history routes (read-only)

use axum::extract::{Path, Query, State};
use axum::Json;
use serde_json::Value;

use sm_domain::query::{Criterion, Operator};
use sm_domain::repository::Repository;
use sm_domain::types::{Object, ObjectType};

use super::error::ApiResult;
use super::params::ListParams;
use super::{list_envelope, ApiState};

pub async fn get_one(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Object>> {
    let operation = state
        .repository
        .get(
            ObjectType::Operation,
            &[Criterion::by_field(Operator::Equals, "id", id)],
        )
        .await?;
    Ok(Json(operation))
}

pub async fn list(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let criteria = params.criteria()?;
    let operations = state.repository.list(ObjectType::Operation, &criteria).await?;
    Ok(list_envelope(operations))
}
