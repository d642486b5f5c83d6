//! Visibility routes
//!
//! Explicit visibility overrides on top of what the public-plans reconciler
//! maintains. An empty platform id is the wildcard grant.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use sm_domain::errors::DomainError;
use sm_domain::labels::{validate_labels, LabelChange};
use sm_domain::query::{Criterion, Operator};
use sm_domain::repository::{Repository, SchedulableAction};
use sm_domain::types::{Object, ObjectType, OperationType, Visibility};

use super::error::ApiResult;
use super::params::{ApiJson, ListParams};
use super::{accepted_response, list_envelope, new_operation, run_operation, ApiState, MutationOutcome};

pub async fn create(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
    ApiJson(mut visibility): ApiJson<Visibility>,
) -> ApiResult<Response> {
    validate_labels(&visibility.base.labels)?;
    if visibility.service_plan_id.is_empty() {
        return Err(DomainError::bad_request("missing service_plan_id").into());
    }
    // the referenced plan must exist
    state
        .repository
        .get(
            ObjectType::ServicePlan,
            &[Criterion::by_field(
                Operator::Equals,
                "id",
                visibility.service_plan_id.clone(),
            )],
        )
        .await?;
    if !visibility.platform_id.is_empty() {
        state
            .repository
            .get(
                ObjectType::Platform,
                &[Criterion::by_field(
                    Operator::Equals,
                    "id",
                    visibility.platform_id.clone(),
                )],
            )
            .await?;
    }
    visibility.base.prepare_for_create();
    visibility.base.ready = true;

    let operation = new_operation(OperationType::Create, ObjectType::Visibility, &visibility.base.id);
    let action: SchedulableAction = {
        let visibility = visibility.clone();
        Arc::new(move |repository| {
            let visibility = visibility.clone();
            Box::pin(async move {
                repository.create(Object::Visibility(visibility)).await.map(Some)
            })
        })
    };

    match run_operation(&state, &params, operation, action).await? {
        MutationOutcome::Async(operation) => Ok(accepted_response(&operation)),
        MutationOutcome::Sync(result) => {
            let object = result
                .ok_or_else(|| DomainError::internal("visibility creation returned no object"))?;
            Ok((StatusCode::CREATED, Json(object)).into_response())
        }
    }
}

pub async fn get_one(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Object>> {
    let visibility = state
        .repository
        .get(
            ObjectType::Visibility,
            &[Criterion::by_field(Operator::Equals, "id", id)],
        )
        .await?;
    Ok(Json(visibility))
}

pub async fn list(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let criteria = params.criteria()?;
    let visibilities = state.repository.list(ObjectType::Visibility, &criteria).await?;
    Ok(list_envelope(visibilities))
}

pub async fn patch(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
    ApiJson(body): ApiJson<Value>,
) -> ApiResult<Response> {
    let mut visibility: Visibility = state
        .repository
        .get(
            ObjectType::Visibility,
            &[Criterion::by_field(Operator::Equals, "id", id.clone())],
        )
        .await?
        .try_into()?;

    if let Some(platform_id) = body.get("platform_id").and_then(Value::as_str) {
        visibility.platform_id = platform_id.to_string();
    }
    let label_changes: Vec<LabelChange> = match body.get("labels") {
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| DomainError::bad_request(format!("invalid label changes: {}", e)))?,
        None => Vec::new(),
    };

    let operation = new_operation(OperationType::Update, ObjectType::Visibility, &id);
    let action: SchedulableAction = {
        let visibility = visibility.clone();
        Arc::new(move |repository| {
            let visibility = visibility.clone();
            let label_changes = label_changes.clone();
            Box::pin(async move {
                repository
                    .update(Object::Visibility(visibility), &label_changes)
                    .await
                    .map(Some)
            })
        })
    };

    match run_operation(&state, &params, operation, action).await? {
        MutationOutcome::Async(operation) => Ok(accepted_response(&operation)),
        MutationOutcome::Sync(result) => {
            let object = result
                .ok_or_else(|| DomainError::internal("visibility update returned no object"))?;
            Ok(Json(object).into_response())
        }
    }
}

pub async fn delete_one(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Response> {
    state
        .repository
        .get(
            ObjectType::Visibility,
            &[Criterion::by_field(Operator::Equals, "id", id.clone())],
        )
        .await?;

    let operation = new_operation(OperationType::Delete, ObjectType::Visibility, &id);
    let action: SchedulableAction = Arc::new(move |repository| {
        let by_id = [Criterion::by_field(Operator::Equals, "id", id.clone())];
        Box::pin(async move {
            repository.delete(ObjectType::Visibility, &by_id).await?;
            Ok(None)
        })
    });

    match run_operation(&state, &params, operation, action).await? {
        MutationOutcome::Async(operation) => Ok(accepted_response(&operation)),
        MutationOutcome::Sync(_) => Ok(Json(json!({})).into_response()),
    }
}

pub async fn delete_collection(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Response> {
    if params.is_async() {
        return Err(DomainError::bad_request(
            "Only one resource can be deleted asynchronously at a time",
        )
        .into());
    }
    let criteria = params.criteria()?;
    state.repository.delete(ObjectType::Visibility, &criteria).await?;
    Ok(Json(json!({})).into_response())
}
