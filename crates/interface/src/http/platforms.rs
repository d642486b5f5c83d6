//! Platform routes
//!
//! Registration generates basic credentials and returns them exactly once;
//! later reads never echo them. The reserved service-manager platform cannot
//! be deleted.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use sm_domain::errors::DomainError;
use sm_domain::labels::{validate_labels, LabelChange};
use sm_domain::query::{Criterion, Operator};
use sm_domain::repository::{Repository, SchedulableAction};
use sm_domain::types::{Credentials, Object, ObjectType, OperationType, Platform, SM_PLATFORM};

use super::error::ApiResult;
use super::params::{ApiJson, ListParams};
use super::{accepted_response, list_envelope, new_operation, run_operation, ApiState, MutationOutcome};

pub async fn create(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
    ApiJson(mut platform): ApiJson<Platform>,
) -> ApiResult<Response> {
    validate_labels(&platform.base.labels)?;
    if platform.name.is_empty() {
        return Err(DomainError::bad_request("missing platform name").into());
    }
    if platform.platform_type.is_empty() {
        return Err(DomainError::bad_request("missing platform type").into());
    }
    platform.base.prepare_for_create();
    platform.base.ready = true;
    let credentials = Credentials::basic(Uuid::new_v4().to_string(), Uuid::new_v4().to_string());
    platform.credentials = Some(credentials.clone());

    let operation = new_operation(OperationType::Create, ObjectType::Platform, &platform.base.id);
    let action: SchedulableAction = {
        let platform = platform.clone();
        Arc::new(move |repository| {
            let platform = platform.clone();
            Box::pin(async move { repository.create(Object::Platform(platform)).await.map(Some) })
        })
    };

    match run_operation(&state, &params, operation, action).await? {
        MutationOutcome::Async(operation) => Ok(accepted_response(&operation)),
        MutationOutcome::Sync(result) => {
            let object = result
                .ok_or_else(|| DomainError::internal("platform registration returned no object"))?;
            let mut body = serde_json::to_value(&object).map_err(DomainError::from)?;
            body["credentials"] = serde_json::to_value(&credentials).map_err(DomainError::from)?;
            Ok((StatusCode::CREATED, Json(body)).into_response())
        }
    }
}

pub async fn get_one(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Object>> {
    let platform = state
        .repository
        .get(
            ObjectType::Platform,
            &[Criterion::by_field(Operator::Equals, "id", id)],
        )
        .await?;
    Ok(Json(platform))
}

pub async fn list(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let criteria = params.criteria()?;
    let platforms = state.repository.list(ObjectType::Platform, &criteria).await?;
    Ok(list_envelope(platforms))
}

pub async fn patch(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
    ApiJson(body): ApiJson<Value>,
) -> ApiResult<Response> {
    let mut platform: Platform = state
        .repository
        .get(
            ObjectType::Platform,
            &[Criterion::by_field(Operator::Equals, "id", id.clone())],
        )
        .await?
        .try_into()?;

    if let Some(name) = body.get("name").and_then(Value::as_str) {
        platform.name = name.to_string();
    }
    if let Some(description) = body.get("description").and_then(Value::as_str) {
        platform.description = description.to_string();
    }
    let label_changes: Vec<LabelChange> = match body.get("labels") {
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| DomainError::bad_request(format!("invalid label changes: {}", e)))?,
        None => Vec::new(),
    };

    let operation = new_operation(OperationType::Update, ObjectType::Platform, &id);
    let action: SchedulableAction = {
        let platform = platform.clone();
        Arc::new(move |repository| {
            let platform = platform.clone();
            let label_changes = label_changes.clone();
            Box::pin(async move {
                repository
                    .update(Object::Platform(platform), &label_changes)
                    .await
                    .map(Some)
            })
        })
    };

    match run_operation(&state, &params, operation, action).await? {
        MutationOutcome::Async(operation) => Ok(accepted_response(&operation)),
        MutationOutcome::Sync(result) => {
            let object = result
                .ok_or_else(|| DomainError::internal("platform update returned no object"))?;
            Ok(Json(object).into_response())
        }
    }
}

pub async fn delete_one(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Response> {
    if id == SM_PLATFORM {
        return Err(
            DomainError::bad_request("the service-manager platform cannot be deleted").into(),
        );
    }
    state
        .repository
        .get(
            ObjectType::Platform,
            &[Criterion::by_field(Operator::Equals, "id", id.clone())],
        )
        .await?;

    let operation = new_operation(OperationType::Delete, ObjectType::Platform, &id);
    let action: SchedulableAction = Arc::new(move |repository| {
        let by_id = [Criterion::by_field(Operator::Equals, "id", id.clone())];
        Box::pin(async move {
            repository.delete(ObjectType::Platform, &by_id).await?;
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
    let mut criteria = params.criteria()?;
    // the reserved platform survives bulk deletion
    criteria.push(Criterion::by_field(Operator::NotEquals, "id", SM_PLATFORM));
    state.repository.delete(ObjectType::Platform, &criteria).await?;
    Ok(Json(json!({})).into_response())
}
