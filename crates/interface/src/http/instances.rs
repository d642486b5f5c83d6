//! Service instance routes
//!
//! Instances created through this API belong to the reserved
//! service-manager platform; provisioning happens against the owning broker
//! through the scheduler, so `?async=true` turns the call into a tracked
//! 202.

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
use sm_domain::types::{Object, ObjectType, OperationType, ServiceInstance, SM_PLATFORM};

use super::error::ApiResult;
use super::params::{ApiJson, ListParams};
use super::{accepted_response, list_envelope, new_operation, run_operation, ApiState, MutationOutcome};

pub async fn create(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
    ApiJson(mut instance): ApiJson<ServiceInstance>,
) -> ApiResult<Response> {
    validate_labels(&instance.base.labels)?;
    if instance.name.is_empty() {
        return Err(DomainError::bad_request("missing service instance name").into());
    }
    if instance.service_plan_id.is_empty() {
        return Err(DomainError::bad_request("missing service_plan_id").into());
    }
    instance.base.prepare_for_create();
    instance.platform_id = SM_PLATFORM.to_string();

    let operation = new_operation(
        OperationType::Create,
        ObjectType::ServiceInstance,
        &instance.base.id,
    );
    let action = state.osb_actions.provision_instance(instance);

    match run_operation(&state, &params, operation, action).await? {
        MutationOutcome::Async(operation) => Ok(accepted_response(&operation)),
        MutationOutcome::Sync(result) => {
            let object = result
                .ok_or_else(|| DomainError::internal("provisioning returned no object"))?;
            Ok((StatusCode::CREATED, Json(object)).into_response())
        }
    }
}

pub async fn get_one(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Object>> {
    let instance = state
        .repository
        .get(
            ObjectType::ServiceInstance,
            &[Criterion::by_field(Operator::Equals, "id", id)],
        )
        .await?;
    Ok(Json(instance))
}

pub async fn list(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let criteria = params.criteria()?;
    let instances = state
        .repository
        .list(ObjectType::ServiceInstance, &criteria)
        .await?;
    Ok(list_envelope(instances))
}

pub async fn patch(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
    ApiJson(body): ApiJson<Value>,
) -> ApiResult<Response> {
    let mut instance: ServiceInstance = state
        .repository
        .get(
            ObjectType::ServiceInstance,
            &[Criterion::by_field(Operator::Equals, "id", id.clone())],
        )
        .await?
        .try_into()?;

    if let Some(name) = body.get("name").and_then(Value::as_str) {
        instance.name = name.to_string();
    }
    let label_changes: Vec<LabelChange> = match body.get("labels") {
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| DomainError::bad_request(format!("invalid label changes: {}", e)))?,
        None => Vec::new(),
    };

    let operation = new_operation(OperationType::Update, ObjectType::ServiceInstance, &id);
    let action: SchedulableAction = {
        let instance = instance.clone();
        Arc::new(move |repository| {
            let instance = instance.clone();
            let label_changes = label_changes.clone();
            Box::pin(async move {
                repository
                    .update(Object::ServiceInstance(instance), &label_changes)
                    .await
                    .map(Some)
            })
        })
    };

    match run_operation(&state, &params, operation, action).await? {
        MutationOutcome::Async(operation) => Ok(accepted_response(&operation)),
        MutationOutcome::Sync(result) => {
            let object = result
                .ok_or_else(|| DomainError::internal("instance update returned no object"))?;
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
            ObjectType::ServiceInstance,
            &[Criterion::by_field(Operator::Equals, "id", id.clone())],
        )
        .await?;

    let operation = new_operation(OperationType::Delete, ObjectType::ServiceInstance, &id);
    let action = state.osb_actions.deprovision_instance(id);

    match run_operation(&state, &params, operation, action).await? {
        MutationOutcome::Async(operation) => Ok(accepted_response(&operation)),
        MutationOutcome::Sync(_) => Ok(Json(json!({})).into_response()),
    }
}
