//! Service binding routes

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use sm_domain::errors::DomainError;
use sm_domain::labels::validate_labels;
use sm_domain::query::{Criterion, Operator};
use sm_domain::repository::Repository;
use sm_domain::types::{Object, ObjectType, OperationType, ServiceBinding};

use super::error::ApiResult;
use super::params::{ApiJson, ListParams};
use super::{accepted_response, list_envelope, new_operation, run_operation, ApiState, MutationOutcome};

pub async fn create(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
    ApiJson(mut binding): ApiJson<ServiceBinding>,
) -> ApiResult<Response> {
    validate_labels(&binding.base.labels)?;
    if binding.name.is_empty() {
        return Err(DomainError::bad_request("missing service binding name").into());
    }
    if binding.service_instance_id.is_empty() {
        return Err(DomainError::bad_request("missing service_instance_id").into());
    }
    binding.base.prepare_for_create();

    let operation = new_operation(
        OperationType::Create,
        ObjectType::ServiceBinding,
        &binding.base.id,
    );
    let action = state.osb_actions.bind(binding);

    match run_operation(&state, &params, operation, action).await? {
        MutationOutcome::Async(operation) => Ok(accepted_response(&operation)),
        MutationOutcome::Sync(result) => {
            let object =
                result.ok_or_else(|| DomainError::internal("binding returned no object"))?;
            // binding credentials are returned on creation only
            let credentials = match &object {
                Object::ServiceBinding(binding) => binding.credentials.clone(),
                _ => None,
            };
            let mut body = serde_json::to_value(&object).map_err(DomainError::from)?;
            if let Some(credentials) = credentials {
                body["credentials"] = credentials;
            }
            Ok((StatusCode::CREATED, Json(body)).into_response())
        }
    }
}

pub async fn get_one(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Object>> {
    let binding = state
        .repository
        .get(
            ObjectType::ServiceBinding,
            &[Criterion::by_field(Operator::Equals, "id", id)],
        )
        .await?;
    Ok(Json(binding))
}

pub async fn list(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let criteria = params.criteria()?;
    let bindings = state
        .repository
        .list(ObjectType::ServiceBinding, &criteria)
        .await?;
    Ok(list_envelope(bindings))
}

pub async fn delete_one(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Response> {
    state
        .repository
        .get(
            ObjectType::ServiceBinding,
            &[Criterion::by_field(Operator::Equals, "id", id.clone())],
        )
        .await?;

    let operation = new_operation(OperationType::Delete, ObjectType::ServiceBinding, &id);
    let action = state.osb_actions.unbind(id);

    match run_operation(&state, &params, operation, action).await? {
        MutationOutcome::Async(operation) => Ok(accepted_response(&operation)),
        MutationOutcome::Sync(_) => Ok(Json(json!({})).into_response()),
    }
}
