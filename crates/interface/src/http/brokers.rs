//! Service broker routes
//!
//! POST and PATCH run the full reconciliation pipeline through the
//! interceptable repository: catalog fetch, diff application and visibility
//! resync all happen inside the one transaction the write opens. PATCH
//! refetches the catalog even for an empty body.

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
use sm_domain::types::{Credentials, Object, ObjectType, OperationType, ServiceBroker};

use super::error::ApiResult;
use super::params::{ApiJson, ListParams};
use super::{accepted_response, list_envelope, new_operation, run_operation, ApiState, MutationOutcome};

pub async fn create(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
    ApiJson(mut broker): ApiJson<ServiceBroker>,
) -> ApiResult<Response> {
    validate_labels(&broker.base.labels)?;
    broker.validate()?;
    broker.base.prepare_for_create();
    broker.base.ready = true;
    let credentials = broker.credentials.clone();

    let operation = new_operation(OperationType::Create, ObjectType::ServiceBroker, &broker.base.id);
    let action: SchedulableAction = {
        let broker = broker.clone();
        Arc::new(move |repository| {
            let broker = broker.clone();
            Box::pin(async move {
                repository.create(Object::ServiceBroker(broker)).await.map(Some)
            })
        })
    };

    match run_operation(&state, &params, operation, action).await? {
        MutationOutcome::Async(operation) => Ok(accepted_response(&operation)),
        MutationOutcome::Sync(result) => {
            let object = result
                .ok_or_else(|| DomainError::internal("broker registration returned no object"))?;
            // Registration is the one place credentials are echoed back.
            let mut body = serde_json::to_value(&object).map_err(DomainError::from)?;
            if let Some(credentials) = credentials {
                body["credentials"] =
                    serde_json::to_value(&credentials).map_err(DomainError::from)?;
            }
            Ok((StatusCode::CREATED, Json(body)).into_response())
        }
    }
}

pub async fn get_one(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Object>> {
    let broker = state
        .repository
        .get(
            ObjectType::ServiceBroker,
            &[Criterion::by_field(Operator::Equals, "id", id)],
        )
        .await?;
    Ok(Json(broker))
}

pub async fn list(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let criteria = params.criteria()?;
    let brokers = state
        .repository
        .list(ObjectType::ServiceBroker, &criteria)
        .await?;
    Ok(list_envelope(brokers))
}

pub async fn patch(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
    ApiJson(body): ApiJson<Value>,
) -> ApiResult<Response> {
    let mut broker: ServiceBroker = state
        .repository
        .get(
            ObjectType::ServiceBroker,
            &[Criterion::by_field(Operator::Equals, "id", id.clone())],
        )
        .await?
        .try_into()?;

    if !body.is_object() {
        return Err(DomainError::bad_request("request body must be a JSON object").into());
    }

    if let Some(raw) = body.get("credentials") {
        let credentials: Credentials = serde_json::from_value(raw.clone())
            .map_err(|e| DomainError::bad_request(format!("invalid credentials: {}", e)))?;
        credentials.validate()?;
        broker.credentials = Some(credentials);
    }
    if let Some(name) = body.get("name") {
        broker.name = string_field(name, "name")?;
    }
    if let Some(description) = body.get("description") {
        broker.description = string_field(description, "description")?;
    }
    if let Some(broker_url) = body.get("broker_url") {
        broker.broker_url = string_field(broker_url, "broker_url")?;
    }
    broker.validate()?;
    // id, created_at, updated_at, services and labels in the body are
    // silently ignored; labels move through label change operations.

    // name collisions are refused before any catalog fetch happens
    let name_clash = state
        .repository
        .count(
            ObjectType::ServiceBroker,
            &[
                Criterion::by_field(Operator::Equals, "name", broker.name.clone()),
                Criterion::by_field(Operator::NotEquals, "id", id.clone()),
            ],
        )
        .await?;
    if name_clash > 0 {
        return Err(DomainError::conflict(format!(
            "service broker with name {} already exists",
            broker.name
        ))
        .into());
    }

    let label_changes: Vec<LabelChange> = match body.get("labels") {
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| DomainError::bad_request(format!("invalid label changes: {}", e)))?,
        None => Vec::new(),
    };

    let operation = new_operation(OperationType::Update, ObjectType::ServiceBroker, &id);
    let action: SchedulableAction = {
        let broker = broker.clone();
        Arc::new(move |repository| {
            let broker = broker.clone();
            let label_changes = label_changes.clone();
            Box::pin(async move {
                repository
                    .update(Object::ServiceBroker(broker), &label_changes)
                    .await
                    .map(Some)
            })
        })
    };

    match run_operation(&state, &params, operation, action).await? {
        MutationOutcome::Async(operation) => Ok(accepted_response(&operation)),
        MutationOutcome::Sync(result) => {
            let object =
                result.ok_or_else(|| DomainError::internal("broker update returned no object"))?;
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
            ObjectType::ServiceBroker,
            &[Criterion::by_field(Operator::Equals, "id", id.clone())],
        )
        .await?;

    let operation = new_operation(OperationType::Delete, ObjectType::ServiceBroker, &id);
    let action: SchedulableAction = Arc::new(move |repository| {
        let by_id = [Criterion::by_field(Operator::Equals, "id", id.clone())];
        Box::pin(async move {
            repository.delete(ObjectType::ServiceBroker, &by_id).await?;
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
    state
        .repository
        .delete(ObjectType::ServiceBroker, &criteria)
        .await?;
    Ok(Json(json!({})).into_response())
}

fn string_field(value: &Value, field: &str) -> Result<String, DomainError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| DomainError::bad_request(format!("{} must be a string", field)))
}
