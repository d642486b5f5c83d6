//! REST surface of the service manager
//!
//! JSON in, JSON out. Every mutation is admitted as an [`Operation`] through
//! the scheduler: synchronously by default, asynchronously with
//! `?async=true` where the response is `202 Accepted` and the operation
//! id can be tracked through `/v1/operations`.

pub mod bindings;
pub mod brokers;
pub mod catalogs;
pub mod error;
pub mod instances;
pub mod operations;
pub mod params;
pub mod platforms;
pub mod visibilities;

use std::sync::Arc;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use sm_application::instances::OsbActions;
use sm_application::operations::OperationScheduler;
use sm_domain::repository::{SchedulableAction, TransactionalRepository};
use sm_domain::types::{Object, ObjectType, Operation, OperationCategory, OperationType};

use error::ApiResult;
use params::ListParams;

#[derive(Clone)]
pub struct ApiState {
    /// The interceptable repository; broker writes fire the catalog and
    /// visibility chains through it.
    pub repository: Arc<dyn TransactionalRepository>,
    pub scheduler: Arc<OperationScheduler>,
    pub osb_actions: Arc<OsbActions>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/v1/service_brokers",
            get(brokers::list).post(brokers::create).delete(brokers::delete_collection),
        )
        .route(
            "/v1/service_brokers/:id",
            get(brokers::get_one).patch(brokers::patch).delete(brokers::delete_one),
        )
        .route("/v1/service_offerings", get(catalogs::list_offerings))
        .route("/v1/service_offerings/:id", get(catalogs::get_offering))
        .route("/v1/service_plans", get(catalogs::list_plans))
        .route("/v1/service_plans/:id", get(catalogs::get_plan))
        .route(
            "/v1/platforms",
            get(platforms::list).post(platforms::create).delete(platforms::delete_collection),
        )
        .route(
            "/v1/platforms/:id",
            get(platforms::get_one).patch(platforms::patch).delete(platforms::delete_one),
        )
        .route(
            "/v1/visibilities",
            get(visibilities::list).post(visibilities::create).delete(visibilities::delete_collection),
        )
        .route(
            "/v1/visibilities/:id",
            get(visibilities::get_one).patch(visibilities::patch).delete(visibilities::delete_one),
        )
        .route(
            "/v1/service_instances",
            get(instances::list).post(instances::create),
        )
        .route(
            "/v1/service_instances/:id",
            get(instances::get_one).patch(instances::patch).delete(instances::delete_one),
        )
        .route(
            "/v1/service_bindings",
            get(bindings::list).post(bindings::create),
        )
        .route(
            "/v1/service_bindings/:id",
            get(bindings::get_one).delete(bindings::delete_one),
        )
        .route("/v1/operations", get(operations::list))
        .route("/v1/operations/:id", get(operations::get_one))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub(crate) fn new_operation(
    operation_type: OperationType,
    resource_type: ObjectType,
    resource_id: &str,
) -> Operation {
    Operation::in_progress(
        operation_type,
        OperationCategory::AsyncRequest,
        resource_type,
        resource_id,
        Uuid::new_v4().to_string(),
    )
}

pub(crate) enum MutationOutcome {
    Sync(Option<Object>),
    Async(Operation),
}

/// Admits a mutation through the scheduler, inline or queued.
pub(crate) async fn run_operation(
    state: &ApiState,
    params: &ListParams,
    operation: Operation,
    action: SchedulableAction,
) -> ApiResult<MutationOutcome> {
    if params.is_async() {
        let operation = state
            .scheduler
            .schedule_async(operation, action, None)
            .await?;
        Ok(MutationOutcome::Async(operation))
    } else {
        let result = state.scheduler.schedule_sync(operation, action).await?;
        Ok(MutationOutcome::Sync(result))
    }
}

pub(crate) fn accepted_response(operation: &Operation) -> Response {
    (
        StatusCode::ACCEPTED,
        [(
            header::LOCATION,
            format!("/v1/operations/{}", operation.base.id),
        )],
        Json(json!({ "id": operation.base.id })),
    )
        .into_response()
}

pub(crate) fn list_envelope(items: Vec<Object>) -> Json<serde_json::Value> {
    Json(json!({
        "num_items": items.len(),
        "items": items,
    }))
}
