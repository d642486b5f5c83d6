//! Read-only offering and plan routes
//!
//! Offerings and plans are derived from broker catalogs; they are created
//! and pruned by reconciliation only, so the API exposes reads exclusively.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde_json::Value;

use sm_domain::query::{Criterion, Operator};
use sm_domain::repository::Repository;
use sm_domain::types::{Object, ObjectType};

use super::error::ApiResult;
use super::params::ListParams;
use super::{list_envelope, ApiState};

pub async fn get_offering(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Object>> {
    let offering = state
        .repository
        .get(
            ObjectType::ServiceOffering,
            &[Criterion::by_field(Operator::Equals, "id", id)],
        )
        .await?;
    Ok(Json(offering))
}

pub async fn list_offerings(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let criteria = params.criteria()?;
    let offerings = state
        .repository
        .list(ObjectType::ServiceOffering, &criteria)
        .await?;
    Ok(list_envelope(offerings))
}

pub async fn get_plan(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Object>> {
    let plan = state
        .repository
        .get(
            ObjectType::ServicePlan,
            &[Criterion::by_field(Operator::Equals, "id", id)],
        )
        .await?;
    Ok(Json(plan))
}

pub async fn list_plans(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let criteria = params.criteria()?;
    let plans = state
        .repository
        .list(ObjectType::ServicePlan, &criteria)
        .await?;
    Ok(list_envelope(plans))
}
