//! End-to-end API scenarios
//!
//! The full stack short of Postgres: axum router, scheduler, interceptable
//! in-memory repository and a stub broker behind real HTTP.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use sm_application::instances::OsbActions;
use sm_application::operations::{OperationMaintainer, OperationScheduler, OperationSettings};
use sm_domain::repository::Repository;
use sm_domain::types::{
    Object, ObjectType, Operation, OperationCategory, OperationType, Platform,
};
use sm_infrastructure::interceptors::default_registry;
use sm_infrastructure::osb::{HttpClientSettings, ReqwestOsbClient};
use sm_infrastructure::persistence::InterceptableRepository;
use sm_interface::{router, ApiState};
use sm_testing::{catalogs, BrokerServer, InMemoryRepository};

struct TestBed {
    app: Router,
    repository: Arc<InMemoryRepository>,
    broker_server: BrokerServer,
    scheduler: Arc<OperationScheduler>,
}

async fn test_bed() -> TestBed {
    test_bed_with_settings(HttpClientSettings::default()).await
}

async fn test_bed_with_settings(http_settings: HttpClientSettings) -> TestBed {
    let repository = Arc::new(InMemoryRepository::new());
    let client = Arc::new(ReqwestOsbClient::new(http_settings).expect("client"));
    let registry = Arc::new(default_registry(client.clone()).expect("registry"));
    let interceptable = Arc::new(InterceptableRepository::new(repository.clone(), registry));

    let settings = OperationSettings {
        rescheduling_interval: Duration::from_millis(10),
        polling_interval: Duration::from_millis(10),
        ..OperationSettings::default()
    };
    let scheduler = Arc::new(OperationScheduler::new(
        interceptable.clone(),
        repository.clone(),
        settings,
    ));
    let osb_actions = Arc::new(OsbActions::new(client));

    repository
        .create(Object::Platform(Platform::service_manager()))
        .await
        .expect("reserved platform");

    let app = router(ApiState {
        repository: interceptable,
        scheduler: scheduler.clone(),
        osb_actions,
    });
    TestBed {
        app,
        repository,
        broker_server: BrokerServer::start().await,
        scheduler,
    }
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request");

    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn field_query(path: &str, query: &str) -> String {
    format!(
        "{}?fieldQuery={}",
        path,
        query.replace(' ', "%20").replace('\'', "%27")
    )
}

async fn register_broker(bed: &TestBed) -> (String, Value) {
    let (username, password) = bed.broker_server.credentials().await;
    let body = catalogs::broker_registration_body(&bed.broker_server.url(), &username, &password);
    let (status, reply) = send(&bed.app, Method::POST, "/v1/service_brokers", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    (reply["id"].as_str().expect("broker id").to_string(), reply)
}

async fn list_plan_ids(bed: &TestBed, broker_id: &str) -> Vec<(String, String)> {
    let (status, offerings) = send(
        &bed.app,
        Method::GET,
        &field_query(
            "/v1/service_offerings",
            &format!("broker_id eq '{}'", broker_id),
        ),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let mut plans = Vec::new();
    for offering in offerings["items"].as_array().unwrap() {
        let offering_id = offering["id"].as_str().unwrap();
        let (status, reply) = send(
            &bed.app,
            Method::GET,
            &field_query(
                "/v1/service_plans",
                &format!("service_offering_id eq '{}'", offering_id),
            ),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        for plan in reply["items"].as_array().unwrap() {
            plans.push((
                plan["id"].as_str().unwrap().to_string(),
                plan["catalog_id"].as_str().unwrap().to_string(),
            ));
        }
    }
    plans
}

#[tokio::test]
async fn s1_registering_a_broker_exposes_its_offerings() {
    let bed = test_bed().await;
    let (broker_id, reply) = register_broker(&bed).await;

    // POST echoes credentials but never the derived services
    assert!(reply.get("credentials").is_some());
    assert!(reply.get("services").is_none());

    let (status, offerings) = send(
        &bed.app,
        Method::GET,
        &field_query(
            "/v1/service_offerings",
            &format!("broker_id eq '{}'", broker_id),
        ),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(offerings["num_items"], json!(2));

    // GET does not leak credentials
    let (status, fetched) = send(
        &bed.app,
        Method::GET,
        &format!("/v1/service_brokers/{}", broker_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(fetched.get("credentials").is_none());
}

#[tokio::test]
async fn s2_an_empty_patch_refetches_the_drifted_catalog() {
    let bed = test_bed().await;
    let (broker_id, _) = register_broker(&bed).await;

    let mut catalog = bed.broker_server.catalog().await;
    let removed = catalog["services"][0]["plans"]
        .as_array_mut()
        .unwrap()
        .remove(0);
    let removed_catalog_id = removed["id"].as_str().unwrap().to_string();
    bed.broker_server.set_catalog(catalog).await;

    let (status, _) = send(
        &bed.app,
        Method::PATCH,
        &format!("/v1/service_brokers/{}", broker_id),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let plans = list_plan_ids(&bed, &broker_id).await;
    assert!(plans.iter().all(|(_, catalog_id)| catalog_id != &removed_catalog_id));
}

#[tokio::test]
async fn s3_plans_in_use_block_the_catalog_prune() {
    let bed = test_bed().await;
    let (broker_id, _) = register_broker(&bed).await;

    let plans = list_plan_ids(&bed, &broker_id).await;
    let (pinned_plan_id, pinned_catalog_id) = plans[0].clone();

    let (status, _) = send(
        &bed.app,
        Method::POST,
        "/v1/service_instances",
        Some(json!({
            "id": Uuid::new_v4().to_string(),
            "name": "pinned-instance",
            "service_plan_id": pinned_plan_id,
            "maintenance_info": {}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let mut catalog = bed.broker_server.catalog().await;
    catalog["services"][0]["plans"]
        .as_array_mut()
        .unwrap()
        .retain(|p| p["id"].as_str() != Some(pinned_catalog_id.as_str()));
    bed.broker_server.set_catalog(catalog).await;

    let (status, body) = send(
        &bed.app,
        Method::PATCH,
        &format!("/v1/service_brokers/{}", broker_id),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("ExistingReferenceEntity"));

    let surviving = list_plan_ids(&bed, &broker_id).await;
    assert!(surviving.iter().any(|(_, catalog_id)| catalog_id == &pinned_catalog_id));
}

#[tokio::test]
async fn s4_slow_brokers_surface_as_bad_gateway() {
    let bed = test_bed_with_settings(HttpClientSettings {
        connect_timeout: Duration::from_secs(5),
        response_header_timeout: Duration::from_millis(500),
    })
    .await;
    bed.broker_server
        .set_catalog_delay(Duration::from_millis(1500))
        .await;

    let (username, password) = bed.broker_server.credentials().await;
    let body = catalogs::broker_registration_body(&bed.broker_server.url(), &username, &password);
    let (status, reply) = send(&bed.app, Method::POST, "/v1/service_brokers", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(reply["description"]
        .as_str()
        .unwrap()
        .contains("could not reach service broker"));
}

#[tokio::test]
async fn s5_duplicate_instance_ids_resolve_to_one_winner() {
    let bed = test_bed().await;
    let (broker_id, _) = register_broker(&bed).await;
    let plans = list_plan_ids(&bed, &broker_id).await;

    let instance_id = Uuid::new_v4().to_string();
    let body = json!({
        "id": instance_id,
        "name": "contended-instance",
        "service_plan_id": plans[0].0,
    });

    let (first, second) = tokio::join!(
        send(&bed.app, Method::POST, "/v1/service_instances", Some(body.clone())),
        send(&bed.app, Method::POST, "/v1/service_instances", Some(body.clone())),
    );

    let mut statuses = vec![first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::CONFLICT]);
}

#[tokio::test]
async fn s6_stuck_operations_turn_failed_after_a_maintainer_tick() {
    let bed = test_bed().await;

    let mut stuck = Operation::in_progress(
        OperationType::Create,
        OperationCategory::AsyncRequest,
        ObjectType::ServiceInstance,
        "dead-instance",
        "-",
    );
    stuck.base.created_at = Utc::now() - chrono::Duration::hours(14);
    stuck.base.updated_at = stuck.base.created_at;
    let stuck_id = stuck.base.id.clone();
    bed.repository
        .create(Object::Operation(stuck))
        .await
        .unwrap();

    let (_shutdown_tx, shutdown) = tokio::sync::broadcast::channel(1);
    let maintainer = OperationMaintainer::new(
        bed.repository.clone(),
        bed.repository.clone(),
        bed.scheduler.clone(),
        OperationSettings::default(),
        shutdown,
    );
    maintainer.run_sweeps().await.unwrap();

    let (status, operation) = send(
        &bed.app,
        Method::GET,
        &format!("/v1/operations/{}", stuck_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(operation["state"], json!("FAILED"));
    assert_eq!(operation["errors"]["error"], json!("Timeout"));
}

#[tokio::test]
async fn async_mutations_return_accepted_with_a_trackable_operation() {
    let bed = test_bed().await;
    let (broker_id, _) = register_broker(&bed).await;
    let plans = list_plan_ids(&bed, &broker_id).await;

    let (status, reply) = send(
        &bed.app,
        Method::POST,
        "/v1/service_instances?async=true",
        Some(json!({
            "name": "async-instance",
            "service_plan_id": plans[0].0,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let operation_id = reply["id"].as_str().unwrap().to_string();

    let mut state = String::new();
    for _ in 0..100 {
        let (status, operation) = send(
            &bed.app,
            Method::GET,
            &format!("/v1/operations/{}", operation_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        state = operation["state"].as_str().unwrap().to_string();
        if state != "IN_PROGRESS" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state, "SUCCEEDED");
}

#[tokio::test]
async fn non_json_content_types_are_refused() {
    let bed = test_bed().await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/service_brokers")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("text"))
        .unwrap();
    let response = bed.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(bed.broker_server.catalog_request_count().await, 0);
}

#[tokio::test]
async fn broker_label_changes_apply_through_patch() {
    let bed = test_bed().await;
    let (broker_id, _) = register_broker(&bed).await;

    let (status, reply) = send(
        &bed.app,
        Method::PATCH,
        &format!("/v1/service_brokers/{}", broker_id),
        Some(json!({
            "labels": [
                {"op": "add", "key": "cluster_id", "values": ["cluster-1"]}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["labels"]["cluster_id"], json!(["cluster-1"]));

    let (status, reply) = send(
        &bed.app,
        Method::PATCH,
        &format!("/v1/service_brokers/{}", broker_id),
        Some(json!({
            "labels": [
                {"op": "remove", "key": "cluster_id"}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(reply["labels"].get("cluster_id").is_none());
}

#[tokio::test]
async fn visibility_overrides_can_be_created_and_deleted() {
    let bed = test_bed().await;
    let (broker_id, _) = register_broker(&bed).await;
    let plans = list_plan_ids(&bed, &broker_id).await;

    let (status, platform) = send(
        &bed.app,
        Method::POST,
        "/v1/platforms",
        Some(catalogs::platform_registration_body()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(platform.get("credentials").is_some());
    let platform_id = platform["id"].as_str().unwrap();

    let (status, visibility) = send(
        &bed.app,
        Method::POST,
        "/v1/visibilities",
        Some(json!({
            "service_plan_id": plans[0].0,
            "platform_id": platform_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let visibility_id = visibility["id"].as_str().unwrap();

    let (status, _) = send(
        &bed.app,
        Method::DELETE,
        &format!("/v1/visibilities/{}", visibility_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn deleting_a_broker_with_instances_is_refused() {
    let bed = test_bed().await;
    let (broker_id, _) = register_broker(&bed).await;
    let plans = list_plan_ids(&bed, &broker_id).await;

    let (status, _) = send(
        &bed.app,
        Method::POST,
        "/v1/service_instances",
        Some(json!({
            "name": "blocking-instance",
            "service_plan_id": plans[0].0,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &bed.app,
        Method::DELETE,
        &format!("/v1/service_brokers/{}", broker_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("ExistingReferenceEntity"));

    // the broker survives
    let (status, _) = send(
        &bed.app,
        Method::GET,
        &format!("/v1/service_brokers/{}", broker_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
