//! End-to-end broker reconciliation against the in-memory repository
//!
//! Drives the interceptable repository with the default interceptor chain
//! (catalog fetch + diff application + public plan resync) and a stub broker
//! served over real HTTP, so catalog fetching, diffing, referential
//! integrity and visibility resync are exercised together.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use sm_domain::errors::DomainError;
use sm_domain::query::{Criterion, Operator};
use sm_domain::repository::{Repository, TransactionalRepository};
use sm_domain::types::{
    Base, Credentials, Object, ObjectType, Platform, ServiceBroker, ServiceInstance, ServicePlan,
    Visibility,
};
use sm_infrastructure::interceptors::default_registry;
use sm_infrastructure::osb::{HttpClientSettings, ReqwestOsbClient};
use sm_infrastructure::persistence::InterceptableRepository;
use sm_testing::{catalogs, BrokerServer, InMemoryRepository};

struct TestBed {
    repository: Arc<InMemoryRepository>,
    interceptable: InterceptableRepository,
    broker_server: BrokerServer,
}

async fn setup() -> TestBed {
    setup_with_settings(HttpClientSettings::default()).await
}

async fn setup_with_settings(settings: HttpClientSettings) -> TestBed {
    let repository = Arc::new(InMemoryRepository::new());
    let client = Arc::new(ReqwestOsbClient::new(settings).expect("client"));
    let registry = Arc::new(default_registry(client).expect("registry"));
    let interceptable = InterceptableRepository::new(
        repository.clone() as Arc<dyn TransactionalRepository>,
        registry,
    );
    let broker_server = BrokerServer::start().await;
    TestBed {
        repository,
        interceptable,
        broker_server,
    }
}

async fn broker_for(server: &BrokerServer) -> ServiceBroker {
    let (username, password) = server.credentials().await;
    ServiceBroker {
        base: Base::new(),
        name: format!("broker-{}", uuid::Uuid::new_v4()),
        description: "test broker".to_string(),
        broker_url: server.url(),
        credentials: Some(Credentials::basic(username, password)),
        catalog: None,
    }
}

async fn register_broker(bed: &TestBed) -> ServiceBroker {
    let broker = broker_for(&bed.broker_server).await;
    let created = bed
        .interceptable
        .create(Object::ServiceBroker(broker))
        .await
        .expect("broker registration");
    ServiceBroker::try_from(created).expect("broker object")
}

async fn stored_broker(bed: &TestBed, id: &str) -> ServiceBroker {
    let object = bed
        .repository
        .get(
            ObjectType::ServiceBroker,
            &[Criterion::by_field(Operator::Equals, "id", id)],
        )
        .await
        .expect("stored broker");
    ServiceBroker::try_from(object).expect("broker object")
}

async fn plans_of_broker(bed: &TestBed, broker_id: &str) -> Vec<ServicePlan> {
    let offerings = bed
        .repository
        .list(
            ObjectType::ServiceOffering,
            &[Criterion::by_field(Operator::Equals, "broker_id", broker_id)],
        )
        .await
        .expect("offerings");
    let mut plans = Vec::new();
    for offering in offerings {
        let mut of_plans = bed
            .repository
            .list(
                ObjectType::ServicePlan,
                &[Criterion::by_field(
                    Operator::Equals,
                    "service_offering_id",
                    offering.id(),
                )],
            )
            .await
            .expect("plans");
        plans.append(&mut of_plans);
    }
    plans
        .into_iter()
        .map(|p| ServicePlan::try_from(p).expect("plan object"))
        .collect()
}

#[tokio::test]
async fn registering_a_broker_persists_its_catalog() {
    let bed = setup().await;
    let broker = register_broker(&bed).await;

    let offerings = bed
        .repository
        .list(
            ObjectType::ServiceOffering,
            &[Criterion::by_field(Operator::Equals, "broker_id", broker.base.id.clone())],
        )
        .await
        .unwrap();
    assert_eq!(offerings.len(), 2);

    let plans = plans_of_broker(&bed, &broker.base.id).await;
    assert_eq!(plans.len(), 4);

    let stored = stored_broker(&bed, &broker.base.id).await;
    assert_eq!(stored.catalog.unwrap(), bed.broker_server.catalog().await);
    assert_eq!(bed.broker_server.catalog_request_count().await, 1);
}

#[tokio::test]
async fn refresh_removes_plans_dropped_from_the_catalog() {
    let bed = setup().await;
    let broker = register_broker(&bed).await;

    let mut catalog = bed.broker_server.catalog().await;
    let removed = catalog["services"][0]["plans"]
        .as_array_mut()
        .unwrap()
        .remove(0);
    let removed_catalog_id = removed["id"].as_str().unwrap().to_string();
    bed.broker_server.set_catalog(catalog.clone()).await;

    let stored = stored_broker(&bed, &broker.base.id).await;
    bed.interceptable
        .update(Object::ServiceBroker(stored), &[])
        .await
        .expect("refresh");

    let plans = plans_of_broker(&bed, &broker.base.id).await;
    assert!(plans.iter().all(|p| p.catalog_id != removed_catalog_id));
    assert_eq!(stored_broker(&bed, &broker.base.id).await.catalog.unwrap(), catalog);
}

#[tokio::test]
async fn plans_with_instances_survive_and_fail_the_refresh() {
    let bed = setup().await;
    let broker = register_broker(&bed).await;
    let old_catalog = bed.broker_server.catalog().await;

    let plans = plans_of_broker(&bed, &broker.base.id).await;
    let doomed = &plans[0];
    bed.repository
        .create(Object::ServiceInstance(ServiceInstance {
            base: Base::new(),
            name: "pinned".to_string(),
            service_plan_id: doomed.base.id.clone(),
            platform_id: "service-manager".to_string(),
            maintenance_info: None,
            parameters: None,
            dashboard_url: None,
            last_operation: None,
            usable: true,
            shared: false,
        }))
        .await
        .unwrap();

    let mut catalog = bed.broker_server.catalog().await;
    let plans_array = catalog["services"][0]["plans"].as_array_mut().unwrap();
    plans_array.retain(|p| p["id"].as_str() != Some(doomed.catalog_id.as_str()));
    bed.broker_server.set_catalog(catalog).await;

    let stored = stored_broker(&bed, &broker.base.id).await;
    let err = bed
        .interceptable
        .update(Object::ServiceBroker(stored), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ExistingReferenceEntity { .. }));

    // the plan and the previously stored catalog blob both survive
    let surviving = plans_of_broker(&bed, &broker.base.id).await;
    assert!(surviving.iter().any(|p| p.catalog_id == doomed.catalog_id));
    assert_eq!(stored_broker(&bed, &broker.base.id).await.catalog.unwrap(), old_catalog);
}

#[tokio::test]
async fn changing_a_plan_id_under_a_stable_name_is_a_conflict() {
    let bed = setup().await;
    let broker = register_broker(&bed).await;
    let old_catalog = bed.broker_server.catalog().await;

    let mut catalog = old_catalog.clone();
    catalog["services"][0]["plans"][0]["id"] = json!("brand-new-id");
    bed.broker_server.set_catalog(catalog).await;

    let stored = stored_broker(&bed, &broker.base.id).await;
    let err = bed
        .interceptable
        .update(Object::ServiceBroker(stored), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Conflict { .. }));
    assert_eq!(stored_broker(&bed, &broker.base.id).await.catalog.unwrap(), old_catalog);
}

#[tokio::test]
async fn unreachable_brokers_do_not_get_registered() {
    let bed = setup().await;
    let mut broker = broker_for(&bed.broker_server).await;
    broker.broker_url = "http://localhost:1".to_string();

    let err = bed
        .interceptable
        .create(Object::ServiceBroker(broker))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("could not reach service broker"));
    assert_eq!(
        bed.repository.count(ObjectType::ServiceBroker, &[]).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn slow_catalog_responses_hit_the_response_header_timeout() {
    let bed = setup_with_settings(HttpClientSettings {
        connect_timeout: Duration::from_secs(5),
        response_header_timeout: Duration::from_millis(500),
    })
    .await;
    bed.broker_server
        .set_catalog_delay(Duration::from_millis(1500))
        .await;

    let broker = broker_for(&bed.broker_server).await;
    let err = bed
        .interceptable
        .create(Object::ServiceBroker(broker))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("could not reach service broker"));
}

#[tokio::test]
async fn free_plans_get_a_wildcard_visibility() {
    let bed = setup().await;
    let broker = register_broker(&bed).await;

    let plans = plans_of_broker(&bed, &broker.base.id).await;
    for plan in plans {
        let visibilities = bed
            .repository
            .list(
                ObjectType::Visibility,
                &[Criterion::by_field(
                    Operator::Equals,
                    "service_plan_id",
                    plan.base.id.clone(),
                )],
            )
            .await
            .unwrap();
        if plan.free {
            assert_eq!(visibilities.len(), 1, "free plan should have one visibility");
            let visibility = Visibility::try_from(visibilities[0].clone()).unwrap();
            assert!(visibility.platform_id.is_empty());
        } else {
            assert!(visibilities.is_empty(), "paid plan should have none");
        }
    }
}

#[tokio::test]
async fn visibility_resync_is_idempotent() {
    let bed = setup().await;
    let broker = register_broker(&bed).await;

    let before: Vec<String> = bed
        .repository
        .list(ObjectType::Visibility, &[])
        .await
        .unwrap()
        .iter()
        .map(|v| v.id().to_string())
        .collect();

    let stored = stored_broker(&bed, &broker.base.id).await;
    bed.interceptable
        .update(Object::ServiceBroker(stored), &[])
        .await
        .unwrap();

    let after: Vec<String> = bed
        .repository
        .list(ObjectType::Visibility, &[])
        .await
        .unwrap()
        .iter()
        .map(|v| v.id().to_string())
        .collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn supported_platforms_scope_visibilities_to_matching_platforms() {
    let bed = setup().await;

    let kubernetes = Platform {
        base: Base::new(),
        name: "k8s-cluster".to_string(),
        platform_type: "kubernetes".to_string(),
        description: String::new(),
        credentials: None,
        active: true,
        last_active: chrono::Utc::now(),
    };
    let cloudfoundry = Platform {
        base: Base::new(),
        name: "cf-org".to_string(),
        platform_type: "cloudfoundry".to_string(),
        description: String::new(),
        credentials: None,
        active: true,
        last_active: chrono::Utc::now(),
    };
    let kubernetes_id = kubernetes.base.id.clone();
    bed.repository.create(Object::Platform(kubernetes)).await.unwrap();
    bed.repository.create(Object::Platform(cloudfoundry)).await.unwrap();

    let catalog = json!({
        "services": [{
            "id": "scoped-svc",
            "name": "scoped-svc",
            "description": "d",
            "plans": [catalogs::plan_for_platforms(&["kubernetes"])]
        }]
    });
    bed.broker_server.set_catalog(catalog).await;

    let broker = register_broker(&bed).await;
    let plans = plans_of_broker(&bed, &broker.base.id).await;
    assert_eq!(plans.len(), 1);

    let visibilities = bed
        .repository
        .list(
            ObjectType::Visibility,
            &[Criterion::by_field(
                Operator::Equals,
                "service_plan_id",
                plans[0].base.id.clone(),
            )],
        )
        .await
        .unwrap();
    assert_eq!(visibilities.len(), 1);
    let visibility = Visibility::try_from(visibilities[0].clone()).unwrap();
    assert_eq!(visibility.platform_id, kubernetes_id);
}

#[tokio::test]
async fn a_plan_turning_paid_loses_its_wildcard_visibility() {
    let bed = setup().await;
    let catalog = json!({
        "services": [{
            "id": "flip-svc",
            "name": "flip-svc",
            "description": "d",
            "plans": [{"id": "flip-plan", "name": "flip-plan", "description": "d", "free": true}]
        }]
    });
    bed.broker_server.set_catalog(catalog.clone()).await;
    let broker = register_broker(&bed).await;

    let plans = plans_of_broker(&bed, &broker.base.id).await;
    let by_plan = [Criterion::by_field(
        Operator::Equals,
        "service_plan_id",
        plans[0].base.id.clone(),
    )];
    assert_eq!(
        bed.repository.count(ObjectType::Visibility, &by_plan).await.unwrap(),
        1
    );

    let mut paid = catalog;
    paid["services"][0]["plans"][0]["free"] = json!(false);
    bed.broker_server.set_catalog(paid).await;
    let stored = stored_broker(&bed, &broker.base.id).await;
    bed.interceptable
        .update(Object::ServiceBroker(stored), &[])
        .await
        .unwrap();

    assert_eq!(
        bed.repository.count(ObjectType::Visibility, &by_plan).await.unwrap(),
        0
    );
}
