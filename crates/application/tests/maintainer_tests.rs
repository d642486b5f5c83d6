//! Maintainer sweeps against the in-memory repository

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use sm_application::operations::{OperationMaintainer, OperationScheduler, OperationSettings};
use sm_domain::query::{Criterion, Operator};
use sm_domain::repository::{Repository, ResourceLocker, SchedulableAction};
use sm_domain::types::{
    Base, Object, ObjectType, Operation, OperationCategory, OperationState, OperationType,
    ServiceInstance,
};
use sm_testing::InMemoryRepository;

fn settings() -> OperationSettings {
    OperationSettings {
        action_timeout: Duration::from_secs(3600),
        lifespan: Duration::from_secs(7 * 24 * 3600),
        rescheduling_interval: Duration::from_millis(10),
        polling_interval: Duration::from_millis(10),
        ..OperationSettings::default()
    }
}

struct TestBed {
    repository: Arc<InMemoryRepository>,
    maintainer: OperationMaintainer,
}

fn setup() -> TestBed {
    let repository = Arc::new(InMemoryRepository::new());
    let scheduler = Arc::new(OperationScheduler::new(
        repository.clone(),
        repository.clone(),
        settings(),
    ));
    let (_tx, shutdown) = tokio::sync::broadcast::channel(1);
    let maintainer = OperationMaintainer::new(
        repository.clone(),
        repository.clone(),
        scheduler.clone(),
        settings(),
        shutdown,
    );
    TestBed {
        repository,
        maintainer,
    }
}

fn aged_operation(
    operation_type: OperationType,
    resource_type: ObjectType,
    resource_id: &str,
    hours_old: i64,
) -> Operation {
    let mut operation = Operation::in_progress(
        operation_type,
        OperationCategory::AsyncRequest,
        resource_type,
        resource_id,
        "-",
    );
    operation.base.created_at = Utc::now() - chrono::Duration::hours(hours_old);
    operation.base.updated_at = operation.base.created_at;
    operation
}

async fn fetch_operation(repository: &InMemoryRepository, id: &str) -> Option<Operation> {
    repository
        .get(
            ObjectType::Operation,
            &[Criterion::by_field(Operator::Equals, "id", id)],
        )
        .await
        .ok()
        .map(|o| Operation::try_from(o).unwrap())
}

#[tokio::test]
async fn stuck_operations_are_failed_with_timeout() {
    let bed = setup();
    let stuck = aged_operation(OperationType::Update, ObjectType::ServiceBroker, "b-1", 2);
    let stuck_id = stuck.base.id.clone();
    bed.repository
        .create(Object::Operation(stuck))
        .await
        .unwrap();
    bed.repository
        .try_lock(ObjectType::ServiceBroker, "b-1", &stuck_id)
        .await
        .unwrap();

    let stats = bed.maintainer.run_sweeps().await.unwrap();
    assert_eq!(stats.stuck_failed, 1);

    let failed = fetch_operation(&bed.repository, &stuck_id).await.unwrap();
    assert_eq!(failed.state, OperationState::Failed);
    assert_eq!(failed.errors.unwrap().error, "Timeout");

    // the lock was released
    assert!(bed
        .repository
        .try_lock(ObjectType::ServiceBroker, "b-1", "another")
        .await
        .unwrap());
}

#[tokio::test]
async fn fresh_operations_are_left_alone() {
    let bed = setup();
    let fresh = Operation::in_progress(
        OperationType::Create,
        OperationCategory::AsyncRequest,
        ObjectType::ServiceInstance,
        "fresh",
        "-",
    );
    let fresh_id = fresh.base.id.clone();
    bed.repository
        .create(Object::Operation(fresh))
        .await
        .unwrap();

    let stats = bed.maintainer.run_sweeps().await.unwrap();
    assert_eq!(stats.stuck_failed, 0);
    assert_eq!(stats.aged_deleted, 0);

    let untouched = fetch_operation(&bed.repository, &fresh_id).await.unwrap();
    assert_eq!(untouched.state, OperationState::InProgress);
}

#[tokio::test]
async fn stuck_create_operations_roll_back_partial_resources() {
    let bed = setup();

    let mut partial = ServiceInstance {
        base: Base::with_id("half-provisioned"),
        name: "half".to_string(),
        service_plan_id: "plan-1".to_string(),
        platform_id: "service-manager".to_string(),
        maintenance_info: None,
        parameters: None,
        dashboard_url: None,
        last_operation: None,
        usable: false,
        shared: false,
    };
    partial.base.ready = false;
    bed.repository
        .create(Object::ServiceInstance(partial))
        .await
        .unwrap();

    let stuck = aged_operation(
        OperationType::Create,
        ObjectType::ServiceInstance,
        "half-provisioned",
        2,
    );
    bed.repository
        .create(Object::Operation(stuck))
        .await
        .unwrap();

    let stats = bed.maintainer.run_sweeps().await.unwrap();
    assert_eq!(stats.stuck_failed, 1);

    let leftovers = bed
        .repository
        .list(
            ObjectType::ServiceInstance,
            &[Criterion::by_field(Operator::Equals, "id", "half-provisioned")],
        )
        .await
        .unwrap();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn operations_older_than_the_lifespan_are_deleted() {
    let bed = setup();
    let ancient = aged_operation(OperationType::Delete, ObjectType::Platform, "p-1", 8 * 24);
    let ancient_id = ancient.base.id.clone();
    bed.repository
        .create(Object::Operation(ancient))
        .await
        .unwrap();

    let stats = bed.maintainer.run_sweeps().await.unwrap();
    assert_eq!(stats.aged_deleted, 1);
    assert!(fetch_operation(&bed.repository, &ancient_id).await.is_none());
}

#[tokio::test]
async fn orphaned_rescheduled_operations_are_requeued() {
    let mut bed = setup();

    let mut orphan = Operation::in_progress(
        OperationType::Create,
        OperationCategory::AsyncRequest,
        ObjectType::ServiceInstance,
        "orphan",
        "-",
    );
    orphan.reschedule = true;
    orphan.reschedule_timestamp = Some(Utc::now() - chrono::Duration::minutes(5));
    let orphan_id = orphan.base.id.clone();
    bed.repository
        .create(Object::Operation(orphan))
        .await
        .unwrap();
    bed.repository
        .try_lock(ObjectType::ServiceInstance, "orphan", &orphan_id)
        .await
        .unwrap();

    let resumed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&resumed);
    bed.maintainer.register_reschedule_handler(
        ObjectType::ServiceInstance,
        Arc::new(move |_operation| {
            let counter = Arc::clone(&counter);
            let action: SchedulableAction = Arc::new(move |_| {
                let counter = Arc::clone(&counter);
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                })
            });
            action
        }),
    );

    let stats = bed.maintainer.run_sweeps().await.unwrap();
    assert_eq!(stats.orphans_requeued, 1);

    for _ in 0..100 {
        if resumed.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(resumed.load(Ordering::SeqCst), 1);

    let operation = fetch_operation(&bed.repository, &orphan_id).await.unwrap();
    assert_eq!(operation.state, OperationState::Succeeded);
}
