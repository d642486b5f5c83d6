//! Scheduler behavior against the in-memory repository

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sm_application::operations::{
    CancellationSource, OperationScheduler, OperationSettings, PoolSettings,
};
use sm_domain::errors::DomainError;
use sm_domain::query::{Criterion, Operator};
use sm_domain::repository::{Repository, SchedulableAction};
use sm_domain::types::{
    Object, ObjectType, Operation, OperationCategory, OperationState, OperationType,
};
use sm_testing::InMemoryRepository;

fn fast_settings() -> OperationSettings {
    OperationSettings {
        rescheduling_interval: Duration::from_millis(10),
        polling_interval: Duration::from_millis(10),
        ..OperationSettings::default()
    }
}

fn setup(settings: OperationSettings) -> (Arc<OperationScheduler>, Arc<InMemoryRepository>) {
    let repository = Arc::new(InMemoryRepository::new());
    let scheduler = Arc::new(OperationScheduler::new(
        repository.clone(),
        repository.clone(),
        settings,
    ));
    (scheduler, repository)
}

fn operation_for(resource_type: ObjectType, resource_id: &str) -> Operation {
    Operation::in_progress(
        OperationType::Create,
        OperationCategory::AsyncRequest,
        resource_type,
        resource_id,
        "-",
    )
}

fn ok_action() -> SchedulableAction {
    Arc::new(|_| Box::pin(async { Ok(None) }))
}

fn slow_action(delay: Duration) -> SchedulableAction {
    Arc::new(move |_| {
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(None)
        })
    })
}

fn failing_action() -> SchedulableAction {
    Arc::new(|_| {
        Box::pin(async { Err(DomainError::bad_request("the broker rejected the request")) })
    })
}

/// Fails with a retryable error the first `failures` runs, then succeeds.
fn flaky_action(failures: usize) -> (SchedulableAction, Arc<AtomicUsize>) {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let action: SchedulableAction = Arc::new(move |_| {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            if counter.fetch_add(1, Ordering::SeqCst) < failures {
                Err(DomainError::Storage {
                    message: "connection reset".to_string(),
                    retryable: true,
                })
            } else {
                Ok(None)
            }
        })
    });
    (action, attempts)
}

fn pending_action(pending_runs: usize) -> (SchedulableAction, Arc<AtomicUsize>) {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let action: SchedulableAction = Arc::new(move |_| {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            if counter.fetch_add(1, Ordering::SeqCst) < pending_runs {
                Err(DomainError::OperationPending { last_operation: None })
            } else {
                Ok(None)
            }
        })
    });
    (action, attempts)
}

async fn wait_for_state(
    repository: &InMemoryRepository,
    operation_id: &str,
    state: OperationState,
) -> Operation {
    for _ in 0..100 {
        if let Ok(object) = repository
            .get(
                ObjectType::Operation,
                &[Criterion::by_field(Operator::Equals, "id", operation_id)],
            )
            .await
        {
            let operation = Operation::try_from(object).unwrap();
            if operation.state == state {
                return operation;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("operation {} never reached {:?}", operation_id, state);
}

#[tokio::test]
async fn sync_scheduling_resolves_the_operation_before_returning() {
    let (scheduler, repository) = setup(fast_settings());
    let operation = operation_for(ObjectType::ServiceBroker, "broker-1");

    let result = scheduler.schedule_sync(operation, ok_action()).await.unwrap();
    assert!(result.is_none());

    let operations = repository.list(ObjectType::Operation, &[]).await.unwrap();
    assert_eq!(operations.len(), 1);
    let operation = Operation::try_from(operations[0].clone()).unwrap();
    assert_eq!(operation.state, OperationState::Succeeded);
}

#[tokio::test]
async fn concurrent_operations_on_one_resource_are_mutually_exclusive() {
    let (scheduler, repository) = setup(fast_settings());

    let first = scheduler
        .schedule_async(
            operation_for(ObjectType::ServiceInstance, "instance-1"),
            slow_action(Duration::from_millis(300)),
            None,
        )
        .await
        .unwrap();

    let err = scheduler
        .schedule_async(
            operation_for(ObjectType::ServiceInstance, "instance-1"),
            ok_action(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ConcurrentOperationInProgress { .. }));

    // the refused operation leaves no record behind
    assert_eq!(repository.count(ObjectType::Operation, &[]).await.unwrap(), 1);

    wait_for_state(&repository, &first.base.id, OperationState::Succeeded).await;

    // the lock is free again once the first operation resolved
    scheduler
        .schedule_async(
            operation_for(ObjectType::ServiceInstance, "instance-1"),
            ok_action(),
            None,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn saturated_pools_reject_with_queue_full() {
    let settings = OperationSettings {
        pools: vec![PoolSettings {
            resource: ObjectType::ServiceInstance.api_name().to_string(),
            size: 1,
        }],
        ..fast_settings()
    };
    let (scheduler, repository) = setup(settings);

    // occupy the single executor and the single queue slot
    scheduler
        .schedule_async(
            operation_for(ObjectType::ServiceInstance, "busy-1"),
            slow_action(Duration::from_millis(500)),
            None,
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    scheduler
        .schedule_async(
            operation_for(ObjectType::ServiceInstance, "busy-2"),
            slow_action(Duration::from_millis(500)),
            None,
        )
        .await
        .unwrap();

    let err = scheduler
        .schedule_async(
            operation_for(ObjectType::ServiceInstance, "bounced"),
            ok_action(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::QueueFull { .. }));

    // the bounced admission was rolled back: no operation row, lock free
    let bounced = repository
        .list(
            ObjectType::Operation,
            &[Criterion::by_field(Operator::Equals, "resource_id", "bounced")],
        )
        .await
        .unwrap();
    assert!(bounced.is_empty());
}

#[tokio::test]
async fn failed_actions_populate_the_operation_errors() {
    let (scheduler, repository) = setup(fast_settings());
    let operation = scheduler
        .schedule_async(
            operation_for(ObjectType::ServiceBroker, "broker-err"),
            failing_action(),
            None,
        )
        .await
        .unwrap();

    let failed = wait_for_state(&repository, &operation.base.id, OperationState::Failed).await;
    let errors = failed.errors.unwrap();
    assert_eq!(errors.error, "BadRequest");
    assert!(errors.description.contains("rejected"));
}

#[tokio::test]
async fn retryable_failures_are_rescheduled_until_they_succeed() {
    let (scheduler, repository) = setup(fast_settings());
    let (action, attempts) = flaky_action(2);

    let operation = scheduler
        .schedule_async(
            operation_for(ObjectType::ServiceInstance, "flaky"),
            action,
            None,
        )
        .await
        .unwrap();

    wait_for_state(&repository, &operation.base.id, OperationState::Succeeded).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn broker_pending_actions_are_polled_until_terminal() {
    let (scheduler, repository) = setup(fast_settings());
    let (action, attempts) = pending_action(2);

    let operation = scheduler
        .schedule_async(
            operation_for(ObjectType::ServiceInstance, "pending"),
            action,
            None,
        )
        .await
        .unwrap();

    wait_for_state(&repository, &operation.base.id, OperationState::Succeeded).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn executor_panics_are_recovered_as_internal_errors() {
    let (scheduler, repository) = setup(fast_settings());
    let action: SchedulableAction = Arc::new(|_| {
        Box::pin(async {
            panic!("executor blew up");
        })
    });

    let operation = scheduler
        .schedule_async(
            operation_for(ObjectType::ServiceBroker, "panicky"),
            action,
            None,
        )
        .await
        .unwrap();

    let failed = wait_for_state(&repository, &operation.base.id, OperationState::Failed).await;
    assert_eq!(failed.errors.unwrap().error, "InternalServerError");
}

#[tokio::test]
async fn cancelled_requests_fail_queued_work_without_running_it() {
    let settings = OperationSettings {
        pools: vec![PoolSettings {
            resource: ObjectType::ServiceInstance.api_name().to_string(),
            size: 1,
        }],
        ..fast_settings()
    };
    let (scheduler, repository) = setup(settings);
    let ran = Arc::new(AtomicUsize::new(0));

    scheduler
        .schedule_async(
            operation_for(ObjectType::ServiceInstance, "occupier"),
            slow_action(Duration::from_millis(300)),
            None,
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (source, signal) = CancellationSource::new();
    let counted: SchedulableAction = {
        let ran = Arc::clone(&ran);
        Arc::new(move |_| {
            let ran = Arc::clone(&ran);
            Box::pin(async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            })
        })
    };
    let queued = scheduler
        .schedule_async(
            operation_for(ObjectType::ServiceInstance, "cancelled"),
            counted,
            Some(signal),
        )
        .await
        .unwrap();
    source.cancel();

    let failed = wait_for_state(&repository, &queued.base.id, OperationState::Failed).await;
    assert_eq!(failed.errors.unwrap().error, "RequestCancelled");
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn sync_scheduling_retries_retryable_storage_errors_once() {
    let (scheduler, _repository) = setup(fast_settings());
    let (action, attempts) = flaky_action(1);

    scheduler
        .schedule_sync(operation_for(ObjectType::Platform, "platform-1"), action)
        .await
        .unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}
