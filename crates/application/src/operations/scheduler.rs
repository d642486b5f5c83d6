//! Operation scheduler
//!
//! Executes mutating actions under durable [`Operation`] records. Admission
//! persists the operation in `IN_PROGRESS` and claims the storage lock row
//! for `(resource_type, resource_id)`; a held lock means another operation
//! is in flight and the request is refused with
//! `ConcurrentOperationInProgress`. Actions then run on the worker pool of
//! their resource type under a deadline, transitioning the operation to
//! `SUCCEEDED` or `FAILED`, rescheduling retryable failures and polling
//! broker-pending ones.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use sm_domain::errors::{DomainError, Result};
use sm_domain::query::{Criterion, Operator};
use sm_domain::repository::{Repository, ResourceLocker, SchedulableAction, TransactionalRepository};
use sm_domain::types::{Object, ObjectType, Operation, OperationState};

use super::pool::{Work, WorkerPool};
use super::settings::OperationSettings;

/// Cancels queued or in-flight work for one request.
pub struct CancellationSource {
    sender: watch::Sender<bool>,
}

impl CancellationSource {
    pub fn new() -> (CancellationSource, CancellationSignal) {
        let (sender, receiver) = watch::channel(false);
        (CancellationSource { sender }, CancellationSignal { receiver })
    }

    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }
}

#[derive(Clone)]
pub struct CancellationSignal {
    receiver: watch::Receiver<bool>,
}

impl CancellationSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow() {
                return;
            }
            if receiver.changed().await.is_err() {
                // The request side is gone without cancelling; never fire.
                std::future::pending::<()>().await;
            }
        }
    }
}

async fn wait_cancelled(signal: &Option<CancellationSignal>) {
    match signal {
        Some(signal) => signal.cancelled().await,
        None => std::future::pending().await,
    }
}

pub struct OperationScheduler {
    repository: Arc<dyn TransactionalRepository>,
    locker: Arc<dyn ResourceLocker>,
    settings: OperationSettings,
    pools: HashMap<String, WorkerPool>,
    default_pool: WorkerPool,
}

impl OperationScheduler {
    pub fn new(
        repository: Arc<dyn TransactionalRepository>,
        locker: Arc<dyn ResourceLocker>,
        settings: OperationSettings,
    ) -> Self {
        let default_pool = WorkerPool::new("default", settings.default_pool_size);
        let pools = settings
            .pools
            .iter()
            .map(|pool| (pool.resource.clone(), WorkerPool::new(&pool.resource, pool.size)))
            .collect();
        OperationScheduler {
            repository,
            locker,
            settings,
            pools,
            default_pool,
        }
    }

    pub fn repository(&self) -> Arc<dyn TransactionalRepository> {
        Arc::clone(&self.repository)
    }

    fn pool_for(&self, resource_type: ObjectType) -> &WorkerPool {
        self.pools
            .get(resource_type.api_name())
            .unwrap_or(&self.default_pool)
    }

    /// Runs the action inline, resolving the operation before returning.
    /// Retryable failures are retried once; a broker still working is polled
    /// until the deadline runs out.
    pub async fn schedule_sync(
        self: &Arc<Self>,
        operation: Operation,
        action: SchedulableAction,
    ) -> Result<Option<Object>> {
        let operation = self.admit(operation).await?;
        let deadline = self.deadline_for(&operation);

        let mut retried = false;
        let run = async {
            loop {
                let attempt = action(Arc::clone(&self.repository));
                match std::panic::AssertUnwindSafe(attempt).catch_unwind().await {
                    Err(_) => return Err(DomainError::internal("action panicked")),
                    Ok(Ok(result)) => return Ok(result),
                    Ok(Err(error)) => match error {
                        DomainError::OperationPending { .. } => {
                            tokio::time::sleep(self.settings.polling_interval).await;
                        }
                        error if error.is_retryable() && !retried => {
                            retried = true;
                            tokio::time::sleep(self.settings.rescheduling_interval).await;
                        }
                        error => return Err(error),
                    },
                }
            }
        };

        let result = match tokio::time::timeout(deadline, run).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::Timeout { timeout: deadline }),
        };

        match result {
            Ok(result) => {
                self.finalize_success(operation).await;
                Ok(result)
            }
            Err(error) => {
                self.finalize_failure(operation, &error).await;
                Err(error)
            }
        }
    }

    /// Admits the operation and enqueues the action on the pool of its
    /// resource type, returning the persisted operation immediately.
    pub async fn schedule_async(
        self: &Arc<Self>,
        operation: Operation,
        action: SchedulableAction,
        cancellation: Option<CancellationSignal>,
    ) -> Result<Operation> {
        let operation = self.admit(operation).await?;
        let work = Arc::clone(self).into_work(operation.clone(), action, cancellation);

        if let Err(error) = self.pool_for(operation.resource_type).try_submit(work) {
            // Queue saturated; undo admission so the caller can retry later.
            self.abandon(&operation).await;
            return Err(error);
        }
        Ok(operation)
    }

    /// Re-enqueues an already admitted operation, e.g. orphan recovery by
    /// the maintainer. The lock for the resource stays held by the
    /// operation.
    pub fn requeue(
        self: &Arc<Self>,
        operation: Operation,
        action: SchedulableAction,
        cancellation: Option<CancellationSignal>,
    ) -> Result<()> {
        let pool = self.pool_for(operation.resource_type);
        let work = Arc::clone(self).into_work(operation, action, cancellation);
        pool.try_submit(work)
    }

    async fn admit(&self, mut operation: Operation) -> Result<Operation> {
        operation.base.prepare_for_create();
        operation.state = OperationState::InProgress;
        let operation: Operation = self
            .repository
            .create(Object::Operation(operation))
            .await?
            .try_into()?;

        let locked = self
            .locker
            .try_lock(
                operation.resource_type,
                &operation.resource_id,
                &operation.base.id,
            )
            .await?;
        if !locked {
            // Admission failed; the operation never ran, so it leaves no
            // audit trace.
            let by_id = [Criterion::by_field(Operator::Equals, "id", operation.base.id.clone())];
            if let Err(error) = self.repository.delete(ObjectType::Operation, &by_id).await {
                warn!(operation_id = %operation.base.id, "could not remove unadmitted operation: {}", error);
            }
            return Err(DomainError::ConcurrentOperationInProgress {
                resource_id: operation.resource_id,
            });
        }

        debug!(
            operation_id = %operation.base.id,
            resource_type = %operation.resource_type,
            resource_id = %operation.resource_id,
            "operation admitted"
        );
        Ok(operation)
    }

    fn deadline_for(&self, operation: &Operation) -> Duration {
        let window_end = operation.base.created_at
            + chrono::Duration::from_std(self.settings.reconciliation_operation_timeout)
                .unwrap_or_else(|_| chrono::Duration::days(7));
        let remaining = (window_end - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        self.settings.action_timeout.min(remaining)
    }

    fn into_work(
        self: Arc<Self>,
        operation: Operation,
        action: SchedulableAction,
        cancellation: Option<CancellationSignal>,
    ) -> Work {
        Box::pin(async move {
            if cancellation.as_ref().map(|c| c.is_cancelled()).unwrap_or(false) {
                self.finalize_failure(operation, &DomainError::RequestCancelled).await;
                return;
            }

            let deadline = self.deadline_for(&operation);
            if deadline.is_zero() {
                let error = DomainError::Timeout { timeout: deadline };
                self.finalize_failure(operation, &error).await;
                return;
            }

            let attempt = action(Arc::clone(&self.repository));
            let guarded = std::panic::AssertUnwindSafe(attempt).catch_unwind();

            let outcome = tokio::select! {
                outcome = tokio::time::timeout(deadline, guarded) => outcome,
                // Dropping the in-flight attempt rolls its transaction back.
                _ = wait_cancelled(&cancellation) => {
                    self.finalize_failure(operation, &DomainError::RequestCancelled).await;
                    return;
                }
            };

            match outcome {
                Err(_) => {
                    let error = DomainError::Timeout { timeout: deadline };
                    self.finalize_failure(operation, &error).await;
                }
                Ok(Err(panic)) => {
                    error!(operation_id = %operation.base.id, "executor panicked: {:?}", panic);
                    let error = DomainError::internal("operation executor panicked");
                    self.finalize_failure(operation, &error).await;
                }
                Ok(Ok(Ok(_result))) => {
                    self.finalize_success(operation).await;
                }
                Ok(Ok(Err(error))) if error.is_retryable() => {
                    self.reschedule(operation, action, cancellation, &error).await;
                }
                Ok(Ok(Err(error))) => {
                    self.finalize_failure(operation, &error).await;
                }
            }
        })
    }

    async fn reschedule(
        self: &Arc<Self>,
        mut operation: Operation,
        action: SchedulableAction,
        cancellation: Option<CancellationSignal>,
        error: &DomainError,
    ) {
        let interval = match error {
            DomainError::OperationPending { .. } => self.settings.polling_interval,
            _ => self.settings.rescheduling_interval,
        };
        operation.mark_rescheduled(Utc::now() + chrono::Duration::from_std(interval).unwrap_or_default());
        if let Err(update_error) = self
            .repository
            .update(Object::Operation(operation.clone()), &[])
            .await
        {
            warn!(
                operation_id = %operation.base.id,
                "could not persist reschedule marker: {}", update_error
            );
        }
        debug!(
            operation_id = %operation.base.id,
            "action returned a retryable error, rescheduling: {}", error
        );

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let pool = scheduler.pool_for(operation.resource_type);
            let work = Arc::clone(&scheduler).into_work(operation.clone(), action, cancellation);
            if let Err(submit_error) = pool.try_submit(work) {
                scheduler.finalize_failure(operation, &submit_error).await;
            }
        });
    }

    async fn finalize_success(&self, mut operation: Operation) {
        operation.succeed();
        if let Err(error) = self
            .repository
            .update(Object::Operation(operation.clone()), &[])
            .await
        {
            error!(operation_id = %operation.base.id, "could not mark operation succeeded: {}", error);
        }
        self.release(&operation).await;
        info!(
            operation_id = %operation.base.id,
            resource_id = %operation.resource_id,
            "operation succeeded"
        );
    }

    async fn finalize_failure(&self, mut operation: Operation, error: &DomainError) {
        operation.fail(error.kind(), error.to_string());
        if let Err(update_error) = self
            .repository
            .update(Object::Operation(operation.clone()), &[])
            .await
        {
            error!(operation_id = %operation.base.id, "could not mark operation failed: {}", update_error);
        }
        self.release(&operation).await;
        info!(
            operation_id = %operation.base.id,
            resource_id = %operation.resource_id,
            "operation failed: {}", error
        );
    }

    // Undo an admission that never reached an executor.
    async fn abandon(&self, operation: &Operation) {
        let by_id = [Criterion::by_field(Operator::Equals, "id", operation.base.id.clone())];
        if let Err(error) = self.repository.delete(ObjectType::Operation, &by_id).await {
            warn!(operation_id = %operation.base.id, "could not remove rejected operation: {}", error);
        }
        self.release(operation).await;
    }

    async fn release(&self, operation: &Operation) {
        if let Err(error) = self
            .locker
            .unlock(operation.resource_type, &operation.resource_id)
            .await
        {
            error!(
                operation_id = %operation.base.id,
                "could not release resource lock: {}", error
            );
        }
    }
}
