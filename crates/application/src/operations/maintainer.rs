//! Operation maintainer
//!
//! Background sweeper over the operations table. On every tick it fails
//! operations stuck in progress beyond the action timeout (removing the
//! partial rows their CREATE actions left behind), deletes operations older
//! than the configured lifespan, and re-enqueues orphaned rescheduled
//! operations through their registered handlers.
//!
//! The maintainer runs on every service manager replica; sweep listings use
//! `FOR UPDATE SKIP LOCKED` semantics so concurrent replicas partition the
//! work instead of double-processing it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use sm_domain::errors::Result;
use sm_domain::query::{Criterion, Operator};
use sm_domain::repository::{
    Repository, ResourceLocker, SchedulableAction, TransactionalRepository,
};
use sm_domain::types::{Object, ObjectType, Operation, OperationState, OperationType};

use super::scheduler::OperationScheduler;
use super::settings::OperationSettings;

/// Rebuilds the action of an orphaned operation so it can be re-enqueued.
pub type RescheduleHandler = Arc<dyn Fn(&Operation) -> SchedulableAction + Send + Sync>;

/// Result of one maintainer sweep run.
#[derive(Debug, Default, Clone)]
pub struct SweepStats {
    pub stuck_failed: usize,
    pub aged_deleted: usize,
    pub orphans_requeued: usize,
}

pub struct OperationMaintainer {
    repository: Arc<dyn TransactionalRepository>,
    locker: Arc<dyn ResourceLocker>,
    scheduler: Arc<OperationScheduler>,
    settings: OperationSettings,
    reschedule_handlers: HashMap<ObjectType, RescheduleHandler>,
    shutdown: tokio::sync::broadcast::Receiver<()>,
}

impl OperationMaintainer {
    pub fn new(
        repository: Arc<dyn TransactionalRepository>,
        locker: Arc<dyn ResourceLocker>,
        scheduler: Arc<OperationScheduler>,
        settings: OperationSettings,
        shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Self {
        OperationMaintainer {
            repository,
            locker,
            scheduler,
            settings,
            reschedule_handlers: HashMap::new(),
            shutdown,
        }
    }

    /// Registers the action factory used to resume orphaned operations of a
    /// resource type.
    pub fn register_reschedule_handler(
        &mut self,
        resource_type: ObjectType,
        handler: RescheduleHandler,
    ) {
        self.reschedule_handlers.insert(resource_type, handler);
    }

    /// Runs the sweep loop until shutdown is signalled.
    pub async fn run(&mut self) {
        info!(
            cleanup_interval = ?self.settings.cleanup_interval,
            action_timeout = ?self.settings.action_timeout,
            lifespan = ?self.settings.lifespan,
            "operation maintainer started"
        );

        let mut ticker = interval(self.settings.cleanup_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_sweeps().await {
                        Ok(stats) => {
                            if stats.stuck_failed + stats.aged_deleted + stats.orphans_requeued > 0 {
                                info!(
                                    stuck_failed = stats.stuck_failed,
                                    aged_deleted = stats.aged_deleted,
                                    orphans_requeued = stats.orphans_requeued,
                                    "maintainer sweep completed"
                                );
                            }
                        }
                        Err(e) => error!("maintainer sweep failed: {}", e),
                    }
                }
                _ = self.shutdown.recv() => {
                    info!("operation maintainer shutting down");
                    break;
                }
            }
        }
    }

    /// Runs all sweeps once.
    pub async fn run_sweeps(&self) -> Result<SweepStats> {
        let mut stats = SweepStats::default();
        stats.stuck_failed = self.sweep_stuck_operations().await?;
        stats.aged_deleted = self.sweep_aged_operations().await?;
        stats.orphans_requeued = self.requeue_orphans().await?;
        Ok(stats)
    }

    /// Fails operations that have been in progress longer than the action
    /// timeout and removes the not-ready rows their CREATE actions left.
    async fn sweep_stuck_operations(&self) -> Result<usize> {
        let cutoff = (Utc::now()
            - chrono::Duration::from_std(self.settings.action_timeout).unwrap_or_default())
        .to_rfc3339();
        let criteria = vec![
            Criterion::by_field(Operator::Equals, "state", OperationState::InProgress.as_str()),
            Criterion::by_field(Operator::LessThan, "updated_at", cutoff),
        ];

        let swept: Arc<Mutex<Vec<Operation>>> = Arc::new(Mutex::new(Vec::new()));
        let swept_in_tx = Arc::clone(&swept);
        self.repository
            .in_transaction(Box::new(move |tx| {
                Box::pin(async move {
                    let stuck = tx
                        .list_exclusively(ObjectType::Operation, &criteria)
                        .await?;
                    for object in stuck {
                        let mut operation = Operation::try_from(object)?;

                        if operation.operation_type == OperationType::Create {
                            // Rollback scope: rows written by the dead action
                            // never turned ready.
                            let partial = [
                                Criterion::by_field(
                                    Operator::Equals,
                                    "id",
                                    operation.resource_id.clone(),
                                ),
                                Criterion::by_field(Operator::Equals, "ready", "false"),
                            ];
                            let leftovers =
                                tx.list(operation.resource_type, &partial).await?;
                            if !leftovers.is_empty() {
                                tx.delete(operation.resource_type, &partial).await?;
                            }
                        }

                        operation.fail(
                            "Timeout",
                            "operation exceeded the configured action timeout",
                        );
                        tx.update(Object::Operation(operation.clone()), &[]).await?;
                        swept_in_tx.lock().expect("sweep collector").push(operation);
                    }
                    Ok(None)
                })
            }))
            .await?;

        let swept = std::mem::take(&mut *swept.lock().expect("sweep collector"));
        let count = swept.len();
        for operation in &swept {
            self.release_if_owned(operation).await;
        }
        Ok(count)
    }

    /// Deletes operations older than the lifespan, regardless of state.
    async fn sweep_aged_operations(&self) -> Result<usize> {
        let cutoff = (Utc::now()
            - chrono::Duration::from_std(self.settings.lifespan).unwrap_or_default())
        .to_rfc3339();
        let criteria = vec![Criterion::by_field(Operator::LessThan, "created_at", cutoff)];

        let aged: Arc<Mutex<Vec<Operation>>> = Arc::new(Mutex::new(Vec::new()));
        let aged_in_tx = Arc::clone(&aged);
        self.repository
            .in_transaction(Box::new(move |tx| {
                Box::pin(async move {
                    let expired = tx
                        .list_exclusively(ObjectType::Operation, &criteria)
                        .await?;
                    if expired.is_empty() {
                        return Ok(None);
                    }
                    let ids: Vec<String> =
                        expired.iter().map(|o| o.id().to_string()).collect();
                    tx.delete(
                        ObjectType::Operation,
                        &[Criterion::by_field_in("id", ids)],
                    )
                    .await?;
                    for object in expired {
                        aged_in_tx
                            .lock()
                            .expect("sweep collector")
                            .push(Operation::try_from(object)?);
                    }
                    Ok(None)
                })
            }))
            .await?;

        let aged = std::mem::take(&mut *aged.lock().expect("sweep collector"));
        let count = aged.len();
        for operation in &aged {
            self.release_if_owned(operation).await;
        }
        Ok(count)
    }

    /// Re-enqueues rescheduled operations whose timestamp has passed,
    /// bounded per run so a large backlog cannot starve the sweep loop.
    async fn requeue_orphans(&self) -> Result<usize> {
        let criteria = [
            Criterion::by_field(Operator::Equals, "state", OperationState::InProgress.as_str()),
            Criterion::by_field(Operator::Equals, "reschedule", "true"),
            Criterion::by_field(
                Operator::LessThanOrEqual,
                "reschedule_timestamp",
                Utc::now().to_rfc3339(),
            ),
            Criterion::limit(100),
        ];
        let orphans = self.repository.list(ObjectType::Operation, &criteria).await?;

        let mut requeued = 0;
        for object in orphans {
            let operation = Operation::try_from(object)?;
            let handler = match self.reschedule_handlers.get(&operation.resource_type) {
                Some(handler) => handler,
                None => continue,
            };
            let action = handler(&operation);
            match self.scheduler.requeue(operation.clone(), action, None) {
                Ok(()) => requeued += 1,
                Err(e) => warn!(
                    operation_id = %operation.base.id,
                    "could not requeue orphaned operation: {}", e
                ),
            }
        }
        Ok(requeued)
    }

    // The lock row may meanwhile belong to a newer operation for the same
    // resource; only the owner releases it.
    async fn release_if_owned(&self, operation: &Operation) {
        match self
            .locker
            .lock_owner(operation.resource_type, &operation.resource_id)
            .await
        {
            Ok(Some(owner)) if owner == operation.base.id => {
                if let Err(e) = self
                    .locker
                    .unlock(operation.resource_type, &operation.resource_id)
                    .await
                {
                    error!(operation_id = %operation.base.id, "could not release lock: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!(operation_id = %operation.base.id, "could not inspect lock: {}", e)
            }
        }
    }
}
