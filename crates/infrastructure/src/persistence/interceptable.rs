//! Interceptable repository
//!
//! Decorates a [`TransactionalRepository`] so that create, update and delete
//! calls run through the interceptor chains registered for the object type:
//! AroundTx hooks wrap the whole call including the transaction open, OnTx
//! hooks wrap the row write inside the transaction. An erroring hook aborts
//! the rest of its chain and rolls the transaction back.

use std::sync::Arc;

use async_trait::async_trait;

use sm_domain::errors::{DomainError, Result};
use sm_domain::interceptors::{
    AroundTxNext, CreateInterceptor, DeleteInterceptor, OnTxDeleteNext, OnTxNext,
    UpdateInterceptor,
};
use sm_domain::labels::LabelChange;
use sm_domain::query::Criterion;
use sm_domain::repository::{Repository, StorageAction, TransactionalRepository};
use sm_domain::types::{Object, ObjectType};

use crate::interceptors::InterceptorRegistry;

#[derive(Clone)]
pub struct InterceptableRepository {
    inner: Arc<dyn TransactionalRepository>,
    registry: Arc<InterceptorRegistry>,
}

impl InterceptableRepository {
    pub fn new(
        inner: Arc<dyn TransactionalRepository>,
        registry: Arc<InterceptorRegistry>,
    ) -> Self {
        InterceptableRepository { inner, registry }
    }

    pub fn inner(&self) -> Arc<dyn TransactionalRepository> {
        Arc::clone(&self.inner)
    }
}

fn compose_around_create<'a>(
    chain: &'a [Arc<dyn CreateInterceptor>],
    terminal: AroundTxNext<'a>,
) -> AroundTxNext<'a> {
    match chain.split_first() {
        None => terminal,
        Some((head, rest)) => {
            let next = compose_around_create(rest, terminal);
            Box::new(move |object| {
                Box::pin(async move { head.around_tx_create(object, next).await })
            })
        }
    }
}

fn compose_on_tx_create<'a>(
    chain: &'a [Arc<dyn CreateInterceptor>],
    terminal: OnTxNext<'a>,
) -> OnTxNext<'a> {
    match chain.split_first() {
        None => terminal,
        Some((head, rest)) => {
            let next = compose_on_tx_create(rest, terminal);
            Box::new(move |repository, object| {
                Box::pin(async move { head.on_tx_create(repository, object, next).await })
            })
        }
    }
}

fn compose_around_update<'a>(
    chain: &'a [Arc<dyn UpdateInterceptor>],
    terminal: AroundTxNext<'a>,
) -> AroundTxNext<'a> {
    match chain.split_first() {
        None => terminal,
        Some((head, rest)) => {
            let next = compose_around_update(rest, terminal);
            Box::new(move |object| {
                Box::pin(async move { head.around_tx_update(object, next).await })
            })
        }
    }
}

fn compose_on_tx_update<'a>(
    chain: &'a [Arc<dyn UpdateInterceptor>],
    label_changes: &'a [LabelChange],
    terminal: OnTxNext<'a>,
) -> OnTxNext<'a> {
    match chain.split_first() {
        None => terminal,
        Some((head, rest)) => {
            let next = compose_on_tx_update(rest, label_changes, terminal);
            Box::new(move |repository, object| {
                Box::pin(async move {
                    head.on_tx_update(repository, object, label_changes, next).await
                })
            })
        }
    }
}

fn compose_on_tx_delete<'a>(
    chain: &'a [Arc<dyn DeleteInterceptor>],
    object_type: ObjectType,
    criteria: &'a [Criterion],
    terminal: OnTxDeleteNext<'a>,
) -> OnTxDeleteNext<'a> {
    match chain.split_first() {
        None => terminal,
        Some((head, rest)) => {
            let next = compose_on_tx_delete(rest, object_type, criteria, terminal);
            Box::new(move |repository| {
                Box::pin(async move {
                    head.on_tx_delete(repository, object_type, criteria, next).await
                })
            })
        }
    }
}

#[async_trait]
impl Repository for InterceptableRepository {
    async fn get(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<Object> {
        self.inner.get(object_type, criteria).await
    }

    async fn list(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<Vec<Object>> {
        self.inner.list(object_type, criteria).await
    }

    async fn count(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<usize> {
        self.inner.count(object_type, criteria).await
    }

    async fn create(&self, object: Object) -> Result<Object> {
        let providers = self.registry.create_interceptors(object.object_type());
        let inner = Arc::clone(&self.inner);
        let tx_providers = providers.clone();

        let terminal: AroundTxNext<'_> = Box::new(move |object| {
            Box::pin(async move {
                let committed = inner
                    .in_transaction(Box::new(move |repository: Arc<dyn Repository>| {
                        Box::pin(async move {
                            let write: OnTxNext<'_> = Box::new(|repository, object| {
                                Box::pin(async move { repository.create(object).await })
                            });
                            let chain = compose_on_tx_create(&tx_providers, write);
                            chain(repository.as_ref(), object).await.map(Some)
                        })
                    }))
                    .await?;
                committed.ok_or_else(|| {
                    DomainError::internal("create transaction committed without a result")
                })
            })
        });

        let chain = compose_around_create(&providers, terminal);
        chain(object).await
    }

    async fn update(&self, object: Object, label_changes: &[LabelChange]) -> Result<Object> {
        let providers = self.registry.update_interceptors(object.object_type());
        let inner = Arc::clone(&self.inner);
        let tx_providers = providers.clone();
        let changes: Vec<LabelChange> = label_changes.to_vec();

        let terminal: AroundTxNext<'_> = Box::new(move |object| {
            Box::pin(async move {
                let committed = inner
                    .in_transaction(Box::new(move |repository: Arc<dyn Repository>| {
                        Box::pin(async move {
                            let write: OnTxNext<'_> = {
                                let changes = changes.clone();
                                Box::new(move |repository: &dyn Repository, object| {
                                    Box::pin(async move {
                                        repository.update(object, &changes).await
                                    })
                                })
                            };
                            let chain = compose_on_tx_update(&tx_providers, &changes, write);
                            chain(repository.as_ref(), object).await.map(Some)
                        })
                    }))
                    .await?;
                committed.ok_or_else(|| {
                    DomainError::internal("update transaction committed without a result")
                })
            })
        });

        let chain = compose_around_update(&providers, terminal);
        chain(object).await
    }

    async fn delete(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<()> {
        let providers = self.registry.delete_interceptors(object_type);
        let inner = Arc::clone(&self.inner);
        let owned_criteria: Vec<Criterion> = criteria.to_vec();

        inner
            .in_transaction(Box::new(move |repository: Arc<dyn Repository>| {
                Box::pin(async move {
                    let write: OnTxDeleteNext<'_> = {
                        let criteria = owned_criteria.clone();
                        Box::new(move |repository: &dyn Repository| {
                            Box::pin(async move {
                                repository.delete(object_type, &criteria).await
                            })
                        })
                    };
                    let chain =
                        compose_on_tx_delete(&providers, object_type, &owned_criteria, write);
                    chain(repository.as_ref()).await.map(|_| None)
                })
            }))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TransactionalRepository for InterceptableRepository {
    async fn in_transaction(&self, work: StorageAction) -> Result<Option<Object>> {
        self.inner.in_transaction(work).await
    }
}
