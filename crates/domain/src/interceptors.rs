//! Storage interceptor contracts
//!
//! For each `(object type, operation)` an ordered list of named providers is
//! registered at boot. A provider contributes two optional hooks: `AroundTx`
//! wraps the whole request path including the transaction open and may
//! short-circuit; `OnTx` wraps the write inside the already-open transaction
//! and receives the transactional repository. Hooks compose as middleware;
//! when an OnTx hook errors, the hooks after it never run and the
//! transaction is rolled back.

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::errors::Result;
use crate::labels::LabelChange;
use crate::query::Criterion;
use crate::repository::Repository;
use crate::types::{Object, ObjectType};

/// Continuation of an AroundTx chain.
pub type AroundTxNext<'a> = Box<dyn FnOnce(Object) -> BoxFuture<'a, Result<Object>> + Send + 'a>;

/// Continuation of an OnTx chain. The repository reference is the
/// transactional one the chain was opened with.
pub type OnTxNext<'a> =
    Box<dyn FnOnce(&'a dyn Repository, Object) -> BoxFuture<'a, Result<Object>> + Send + 'a>;

/// Continuation of a delete OnTx chain.
pub type OnTxDeleteNext<'a> =
    Box<dyn FnOnce(&'a dyn Repository) -> BoxFuture<'a, Result<()>> + Send + 'a>;

#[async_trait]
pub trait CreateInterceptor: Send + Sync {
    async fn around_tx_create<'a>(
        &'a self,
        object: Object,
        next: AroundTxNext<'a>,
    ) -> Result<Object> {
        next(object).await
    }

    async fn on_tx_create<'a>(
        &'a self,
        repository: &'a dyn Repository,
        object: Object,
        next: OnTxNext<'a>,
    ) -> Result<Object> {
        next(repository, object).await
    }
}

#[async_trait]
pub trait UpdateInterceptor: Send + Sync {
    async fn around_tx_update<'a>(
        &'a self,
        object: Object,
        next: AroundTxNext<'a>,
    ) -> Result<Object> {
        next(object).await
    }

    async fn on_tx_update<'a>(
        &'a self,
        repository: &'a dyn Repository,
        object: Object,
        label_changes: &'a [LabelChange],
        next: OnTxNext<'a>,
    ) -> Result<Object> {
        let _ = label_changes;
        next(repository, object).await
    }
}

#[async_trait]
pub trait DeleteInterceptor: Send + Sync {
    async fn on_tx_delete<'a>(
        &'a self,
        repository: &'a dyn Repository,
        object_type: ObjectType,
        criteria: &'a [Criterion],
        next: OnTxDeleteNext<'a>,
    ) -> Result<()> {
        let _ = (object_type, criteria);
        next(repository).await
    }
}

/// Position of a provider relative to already registered ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptorPosition {
    /// Appended after everything registered so far.
    None,
    Before(String),
    After(String),
}
