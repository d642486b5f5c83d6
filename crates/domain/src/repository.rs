//! Repository ports
//!
//! The storage contract every component programs against. Adapters provide
//! the Postgres implementation for production and an in-memory one for
//! tests; both honor the same transactional semantics: inside
//! [`TransactionalRepository::in_transaction`] all reads see a consistent
//! snapshot and an error return rolls the transaction back.

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::errors::Result;
use crate::labels::LabelChange;
use crate::query::Criterion;
use crate::types::{Object, ObjectType};

#[async_trait]
pub trait Repository: Send + Sync {
    /// Fetches exactly one object; `NotFound` when none matches.
    async fn get(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<Object>;

    async fn list(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<Vec<Object>>;

    async fn count(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<usize>;

    /// Inserts the object. Unique violations surface as `Conflict`.
    async fn create(&self, object: Object) -> Result<Object>;

    /// Writes the object back and applies label changes. `NotFound` when the
    /// row disappeared.
    async fn update(&self, object: Object, label_changes: &[LabelChange]) -> Result<Object>;

    /// Deletes everything matching the criteria. Foreign-key refusal
    /// surfaces as `ExistingReferenceEntity`.
    async fn delete(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<()>;

    /// Like [`Repository::list`] but rows locked by a concurrent peer are
    /// skipped (`FOR UPDATE SKIP LOCKED`). Only meaningful inside a
    /// transaction; plain implementations fall back to a regular list.
    async fn list_exclusively(
        &self,
        object_type: ObjectType,
        criteria: &[Criterion],
    ) -> Result<Vec<Object>> {
        self.list(object_type, criteria).await
    }
}

/// A unit of work executed against a transactional repository. The argument
/// is the repository view of the open transaction; returning an error rolls
/// the transaction back.
pub type StorageAction = Box<
    dyn FnOnce(std::sync::Arc<dyn Repository>) -> BoxFuture<'static, Result<Option<Object>>>
        + Send,
>;

/// An action the operation scheduler runs, possibly more than once when the
/// operation is rescheduled. The action owns its transactional envelope:
/// it either performs a single repository call (whose interceptor chains
/// open the transaction) or groups writes with
/// [`TransactionalRepository::in_transaction`], so an error return always
/// rolls the touched state back.
pub type SchedulableAction = std::sync::Arc<
    dyn Fn(std::sync::Arc<dyn TransactionalRepository>) -> BoxFuture<'static, Result<Option<Object>>>
        + Send
        + Sync,
>;

#[async_trait]
pub trait TransactionalRepository: Repository {
    async fn in_transaction(&self, work: StorageAction) -> Result<Option<Object>>;
}

/// Storage-backed exclusion per resource. The lock is a row with
/// insert-if-absent semantics, which is what lets multiple service manager
/// replicas coordinate without shared process state.
#[async_trait]
pub trait ResourceLocker: Send + Sync {
    /// Returns false when the lock is already held.
    async fn try_lock(
        &self,
        resource_type: ObjectType,
        resource_id: &str,
        owner: &str,
    ) -> Result<bool>;

    async fn unlock(&self, resource_type: ObjectType, resource_id: &str) -> Result<()>;

    /// The operation id currently holding the lock, if any.
    async fn lock_owner(
        &self,
        resource_type: ObjectType,
        resource_id: &str,
    ) -> Result<Option<String>>;
}
