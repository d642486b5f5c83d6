//! In-memory repository
//!
//! A [`TransactionalRepository`] backed by process memory for tests.
//! Transactions run against a snapshot under an exclusive transaction lock
//! and are written back on success, so rolled-back work leaves no trace and
//! concurrent writers observe each other's committed rows. Unique and
//! referential constraints mirror the Postgres schema closely enough for the
//! scenarios the test suites exercise.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use sm_domain::errors::{DomainError, Result};
use sm_domain::labels::{apply_label_changes, LabelChange};
use sm_domain::query::{matches_field, Criterion, CriterionType, OrderType};
use sm_domain::repository::{Repository, ResourceLocker, StorageAction, TransactionalRepository};
use sm_domain::types::{Object, ObjectType};

#[derive(Debug, Default, Clone)]
struct Store {
    objects: HashMap<ObjectType, Vec<Object>>,
    paging_counter: i64,
}

#[derive(Clone)]
pub struct InMemoryRepository {
    store: Arc<Mutex<Store>>,
    locks: Arc<Mutex<HashMap<(ObjectType, String), String>>>,
    // Serializes transactions and standalone writes.
    tx_lock: Arc<Mutex<()>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        InMemoryRepository {
            store: Arc::new(Mutex::new(Store::default())),
            locks: Arc::new(Mutex::new(HashMap::new())),
            tx_lock: Arc::new(Mutex::new(())),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        InMemoryRepository::new()
    }
}

/// Repository view of a transaction snapshot.
struct TxRepository {
    snapshot: Arc<Mutex<Store>>,
}

fn filter_objects(store: &Store, object_type: ObjectType, criteria: &[Criterion]) -> Vec<Object> {
    let mut result: Vec<Object> = store
        .objects
        .get(&object_type)
        .map(|objects| {
            objects
                .iter()
                .filter(|o| matches_criteria(o, criteria))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    let mut order: Option<(&Criterion, OrderType)> = None;
    let mut limit: Option<usize> = None;
    for criterion in criteria {
        match criterion.criterion_type {
            CriterionType::ResultOrder => {
                order = criterion.order_type.map(|ot| (criterion, ot));
            }
            CriterionType::ResultLimit => {
                limit = criterion.right_op.first().and_then(|l| l.parse().ok());
            }
            _ => {}
        }
    }

    match order {
        Some((criterion, order_type)) => {
            result.sort_by(|a, b| {
                let left = format!("{:?}", a.field(&criterion.left_op));
                let right = format!("{:?}", b.field(&criterion.left_op));
                match order_type {
                    OrderType::Ascending => left.cmp(&right),
                    OrderType::Descending => right.cmp(&left),
                }
            });
        }
        None => result.sort_by_key(|o| o.base().paging_sequence),
    }

    if let Some(limit) = limit {
        result.truncate(limit);
    }
    result
}

fn matches_criteria(object: &Object, criteria: &[Criterion]) -> bool {
    criteria.iter().all(|criterion| match criterion.criterion_type {
        CriterionType::Field => matches_field(&object.field(&criterion.left_op), criterion),
        CriterionType::Label => {
            let labels = &object.base().labels;
            match labels.get(&criterion.left_op) {
                Some(values) => values
                    .iter()
                    .any(|v| matches_field(&sm_domain::query::FieldValue::Str(v.clone()), criterion)),
                None => false,
            }
        }
        _ => true,
    })
}

// The unique constraints of the Postgres schema, expressed as field tuples.
fn unique_keys(object_type: ObjectType) -> &'static [&'static [&'static str]] {
    match object_type {
        ObjectType::ServiceBroker => &[&["name"]],
        ObjectType::Platform => &[&["name"]],
        ObjectType::ServiceOffering => {
            &[&["broker_id", "catalog_id"], &["broker_id", "catalog_name"]]
        }
        ObjectType::ServicePlan => &[
            &["service_offering_id", "catalog_id"],
            &["service_offering_id", "catalog_name"],
        ],
        ObjectType::Visibility => &[&["platform_id", "service_plan_id"]],
        _ => &[],
    }
}

fn check_unique(store: &Store, candidate: &Object) -> Result<()> {
    let object_type = candidate.object_type();
    if let Some(existing) = store.objects.get(&object_type) {
        for other in existing {
            if other.id() == candidate.id() {
                return Err(DomainError::conflict(format!(
                    "{} with id {} already exists",
                    object_type,
                    candidate.id()
                )));
            }
            for key in unique_keys(object_type) {
                let clash = key
                    .iter()
                    .all(|field| other.field(field) == candidate.field(field));
                if clash {
                    return Err(DomainError::conflict(format!(
                        "{} violates unique constraint on ({})",
                        object_type,
                        key.join(", ")
                    )));
                }
            }
        }
    }
    Ok(())
}

fn referencing(store: &Store, object_type: ObjectType, field: &str, id: &str) -> bool {
    store
        .objects
        .get(&object_type)
        .map(|objects| {
            objects.iter().any(|o| {
                o.field(field) == sm_domain::query::FieldValue::Str(id.to_string())
            })
        })
        .unwrap_or(false)
}

fn do_create(store: &mut Store, mut object: Object) -> Result<Object> {
    check_unique(store, &object)?;
    store.paging_counter += 1;
    object.base_mut().paging_sequence = store.paging_counter;
    store
        .objects
        .entry(object.object_type())
        .or_default()
        .push(object.clone());
    Ok(object)
}

fn do_update(store: &mut Store, mut object: Object, label_changes: &[LabelChange]) -> Result<Object> {
    let object_type = object.object_type();
    let rows = store.objects.entry(object_type).or_default();
    let position = rows
        .iter()
        .position(|o| o.id() == object.id())
        .ok_or_else(|| DomainError::not_found(object_type.api_name()))?;

    apply_label_changes(&mut object.base_mut().labels, label_changes)?;
    object.base_mut().updated_at = Utc::now();
    object.base_mut().paging_sequence = rows[position].base().paging_sequence;

    // Uniqueness still holds against every other row.
    let others: Vec<Object> = rows
        .iter()
        .filter(|o| o.id() != object.id())
        .cloned()
        .collect();
    let shadow = Store {
        objects: HashMap::from([(object_type, others)]),
        paging_counter: store.paging_counter,
    };
    check_unique(&shadow, &object)?;

    store.objects.get_mut(&object_type).unwrap()[position] = object.clone();
    Ok(object)
}

fn do_delete(store: &mut Store, object_type: ObjectType, criteria: &[Criterion]) -> Result<()> {
    let doomed = filter_objects(store, object_type, criteria);
    if doomed.is_empty() && !criteria.is_empty() {
        return Err(DomainError::not_found(object_type.api_name()));
    }
    for object in &doomed {
        cascade_delete(store, object)?;
    }
    Ok(())
}

// Mirrors the FK graph: instances restrict plan/broker pruning, visibilities
// and the catalog hierarchy cascade.
fn cascade_delete(store: &mut Store, object: &Object) -> Result<()> {
    let id = object.id().to_string();
    match object.object_type() {
        ObjectType::ServiceBroker => {
            let offerings = filter_objects(
                store,
                ObjectType::ServiceOffering,
                &[Criterion::by_field(
                    sm_domain::query::Operator::Equals,
                    "broker_id",
                    id.clone(),
                )],
            );
            for offering in &offerings {
                cascade_delete(store, offering)?;
            }
        }
        ObjectType::ServiceOffering => {
            let plans = filter_objects(
                store,
                ObjectType::ServicePlan,
                &[Criterion::by_field(
                    sm_domain::query::Operator::Equals,
                    "service_offering_id",
                    id.clone(),
                )],
            );
            for plan in &plans {
                cascade_delete(store, plan)?;
            }
        }
        ObjectType::ServicePlan => {
            if referencing(store, ObjectType::ServiceInstance, "service_plan_id", &id) {
                return Err(DomainError::ExistingReferenceEntity {
                    entity: "service_plan".to_string(),
                });
            }
            remove_where(store, ObjectType::Visibility, "service_plan_id", &id);
        }
        ObjectType::ServiceInstance => {
            if referencing(store, ObjectType::ServiceBinding, "service_instance_id", &id) {
                return Err(DomainError::ExistingReferenceEntity {
                    entity: "service_instance".to_string(),
                });
            }
        }
        ObjectType::Platform => {
            remove_where(store, ObjectType::Visibility, "platform_id", &id);
        }
        _ => {}
    }
    if let Some(rows) = store.objects.get_mut(&object.object_type()) {
        rows.retain(|o| o.id() != id);
    }
    Ok(())
}

fn remove_where(store: &mut Store, object_type: ObjectType, field: &str, id: &str) {
    if let Some(rows) = store.objects.get_mut(&object_type) {
        rows.retain(|o| o.field(field) != sm_domain::query::FieldValue::Str(id.to_string()));
    }
}

fn get_one(store: &Store, object_type: ObjectType, criteria: &[Criterion]) -> Result<Object> {
    filter_objects(store, object_type, criteria)
        .into_iter()
        .next()
        .ok_or_else(|| DomainError::not_found(object_type.api_name()))
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<Object> {
        let store = self.store.lock().await;
        get_one(&store, object_type, criteria)
    }

    async fn list(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<Vec<Object>> {
        let store = self.store.lock().await;
        Ok(filter_objects(&store, object_type, criteria))
    }

    async fn count(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<usize> {
        let store = self.store.lock().await;
        Ok(filter_objects(&store, object_type, criteria).len())
    }

    async fn create(&self, object: Object) -> Result<Object> {
        let _tx = self.tx_lock.lock().await;
        let mut store = self.store.lock().await;
        do_create(&mut store, object)
    }

    async fn update(&self, object: Object, label_changes: &[LabelChange]) -> Result<Object> {
        let _tx = self.tx_lock.lock().await;
        let mut store = self.store.lock().await;
        do_update(&mut store, object, label_changes)
    }

    async fn delete(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<()> {
        let _tx = self.tx_lock.lock().await;
        let mut store = self.store.lock().await;
        do_delete(&mut store, object_type, criteria)
    }
}

#[async_trait]
impl Repository for TxRepository {
    async fn get(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<Object> {
        let snapshot = self.snapshot.lock().await;
        get_one(&snapshot, object_type, criteria)
    }

    async fn list(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<Vec<Object>> {
        let snapshot = self.snapshot.lock().await;
        Ok(filter_objects(&snapshot, object_type, criteria))
    }

    async fn count(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<usize> {
        let snapshot = self.snapshot.lock().await;
        Ok(filter_objects(&snapshot, object_type, criteria).len())
    }

    async fn create(&self, object: Object) -> Result<Object> {
        let mut snapshot = self.snapshot.lock().await;
        do_create(&mut snapshot, object)
    }

    async fn update(&self, object: Object, label_changes: &[LabelChange]) -> Result<Object> {
        let mut snapshot = self.snapshot.lock().await;
        do_update(&mut snapshot, object, label_changes)
    }

    async fn delete(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<()> {
        let mut snapshot = self.snapshot.lock().await;
        do_delete(&mut snapshot, object_type, criteria)
    }
}

#[async_trait]
impl TransactionalRepository for InMemoryRepository {
    async fn in_transaction(&self, work: StorageAction) -> Result<Option<Object>> {
        let _tx = self.tx_lock.lock().await;
        let snapshot = {
            let store = self.store.lock().await;
            store.clone()
        };
        let cell = Arc::new(Mutex::new(snapshot));
        let tx_repository: Arc<dyn Repository> = Arc::new(TxRepository {
            snapshot: Arc::clone(&cell),
        });
        let result = work(tx_repository).await?;
        let committed = cell.lock().await.clone();
        *self.store.lock().await = committed;
        Ok(result)
    }
}

#[async_trait]
impl ResourceLocker for InMemoryRepository {
    async fn try_lock(
        &self,
        resource_type: ObjectType,
        resource_id: &str,
        owner: &str,
    ) -> Result<bool> {
        let mut locks = self.locks.lock().await;
        let key = (resource_type, resource_id.to_string());
        if locks.contains_key(&key) {
            return Ok(false);
        }
        locks.insert(key, owner.to_string());
        Ok(true)
    }

    async fn unlock(&self, resource_type: ObjectType, resource_id: &str) -> Result<()> {
        let mut locks = self.locks.lock().await;
        locks.remove(&(resource_type, resource_id.to_string()));
        Ok(())
    }

    async fn lock_owner(
        &self,
        resource_type: ObjectType,
        resource_id: &str,
    ) -> Result<Option<String>> {
        let locks = self.locks.lock().await;
        Ok(locks.get(&(resource_type, resource_id.to_string())).cloned())
    }
}
