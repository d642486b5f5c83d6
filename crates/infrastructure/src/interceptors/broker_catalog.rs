//! Broker catalog interceptors
//!
//! The catalog of a broker is reconciled by [`BrokerCatalogInterceptor`],
//! registered for ServiceBroker create and update:
//!
//! * AroundTx fetches `/v2/catalog`, validates the envelope and attaches the
//!   raw blob to the broker object before any transaction opens. A broken or
//!   unreachable broker therefore fails the request without touching
//!   storage. Updates always refetch, even for an empty PATCH body, since
//!   the upstream catalog may have drifted on its own.
//! * OnTx runs after the broker row was written: it diffs the fetched
//!   catalog against the stored offerings and plans and applies the delta
//!   inserts-first so renames and replacements trip the uniqueness checks
//!   intentionally. Instance references surface as
//!   `ExistingReferenceEntity` through the plan foreign key and roll the
//!   whole transaction back, catalog blob included.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use sm_domain::catalog::parse_catalog;
use sm_domain::catalog_diff::{diff_catalog, CatalogDiff};
use sm_domain::errors::{DomainError, Result};
use sm_domain::interceptors::{AroundTxNext, CreateInterceptor, OnTxNext, UpdateInterceptor};
use sm_domain::labels::LabelChange;
use sm_domain::osb::OsbClient;
use sm_domain::query::{Criterion, Operator};
use sm_domain::repository::Repository;
use sm_domain::types::{Object, ObjectType, ServiceBroker, ServiceOffering, ServicePlan};

pub const CREATE_BROKER_CATALOG_INTERCEPTOR: &str = "CreateBrokerCatalogInterceptor";
pub const UPDATE_BROKER_CATALOG_INTERCEPTOR: &str = "UpdateBrokerCatalogInterceptor";

pub struct BrokerCatalogInterceptor {
    client: Arc<dyn OsbClient>,
}

impl BrokerCatalogInterceptor {
    pub fn new(client: Arc<dyn OsbClient>) -> Self {
        BrokerCatalogInterceptor { client }
    }

    async fn fetch_into(&self, object: Object) -> Result<Object> {
        let mut broker = ServiceBroker::try_from(object)?;
        let raw = self.client.fetch_catalog(&broker).await?;
        parse_catalog(&raw)?;
        broker.catalog = Some(raw);
        Ok(Object::ServiceBroker(broker))
    }
}

async fn stored_offerings_and_plans(
    repository: &dyn Repository,
    broker_id: &str,
) -> Result<(Vec<ServiceOffering>, Vec<ServicePlan>)> {
    let by_broker = [Criterion::by_field(Operator::Equals, "broker_id", broker_id)];
    let offerings: Vec<ServiceOffering> = repository
        .list(ObjectType::ServiceOffering, &by_broker)
        .await?
        .into_iter()
        .map(ServiceOffering::try_from)
        .collect::<Result<_>>()?;

    let mut plans = Vec::new();
    for offering in &offerings {
        let by_offering = [Criterion::by_field(
            Operator::Equals,
            "service_offering_id",
            offering.base.id.clone(),
        )];
        let offering_plans = repository
            .list(ObjectType::ServicePlan, &by_offering)
            .await?;
        for plan in offering_plans {
            plans.push(ServicePlan::try_from(plan)?);
        }
    }
    Ok((offerings, plans))
}

async fn apply_diff(repository: &dyn Repository, diff: CatalogDiff) -> Result<()> {
    for offering in diff.offerings.to_create {
        repository.create(Object::ServiceOffering(offering)).await?;
    }
    for plan in diff.plans.to_create {
        repository.create(Object::ServicePlan(plan)).await?;
    }
    for offering in diff.offerings.to_update {
        repository
            .update(Object::ServiceOffering(offering), &[])
            .await?;
    }
    for plan in diff.plans.to_update {
        repository.update(Object::ServicePlan(plan), &[]).await?;
    }
    for plan in diff.plans.to_delete {
        let by_id = [Criterion::by_field(Operator::Equals, "id", plan.base.id)];
        repository.delete(ObjectType::ServicePlan, &by_id).await?;
    }
    for offering in diff.offerings.to_delete {
        let by_id = [Criterion::by_field(Operator::Equals, "id", offering.base.id)];
        repository.delete(ObjectType::ServiceOffering, &by_id).await?;
    }
    Ok(())
}

async fn reconcile_catalog(repository: &dyn Repository, object: &Object) -> Result<()> {
    let broker = match object {
        Object::ServiceBroker(broker) => broker,
        other => {
            return Err(DomainError::internal(format!(
                "catalog interceptor invoked for {}",
                other.object_type()
            )))
        }
    };
    let raw = broker.catalog.as_ref().ok_or_else(|| {
        DomainError::internal("broker reached catalog reconciliation without a fetched catalog")
    })?;
    let catalog = parse_catalog(raw)?;

    let (offerings, plans) = stored_offerings_and_plans(repository, &broker.base.id).await?;
    let diff = diff_catalog(&broker.base.id, &catalog, &offerings, &plans)?;
    debug!(
        broker_id = %broker.base.id,
        offerings_created = diff.offerings.to_create.len(),
        offerings_deleted = diff.offerings.to_delete.len(),
        plans_created = diff.plans.to_create.len(),
        plans_deleted = diff.plans.to_delete.len(),
        "applying catalog delta"
    );
    apply_diff(repository, diff).await
}

#[async_trait]
impl CreateInterceptor for BrokerCatalogInterceptor {
    async fn around_tx_create<'a>(
        &'a self,
        object: Object,
        next: AroundTxNext<'a>,
    ) -> Result<Object> {
        let object = self.fetch_into(object).await?;
        next(object).await
    }

    async fn on_tx_create<'a>(
        &'a self,
        repository: &'a dyn Repository,
        object: Object,
        next: OnTxNext<'a>,
    ) -> Result<Object> {
        let object = next(repository, object).await?;
        reconcile_catalog(repository, &object).await?;
        Ok(object)
    }
}

#[async_trait]
impl UpdateInterceptor for BrokerCatalogInterceptor {
    async fn around_tx_update<'a>(
        &'a self,
        object: Object,
        next: AroundTxNext<'a>,
    ) -> Result<Object> {
        let object = self.fetch_into(object).await?;
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
        let object = next(repository, object).await?;
        reconcile_catalog(repository, &object).await?;
        Ok(object)
    }
}
