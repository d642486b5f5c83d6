//! Public plans visibility interceptor
//!
//! After a broker's catalog has been reconciled, every plan's persisted
//! visibilities are brought in line with the plan's publicness and its
//! supported platform types. Runs as an OnTx hook on broker create and
//! update, after the catalog interceptor, inside the same transaction.
//!
//! The resync is idempotent. When a plan is restricted to specific platform
//! types, labeled visibilities on matching platforms survive only while the
//! plan is not public; they scope paid plans to tenants. A public plan gets
//! exactly one plain grant per target: the wildcard when every platform is
//! allowed, otherwise one unlabeled visibility per supported platform.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use sm_domain::catalog::{parse_catalog, CatalogPlan, CatalogService, IsCatalogPlanPublicFn};
use sm_domain::errors::{DomainError, Result};
use sm_domain::interceptors::{CreateInterceptor, OnTxNext, UpdateInterceptor};
use sm_domain::labels::LabelChange;
use sm_domain::query::{Criterion, Operator};
use sm_domain::repository::Repository;
use sm_domain::types::{
    Base, Object, ObjectType, Platform, ServiceBroker, ServiceOffering, ServicePlan, Visibility,
};

pub const CREATE_BROKER_PUBLIC_PLANS_INTERCEPTOR: &str = "CreateBrokerPublicPlansInterceptor";
pub const UPDATE_BROKER_PUBLIC_PLANS_INTERCEPTOR: &str = "UpdateBrokerPublicPlansInterceptor";

pub struct PublicPlansInterceptor {
    is_catalog_plan_public: IsCatalogPlanPublicFn,
}

impl PublicPlansInterceptor {
    pub fn new(is_catalog_plan_public: IsCatalogPlanPublicFn) -> Self {
        PublicPlansInterceptor {
            is_catalog_plan_public,
        }
    }

    pub fn with_default_publicness() -> Self {
        Self::new(Arc::new(sm_domain::catalog::default_is_catalog_plan_public))
    }
}

#[async_trait]
impl CreateInterceptor for PublicPlansInterceptor {
    async fn on_tx_create<'a>(
        &'a self,
        repository: &'a dyn Repository,
        object: Object,
        next: OnTxNext<'a>,
    ) -> Result<Object> {
        let object = next(repository, object).await?;
        resync(repository, &object, &self.is_catalog_plan_public).await?;
        Ok(object)
    }
}

#[async_trait]
impl UpdateInterceptor for PublicPlansInterceptor {
    async fn on_tx_update<'a>(
        &'a self,
        repository: &'a dyn Repository,
        object: Object,
        label_changes: &'a [LabelChange],
        next: OnTxNext<'a>,
    ) -> Result<Object> {
        let _ = label_changes;
        let object = next(repository, object).await?;
        resync(repository, &object, &self.is_catalog_plan_public).await?;
        Ok(object)
    }
}

async fn resync(
    repository: &dyn Repository,
    object: &Object,
    is_catalog_plan_public: &IsCatalogPlanPublicFn,
) -> Result<()> {
    let broker = match object {
        Object::ServiceBroker(broker) => broker,
        other => {
            return Err(DomainError::internal(format!(
                "public plans interceptor invoked for {}",
                other.object_type()
            )))
        }
    };
    let raw = match &broker.catalog {
        Some(raw) => raw,
        None => return Ok(()),
    };
    let catalog = parse_catalog(raw)?;

    let by_broker = [Criterion::by_field(
        Operator::Equals,
        "broker_id",
        broker.base.id.clone(),
    )];
    let offerings = repository.list(ObjectType::ServiceOffering, &by_broker).await?;
    for offering in offerings {
        let offering = ServiceOffering::try_from(offering)?;
        let catalog_service = match catalog
            .services
            .iter()
            .find(|s| s.catalog_id == offering.catalog_id)
        {
            Some(service) => service,
            None => continue,
        };

        let by_offering = [Criterion::by_field(
            Operator::Equals,
            "service_offering_id",
            offering.base.id.clone(),
        )];
        let plans = repository.list(ObjectType::ServicePlan, &by_offering).await?;
        for plan in plans {
            let plan = ServicePlan::try_from(plan)?;
            let catalog_plan = match catalog_service
                .plans
                .iter()
                .find(|p| p.catalog_id == plan.catalog_id)
            {
                Some(catalog_plan) => catalog_plan,
                None => continue,
            };

            resync_plan(
                repository,
                broker,
                catalog_service,
                catalog_plan,
                &plan,
                is_catalog_plan_public,
            )
            .await?;
        }
    }
    Ok(())
}

async fn resync_plan(
    repository: &dyn Repository,
    broker: &ServiceBroker,
    catalog_service: &CatalogService,
    catalog_plan: &CatalogPlan,
    plan: &ServicePlan,
    is_catalog_plan_public: &IsCatalogPlanPublicFn,
) -> Result<()> {
    let is_public = is_catalog_plan_public(broker, catalog_service, catalog_plan)?;

    let by_plan = [Criterion::by_field(
        Operator::Equals,
        "service_plan_id",
        plan.base.id.clone(),
    )];
    let visibilities: Vec<Visibility> = repository
        .list(ObjectType::Visibility, &by_plan)
        .await?
        .into_iter()
        .map(Visibility::try_from)
        .collect::<Result<_>>()?;

    if plan.supported_platforms.is_empty() {
        resync_wildcard_visibilities(repository, broker, plan, is_public, visibilities).await
    } else {
        resync_supported_platform_visibilities(repository, broker, plan, is_public, visibilities)
            .await
    }
}

// All platforms are allowed: a public plan is represented by a single
// wildcard visibility with an empty platform id.
async fn resync_wildcard_visibilities(
    repository: &dyn Repository,
    broker: &ServiceBroker,
    plan: &ServicePlan,
    is_public: bool,
    visibilities: Vec<Visibility>,
) -> Result<()> {
    let mut wildcard_exists = false;

    for visibility in visibilities {
        let wildcard = visibility.platform_id.is_empty();

        let should_delete = if is_public {
            if wildcard {
                wildcard_exists = true;
            }
            // everything but the wildcard grant contradicts a public plan
            !wildcard
        } else {
            wildcard
        };

        if should_delete {
            delete_visibility(repository, &visibility).await?;
        }
    }

    if is_public && !wildcard_exists {
        persist_visibility(repository, "", &plan.base.id, &broker.base.id).await?;
    }
    Ok(())
}

// Only some platform types are allowed: a public plan gets one visibility
// per matching platform.
async fn resync_supported_platform_visibilities(
    repository: &dyn Repository,
    broker: &ServiceBroker,
    plan: &ServicePlan,
    is_public: bool,
    visibilities: Vec<Visibility>,
) -> Result<()> {
    let by_type = [Criterion::by_field_in(
        "type",
        plan.supported_platforms.iter().cloned(),
    )];
    let mut supported_platforms: Vec<Platform> = repository
        .list(ObjectType::Platform, &by_type)
        .await?
        .into_iter()
        .map(Platform::try_from)
        .collect::<Result<_>>()?;

    for visibility in visibilities {
        let labeled = !visibility.base.labels.is_empty();
        let matched = supported_platforms
            .iter()
            .position(|p| p.base.id == visibility.platform_id);

        let should_delete = match matched {
            // The plain grant a public plan needs is already there; the
            // platform is covered and needs no new visibility.
            Some(index) if is_public && !labeled => {
                supported_platforms.remove(index);
                false
            }
            // A labeled grant scopes a paid plan to tenants and stays.
            Some(_) if !is_public && labeled => false,
            // Everything else contradicts the target state: labeled rows on
            // a public plan are replaced by plain ones, unlabeled rows on a
            // paid plan are revoked grants, and unmatched platforms are no
            // longer supported.
            _ => true,
        };

        if should_delete {
            delete_visibility(repository, &visibility).await?;
        }
    }

    if is_public {
        for platform in supported_platforms {
            persist_visibility(repository, &platform.base.id, &plan.base.id, &broker.base.id)
                .await?;
        }
    }
    Ok(())
}

async fn delete_visibility(repository: &dyn Repository, visibility: &Visibility) -> Result<()> {
    let by_id = [Criterion::by_field(
        Operator::Equals,
        "id",
        visibility.base.id.clone(),
    )];
    repository.delete(ObjectType::Visibility, &by_id).await
}

async fn persist_visibility(
    repository: &dyn Repository,
    platform_id: &str,
    plan_id: &str,
    broker_id: &str,
) -> Result<()> {
    let visibility = Visibility {
        base: Base::new(),
        platform_id: platform_id.to_string(),
        service_plan_id: plan_id.to_string(),
    };
    repository.create(Object::Visibility(visibility)).await?;
    debug!(
        broker_id = %broker_id,
        plan_id = %plan_id,
        platform_id = %platform_id,
        "created public visibility"
    );
    Ok(())
}
