//! Storage interceptors and their registry

pub mod broker_catalog;
pub mod public_plans;
mod registry;

pub use registry::InterceptorRegistry;

use std::sync::Arc;

use sm_domain::errors::Result;
use sm_domain::interceptors::InterceptorPosition;
use sm_domain::osb::OsbClient;
use sm_domain::types::ObjectType;

use broker_catalog::{
    BrokerCatalogInterceptor, CREATE_BROKER_CATALOG_INTERCEPTOR,
    UPDATE_BROKER_CATALOG_INTERCEPTOR,
};
use public_plans::{
    PublicPlansInterceptor, CREATE_BROKER_PUBLIC_PLANS_INTERCEPTOR,
    UPDATE_BROKER_PUBLIC_PLANS_INTERCEPTOR,
};

/// The standard boot-time registry: broker catalog reconciliation first,
/// public plan visibility resync after it, on both broker create and update.
pub fn default_registry(osb_client: Arc<dyn OsbClient>) -> Result<InterceptorRegistry> {
    let mut registry = InterceptorRegistry::new();

    let catalog = Arc::new(BrokerCatalogInterceptor::new(osb_client));
    registry.register_create(
        ObjectType::ServiceBroker,
        CREATE_BROKER_CATALOG_INTERCEPTOR,
        InterceptorPosition::None,
        catalog.clone(),
    )?;
    registry.register_update(
        ObjectType::ServiceBroker,
        UPDATE_BROKER_CATALOG_INTERCEPTOR,
        InterceptorPosition::None,
        catalog,
    )?;

    let public_plans = Arc::new(PublicPlansInterceptor::with_default_publicness());
    registry.register_create(
        ObjectType::ServiceBroker,
        CREATE_BROKER_PUBLIC_PLANS_INTERCEPTOR,
        InterceptorPosition::After(CREATE_BROKER_CATALOG_INTERCEPTOR.to_string()),
        public_plans.clone(),
    )?;
    registry.register_update(
        ObjectType::ServiceBroker,
        UPDATE_BROKER_PUBLIC_PLANS_INTERCEPTOR,
        InterceptorPosition::After(UPDATE_BROKER_CATALOG_INTERCEPTOR.to_string()),
        public_plans,
    )?;

    Ok(registry)
}
