//! Broker catalog model
//!
//! Parses the `/v2/catalog` envelope into typed services and plans while
//! keeping validation strict enough to refuse broken catalogs before any row
//! is written: identifiers must be present and non-empty, structured fields
//! must actually be JSON structures. Missing descriptions are tolerated.

use serde_json::Value;
use std::sync::Arc;

use crate::errors::{DomainError, Result};
use crate::types::{Base, ServiceBroker, ServiceOffering, ServicePlan};

#[derive(Debug, Clone)]
pub struct SbCatalog {
    pub services: Vec<CatalogService>,
}

#[derive(Debug, Clone)]
pub struct CatalogService {
    pub catalog_id: String,
    pub catalog_name: String,
    pub description: String,
    pub bindable: bool,
    pub instances_retrievable: bool,
    pub bindings_retrievable: bool,
    pub plan_updateable: bool,
    pub allow_context_updates: bool,
    pub tags: Option<Value>,
    pub requires: Option<Value>,
    pub metadata: Option<Value>,
    pub plans: Vec<CatalogPlan>,
}

#[derive(Debug, Clone)]
pub struct CatalogPlan {
    pub catalog_id: String,
    pub catalog_name: String,
    pub description: String,
    pub free: bool,
    pub bindable: bool,
    pub plan_updateable: bool,
    pub metadata: Option<Value>,
    pub schemas: Option<Value>,
}

/// Decides whether a catalog plan is public. The default implementation
/// treats free plans as public.
pub type IsCatalogPlanPublicFn =
    Arc<dyn Fn(&ServiceBroker, &CatalogService, &CatalogPlan) -> Result<bool> + Send + Sync>;

pub fn default_is_catalog_plan_public(
    _broker: &ServiceBroker,
    _service: &CatalogService,
    plan: &CatalogPlan,
) -> Result<bool> {
    Ok(plan.free)
}

/// Parses and validates a raw catalog envelope.
pub fn parse_catalog(raw: &Value) -> Result<SbCatalog> {
    let services_value = raw
        .get("services")
        .ok_or_else(|| DomainError::bad_request("catalog is missing the services field"))?;
    let services_array = services_value
        .as_array()
        .ok_or_else(|| DomainError::bad_request("catalog services must be an array"))?;

    let mut services = Vec::with_capacity(services_array.len());
    for service in services_array {
        services.push(parse_service(service)?);
    }
    Ok(SbCatalog { services })
}

fn parse_service(raw: &Value) -> Result<CatalogService> {
    let catalog_id = required_string(raw, "id", "service")?;
    let catalog_name = required_string(raw, "name", "service")?;

    let tags = structured_field(raw, "tags", StructuredKind::Array, "service")?;
    let requires = structured_field(raw, "requires", StructuredKind::Array, "service")?;
    let metadata = structured_field(raw, "metadata", StructuredKind::Object, "service")?;

    let plans_value = raw.get("plans").and_then(Value::as_array);
    let mut plans = Vec::new();
    if let Some(plans_array) = plans_value {
        for plan in plans_array {
            plans.push(parse_plan(plan)?);
        }
    }

    Ok(CatalogService {
        catalog_id,
        catalog_name,
        description: optional_string(raw, "description"),
        bindable: raw.get("bindable").and_then(Value::as_bool).unwrap_or(false),
        instances_retrievable: raw
            .get("instances_retrievable")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        bindings_retrievable: raw
            .get("bindings_retrievable")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        plan_updateable: raw
            .get("plan_updateable")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        allow_context_updates: raw
            .get("allow_context_updates")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        tags,
        requires,
        metadata,
        plans,
    })
}

fn parse_plan(raw: &Value) -> Result<CatalogPlan> {
    let catalog_id = required_string(raw, "id", "plan")?;
    let catalog_name = required_string(raw, "name", "plan")?;

    let metadata = structured_field(raw, "metadata", StructuredKind::Object, "plan")?;
    let schemas = structured_field(raw, "schemas", StructuredKind::Object, "plan")?;

    Ok(CatalogPlan {
        catalog_id,
        catalog_name,
        description: optional_string(raw, "description"),
        free: raw.get("free").and_then(Value::as_bool).unwrap_or(true),
        bindable: raw.get("bindable").and_then(Value::as_bool).unwrap_or(true),
        plan_updateable: raw
            .get("plan_updateable")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        metadata,
        schemas,
    })
}

fn required_string(raw: &Value, field: &str, entity: &str) -> Result<String> {
    match raw.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(DomainError::bad_request(format!(
            "catalog {} {} is missing or empty",
            entity, field
        ))),
    }
}

fn optional_string(raw: &Value, field: &str) -> String {
    raw.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

enum StructuredKind {
    Array,
    Object,
}

// A structured field handed over as a plain string (e.g. "{invalid") means
// the broker serialized garbage; refuse the whole catalog.
fn structured_field(
    raw: &Value,
    field: &str,
    kind: StructuredKind,
    entity: &str,
) -> Result<Option<Value>> {
    match raw.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let valid = match kind {
                StructuredKind::Array => value.is_array(),
                StructuredKind::Object => value.is_object(),
            };
            if valid {
                Ok(Some(value.clone()))
            } else {
                Err(DomainError::bad_request(format!(
                    "catalog {} {} is not valid JSON",
                    entity, field
                )))
            }
        }
    }
}

/// Platform types a plan is restricted to; empty means every platform.
pub fn supported_platforms(plan: &CatalogPlan) -> Vec<String> {
    plan.metadata
        .as_ref()
        .and_then(|m| m.get("supportedPlatforms"))
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl CatalogService {
    /// Materializes this catalog entry as an offering row, reusing `base`
    /// when the offering already exists.
    pub fn to_offering(&self, broker_id: &str, base: Base) -> ServiceOffering {
        ServiceOffering {
            base,
            name: self.catalog_name.clone(),
            description: self.description.clone(),
            bindable: self.bindable,
            instances_retrievable: self.instances_retrievable,
            bindings_retrievable: self.bindings_retrievable,
            plan_updateable: self.plan_updateable,
            allow_context_updates: self.allow_context_updates,
            catalog_id: self.catalog_id.clone(),
            catalog_name: self.catalog_name.clone(),
            tags: self.tags.clone(),
            requires: self.requires.clone(),
            metadata: self.metadata.clone(),
            broker_id: broker_id.to_string(),
        }
    }
}

impl CatalogPlan {
    pub fn to_plan(&self, service_offering_id: &str, base: Base) -> ServicePlan {
        ServicePlan {
            base,
            name: self.catalog_name.clone(),
            description: self.description.clone(),
            catalog_id: self.catalog_id.clone(),
            catalog_name: self.catalog_name.clone(),
            free: self.free,
            bindable: self.bindable,
            plan_updateable: self.plan_updateable,
            supported_platforms: supported_platforms(self),
            metadata: self.metadata.clone(),
            schemas: self.schemas.clone(),
            service_offering_id: service_offering_id.to_string(),
        }
    }
}
