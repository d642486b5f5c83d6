//! Typed objects of the service manager
//!
//! Every persisted entity embeds [`Base`] and is addressed through the
//! [`Object`] enum so the repository, interceptor chains and scheduler can
//! operate uniformly over all resource types.

mod binding;
mod broker;
mod instance;
mod offering;
mod operation;
mod plan;
mod platform;
mod visibility;

pub use binding::ServiceBinding;
pub use broker::{BasicCredentials, Credentials, ServiceBroker};
pub use instance::ServiceInstance;
pub use offering::ServiceOffering;
pub use operation::{Operation, OperationCategory, OperationErrors, OperationState, OperationType};
pub use plan::ServicePlan;
pub use platform::{Platform, SM_PLATFORM};
pub use visibility::Visibility;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{DomainError, Result};
use crate::labels::Labels;
use crate::query::FieldValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    ServiceBroker,
    ServiceOffering,
    ServicePlan,
    Platform,
    Visibility,
    ServiceInstance,
    ServiceBinding,
    Operation,
}

// On the wire an object type is its plural resource name.
impl Serialize for ObjectType {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.api_name())
    }
}

impl<'de> Deserialize<'de> for ObjectType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<ObjectType, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        ObjectType::from_api_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown object type: {}", name)))
    }
}

impl ObjectType {
    /// The plural resource name used on the API and in operation rows.
    pub fn api_name(&self) -> &'static str {
        match self {
            ObjectType::ServiceBroker => "service_brokers",
            ObjectType::ServiceOffering => "service_offerings",
            ObjectType::ServicePlan => "service_plans",
            ObjectType::Platform => "platforms",
            ObjectType::Visibility => "visibilities",
            ObjectType::ServiceInstance => "service_instances",
            ObjectType::ServiceBinding => "service_bindings",
            ObjectType::Operation => "operations",
        }
    }

    pub fn from_api_name(name: &str) -> Option<ObjectType> {
        Some(match name {
            "service_brokers" => ObjectType::ServiceBroker,
            "service_offerings" => ObjectType::ServiceOffering,
            "service_plans" => ObjectType::ServicePlan,
            "platforms" => ObjectType::Platform,
            "visibilities" => ObjectType::Visibility,
            "service_instances" => ObjectType::ServiceInstance,
            "service_bindings" => ObjectType::ServiceBinding,
            "operations" => ObjectType::Operation,
            _ => return None,
        })
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.api_name())
    }
}

/// Fields shared by every persisted entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Base {
    /// Clients may pick their own id on create; an empty id is replaced with
    /// a fresh UUID at admission.
    #[serde(default)]
    pub id: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
    #[serde(default)]
    pub ready: bool,
    /// Assigned by storage on insert, never exposed on the wire.
    #[serde(skip)]
    pub paging_sequence: i64,
}

impl Base {
    pub fn new() -> Self {
        let now = Utc::now();
        Base {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            labels: Labels::new(),
            ready: true,
            paging_sequence: 0,
        }
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Base {
            id: id.into(),
            ..Base::new()
        }
    }

    /// Fills identity and bookkeeping fields at create admission, keeping a
    /// client-chosen id when one was supplied.
    pub fn prepare_for_create(&mut self) {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        self.created_at = now;
        self.updated_at = now;
        self.paging_sequence = 0;
    }
}

impl Default for Base {
    fn default() -> Self {
        Base::new()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Object {
    ServiceBroker(ServiceBroker),
    ServiceOffering(ServiceOffering),
    ServicePlan(ServicePlan),
    Platform(Platform),
    Visibility(Visibility),
    ServiceInstance(ServiceInstance),
    ServiceBinding(ServiceBinding),
    Operation(Operation),
}

impl Object {
    pub fn object_type(&self) -> ObjectType {
        match self {
            Object::ServiceBroker(_) => ObjectType::ServiceBroker,
            Object::ServiceOffering(_) => ObjectType::ServiceOffering,
            Object::ServicePlan(_) => ObjectType::ServicePlan,
            Object::Platform(_) => ObjectType::Platform,
            Object::Visibility(_) => ObjectType::Visibility,
            Object::ServiceInstance(_) => ObjectType::ServiceInstance,
            Object::ServiceBinding(_) => ObjectType::ServiceBinding,
            Object::Operation(_) => ObjectType::Operation,
        }
    }

    pub fn base(&self) -> &Base {
        match self {
            Object::ServiceBroker(o) => &o.base,
            Object::ServiceOffering(o) => &o.base,
            Object::ServicePlan(o) => &o.base,
            Object::Platform(o) => &o.base,
            Object::Visibility(o) => &o.base,
            Object::ServiceInstance(o) => &o.base,
            Object::ServiceBinding(o) => &o.base,
            Object::Operation(o) => &o.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut Base {
        match self {
            Object::ServiceBroker(o) => &mut o.base,
            Object::ServiceOffering(o) => &mut o.base,
            Object::ServicePlan(o) => &mut o.base,
            Object::Platform(o) => &mut o.base,
            Object::Visibility(o) => &mut o.base,
            Object::ServiceInstance(o) => &mut o.base,
            Object::ServiceBinding(o) => &mut o.base,
            Object::Operation(o) => &mut o.base,
        }
    }

    pub fn id(&self) -> &str {
        &self.base().id
    }

    /// Extracts a named field for in-process criteria evaluation.
    ///
    /// Unknown fields resolve to [`FieldValue::Nil`], matching the behavior
    /// of a NULL column.
    pub fn field(&self, name: &str) -> FieldValue {
        match name {
            "id" => return FieldValue::Str(self.base().id.clone()),
            "created_at" => return FieldValue::Time(self.base().created_at),
            "updated_at" => return FieldValue::Time(self.base().updated_at),
            "ready" => return FieldValue::Bool(self.base().ready),
            "paging_sequence" => return FieldValue::Int(self.base().paging_sequence),
            _ => {}
        }
        match self {
            Object::ServiceBroker(o) => match name {
                "name" => FieldValue::Str(o.name.clone()),
                "broker_url" => FieldValue::Str(o.broker_url.clone()),
                "description" => FieldValue::Str(o.description.clone()),
                _ => FieldValue::Nil,
            },
            Object::ServiceOffering(o) => match name {
                "name" => FieldValue::Str(o.name.clone()),
                "catalog_id" => FieldValue::Str(o.catalog_id.clone()),
                "catalog_name" => FieldValue::Str(o.catalog_name.clone()),
                "broker_id" => FieldValue::Str(o.broker_id.clone()),
                "bindable" => FieldValue::Bool(o.bindable),
                _ => FieldValue::Nil,
            },
            Object::ServicePlan(o) => match name {
                "name" => FieldValue::Str(o.name.clone()),
                "catalog_id" => FieldValue::Str(o.catalog_id.clone()),
                "catalog_name" => FieldValue::Str(o.catalog_name.clone()),
                "service_offering_id" => FieldValue::Str(o.service_offering_id.clone()),
                "free" => FieldValue::Bool(o.free),
                _ => FieldValue::Nil,
            },
            Object::Platform(o) => match name {
                "name" => FieldValue::Str(o.name.clone()),
                "type" => FieldValue::Str(o.platform_type.clone()),
                "active" => FieldValue::Bool(o.active),
                "last_active" => FieldValue::Time(o.last_active),
                _ => FieldValue::Nil,
            },
            Object::Visibility(o) => match name {
                "platform_id" => FieldValue::Str(o.platform_id.clone()),
                "service_plan_id" => FieldValue::Str(o.service_plan_id.clone()),
                _ => FieldValue::Nil,
            },
            Object::ServiceInstance(o) => match name {
                "name" => FieldValue::Str(o.name.clone()),
                "service_plan_id" => FieldValue::Str(o.service_plan_id.clone()),
                "platform_id" => FieldValue::Str(o.platform_id.clone()),
                "usable" => FieldValue::Bool(o.usable),
                "shared" => FieldValue::Bool(o.shared),
                _ => FieldValue::Nil,
            },
            Object::ServiceBinding(o) => match name {
                "name" => FieldValue::Str(o.name.clone()),
                "service_instance_id" => FieldValue::Str(o.service_instance_id.clone()),
                _ => FieldValue::Nil,
            },
            Object::Operation(o) => match name {
                "type" => FieldValue::Str(o.operation_type.as_str().to_string()),
                "state" => FieldValue::Str(o.state.as_str().to_string()),
                "category" => FieldValue::Str(o.category.as_str().to_string()),
                "resource_id" => FieldValue::Str(o.resource_id.clone()),
                "resource_type" => FieldValue::Str(o.resource_type.api_name().to_string()),
                "correlation_id" => FieldValue::Str(o.correlation_id.clone()),
                "platform_id" => match &o.platform_id {
                    Some(p) => FieldValue::Str(p.clone()),
                    None => FieldValue::Nil,
                },
                "reschedule" => FieldValue::Bool(o.reschedule),
                "reschedule_timestamp" => match o.reschedule_timestamp {
                    Some(t) => FieldValue::Time(t),
                    None => FieldValue::Nil,
                },
                "deletion_scheduled" => match o.deletion_scheduled {
                    Some(t) => FieldValue::Time(t),
                    None => FieldValue::Nil,
                },
                _ => FieldValue::Nil,
            },
        }
    }
}

macro_rules! object_conversions {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Object {
                fn from(value: $ty) -> Object {
                    Object::$variant(value)
                }
            }

            impl TryFrom<Object> for $ty {
                type Error = DomainError;

                fn try_from(object: Object) -> Result<$ty> {
                    match object {
                        Object::$variant(value) => Ok(value),
                        other => Err(DomainError::internal(format!(
                            "expected {} but got {}",
                            stringify!($variant),
                            other.object_type()
                        ))),
                    }
                }
            }
        )*
    };
}

object_conversions! {
    ServiceBroker => ServiceBroker,
    ServiceOffering => ServiceOffering,
    ServicePlan => ServicePlan,
    Platform => Platform,
    Visibility => Visibility,
    ServiceInstance => ServiceInstance,
    ServiceBinding => ServiceBinding,
    Operation => Operation,
}
