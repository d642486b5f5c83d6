//! Service plan entity

use serde::{Deserialize, Serialize};

use super::Base;

/// A plan of a service offering.
///
/// `free` drives the public default; `supported_platforms` narrows which
/// platform types may see the plan, with an empty list meaning all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePlan {
    #[serde(flatten)]
    pub base: Base,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub catalog_id: String,
    pub catalog_name: String,
    #[serde(default)]
    pub free: bool,
    #[serde(default)]
    pub bindable: bool,
    #[serde(default)]
    pub plan_updateable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_platforms: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schemas: Option<serde_json::Value>,
    pub service_offering_id: String,
}
