//! Service offering entity

use serde::{Deserialize, Serialize};

use super::Base;

/// A service advertised by a broker's catalog.
///
/// `catalog_id` and `catalog_name` are the identifiers assigned by the
/// broker; both are unique within the owning broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOffering {
    #[serde(flatten)]
    pub base: Base,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub bindable: bool,
    #[serde(default)]
    pub instances_retrievable: bool,
    #[serde(default)]
    pub bindings_retrievable: bool,
    #[serde(default)]
    pub plan_updateable: bool,
    #[serde(default)]
    pub allow_context_updates: bool,
    pub catalog_id: String,
    pub catalog_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub broker_id: String,
}
