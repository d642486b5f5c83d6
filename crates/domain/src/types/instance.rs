//! Service instance entity

use serde::{Deserialize, Serialize};

use super::Base;

/// A provisioned service against a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    #[serde(flatten)]
    pub base: Base,
    pub name: String,
    pub service_plan_id: String,
    #[serde(default)]
    pub platform_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintenance_info: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
    /// URL the broker handed back for polling an asynchronous provision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<String>,
    #[serde(default)]
    pub usable: bool,
    #[serde(default)]
    pub shared: bool,
}
