//! Service binding entity

use serde::{Deserialize, Serialize};

use super::Base;

/// Credentials material bound against a service instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceBinding {
    #[serde(flatten)]
    pub base: Base,
    pub name: String,
    pub service_instance_id: String,
    /// Opaque credentials returned by the broker, never listed.
    #[serde(skip_serializing, default)]
    pub credentials: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<String>,
}
