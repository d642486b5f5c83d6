//! Visibility entity

use serde::{Deserialize, Serialize};

use super::Base;

/// Grants a platform access to a service plan.
///
/// An empty `platform_id` is the wildcard: the plan is visible to every
/// platform. Labeled visibilities scope paid plans to tenants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visibility {
    #[serde(flatten)]
    pub base: Base,
    #[serde(default)]
    pub platform_id: String,
    pub service_plan_id: String,
}
