//! Platform entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Base, Credentials};

/// Name and type of the reserved platform representing the service manager
/// itself. Instances provisioned through SM's own API belong to it.
pub const SM_PLATFORM: &str = "service-manager";

/// A consumer of the service manager, e.g. an application runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    #[serde(flatten)]
    pub base: Base,
    pub name: String,
    #[serde(rename = "type")]
    pub platform_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing, default)]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub active: bool,
    #[serde(default = "Utc::now")]
    pub last_active: DateTime<Utc>,
}

impl Platform {
    /// The reserved service-manager platform row, present from boot.
    pub fn service_manager() -> Platform {
        Platform {
            base: Base::with_id(SM_PLATFORM),
            name: SM_PLATFORM.to_string(),
            platform_type: SM_PLATFORM.to_string(),
            description: "Reserved platform of the service manager".to_string(),
            credentials: None,
            active: true,
            last_active: Utc::now(),
        }
    }
}
