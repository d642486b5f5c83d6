//! Operation entity
//!
//! An operation is the durable record of a mutating action: who it targets,
//! how far it got, and how it failed if it did. At most one operation per
//! `(resource_type, resource_id)` may be in progress at any moment; the
//! scheduler enforces that through storage lock rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Base, ObjectType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "CREATE",
            OperationType::Update => "UPDATE",
            OperationType::Delete => "DELETE",
        }
    }

    pub fn from_str(s: &str) -> Option<OperationType> {
        Some(match s {
            "CREATE" => OperationType::Create,
            "UPDATE" => OperationType::Update,
            "DELETE" => OperationType::Delete,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "SUCCEEDED")]
    Succeeded,
    #[serde(rename = "FAILED")]
    Failed,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::InProgress => "IN_PROGRESS",
            OperationState::Succeeded => "SUCCEEDED",
            OperationState::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<OperationState> {
        Some(match s {
            "IN_PROGRESS" => OperationState::InProgress,
            "SUCCEEDED" => OperationState::Succeeded,
            "FAILED" => OperationState::Failed,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationCategory {
    #[serde(rename = "async-request")]
    AsyncRequest,
    #[serde(rename = "maintenance")]
    Maintenance,
}

impl OperationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationCategory::AsyncRequest => "async-request",
            OperationCategory::Maintenance => "maintenance",
        }
    }

    pub fn from_str(s: &str) -> Option<OperationCategory> {
        Some(match s {
            "async-request" => OperationCategory::AsyncRequest,
            "maintenance" => OperationCategory::Maintenance,
            _ => return None,
        })
    }
}

/// Structured error recorded on a failed operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationErrors {
    pub error: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    #[serde(flatten)]
    pub base: Base,
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    pub state: OperationState,
    pub category: OperationCategory,
    pub resource_id: String,
    pub resource_type: ObjectType,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<OperationErrors>,
    #[serde(default)]
    pub reschedule: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reschedule_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_scheduled: Option<DateTime<Utc>>,
}

impl Operation {
    pub fn in_progress(
        operation_type: OperationType,
        category: OperationCategory,
        resource_type: ObjectType,
        resource_id: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Operation {
        Operation {
            base: Base::new(),
            operation_type,
            state: OperationState::InProgress,
            category,
            resource_id: resource_id.into(),
            resource_type,
            correlation_id: correlation_id.into(),
            platform_id: None,
            errors: None,
            reschedule: false,
            reschedule_timestamp: None,
            deletion_scheduled: None,
        }
    }

    pub fn succeed(&mut self) {
        self.state = OperationState::Succeeded;
        self.reschedule = false;
        self.reschedule_timestamp = None;
        self.base.updated_at = Utc::now();
    }

    pub fn fail(&mut self, error: &'static str, description: impl Into<String>) {
        self.state = OperationState::Failed;
        self.reschedule = false;
        self.reschedule_timestamp = None;
        self.errors = Some(OperationErrors {
            error: error.to_string(),
            description: description.into(),
        });
        self.base.updated_at = Utc::now();
    }

    pub fn mark_rescheduled(&mut self, at: DateTime<Utc>) {
        self.reschedule = true;
        self.reschedule_timestamp = Some(at);
        self.base.updated_at = Utc::now();
    }
}
