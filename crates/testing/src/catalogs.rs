//! Catalog and request-body generators for tests

use serde_json::{json, Value};
use uuid::Uuid;

/// A catalog with two services carrying two plans each, every identifier
/// random so parallel tests never collide.
pub fn random_catalog() -> Value {
    json!({
        "services": [random_service(), random_service()]
    })
}

pub fn random_service() -> Value {
    json!({
        "id": Uuid::new_v4().to_string(),
        "name": format!("service-{}", Uuid::new_v4()),
        "description": "a generated test service",
        "bindable": true,
        "plan_updateable": true,
        "plans": [random_free_plan(), random_paid_plan()]
    })
}

pub fn random_free_plan() -> Value {
    json!({
        "id": Uuid::new_v4().to_string(),
        "name": format!("plan-{}", Uuid::new_v4()),
        "description": "a generated free plan",
        "free": true
    })
}

pub fn random_paid_plan() -> Value {
    json!({
        "id": Uuid::new_v4().to_string(),
        "name": format!("plan-{}", Uuid::new_v4()),
        "description": "a generated paid plan",
        "free": false
    })
}

/// A plan restricted to the given platform types.
pub fn plan_for_platforms(platform_types: &[&str]) -> Value {
    json!({
        "id": Uuid::new_v4().to_string(),
        "name": format!("plan-{}", Uuid::new_v4()),
        "description": "a platform-scoped plan",
        "free": true,
        "metadata": { "supportedPlatforms": platform_types }
    })
}

/// The POST body registering a broker served by the stub server.
pub fn broker_registration_body(url: &str, username: &str, password: &str) -> Value {
    json!({
        "name": format!("broker-{}", Uuid::new_v4()),
        "broker_url": url,
        "description": "a generated test broker",
        "credentials": {
            "basic": { "username": username, "password": password }
        }
    })
}

pub fn platform_registration_body() -> Value {
    json!({
        "name": format!("platform-{}", Uuid::new_v4()),
        "type": "kubernetes",
        "description": "a generated test platform"
    })
}
