//! Service broker entity

use serde::{Deserialize, Serialize};

use super::Base;
use crate::errors::{DomainError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basic: Option<BasicCredentials>,
}

impl Credentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            basic: Some(BasicCredentials {
                username: username.into(),
                password: password.into(),
            }),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match &self.basic {
            Some(basic) => {
                if basic.username.is_empty() || basic.password.is_empty() {
                    return Err(DomainError::bad_request(
                        "missing broker credentials: basic username and password are required",
                    ));
                }
                Ok(())
            }
            None => Err(DomainError::bad_request(
                "missing broker credentials: only basic credentials are supported",
            )),
        }
    }
}

/// A registered OSB service broker.
///
/// The `catalog` field mirrors the raw JSON of the last successfully fetched
/// catalog; offerings and plans are normalized into their own rows but the
/// blob stays the round-trip source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceBroker {
    #[serde(flatten)]
    pub base: Base,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub broker_url: String,
    #[serde(skip_serializing, default)]
    pub credentials: Option<Credentials>,
    #[serde(skip)]
    pub catalog: Option<serde_json::Value>,
}

impl ServiceBroker {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DomainError::bad_request("missing broker name"));
        }
        if self.name.len() > 255 {
            return Err(DomainError::bad_request("broker name exceeds 255 characters"));
        }
        if self.broker_url.is_empty() {
            return Err(DomainError::bad_request("missing broker url"));
        }
        match &self.credentials {
            Some(credentials) => credentials.validate(),
            None => Err(DomainError::bad_request("missing broker credentials")),
        }
    }

    /// The catalog endpoint for this broker.
    pub fn catalog_url(&self) -> String {
        format!("{}/v2/catalog", self.broker_url.trim_end_matches('/'))
    }
}
