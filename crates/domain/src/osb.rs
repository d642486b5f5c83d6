//! Outbound OSB client port
//!
//! The service manager talks to registered brokers as an OSB client: it
//! fetches catalogs and provisions, deprovisions, binds and unbinds on
//! behalf of platforms. Adapters own transport concerns (timeouts, auth
//! headers); callers inherit the surrounding operation deadline through
//! normal future cancellation.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::Result;
use crate::types::ServiceBroker;

/// Identifies the target of an OSB call in broker terms: catalog ids, not
/// service manager row ids.
#[derive(Debug, Clone, Default)]
pub struct OsbRequest {
    pub instance_id: String,
    pub binding_id: Option<String>,
    pub service_id: String,
    pub plan_id: String,
    pub parameters: Option<Value>,
}

/// Outcome of a mutating OSB call.
#[derive(Debug, Clone)]
pub enum OsbOutcome {
    /// The broker completed synchronously (200/201).
    Done(Value),
    /// The broker accepted the request (202) and expects polling.
    Pending { last_operation: Option<String> },
}

#[derive(Debug, Clone)]
pub struct LastOperationState {
    pub state: String,
    pub description: Option<String>,
}

impl LastOperationState {
    pub fn is_terminal(&self) -> bool {
        self.state == "succeeded" || self.state == "failed"
    }
}

#[async_trait]
pub trait OsbClient: Send + Sync {
    /// GET `/v2/catalog`, returning the raw envelope.
    async fn fetch_catalog(&self, broker: &ServiceBroker) -> Result<Value>;

    async fn provision(&self, broker: &ServiceBroker, request: &OsbRequest) -> Result<OsbOutcome>;

    async fn deprovision(&self, broker: &ServiceBroker, request: &OsbRequest)
        -> Result<OsbOutcome>;

    async fn bind(&self, broker: &ServiceBroker, request: &OsbRequest) -> Result<OsbOutcome>;

    async fn unbind(&self, broker: &ServiceBroker, request: &OsbRequest) -> Result<OsbOutcome>;

    async fn last_operation(
        &self,
        broker: &ServiceBroker,
        request: &OsbRequest,
    ) -> Result<LastOperationState>;
}
