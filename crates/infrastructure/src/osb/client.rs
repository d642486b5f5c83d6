//! Reqwest-based OSB client
//!
//! Outbound HTTP to registered brokers. Timeouts are split the way broker
//! registration needs them: a connect timeout on the client and a separate
//! response-header timeout implemented by racing `send()` against a timer,
//! since the send future resolves exactly when response headers arrive.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::debug;

use sm_domain::errors::{DomainError, Result};
use sm_domain::osb::{LastOperationState, OsbClient, OsbOutcome, OsbRequest};
use sm_domain::types::ServiceBroker;

pub const BROKER_API_VERSION: &str = "2.14";

/// Process-wide HTTP client settings for broker calls.
#[derive(Debug, Clone)]
pub struct HttpClientSettings {
    pub connect_timeout: Duration,
    pub response_header_timeout: Duration,
}

impl Default for HttpClientSettings {
    fn default() -> Self {
        HttpClientSettings {
            connect_timeout: Duration::from_secs(5),
            response_header_timeout: Duration::from_secs(60),
        }
    }
}

pub struct ReqwestOsbClient {
    client: reqwest::Client,
    settings: HttpClientSettings,
}

impl ReqwestOsbClient {
    pub fn new(settings: HttpClientSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|e| DomainError::internal(format!("could not build http client: {}", e)))?;
        Ok(ReqwestOsbClient { client, settings })
    }

    fn request(&self, broker: &ServiceBroker, method: Method, url: String) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, url)
            .header("X-Broker-API-Version", BROKER_API_VERSION)
            .header(
                "X-Broker-API-Originating-Identity",
                originating_identity_header(),
            );
        if let Some(basic) = broker.credentials.as_ref().and_then(|c| c.basic.as_ref()) {
            builder = builder.basic_auth(&basic.username, Some(&basic.password));
        }
        builder
    }

    async fn send(&self, broker: &ServiceBroker, builder: RequestBuilder) -> Result<Response> {
        let send = builder.send();
        match tokio::time::timeout(self.settings.response_header_timeout, send).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(error)) => Err(DomainError::BrokerUnreachable {
                broker_url: broker.broker_url.clone(),
                message: error.to_string(),
            }),
            Err(_) => Err(DomainError::BrokerUnreachable {
                broker_url: broker.broker_url.clone(),
                message: format!(
                    "no response headers within {:?}",
                    self.settings.response_header_timeout
                ),
            }),
        }
    }

    fn instance_url(&self, broker: &ServiceBroker, request: &OsbRequest) -> String {
        format!(
            "{}/v2/service_instances/{}",
            broker.broker_url.trim_end_matches('/'),
            request.instance_id
        )
    }

    async fn mutate(
        &self,
        broker: &ServiceBroker,
        builder: RequestBuilder,
    ) -> Result<OsbOutcome> {
        let response = self.send(broker, builder).await?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        match status {
            StatusCode::OK | StatusCode::CREATED => Ok(OsbOutcome::Done(body)),
            StatusCode::ACCEPTED => Ok(OsbOutcome::Pending {
                last_operation: body
                    .get("operation")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            _ => Err(DomainError::BrokerRequestFailed {
                status: status.as_u16(),
                message: body
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("broker request failed")
                    .to_string(),
            }),
        }
    }
}

fn originating_identity_header() -> String {
    let identity = serde_json::json!({ "username": "service-manager" });
    format!(
        "service-manager {}",
        base64::engine::general_purpose::STANDARD.encode(identity.to_string())
    )
}

#[async_trait]
impl OsbClient for ReqwestOsbClient {
    async fn fetch_catalog(&self, broker: &ServiceBroker) -> Result<Value> {
        let url = broker.catalog_url();
        debug!(broker_url = %broker.broker_url, "fetching broker catalog");
        let response = self
            .send(broker, self.request(broker, Method::GET, url))
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DomainError::CatalogFetch {
                status: status.as_u16(),
                message: "broker did not return a valid catalog".to_string(),
            });
        }
        response.json().await.map_err(|error| DomainError::BadRequest {
            message: format!("broker catalog is not valid JSON: {}", error),
        })
    }

    async fn provision(&self, broker: &ServiceBroker, request: &OsbRequest) -> Result<OsbOutcome> {
        let url = format!("{}?accepts_incomplete=true", self.instance_url(broker, request));
        let body = serde_json::json!({
            "service_id": request.service_id,
            "plan_id": request.plan_id,
            "parameters": request.parameters,
        });
        self.mutate(broker, self.request(broker, Method::PUT, url).json(&body))
            .await
    }

    async fn deprovision(
        &self,
        broker: &ServiceBroker,
        request: &OsbRequest,
    ) -> Result<OsbOutcome> {
        let url = format!(
            "{}?accepts_incomplete=true&service_id={}&plan_id={}",
            self.instance_url(broker, request),
            request.service_id,
            request.plan_id
        );
        self.mutate(broker, self.request(broker, Method::DELETE, url)).await
    }

    async fn bind(&self, broker: &ServiceBroker, request: &OsbRequest) -> Result<OsbOutcome> {
        let binding_id = request.binding_id.clone().unwrap_or_default();
        let url = format!(
            "{}/service_bindings/{}?accepts_incomplete=true",
            self.instance_url(broker, request),
            binding_id
        );
        let body = serde_json::json!({
            "service_id": request.service_id,
            "plan_id": request.plan_id,
            "parameters": request.parameters,
        });
        self.mutate(broker, self.request(broker, Method::PUT, url).json(&body))
            .await
    }

    async fn unbind(&self, broker: &ServiceBroker, request: &OsbRequest) -> Result<OsbOutcome> {
        let binding_id = request.binding_id.clone().unwrap_or_default();
        let url = format!(
            "{}/service_bindings/{}?service_id={}&plan_id={}",
            self.instance_url(broker, request),
            binding_id,
            request.service_id,
            request.plan_id
        );
        self.mutate(broker, self.request(broker, Method::DELETE, url)).await
    }

    async fn last_operation(
        &self,
        broker: &ServiceBroker,
        request: &OsbRequest,
    ) -> Result<LastOperationState> {
        let url = format!(
            "{}/last_operation?service_id={}&plan_id={}",
            self.instance_url(broker, request),
            request.service_id,
            request.plan_id
        );
        let response = self.send(broker, self.request(broker, Method::GET, url)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DomainError::BrokerRequestFailed {
                status: status.as_u16(),
                message: "broker last_operation failed".to_string(),
            });
        }
        let body: Value = response.json().await.map_err(|error| {
            DomainError::BrokerRequestFailed {
                status: status.as_u16(),
                message: format!("broker last_operation is not valid JSON: {}", error),
            }
        })?;
        Ok(LastOperationState {
            state: body
                .get("state")
                .and_then(Value::as_str)
                .unwrap_or("failed")
                .to_string(),
            description: body
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}
