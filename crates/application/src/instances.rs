//! OSB-backed storage actions
//!
//! Builders for the actions the scheduler runs when instances and bindings
//! are provisioned or destroyed. Each action resolves the plan, offering and
//! broker chain, talks to the broker as an OSB client and keeps the stored
//! row in step: rows are written `ready=false` first and only turn ready
//! once the broker finished, which is also what the maintainer relies on to
//! roll back half-provisioned resources.
//!
//! A broker answering 202 leaves a `last_operation` marker on the row and
//! the action returns `OperationPending`, which makes the scheduler poll
//! until the broker reports a terminal state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use sm_domain::errors::{DomainError, Result};
use sm_domain::osb::{OsbClient, OsbOutcome, OsbRequest};
use sm_domain::query::{Criterion, Operator};
use sm_domain::repository::{Repository, SchedulableAction, TransactionalRepository};
use sm_domain::types::{
    Object, ObjectType, Operation, OperationType, ServiceBinding, ServiceBroker, ServiceInstance,
    ServiceOffering, ServicePlan,
};

pub struct OsbActions {
    client: Arc<dyn OsbClient>,
}

struct BrokerChain {
    broker: ServiceBroker,
    offering: ServiceOffering,
    plan: ServicePlan,
}

async fn resolve_chain(
    repository: &Arc<dyn TransactionalRepository>,
    plan_id: &str,
) -> Result<BrokerChain> {
    let plan: ServicePlan = repository
        .get(
            ObjectType::ServicePlan,
            &[Criterion::by_field(Operator::Equals, "id", plan_id)],
        )
        .await
        .map_err(|_| DomainError::not_found("service plan"))?
        .try_into()?;
    let offering: ServiceOffering = repository
        .get(
            ObjectType::ServiceOffering,
            &[Criterion::by_field(
                Operator::Equals,
                "id",
                plan.service_offering_id.clone(),
            )],
        )
        .await?
        .try_into()?;
    let broker: ServiceBroker = repository
        .get(
            ObjectType::ServiceBroker,
            &[Criterion::by_field(Operator::Equals, "id", offering.broker_id.clone())],
        )
        .await?
        .try_into()?;
    Ok(BrokerChain {
        broker,
        offering,
        plan,
    })
}

fn osb_request(chain: &BrokerChain, instance: &ServiceInstance) -> OsbRequest {
    OsbRequest {
        instance_id: instance.base.id.clone(),
        binding_id: None,
        service_id: chain.offering.catalog_id.clone(),
        plan_id: chain.plan.catalog_id.clone(),
        parameters: instance.parameters.clone(),
    }
}

impl OsbActions {
    pub fn new(client: Arc<dyn OsbClient>) -> Self {
        OsbActions { client }
    }

    /// Action creating the instance row and provisioning it at the broker.
    pub fn provision_instance(&self, instance: ServiceInstance) -> SchedulableAction {
        self.provision_action(instance, false)
    }

    fn provision_action(&self, instance: ServiceInstance, resumed: bool) -> SchedulableAction {
        let client = Arc::clone(&self.client);
        let row_owned = Arc::new(AtomicBool::new(resumed));
        Arc::new(move |repository: Arc<dyn TransactionalRepository>| {
            let client = Arc::clone(&client);
            let instance = instance.clone();
            let row_owned = Arc::clone(&row_owned);
            Box::pin(async move {
                let by_id = [Criterion::by_field(
                    Operator::Equals,
                    "id",
                    instance.base.id.clone(),
                )];
                let mut row: ServiceInstance = match repository
                    .get(ObjectType::ServiceInstance, &by_id)
                    .await
                {
                    Ok(existing) => {
                        if !row_owned.load(Ordering::SeqCst) {
                            return Err(DomainError::conflict(format!(
                                "service instance with id {} already exists",
                                instance.base.id
                            )));
                        }
                        existing.try_into()?
                    }
                    Err(DomainError::NotFound { .. }) => {
                        let mut fresh = instance.clone();
                        fresh.base.ready = false;
                        let created = repository.create(Object::ServiceInstance(fresh)).await?;
                        row_owned.store(true, Ordering::SeqCst);
                        created.try_into()?
                    }
                    Err(error) => return Err(error),
                };

                let chain = resolve_chain(&repository, &row.service_plan_id).await?;
                let request = osb_request(&chain, &row);

                // A stored last_operation marker means the broker accepted
                // the provision earlier and is still working on it.
                if row.last_operation.is_some() {
                    let state = client.last_operation(&chain.broker, &request).await?;
                    if state.state == "succeeded" {
                        row.base.ready = true;
                        row.usable = true;
                        row.last_operation = None;
                        let updated = repository.update(Object::ServiceInstance(row), &[]).await?;
                        return Ok(Some(updated));
                    }
                    if state.state == "failed" {
                        return Err(DomainError::BrokerRequestFailed {
                            status: 200,
                            message: state
                                .description
                                .unwrap_or_else(|| "broker reported a failed provision".into()),
                        });
                    }
                    return Err(DomainError::OperationPending {
                        last_operation: row.last_operation.clone(),
                    });
                }

                match client.provision(&chain.broker, &request).await? {
                    OsbOutcome::Done(body) => {
                        row.dashboard_url = body
                            .get("dashboard_url")
                            .and_then(serde_json::Value::as_str)
                            .map(str::to_string);
                        row.base.ready = true;
                        row.usable = true;
                        let updated = repository.update(Object::ServiceInstance(row), &[]).await?;
                        Ok(Some(updated))
                    }
                    OsbOutcome::Pending { last_operation } => {
                        debug!(instance_id = %row.base.id, "broker accepted provision asynchronously");
                        row.last_operation = Some(last_operation.clone().unwrap_or_default());
                        repository
                            .update(Object::ServiceInstance(row), &[])
                            .await?;
                        Err(DomainError::OperationPending { last_operation })
                    }
                }
            })
        })
    }

    /// Action deprovisioning the instance at the broker and deleting its
    /// row.
    pub fn deprovision_instance(&self, instance_id: String) -> SchedulableAction {
        let client = Arc::clone(&self.client);
        Arc::new(move |repository: Arc<dyn TransactionalRepository>| {
            let client = Arc::clone(&client);
            let instance_id = instance_id.clone();
            Box::pin(async move {
                let by_id = [Criterion::by_field(Operator::Equals, "id", instance_id.clone())];
                let row: ServiceInstance = repository
                    .get(ObjectType::ServiceInstance, &by_id)
                    .await
                    .map_err(|_| DomainError::not_found("service instance"))?
                    .try_into()?;
                let chain = resolve_chain(&repository, &row.service_plan_id).await?;
                let request = osb_request(&chain, &row);

                match client.deprovision(&chain.broker, &request).await? {
                    OsbOutcome::Done(_) => {
                        repository.delete(ObjectType::ServiceInstance, &by_id).await?;
                        Ok(None)
                    }
                    OsbOutcome::Pending { last_operation } => {
                        let mut row = row;
                        row.last_operation = Some(last_operation.clone().unwrap_or_default());
                        row.usable = false;
                        repository.update(Object::ServiceInstance(row), &[]).await?;
                        Err(DomainError::OperationPending { last_operation })
                    }
                }
            })
        })
    }

    /// Action creating the binding row and binding it at the broker.
    pub fn bind(&self, binding: ServiceBinding) -> SchedulableAction {
        let client = Arc::clone(&self.client);
        let row_owned = Arc::new(AtomicBool::new(false));
        Arc::new(move |repository: Arc<dyn TransactionalRepository>| {
            let client = Arc::clone(&client);
            let binding = binding.clone();
            let row_owned = Arc::clone(&row_owned);
            Box::pin(async move {
                let instance: ServiceInstance = repository
                    .get(
                        ObjectType::ServiceInstance,
                        &[Criterion::by_field(
                            Operator::Equals,
                            "id",
                            binding.service_instance_id.clone(),
                        )],
                    )
                    .await
                    .map_err(|_| DomainError::not_found("service instance"))?
                    .try_into()?;
                let chain = resolve_chain(&repository, &instance.service_plan_id).await?;

                let by_id = [Criterion::by_field(
                    Operator::Equals,
                    "id",
                    binding.base.id.clone(),
                )];
                let mut row: ServiceBinding = match repository
                    .get(ObjectType::ServiceBinding, &by_id)
                    .await
                {
                    Ok(existing) => {
                        if !row_owned.load(Ordering::SeqCst) {
                            return Err(DomainError::conflict(format!(
                                "service binding with id {} already exists",
                                binding.base.id
                            )));
                        }
                        existing.try_into()?
                    }
                    Err(DomainError::NotFound { .. }) => {
                        let mut fresh = binding.clone();
                        fresh.base.ready = false;
                        let created = repository.create(Object::ServiceBinding(fresh)).await?;
                        row_owned.store(true, Ordering::SeqCst);
                        created.try_into()?
                    }
                    Err(error) => return Err(error),
                };

                let mut request = osb_request(&chain, &instance);
                request.binding_id = Some(row.base.id.clone());
                request.parameters = row.parameters.clone();

                match client.bind(&chain.broker, &request).await? {
                    OsbOutcome::Done(body) => {
                        row.credentials = body.get("credentials").cloned();
                        row.base.ready = true;
                        let updated = repository.update(Object::ServiceBinding(row), &[]).await?;
                        Ok(Some(updated))
                    }
                    OsbOutcome::Pending { last_operation } => {
                        row.last_operation = Some(last_operation.clone().unwrap_or_default());
                        repository.update(Object::ServiceBinding(row), &[]).await?;
                        Err(DomainError::OperationPending { last_operation })
                    }
                }
            })
        })
    }

    /// Action unbinding at the broker and deleting the binding row.
    pub fn unbind(&self, binding_id: String) -> SchedulableAction {
        let client = Arc::clone(&self.client);
        Arc::new(move |repository: Arc<dyn TransactionalRepository>| {
            let client = Arc::clone(&client);
            let binding_id = binding_id.clone();
            Box::pin(async move {
                let by_id = [Criterion::by_field(Operator::Equals, "id", binding_id.clone())];
                let row: ServiceBinding = repository
                    .get(ObjectType::ServiceBinding, &by_id)
                    .await
                    .map_err(|_| DomainError::not_found("service binding"))?
                    .try_into()?;
                let instance: ServiceInstance = repository
                    .get(
                        ObjectType::ServiceInstance,
                        &[Criterion::by_field(
                            Operator::Equals,
                            "id",
                            row.service_instance_id.clone(),
                        )],
                    )
                    .await?
                    .try_into()?;
                let chain = resolve_chain(&repository, &instance.service_plan_id).await?;

                let mut request = osb_request(&chain, &instance);
                request.binding_id = Some(row.base.id.clone());

                match client.unbind(&chain.broker, &request).await? {
                    OsbOutcome::Done(_) => {
                        repository.delete(ObjectType::ServiceBinding, &by_id).await?;
                        Ok(None)
                    }
                    OsbOutcome::Pending { last_operation } => {
                        Err(DomainError::OperationPending { last_operation })
                    }
                }
            })
        })
    }

    /// Rebuilds the action of an orphaned instance operation so the
    /// maintainer can re-enqueue it.
    pub fn resume_instance_operation(&self, operation: &Operation) -> SchedulableAction {
        match operation.operation_type {
            OperationType::Delete => self.deprovision_instance(operation.resource_id.clone()),
            _ => {
                let client = Arc::clone(&self.client);
                let resource_id = operation.resource_id.clone();
                let actions = OsbActions { client };
                let placeholder = ServiceInstance {
                    base: sm_domain::types::Base::with_id(resource_id),
                    name: String::new(),
                    service_plan_id: String::new(),
                    platform_id: String::new(),
                    maintenance_info: None,
                    parameters: None,
                    dashboard_url: None,
                    last_operation: None,
                    usable: false,
                    shared: false,
                };
                actions.provision_action(placeholder, true)
            }
        }
    }
}
