//! Row mapping between entities and their tables
//!
//! Handwritten per entity: an insert, an update and a `map_row_to_*`. The
//! repository dispatches on [`ObjectType`], everything else is plain SQL
//! with bind parameters. Optional text columns map empty-string domain
//! values to NULL so partial unique indexes and foreign keys behave.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};

use sm_domain::errors::Result;
use sm_domain::labels::Labels;
use sm_domain::types::{
    Base, BasicCredentials, Credentials, Object, ObjectType, Operation, OperationCategory,
    OperationErrors, OperationState, OperationType, Platform, ServiceBinding, ServiceBroker,
    ServiceInstance, ServiceOffering, ServicePlan, Visibility,
};

use super::translate_sqlx_error;

fn labels_json(labels: &Labels) -> serde_json::Value {
    serde_json::to_value(labels).unwrap_or_else(|_| serde_json::json!({}))
}

fn base_from_row(row: &PgRow) -> Result<Base> {
    let labels: serde_json::Value = row.get("labels");
    Ok(Base {
        id: row.get("id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        labels: serde_json::from_value(labels).unwrap_or_default(),
        ready: row.get("ready"),
        paging_sequence: row.get("paging_sequence"),
    })
}

fn nullable(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

pub fn map_row(object_type: ObjectType, row: &PgRow) -> Result<Object> {
    Ok(match object_type {
        ObjectType::ServiceBroker => Object::ServiceBroker(map_row_to_broker(row)?),
        ObjectType::ServiceOffering => Object::ServiceOffering(map_row_to_offering(row)?),
        ObjectType::ServicePlan => Object::ServicePlan(map_row_to_plan(row)?),
        ObjectType::Platform => Object::Platform(map_row_to_platform(row)?),
        ObjectType::Visibility => Object::Visibility(map_row_to_visibility(row)?),
        ObjectType::ServiceInstance => Object::ServiceInstance(map_row_to_instance(row)?),
        ObjectType::ServiceBinding => Object::ServiceBinding(map_row_to_binding(row)?),
        ObjectType::Operation => Object::Operation(map_row_to_operation(row)?),
    })
}

pub async fn insert(conn: &mut PgConnection, object: &mut Object) -> Result<()> {
    let paging_sequence = match &*object {
        Object::ServiceBroker(o) => insert_broker(conn, o).await?,
        Object::ServiceOffering(o) => insert_offering(conn, o).await?,
        Object::ServicePlan(o) => insert_plan(conn, o).await?,
        Object::Platform(o) => insert_platform(conn, o).await?,
        Object::Visibility(o) => insert_visibility(conn, o).await?,
        Object::ServiceInstance(o) => insert_instance(conn, o).await?,
        Object::ServiceBinding(o) => insert_binding(conn, o).await?,
        Object::Operation(o) => insert_operation(conn, o).await?,
    };
    object.base_mut().paging_sequence = paging_sequence;
    Ok(())
}

pub async fn update(conn: &mut PgConnection, object: &Object) -> Result<u64> {
    match object {
        Object::ServiceBroker(o) => update_broker(conn, o).await,
        Object::ServiceOffering(o) => update_offering(conn, o).await,
        Object::ServicePlan(o) => update_plan(conn, o).await,
        Object::Platform(o) => update_platform(conn, o).await,
        Object::Visibility(o) => update_visibility(conn, o).await,
        Object::ServiceInstance(o) => update_instance(conn, o).await,
        Object::ServiceBinding(o) => update_binding(conn, o).await,
        Object::Operation(o) => update_operation(conn, o).await,
    }
}

fn map_row_to_broker(row: &PgRow) -> Result<ServiceBroker> {
    let username: Option<String> = row.get("username");
    let password: Option<String> = row.get("password");
    let credentials = username.map(|username| Credentials {
        basic: Some(BasicCredentials {
            username,
            password: password.unwrap_or_default(),
        }),
    });
    Ok(ServiceBroker {
        base: base_from_row(row)?,
        name: row.get("name"),
        description: row.get::<Option<String>, _>("description").unwrap_or_default(),
        broker_url: row.get("broker_url"),
        credentials,
        catalog: row.get::<Option<serde_json::Value>, _>("catalog"),
    })
}

async fn insert_broker(conn: &mut PgConnection, broker: &ServiceBroker) -> Result<i64> {
    let basic = broker.credentials.as_ref().and_then(|c| c.basic.as_ref());
    let row = sqlx::query(
        r#"
        INSERT INTO service_brokers
            (id, name, description, broker_url, username, password, catalog,
             labels, created_at, updated_at, ready)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING paging_sequence
        "#,
    )
    .bind(&broker.base.id)
    .bind(&broker.name)
    .bind(nullable(&broker.description))
    .bind(&broker.broker_url)
    .bind(basic.map(|b| b.username.as_str()))
    .bind(basic.map(|b| b.password.as_str()))
    .bind(&broker.catalog)
    .bind(labels_json(&broker.base.labels))
    .bind(broker.base.created_at)
    .bind(broker.base.updated_at)
    .bind(broker.base.ready)
    .fetch_one(&mut *conn)
    .await
    .map_err(translate_sqlx_error)?;
    Ok(row.get("paging_sequence"))
}

async fn update_broker(conn: &mut PgConnection, broker: &ServiceBroker) -> Result<u64> {
    let basic = broker.credentials.as_ref().and_then(|c| c.basic.as_ref());
    let result = sqlx::query(
        r#"
        UPDATE service_brokers SET
            name = $2, description = $3, broker_url = $4, username = $5,
            password = $6, catalog = $7, labels = $8, updated_at = $9, ready = $10
        WHERE id = $1
        "#,
    )
    .bind(&broker.base.id)
    .bind(&broker.name)
    .bind(nullable(&broker.description))
    .bind(&broker.broker_url)
    .bind(basic.map(|b| b.username.as_str()))
    .bind(basic.map(|b| b.password.as_str()))
    .bind(&broker.catalog)
    .bind(labels_json(&broker.base.labels))
    .bind(broker.base.updated_at)
    .bind(broker.base.ready)
    .execute(&mut *conn)
    .await
    .map_err(translate_sqlx_error)?;
    Ok(result.rows_affected())
}

fn map_row_to_offering(row: &PgRow) -> Result<ServiceOffering> {
    Ok(ServiceOffering {
        base: base_from_row(row)?,
        name: row.get("name"),
        description: row.get::<Option<String>, _>("description").unwrap_or_default(),
        bindable: row.get("bindable"),
        instances_retrievable: row.get("instances_retrievable"),
        bindings_retrievable: row.get("bindings_retrievable"),
        plan_updateable: row.get("plan_updateable"),
        allow_context_updates: row.get("allow_context_updates"),
        catalog_id: row.get("catalog_id"),
        catalog_name: row.get("catalog_name"),
        tags: row.get::<Option<serde_json::Value>, _>("tags"),
        requires: row.get::<Option<serde_json::Value>, _>("requires"),
        metadata: row.get::<Option<serde_json::Value>, _>("metadata"),
        broker_id: row.get("broker_id"),
    })
}

async fn insert_offering(conn: &mut PgConnection, offering: &ServiceOffering) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO service_offerings
            (id, name, description, bindable, instances_retrievable,
             bindings_retrievable, plan_updateable, allow_context_updates,
             catalog_id, catalog_name, tags, requires, metadata, broker_id,
             labels, created_at, updated_at, ready)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18)
        RETURNING paging_sequence
        "#,
    )
    .bind(&offering.base.id)
    .bind(&offering.name)
    .bind(nullable(&offering.description))
    .bind(offering.bindable)
    .bind(offering.instances_retrievable)
    .bind(offering.bindings_retrievable)
    .bind(offering.plan_updateable)
    .bind(offering.allow_context_updates)
    .bind(&offering.catalog_id)
    .bind(&offering.catalog_name)
    .bind(&offering.tags)
    .bind(&offering.requires)
    .bind(&offering.metadata)
    .bind(&offering.broker_id)
    .bind(labels_json(&offering.base.labels))
    .bind(offering.base.created_at)
    .bind(offering.base.updated_at)
    .bind(offering.base.ready)
    .fetch_one(&mut *conn)
    .await
    .map_err(translate_sqlx_error)?;
    Ok(row.get("paging_sequence"))
}

async fn update_offering(conn: &mut PgConnection, offering: &ServiceOffering) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE service_offerings SET
            name = $2, description = $3, bindable = $4,
            instances_retrievable = $5, bindings_retrievable = $6,
            plan_updateable = $7, allow_context_updates = $8, catalog_id = $9,
            catalog_name = $10, tags = $11, requires = $12, metadata = $13,
            labels = $14, updated_at = $15, ready = $16
        WHERE id = $1
        "#,
    )
    .bind(&offering.base.id)
    .bind(&offering.name)
    .bind(nullable(&offering.description))
    .bind(offering.bindable)
    .bind(offering.instances_retrievable)
    .bind(offering.bindings_retrievable)
    .bind(offering.plan_updateable)
    .bind(offering.allow_context_updates)
    .bind(&offering.catalog_id)
    .bind(&offering.catalog_name)
    .bind(&offering.tags)
    .bind(&offering.requires)
    .bind(&offering.metadata)
    .bind(labels_json(&offering.base.labels))
    .bind(offering.base.updated_at)
    .bind(offering.base.ready)
    .execute(&mut *conn)
    .await
    .map_err(translate_sqlx_error)?;
    Ok(result.rows_affected())
}

fn map_row_to_plan(row: &PgRow) -> Result<ServicePlan> {
    let supported: Option<serde_json::Value> = row.get("supported_platforms");
    Ok(ServicePlan {
        base: base_from_row(row)?,
        name: row.get("name"),
        description: row.get::<Option<String>, _>("description").unwrap_or_default(),
        catalog_id: row.get("catalog_id"),
        catalog_name: row.get("catalog_name"),
        free: row.get("free"),
        bindable: row.get("bindable"),
        plan_updateable: row.get("plan_updateable"),
        supported_platforms: supported
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default(),
        metadata: row.get::<Option<serde_json::Value>, _>("metadata"),
        schemas: row.get::<Option<serde_json::Value>, _>("schemas"),
        service_offering_id: row.get("service_offering_id"),
    })
}

async fn insert_plan(conn: &mut PgConnection, plan: &ServicePlan) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO service_plans
            (id, name, description, catalog_id, catalog_name, free, bindable,
             plan_updateable, supported_platforms, metadata, schemas,
             service_offering_id, labels, created_at, updated_at, ready)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16)
        RETURNING paging_sequence
        "#,
    )
    .bind(&plan.base.id)
    .bind(&plan.name)
    .bind(nullable(&plan.description))
    .bind(&plan.catalog_id)
    .bind(&plan.catalog_name)
    .bind(plan.free)
    .bind(plan.bindable)
    .bind(plan.plan_updateable)
    .bind(serde_json::to_value(&plan.supported_platforms)?)
    .bind(&plan.metadata)
    .bind(&plan.schemas)
    .bind(&plan.service_offering_id)
    .bind(labels_json(&plan.base.labels))
    .bind(plan.base.created_at)
    .bind(plan.base.updated_at)
    .bind(plan.base.ready)
    .fetch_one(&mut *conn)
    .await
    .map_err(translate_sqlx_error)?;
    Ok(row.get("paging_sequence"))
}

async fn update_plan(conn: &mut PgConnection, plan: &ServicePlan) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE service_plans SET
            name = $2, description = $3, catalog_id = $4, catalog_name = $5,
            free = $6, bindable = $7, plan_updateable = $8,
            supported_platforms = $9, metadata = $10, schemas = $11,
            labels = $12, updated_at = $13, ready = $14
        WHERE id = $1
        "#,
    )
    .bind(&plan.base.id)
    .bind(&plan.name)
    .bind(nullable(&plan.description))
    .bind(&plan.catalog_id)
    .bind(&plan.catalog_name)
    .bind(plan.free)
    .bind(plan.bindable)
    .bind(plan.plan_updateable)
    .bind(serde_json::to_value(&plan.supported_platforms)?)
    .bind(&plan.metadata)
    .bind(&plan.schemas)
    .bind(labels_json(&plan.base.labels))
    .bind(plan.base.updated_at)
    .bind(plan.base.ready)
    .execute(&mut *conn)
    .await
    .map_err(translate_sqlx_error)?;
    Ok(result.rows_affected())
}

fn map_row_to_platform(row: &PgRow) -> Result<Platform> {
    let username: Option<String> = row.get("username");
    let password: Option<String> = row.get("password");
    let credentials = username.map(|username| Credentials {
        basic: Some(BasicCredentials {
            username,
            password: password.unwrap_or_default(),
        }),
    });
    Ok(Platform {
        base: base_from_row(row)?,
        name: row.get("name"),
        platform_type: row.get("type"),
        description: row.get::<Option<String>, _>("description").unwrap_or_default(),
        credentials,
        active: row.get("active"),
        last_active: row.get::<DateTime<Utc>, _>("last_active"),
    })
}

async fn insert_platform(conn: &mut PgConnection, platform: &Platform) -> Result<i64> {
    let basic = platform.credentials.as_ref().and_then(|c| c.basic.as_ref());
    let row = sqlx::query(
        r#"
        INSERT INTO platforms
            (id, name, type, description, username, password, active,
             last_active, labels, created_at, updated_at, ready)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING paging_sequence
        "#,
    )
    .bind(&platform.base.id)
    .bind(&platform.name)
    .bind(&platform.platform_type)
    .bind(nullable(&platform.description))
    .bind(basic.map(|b| b.username.as_str()))
    .bind(basic.map(|b| b.password.as_str()))
    .bind(platform.active)
    .bind(platform.last_active)
    .bind(labels_json(&platform.base.labels))
    .bind(platform.base.created_at)
    .bind(platform.base.updated_at)
    .bind(platform.base.ready)
    .fetch_one(&mut *conn)
    .await
    .map_err(translate_sqlx_error)?;
    Ok(row.get("paging_sequence"))
}

async fn update_platform(conn: &mut PgConnection, platform: &Platform) -> Result<u64> {
    let basic = platform.credentials.as_ref().and_then(|c| c.basic.as_ref());
    let result = sqlx::query(
        r#"
        UPDATE platforms SET
            name = $2, type = $3, description = $4, username = $5,
            password = $6, active = $7, last_active = $8, labels = $9,
            updated_at = $10, ready = $11
        WHERE id = $1
        "#,
    )
    .bind(&platform.base.id)
    .bind(&platform.name)
    .bind(&platform.platform_type)
    .bind(nullable(&platform.description))
    .bind(basic.map(|b| b.username.as_str()))
    .bind(basic.map(|b| b.password.as_str()))
    .bind(platform.active)
    .bind(platform.last_active)
    .bind(labels_json(&platform.base.labels))
    .bind(platform.base.updated_at)
    .bind(platform.base.ready)
    .execute(&mut *conn)
    .await
    .map_err(translate_sqlx_error)?;
    Ok(result.rows_affected())
}

fn map_row_to_visibility(row: &PgRow) -> Result<Visibility> {
    Ok(Visibility {
        base: base_from_row(row)?,
        platform_id: row.get::<Option<String>, _>("platform_id").unwrap_or_default(),
        service_plan_id: row.get("service_plan_id"),
    })
}

async fn insert_visibility(conn: &mut PgConnection, visibility: &Visibility) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO visibilities
            (id, platform_id, service_plan_id, labels, created_at, updated_at, ready)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING paging_sequence
        "#,
    )
    .bind(&visibility.base.id)
    .bind(nullable(&visibility.platform_id))
    .bind(&visibility.service_plan_id)
    .bind(labels_json(&visibility.base.labels))
    .bind(visibility.base.created_at)
    .bind(visibility.base.updated_at)
    .bind(visibility.base.ready)
    .fetch_one(&mut *conn)
    .await
    .map_err(translate_sqlx_error)?;
    Ok(row.get("paging_sequence"))
}

async fn update_visibility(conn: &mut PgConnection, visibility: &Visibility) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE visibilities SET
            platform_id = $2, service_plan_id = $3, labels = $4,
            updated_at = $5, ready = $6
        WHERE id = $1
        "#,
    )
    .bind(&visibility.base.id)
    .bind(nullable(&visibility.platform_id))
    .bind(&visibility.service_plan_id)
    .bind(labels_json(&visibility.base.labels))
    .bind(visibility.base.updated_at)
    .bind(visibility.base.ready)
    .execute(&mut *conn)
    .await
    .map_err(translate_sqlx_error)?;
    Ok(result.rows_affected())
}

fn map_row_to_instance(row: &PgRow) -> Result<ServiceInstance> {
    Ok(ServiceInstance {
        base: base_from_row(row)?,
        name: row.get("name"),
        service_plan_id: row.get("service_plan_id"),
        platform_id: row.get("platform_id"),
        maintenance_info: row.get::<Option<serde_json::Value>, _>("maintenance_info"),
        parameters: row.get::<Option<serde_json::Value>, _>("parameters"),
        dashboard_url: row.get::<Option<String>, _>("dashboard_url"),
        last_operation: row.get::<Option<String>, _>("last_operation"),
        usable: row.get("usable"),
        shared: row.get("shared"),
    })
}

async fn insert_instance(conn: &mut PgConnection, instance: &ServiceInstance) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO service_instances
            (id, name, service_plan_id, platform_id, maintenance_info,
             parameters, dashboard_url, last_operation, usable, shared,
             labels, created_at, updated_at, ready)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING paging_sequence
        "#,
    )
    .bind(&instance.base.id)
    .bind(&instance.name)
    .bind(&instance.service_plan_id)
    .bind(&instance.platform_id)
    .bind(&instance.maintenance_info)
    .bind(&instance.parameters)
    .bind(&instance.dashboard_url)
    .bind(&instance.last_operation)
    .bind(instance.usable)
    .bind(instance.shared)
    .bind(labels_json(&instance.base.labels))
    .bind(instance.base.created_at)
    .bind(instance.base.updated_at)
    .bind(instance.base.ready)
    .fetch_one(&mut *conn)
    .await
    .map_err(translate_sqlx_error)?;
    Ok(row.get("paging_sequence"))
}

async fn update_instance(conn: &mut PgConnection, instance: &ServiceInstance) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE service_instances SET
            name = $2, service_plan_id = $3, platform_id = $4,
            maintenance_info = $5, parameters = $6, dashboard_url = $7,
            last_operation = $8, usable = $9, shared = $10, labels = $11,
            updated_at = $12, ready = $13
        WHERE id = $1
        "#,
    )
    .bind(&instance.base.id)
    .bind(&instance.name)
    .bind(&instance.service_plan_id)
    .bind(&instance.platform_id)
    .bind(&instance.maintenance_info)
    .bind(&instance.parameters)
    .bind(&instance.dashboard_url)
    .bind(&instance.last_operation)
    .bind(instance.usable)
    .bind(instance.shared)
    .bind(labels_json(&instance.base.labels))
    .bind(instance.base.updated_at)
    .bind(instance.base.ready)
    .execute(&mut *conn)
    .await
    .map_err(translate_sqlx_error)?;
    Ok(result.rows_affected())
}

fn map_row_to_binding(row: &PgRow) -> Result<ServiceBinding> {
    Ok(ServiceBinding {
        base: base_from_row(row)?,
        name: row.get("name"),
        service_instance_id: row.get("service_instance_id"),
        credentials: row.get::<Option<serde_json::Value>, _>("credentials"),
        parameters: row.get::<Option<serde_json::Value>, _>("parameters"),
        last_operation: row.get::<Option<String>, _>("last_operation"),
    })
}

async fn insert_binding(conn: &mut PgConnection, binding: &ServiceBinding) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO service_bindings
            (id, name, service_instance_id, credentials, parameters,
             last_operation, labels, created_at, updated_at, ready)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING paging_sequence
        "#,
    )
    .bind(&binding.base.id)
    .bind(&binding.name)
    .bind(&binding.service_instance_id)
    .bind(&binding.credentials)
    .bind(&binding.parameters)
    .bind(&binding.last_operation)
    .bind(labels_json(&binding.base.labels))
    .bind(binding.base.created_at)
    .bind(binding.base.updated_at)
    .bind(binding.base.ready)
    .fetch_one(&mut *conn)
    .await
    .map_err(translate_sqlx_error)?;
    Ok(row.get("paging_sequence"))
}

async fn update_binding(conn: &mut PgConnection, binding: &ServiceBinding) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE service_bindings SET
            name = $2, service_instance_id = $3, credentials = $4,
            parameters = $5, last_operation = $6, labels = $7,
            updated_at = $8, ready = $9
        WHERE id = $1
        "#,
    )
    .bind(&binding.base.id)
    .bind(&binding.name)
    .bind(&binding.service_instance_id)
    .bind(&binding.credentials)
    .bind(&binding.parameters)
    .bind(&binding.last_operation)
    .bind(labels_json(&binding.base.labels))
    .bind(binding.base.updated_at)
    .bind(binding.base.ready)
    .execute(&mut *conn)
    .await
    .map_err(translate_sqlx_error)?;
    Ok(result.rows_affected())
}

fn map_row_to_operation(row: &PgRow) -> Result<Operation> {
    let errors: Option<serde_json::Value> = row.get("errors");
    let resource_type: String = row.get("resource_type");
    Ok(Operation {
        base: base_from_row(row)?,
        operation_type: OperationType::from_str(row.get::<String, _>("type").as_str())
            .unwrap_or(OperationType::Update),
        state: OperationState::from_str(row.get::<String, _>("state").as_str())
            .unwrap_or(OperationState::Failed),
        category: OperationCategory::from_str(row.get::<String, _>("category").as_str())
            .unwrap_or(OperationCategory::AsyncRequest),
        resource_id: row.get("resource_id"),
        resource_type: ObjectType::from_api_name(&resource_type)
            .unwrap_or(ObjectType::Operation),
        correlation_id: row.get("correlation_id"),
        platform_id: row.get::<Option<String>, _>("platform_id"),
        errors: errors.and_then(|e| serde_json::from_value::<OperationErrors>(e).ok()),
        reschedule: row.get("reschedule"),
        reschedule_timestamp: row.get::<Option<DateTime<Utc>>, _>("reschedule_timestamp"),
        deletion_scheduled: row.get::<Option<DateTime<Utc>>, _>("deletion_scheduled"),
    })
}

async fn insert_operation(conn: &mut PgConnection, operation: &Operation) -> Result<i64> {
    let errors = operation
        .errors
        .as_ref()
        .map(serde_json::to_value)
        .transpose()?;
    let row = sqlx::query(
        r#"
        INSERT INTO operations
            (id, type, state, category, resource_id, resource_type,
             correlation_id, platform_id, errors, reschedule,
             reschedule_timestamp, deletion_scheduled, labels, created_at,
             updated_at, ready)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16)
        RETURNING paging_sequence
        "#,
    )
    .bind(&operation.base.id)
    .bind(operation.operation_type.as_str())
    .bind(operation.state.as_str())
    .bind(operation.category.as_str())
    .bind(&operation.resource_id)
    .bind(operation.resource_type.api_name())
    .bind(&operation.correlation_id)
    .bind(&operation.platform_id)
    .bind(errors)
    .bind(operation.reschedule)
    .bind(operation.reschedule_timestamp)
    .bind(operation.deletion_scheduled)
    .bind(labels_json(&operation.base.labels))
    .bind(operation.base.created_at)
    .bind(operation.base.updated_at)
    .bind(operation.base.ready)
    .fetch_one(&mut *conn)
    .await
    .map_err(translate_sqlx_error)?;
    Ok(row.get("paging_sequence"))
}

async fn update_operation(conn: &mut PgConnection, operation: &Operation) -> Result<u64> {
    let errors = operation
        .errors
        .as_ref()
        .map(serde_json::to_value)
        .transpose()?;
    let result = sqlx::query(
        r#"
        UPDATE operations SET
            type = $2, state = $3, category = $4, resource_id = $5,
            resource_type = $6, correlation_id = $7, platform_id = $8,
            errors = $9, reschedule = $10, reschedule_timestamp = $11,
            deletion_scheduled = $12, labels = $13, updated_at = $14,
            ready = $15
        WHERE id = $1
        "#,
    )
    .bind(&operation.base.id)
    .bind(operation.operation_type.as_str())
    .bind(operation.state.as_str())
    .bind(operation.category.as_str())
    .bind(&operation.resource_id)
    .bind(operation.resource_type.api_name())
    .bind(&operation.correlation_id)
    .bind(&operation.platform_id)
    .bind(errors)
    .bind(operation.reschedule)
    .bind(operation.reschedule_timestamp)
    .bind(operation.deletion_scheduled)
    .bind(labels_json(&operation.base.labels))
    .bind(operation.base.updated_at)
    .bind(operation.base.ready)
    .execute(&mut *conn)
    .await
    .map_err(translate_sqlx_error)?;
    Ok(result.rows_affected())
}
