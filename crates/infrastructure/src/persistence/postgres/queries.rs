//! Criteria to SQL translation
//!
//! Field names are resolved against a per-table whitelist, so criteria can
//! never smuggle arbitrary SQL; values always travel as bind parameters with
//! an explicit cast chosen by the column type.

use sm_domain::errors::{DomainError, Result};
use sm_domain::query::{Criterion, CriterionType, Operator, OrderType};
use sm_domain::types::ObjectType;

pub fn table_name(object_type: ObjectType) -> &'static str {
    match object_type {
        ObjectType::ServiceBroker => "service_brokers",
        ObjectType::ServiceOffering => "service_offerings",
        ObjectType::ServicePlan => "service_plans",
        ObjectType::Platform => "platforms",
        ObjectType::Visibility => "visibilities",
        ObjectType::ServiceInstance => "service_instances",
        ObjectType::ServiceBinding => "service_bindings",
        ObjectType::Operation => "operations",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Text,
    Boolean,
    Timestamp,
    BigInt,
}

fn column_kind(object_type: ObjectType, field: &str) -> Option<ColumnKind> {
    let shared = match field {
        "id" => Some(ColumnKind::Text),
        "created_at" | "updated_at" => Some(ColumnKind::Timestamp),
        "ready" => Some(ColumnKind::Boolean),
        "paging_sequence" => Some(ColumnKind::BigInt),
        _ => None,
    };
    if shared.is_some() {
        return shared;
    }
    match (object_type, field) {
        (ObjectType::ServiceBroker, "name")
        | (ObjectType::ServiceBroker, "broker_url")
        | (ObjectType::ServiceBroker, "description") => Some(ColumnKind::Text),
        (ObjectType::ServiceOffering, "name")
        | (ObjectType::ServiceOffering, "catalog_id")
        | (ObjectType::ServiceOffering, "catalog_name")
        | (ObjectType::ServiceOffering, "broker_id") => Some(ColumnKind::Text),
        (ObjectType::ServiceOffering, "bindable") => Some(ColumnKind::Boolean),
        (ObjectType::ServicePlan, "name")
        | (ObjectType::ServicePlan, "catalog_id")
        | (ObjectType::ServicePlan, "catalog_name")
        | (ObjectType::ServicePlan, "service_offering_id") => Some(ColumnKind::Text),
        (ObjectType::ServicePlan, "free") => Some(ColumnKind::Boolean),
        (ObjectType::Platform, "name") | (ObjectType::Platform, "type") => Some(ColumnKind::Text),
        (ObjectType::Platform, "active") => Some(ColumnKind::Boolean),
        (ObjectType::Platform, "last_active") => Some(ColumnKind::Timestamp),
        (ObjectType::Visibility, "platform_id") | (ObjectType::Visibility, "service_plan_id") => {
            Some(ColumnKind::Text)
        }
        (ObjectType::ServiceInstance, "name")
        | (ObjectType::ServiceInstance, "service_plan_id")
        | (ObjectType::ServiceInstance, "platform_id") => Some(ColumnKind::Text),
        (ObjectType::ServiceInstance, "usable") | (ObjectType::ServiceInstance, "shared") => {
            Some(ColumnKind::Boolean)
        }
        (ObjectType::ServiceBinding, "name") | (ObjectType::ServiceBinding, "service_instance_id") => {
            Some(ColumnKind::Text)
        }
        (ObjectType::Operation, "type")
        | (ObjectType::Operation, "state")
        | (ObjectType::Operation, "category")
        | (ObjectType::Operation, "resource_id")
        | (ObjectType::Operation, "resource_type")
        | (ObjectType::Operation, "correlation_id")
        | (ObjectType::Operation, "platform_id") => Some(ColumnKind::Text),
        (ObjectType::Operation, "reschedule") => Some(ColumnKind::Boolean),
        (ObjectType::Operation, "reschedule_timestamp")
        | (ObjectType::Operation, "deletion_scheduled") => Some(ColumnKind::Timestamp),
        _ => None,
    }
}

fn cast(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Text => "::text",
        ColumnKind::Boolean => "::boolean",
        ColumnKind::Timestamp => "::timestamptz",
        ColumnKind::BigInt => "::bigint",
    }
}

/// The WHERE/ORDER/LIMIT tail of a statement plus its bind values, starting
/// at placeholder `$offset`.
#[derive(Debug, Default)]
pub struct SqlQuery {
    pub where_clause: String,
    pub order_clause: String,
    pub limit_clause: String,
    pub binds: Vec<String>,
}

impl SqlQuery {
    /// The full tail for SELECT statements.
    pub fn clause(&self) -> String {
        format!("{}{}{}", self.where_clause, self.order_clause, self.limit_clause)
    }

    /// The filter tail for DELETE and COUNT statements.
    pub fn where_only(&self) -> &str {
        &self.where_clause
    }
}

pub fn build_query(
    object_type: ObjectType,
    criteria: &[Criterion],
    offset: usize,
) -> Result<SqlQuery> {
    let mut conditions: Vec<String> = Vec::new();
    let mut binds: Vec<String> = Vec::new();
    let mut order_clause = String::new();
    let mut limit_clause = String::new();
    let mut next = offset;

    for criterion in criteria {
        criterion.validate()?;
        match criterion.criterion_type {
            CriterionType::Field => {
                let kind = column_kind(object_type, &criterion.left_op).ok_or_else(|| {
                    DomainError::bad_request(format!(
                        "unsupported query field {} for {}",
                        criterion.left_op, object_type
                    ))
                })?;
                let column = criterion.left_op.as_str();
                let condition = match criterion.operator {
                    Operator::Equals => {
                        binds.push(criterion.right_op[0].clone());
                        next += 1;
                        format!("{} = ${}{}", column, next, cast(kind))
                    }
                    Operator::NotEquals => {
                        binds.push(criterion.right_op[0].clone());
                        next += 1;
                        format!("{} != ${}{}", column, next, cast(kind))
                    }
                    Operator::In | Operator::NotIn => {
                        let mut placeholders = Vec::with_capacity(criterion.right_op.len());
                        for value in &criterion.right_op {
                            binds.push(value.clone());
                            next += 1;
                            placeholders.push(format!("${}{}", next, cast(kind)));
                        }
                        let negation = if criterion.operator == Operator::NotIn {
                            "NOT "
                        } else {
                            ""
                        };
                        format!("{}{} IN ({})", negation, column, placeholders.join(", "))
                    }
                    Operator::GreaterThan
                    | Operator::GreaterThanOrEqual
                    | Operator::LessThan
                    | Operator::LessThanOrEqual => {
                        binds.push(criterion.right_op[0].clone());
                        next += 1;
                        let symbol = match criterion.operator {
                            Operator::GreaterThan => ">",
                            Operator::GreaterThanOrEqual => ">=",
                            Operator::LessThan => "<",
                            _ => "<=",
                        };
                        format!("{} {} ${}{}", column, symbol, next, cast(kind))
                    }
                    Operator::Exists => format!("{} IS NOT NULL", column),
                    Operator::EqualsOrNil => {
                        binds.push(criterion.right_op[0].clone());
                        next += 1;
                        format!("({0} IS NULL OR {0} = ${1}{2})", column, next, cast(kind))
                    }
                };
                conditions.push(condition);
            }
            CriterionType::Label => {
                match criterion.operator {
                    Operator::Equals => {
                        binds.push(criterion.left_op.clone());
                        binds.push(criterion.right_op[0].clone());
                        conditions.push(format!(
                            "labels -> (${}::text) ? (${}::text)",
                            next + 1,
                            next + 2
                        ));
                        next += 2;
                    }
                    Operator::Exists => {
                        binds.push(criterion.left_op.clone());
                        conditions.push(format!("labels ? (${}::text)", next + 1));
                        next += 1;
                    }
                    _ => {
                        return Err(DomainError::bad_request(format!(
                            "unsupported label query operator: {}",
                            criterion.operator.as_str()
                        )))
                    }
                }
            }
            CriterionType::ResultOrder => {
                let kind = column_kind(object_type, &criterion.left_op).ok_or_else(|| {
                    DomainError::bad_request(format!(
                        "unsupported order field {} for {}",
                        criterion.left_op, object_type
                    ))
                })?;
                let _ = kind;
                let direction = match criterion.order_type {
                    Some(OrderType::Descending) => "DESC",
                    _ => "ASC",
                };
                order_clause = format!(" ORDER BY {} {}", criterion.left_op, direction);
            }
            CriterionType::ResultLimit => {
                let limit: usize = criterion
                    .right_op
                    .first()
                    .and_then(|l| l.parse().ok())
                    .ok_or_else(|| DomainError::bad_request("invalid result limit"))?;
                limit_clause = format!(" LIMIT {}", limit);
            }
        }
    }

    let mut where_clause = String::new();
    if !conditions.is_empty() {
        where_clause.push_str(" WHERE ");
        where_clause.push_str(&conditions.join(" AND "));
    }
    if order_clause.is_empty() {
        order_clause = " ORDER BY paging_sequence ASC".to_string();
    }

    Ok(SqlQuery {
        where_clause,
        order_clause,
        limit_clause,
        binds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equals_builds_a_bound_condition() {
        let query = build_query(
            ObjectType::ServiceOffering,
            &[Criterion::by_field(Operator::Equals, "broker_id", "b1")],
            0,
        )
        .unwrap();
        assert_eq!(
            query.clause(),
            " WHERE broker_id = $1::text ORDER BY paging_sequence ASC"
        );
        assert_eq!(query.binds, vec!["b1"]);
    }

    #[test]
    fn in_lists_expand_to_multiple_placeholders() {
        let query = build_query(
            ObjectType::ServicePlan,
            &[Criterion::by_field_in(
                "id",
                vec!["a".to_string(), "b".to_string()],
            )],
            0,
        )
        .unwrap();
        assert!(query.clause().contains("id IN ($1::text, $2::text)"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = build_query(
            ObjectType::ServicePlan,
            &[Criterion::by_field(Operator::Equals, "nope; DROP TABLE", "x")],
            0,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "BadRequest");
    }

    #[test]
    fn timestamp_fields_get_timestamptz_casts() {
        let query = build_query(
            ObjectType::Operation,
            &[Criterion::by_field(
                Operator::LessThan,
                "updated_at",
                "2024-01-01T00:00:00Z",
            )],
            0,
        )
        .unwrap();
        assert!(query.clause().contains("updated_at < $1::timestamptz"));
    }
}
