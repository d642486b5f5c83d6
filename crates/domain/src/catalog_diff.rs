//! Catalog differ
//!
//! Computes the create/update/delete sets that turn the stored offerings and
//! plans of a broker into the state advertised by a freshly fetched catalog.
//!
//! Matching is by `catalog_id` (offerings within the broker, plans within
//! their offering). A changed `catalog_name` under a stable `catalog_id` is a
//! rename and becomes an update; a changed `catalog_id` under a stable
//! `catalog_name` is a conflict and rejects the whole catalog. The differ is
//! deterministic and performs no I/O; referential integrity against service
//! instances is enforced by the storage layer when the deletes are applied.

use std::collections::{HashMap, HashSet};

use crate::catalog::SbCatalog;
use crate::errors::{DomainError, Result};
use crate::types::{Base, ServiceOffering, ServicePlan};

#[derive(Debug, Clone)]
pub struct Delta<T> {
    pub to_create: Vec<T>,
    pub to_update: Vec<T>,
    pub to_delete: Vec<T>,
}

impl<T> Default for Delta<T> {
    fn default() -> Self {
        Self {
            to_create: Vec::new(),
            to_update: Vec::new(),
            to_delete: Vec::new(),
        }
    }
}

impl<T> Delta<T> {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CatalogDiff {
    pub offerings: Delta<ServiceOffering>,
    pub plans: Delta<ServicePlan>,
}

impl CatalogDiff {
    pub fn is_empty(&self) -> bool {
        self.offerings.is_empty() && self.plans.is_empty()
    }
}

/// Diffs a parsed catalog against the rows currently owned by the broker.
pub fn diff_catalog(
    broker_id: &str,
    catalog: &SbCatalog,
    existing_offerings: &[ServiceOffering],
    existing_plans: &[ServicePlan],
) -> Result<CatalogDiff> {
    validate_catalog_uniqueness(catalog)?;

    let offerings_by_catalog_id: HashMap<&str, &ServiceOffering> = existing_offerings
        .iter()
        .map(|o| (o.catalog_id.as_str(), o))
        .collect();
    let offerings_by_catalog_name: HashMap<&str, &ServiceOffering> = existing_offerings
        .iter()
        .map(|o| (o.catalog_name.as_str(), o))
        .collect();

    let mut diff = CatalogDiff::default();
    let mut seen_offering_ids: HashSet<&str> = HashSet::new();

    for service in &catalog.services {
        seen_offering_ids.insert(service.catalog_id.as_str());

        let (offering_id, existing_plans_of_offering) = match offerings_by_catalog_id
            .get(service.catalog_id.as_str())
        {
            Some(existing) => {
                diff.offerings
                    .to_update
                    .push(service.to_offering(broker_id, existing.base.clone()));
                let plans: Vec<&ServicePlan> = existing_plans
                    .iter()
                    .filter(|p| p.service_offering_id == existing.base.id)
                    .collect();
                (existing.base.id.clone(), plans)
            }
            None => {
                // A known catalog_name under an unknown catalog_id means the
                // broker rewrote the service identity; refuse the catalog.
                if let Some(clashing) = offerings_by_catalog_name.get(service.catalog_name.as_str())
                {
                    if clashing.catalog_id != service.catalog_id {
                        return Err(DomainError::conflict(format!(
                            "service offering with catalog name {} already exists for this broker under a different catalog id {}",
                            service.catalog_name, clashing.catalog_id
                        )));
                    }
                }
                let offering = service.to_offering(broker_id, Base::new());
                let offering_id = offering.base.id.clone();
                diff.offerings.to_create.push(offering);
                (offering_id, Vec::new())
            }
        };

        diff_plans_of_offering(&offering_id, service, &existing_plans_of_offering, &mut diff)?;
    }

    for existing in existing_offerings {
        if !seen_offering_ids.contains(existing.catalog_id.as_str()) {
            for plan in existing_plans {
                if plan.service_offering_id == existing.base.id {
                    diff.plans.to_delete.push(plan.clone());
                }
            }
            diff.offerings.to_delete.push(existing.clone());
        }
    }

    Ok(diff)
}

fn diff_plans_of_offering(
    offering_id: &str,
    service: &crate::catalog::CatalogService,
    existing_plans: &[&ServicePlan],
    diff: &mut CatalogDiff,
) -> Result<()> {
    let plans_by_catalog_id: HashMap<&str, &ServicePlan> = existing_plans
        .iter()
        .map(|p| (p.catalog_id.as_str(), *p))
        .collect();
    let plans_by_catalog_name: HashMap<&str, &ServicePlan> = existing_plans
        .iter()
        .map(|p| (p.catalog_name.as_str(), *p))
        .collect();

    let mut seen_plan_ids: HashSet<&str> = HashSet::new();
    for plan in &service.plans {
        seen_plan_ids.insert(plan.catalog_id.as_str());

        match plans_by_catalog_id.get(plan.catalog_id.as_str()) {
            Some(existing) => {
                diff.plans
                    .to_update
                    .push(plan.to_plan(offering_id, existing.base.clone()));
            }
            None => {
                if let Some(clashing) = plans_by_catalog_name.get(plan.catalog_name.as_str()) {
                    if clashing.catalog_id != plan.catalog_id {
                        return Err(DomainError::conflict(format!(
                            "service plan with catalog name {} already exists for service offering {} under a different catalog id {}",
                            plan.catalog_name, service.catalog_name, clashing.catalog_id
                        )));
                    }
                }
                diff.plans.to_create.push(plan.to_plan(offering_id, Base::new()));
            }
        }
    }

    for existing in existing_plans {
        if !seen_plan_ids.contains(existing.catalog_id.as_str()) {
            diff.plans.to_delete.push((*existing).clone());
        }
    }

    Ok(())
}

fn validate_catalog_uniqueness(catalog: &SbCatalog) -> Result<()> {
    let mut service_ids = HashSet::new();
    let mut service_names = HashSet::new();
    for service in &catalog.services {
        if !service_ids.insert(service.catalog_id.as_str()) {
            return Err(DomainError::bad_request(format!(
                "catalog contains duplicate service id {}",
                service.catalog_id
            )));
        }
        if !service_names.insert(service.catalog_name.as_str()) {
            return Err(DomainError::bad_request(format!(
                "catalog contains duplicate service name {}",
                service.catalog_name
            )));
        }
        let mut plan_ids = HashSet::new();
        let mut plan_names = HashSet::new();
        for plan in &service.plans {
            if !plan_ids.insert(plan.catalog_id.as_str()) {
                return Err(DomainError::bad_request(format!(
                    "service {} contains duplicate plan id {}",
                    service.catalog_name, plan.catalog_id
                )));
            }
            if !plan_names.insert(plan.catalog_name.as_str()) {
                return Err(DomainError::bad_request(format!(
                    "service {} contains duplicate plan name {}",
                    service.catalog_name, plan.catalog_name
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parse_catalog;
    use serde_json::json;

    fn catalog(services: serde_json::Value) -> SbCatalog {
        parse_catalog(&json!({ "services": services })).unwrap()
    }

    fn service(id: &str, name: &str, plans: serde_json::Value) -> serde_json::Value {
        json!({"id": id, "name": name, "description": "d", "plans": plans})
    }

    fn plan(id: &str, name: &str) -> serde_json::Value {
        json!({"id": id, "name": name, "description": "d", "free": true})
    }

    fn apply(diff: &CatalogDiff) -> (Vec<ServiceOffering>, Vec<ServicePlan>) {
        let offerings = diff
            .offerings
            .to_create
            .iter()
            .chain(diff.offerings.to_update.iter())
            .cloned()
            .collect();
        let plans = diff
            .plans
            .to_create
            .iter()
            .chain(diff.plans.to_update.iter())
            .cloned()
            .collect();
        (offerings, plans)
    }

    #[test]
    fn fresh_catalog_creates_everything() {
        let cat = catalog(json!([service("s1", "svc", json!([plan("p1", "small")]))]));
        let diff = diff_catalog("b1", &cat, &[], &[]).unwrap();
        assert_eq!(diff.offerings.to_create.len(), 1);
        assert_eq!(diff.plans.to_create.len(), 1);
        assert!(diff.offerings.to_delete.is_empty());
        assert_eq!(diff.plans.to_create[0].service_offering_id, diff.offerings.to_create[0].base.id);
    }

    #[test]
    fn rediff_after_apply_yields_empty_delta() {
        let cat = catalog(json!([service("s1", "svc", json!([plan("p1", "small"), plan("p2", "big")]))]));
        let diff = diff_catalog("b1", &cat, &[], &[]).unwrap();
        let (offerings, plans) = apply(&diff);
        let rediff = diff_catalog("b1", &cat, &offerings, &plans).unwrap();
        assert!(rediff.offerings.to_create.is_empty());
        assert!(rediff.plans.to_create.is_empty());
        assert!(rediff.offerings.to_delete.is_empty());
        assert!(rediff.plans.to_delete.is_empty());
        // unchanged entries still surface as updates so renames propagate
        assert_eq!(rediff.offerings.to_update.len(), 1);
    }

    #[test]
    fn removed_plan_lands_in_to_delete() {
        let initial = catalog(json!([service("s1", "svc", json!([plan("p1", "small"), plan("p2", "big")]))]));
        let diff = diff_catalog("b1", &initial, &[], &[]).unwrap();
        let (offerings, plans) = apply(&diff);

        let shrunk = catalog(json!([service("s1", "svc", json!([plan("p1", "small")]))]));
        let rediff = diff_catalog("b1", &shrunk, &offerings, &plans).unwrap();
        assert_eq!(rediff.plans.to_delete.len(), 1);
        assert_eq!(rediff.plans.to_delete[0].catalog_id, "p2");
    }

    #[test]
    fn rename_is_an_update_not_a_replacement() {
        let initial = catalog(json!([service("s1", "svc", json!([plan("p1", "small")]))]));
        let diff = diff_catalog("b1", &initial, &[], &[]).unwrap();
        let (offerings, plans) = apply(&diff);
        let original_id = offerings[0].base.id.clone();

        let renamed = catalog(json!([service("s1", "renamed-svc", json!([plan("p1", "small")]))]));
        let rediff = diff_catalog("b1", &renamed, &offerings, &plans).unwrap();
        assert!(rediff.offerings.to_create.is_empty());
        assert_eq!(rediff.offerings.to_update.len(), 1);
        assert_eq!(rediff.offerings.to_update[0].base.id, original_id);
        assert_eq!(rediff.offerings.to_update[0].catalog_name, "renamed-svc");
    }

    #[test]
    fn changed_offering_id_with_stable_name_is_a_conflict() {
        let initial = catalog(json!([service("s1", "svc", json!([plan("p1", "small")]))]));
        let diff = diff_catalog("b1", &initial, &[], &[]).unwrap();
        let (offerings, plans) = apply(&diff);

        let mutated = catalog(json!([service("new-id", "svc", json!([plan("p1", "small")]))]));
        let err = diff_catalog("b1", &mutated, &offerings, &plans).unwrap_err();
        assert_eq!(err.kind(), "Conflict");
    }

    #[test]
    fn changed_plan_id_with_stable_name_is_a_conflict() {
        let initial = catalog(json!([service("s1", "svc", json!([plan("p1", "small")]))]));
        let diff = diff_catalog("b1", &initial, &[], &[]).unwrap();
        let (offerings, plans) = apply(&diff);

        let mutated = catalog(json!([service("s1", "svc", json!([plan("new-id", "small")]))]));
        let err = diff_catalog("b1", &mutated, &offerings, &plans).unwrap_err();
        assert_eq!(err.kind(), "Conflict");
    }

    #[test]
    fn same_plan_id_under_two_offerings_is_allowed() {
        let cat = catalog(json!([
            service("s1", "svc-one", json!([plan("shared-plan", "small")])),
            service("s2", "svc-two", json!([plan("shared-plan", "small")])),
        ]));
        let diff = diff_catalog("b1", &cat, &[], &[]).unwrap();
        assert_eq!(diff.plans.to_create.len(), 2);
        assert_ne!(
            diff.plans.to_create[0].service_offering_id,
            diff.plans.to_create[1].service_offering_id
        );
    }

    #[test]
    fn duplicate_service_ids_in_catalog_are_rejected() {
        let cat = catalog(json!([
            service("s1", "svc-one", json!([])),
            service("s1", "svc-two", json!([])),
        ]));
        let err = diff_catalog("b1", &cat, &[], &[]).unwrap_err();
        assert_eq!(err.kind(), "BadRequest");
    }

    #[test]
    fn diff_is_deterministic() {
        let initial = catalog(json!([service("s1", "svc", json!([plan("p1", "small"), plan("p2", "big")]))]));
        let seeded = diff_catalog("b1", &initial, &[], &[]).unwrap();
        let (offerings, plans) = apply(&seeded);

        let next = catalog(json!([service("s1", "svc", json!([plan("p2", "big"), plan("p3", "huge")]))]));
        let first = diff_catalog("b1", &next, &offerings, &plans).unwrap();
        let second = diff_catalog("b1", &next, &offerings, &plans).unwrap();

        let shape = |d: &CatalogDiff| {
            (
                d.plans.to_create.iter().map(|p| p.catalog_id.clone()).collect::<Vec<_>>(),
                d.plans.to_update.iter().map(|p| p.catalog_id.clone()).collect::<Vec<_>>(),
                d.plans.to_delete.iter().map(|p| p.catalog_id.clone()).collect::<Vec<_>>(),
            )
        };
        assert_eq!(shape(&first), shape(&second));
        assert_eq!(shape(&first).0, vec!["p3"]);
        assert_eq!(shape(&first).2, vec!["p1"]);
    }
}
