//! Property-based tests for the catalog differ.
//!
//! These tests use proptest to verify the differ invariants hold across
//! randomly generated catalog pairs: diffing is deterministic, and applying
//! a diff then re-diffing the same catalog produces no structural delta.

use std::collections::BTreeMap;

use proptest::prelude::*;
use serde_json::json;

use sm_domain::catalog::{parse_catalog, SbCatalog};
use sm_domain::catalog_diff::{diff_catalog, CatalogDiff};
use sm_domain::types::{ServiceOffering, ServicePlan};

fn arb_identifier() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{2,12}"
}

/// A generated catalog: service name -> plan names. Identifiers double as
/// catalog ids so generated catalogs are internally consistent.
fn arb_catalog_shape() -> impl Strategy<Value = BTreeMap<String, Vec<String>>> {
    prop::collection::btree_map(
        arb_identifier(),
        prop::collection::vec(arb_identifier(), 1..4).prop_map(|mut plans| {
            plans.sort();
            plans.dedup();
            plans
        }),
        1..4,
    )
}

fn catalog_from_shape(shape: &BTreeMap<String, Vec<String>>) -> SbCatalog {
    let services: Vec<_> = shape
        .iter()
        .map(|(name, plans)| {
            let plans: Vec<_> = plans
                .iter()
                .map(|p| json!({"id": p, "name": p, "description": "d", "free": true}))
                .collect();
            json!({"id": name, "name": name, "description": "d", "plans": plans})
        })
        .collect();
    parse_catalog(&json!({ "services": services })).unwrap()
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

/// The structural identity of a diff: which catalog ids are created, updated
/// and deleted. Row ids and timestamps are storage concerns and excluded.
fn shape(diff: &CatalogDiff) -> Vec<(String, String, String)> {
    let mut entries = Vec::new();
    for o in &diff.offerings.to_create {
        entries.push(("offering".into(), "create".into(), o.catalog_id.clone()));
    }
    for o in &diff.offerings.to_update {
        entries.push(("offering".into(), "update".into(), o.catalog_id.clone()));
    }
    for o in &diff.offerings.to_delete {
        entries.push(("offering".into(), "delete".into(), o.catalog_id.clone()));
    }
    for p in &diff.plans.to_create {
        entries.push(("plan".into(), "create".into(), p.catalog_id.clone()));
    }
    for p in &diff.plans.to_update {
        entries.push(("plan".into(), "update".into(), p.catalog_id.clone()));
    }
    for p in &diff.plans.to_delete {
        entries.push(("plan".into(), "delete".into(), p.catalog_id.clone()));
    }
    entries
}

proptest! {
    #[test]
    fn diffing_twice_yields_the_same_delta(
        old_shape in arb_catalog_shape(),
        new_shape in arb_catalog_shape(),
    ) {
        let old = catalog_from_shape(&old_shape);
        let new = catalog_from_shape(&new_shape);

        let seeded = diff_catalog("b1", &old, &[], &[]).unwrap();
        let (offerings, plans) = apply(&seeded);

        let first = diff_catalog("b1", &new, &offerings, &plans).unwrap();
        let second = diff_catalog("b1", &new, &offerings, &plans).unwrap();
        prop_assert_eq!(shape(&first), shape(&second));
    }

    #[test]
    fn applying_a_diff_then_rediffing_creates_and_deletes_nothing(
        old_shape in arb_catalog_shape(),
        new_shape in arb_catalog_shape(),
    ) {
        let old = catalog_from_shape(&old_shape);
        let new = catalog_from_shape(&new_shape);

        let seeded = diff_catalog("b1", &old, &[], &[]).unwrap();
        let (offerings, plans) = apply(&seeded);

        let diff = diff_catalog("b1", &new, &offerings, &plans).unwrap();
        let mut surviving_offerings: Vec<ServiceOffering> = offerings
            .into_iter()
            .filter(|o| !diff.offerings.to_delete.iter().any(|d| d.base.id == o.base.id))
            .filter(|o| !diff.offerings.to_update.iter().any(|u| u.base.id == o.base.id))
            .collect();
        surviving_offerings.extend(diff.offerings.to_create.iter().cloned());
        surviving_offerings.extend(diff.offerings.to_update.iter().cloned());
        let mut surviving_plans: Vec<ServicePlan> = plans
            .into_iter()
            .filter(|p| !diff.plans.to_delete.iter().any(|d| d.base.id == p.base.id))
            .filter(|p| !diff.plans.to_update.iter().any(|u| u.base.id == p.base.id))
            .collect();
        surviving_plans.extend(diff.plans.to_create.iter().cloned());
        surviving_plans.extend(diff.plans.to_update.iter().cloned());

        let rediff = diff_catalog("b1", &new, &surviving_offerings, &surviving_plans).unwrap();
        prop_assert!(rediff.offerings.to_create.is_empty());
        prop_assert!(rediff.offerings.to_delete.is_empty());
        prop_assert!(rediff.plans.to_create.is_empty());
        prop_assert!(rediff.plans.to_delete.is_empty());
    }
}
