//! Interceptor registry
//!
//! Providers are registered once at boot, ordered by their positional
//! constraints, and frozen behind an `Arc` for the lifetime of the process.
//! Duplicate names are rejected so chain positions stay unambiguous.

use std::collections::HashMap;
use std::sync::Arc;

use sm_domain::errors::{DomainError, Result};
use sm_domain::interceptors::{
    CreateInterceptor, DeleteInterceptor, InterceptorPosition, UpdateInterceptor,
};
use sm_domain::types::ObjectType;

struct Named<T: ?Sized> {
    name: String,
    interceptor: Arc<T>,
}

#[derive(Default)]
pub struct InterceptorRegistry {
    create: HashMap<ObjectType, Vec<Named<dyn CreateInterceptor>>>,
    update: HashMap<ObjectType, Vec<Named<dyn UpdateInterceptor>>>,
    delete: HashMap<ObjectType, Vec<Named<dyn DeleteInterceptor>>>,
}

fn insert_positioned<T: ?Sized>(
    chain: &mut Vec<Named<T>>,
    entry: Named<T>,
    position: InterceptorPosition,
) -> Result<()> {
    if chain.iter().any(|named| named.name == entry.name) {
        return Err(DomainError::internal(format!(
            "interceptor {} is already registered",
            entry.name
        )));
    }
    match position {
        InterceptorPosition::None => chain.push(entry),
        InterceptorPosition::Before(anchor) => {
            let index = chain
                .iter()
                .position(|named| named.name == anchor)
                .ok_or_else(|| {
                    DomainError::internal(format!(
                        "cannot position {} before unknown interceptor {}",
                        entry.name, anchor
                    ))
                })?;
            chain.insert(index, entry);
        }
        InterceptorPosition::After(anchor) => {
            let index = chain
                .iter()
                .position(|named| named.name == anchor)
                .ok_or_else(|| {
                    DomainError::internal(format!(
                        "cannot position {} after unknown interceptor {}",
                        entry.name, anchor
                    ))
                })?;
            chain.insert(index + 1, entry);
        }
    }
    Ok(())
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        InterceptorRegistry::default()
    }

    pub fn register_create(
        &mut self,
        object_type: ObjectType,
        name: &str,
        position: InterceptorPosition,
        interceptor: Arc<dyn CreateInterceptor>,
    ) -> Result<()> {
        insert_positioned(
            self.create.entry(object_type).or_default(),
            Named {
                name: name.to_string(),
                interceptor,
            },
            position,
        )
    }

    pub fn register_update(
        &mut self,
        object_type: ObjectType,
        name: &str,
        position: InterceptorPosition,
        interceptor: Arc<dyn UpdateInterceptor>,
    ) -> Result<()> {
        insert_positioned(
            self.update.entry(object_type).or_default(),
            Named {
                name: name.to_string(),
                interceptor,
            },
            position,
        )
    }

    pub fn register_delete(
        &mut self,
        object_type: ObjectType,
        name: &str,
        position: InterceptorPosition,
        interceptor: Arc<dyn DeleteInterceptor>,
    ) -> Result<()> {
        insert_positioned(
            self.delete.entry(object_type).or_default(),
            Named {
                name: name.to_string(),
                interceptor,
            },
            position,
        )
    }

    pub fn create_interceptors(&self, object_type: ObjectType) -> Vec<Arc<dyn CreateInterceptor>> {
        self.create
            .get(&object_type)
            .map(|chain| chain.iter().map(|named| Arc::clone(&named.interceptor)).collect())
            .unwrap_or_default()
    }

    pub fn update_interceptors(&self, object_type: ObjectType) -> Vec<Arc<dyn UpdateInterceptor>> {
        self.update
            .get(&object_type)
            .map(|chain| chain.iter().map(|named| Arc::clone(&named.interceptor)).collect())
            .unwrap_or_default()
    }

    pub fn delete_interceptors(&self, object_type: ObjectType) -> Vec<Arc<dyn DeleteInterceptor>> {
        self.delete
            .get(&object_type)
            .map(|chain| chain.iter().map(|named| Arc::clone(&named.interceptor)).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait::async_trait]
    impl CreateInterceptor for Noop {}

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = InterceptorRegistry::new();
        registry
            .register_create(
                ObjectType::ServiceBroker,
                "first",
                InterceptorPosition::None,
                Arc::new(Noop),
            )
            .unwrap();
        let err = registry
            .register_create(
                ObjectType::ServiceBroker,
                "first",
                InterceptorPosition::None,
                Arc::new(Noop),
            )
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn before_and_after_position_relative_to_anchors() {
        let mut registry = InterceptorRegistry::new();
        registry
            .register_create(
                ObjectType::ServiceBroker,
                "anchor",
                InterceptorPosition::None,
                Arc::new(Noop),
            )
            .unwrap();
        registry
            .register_create(
                ObjectType::ServiceBroker,
                "early",
                InterceptorPosition::Before("anchor".to_string()),
                Arc::new(Noop),
            )
            .unwrap();
        registry
            .register_create(
                ObjectType::ServiceBroker,
                "late",
                InterceptorPosition::After("anchor".to_string()),
                Arc::new(Noop),
            )
            .unwrap();

        let names: Vec<String> = registry.create[&ObjectType::ServiceBroker]
            .iter()
            .map(|named| named.name.clone())
            .collect();
        assert_eq!(names, vec!["early", "anchor", "late"]);
    }

    #[test]
    fn unknown_anchor_is_an_error() {
        let mut registry = InterceptorRegistry::new();
        let err = registry
            .register_create(
                ObjectType::ServiceBroker,
                "orphan",
                InterceptorPosition::After("missing".to_string()),
                Arc::new(Noop),
            )
            .unwrap_err();
        assert!(err.to_string().contains("unknown interceptor"));
    }
}
