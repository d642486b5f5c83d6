//! Resource labels and label-change operations
//!
//! Labels are free-form `key -> [values]` attachments carried by every
//! entity. PATCH bodies mutate them through an ordered list of
//! [`LabelChange`]s.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, Result};
use crate::query::QUERY_SEPARATOR;

pub type Labels = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelOperation {
    Add,
    AddValues,
    Remove,
    RemoveValues,
}

/// One entry of the `labels` array in a PATCH body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelChange {
    pub op: LabelOperation,
    pub key: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Validates a full label set, e.g. from a POST body.
pub fn validate_labels(labels: &Labels) -> Result<()> {
    for (key, values) in labels {
        validate_label_key(key)?;
        for value in values {
            validate_label_value(value)?;
        }
    }
    Ok(())
}

fn validate_label_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(DomainError::bad_request("label key cannot be empty"));
    }
    if key.chars().any(char::is_whitespace) || key.contains(QUERY_SEPARATOR) {
        return Err(DomainError::bad_request(format!(
            "label key \"{}\" cannot contain whitespaces and special symbol {}",
            key, QUERY_SEPARATOR,
        )));
    }
    Ok(())
}

fn validate_label_value(value: &str) -> Result<()> {
    if value.chars().any(char::is_whitespace) || value.contains(QUERY_SEPARATOR) {
        return Err(DomainError::bad_request(format!(
            "label value \"{}\" cannot contain whitespaces and special symbol {}",
            value, QUERY_SEPARATOR,
        )));
    }
    Ok(())
}

/// Applies an ordered list of changes to a label set in place.
pub fn apply_label_changes(labels: &mut Labels, changes: &[LabelChange]) -> Result<()> {
    for change in changes {
        validate_label_key(&change.key)?;
        for value in &change.values {
            validate_label_value(value)?;
        }

        match change.op {
            LabelOperation::Add => {
                if change.values.is_empty() {
                    return Err(DomainError::bad_request(format!(
                        "add operation for label key \"{}\" requires values",
                        change.key
                    )));
                }
                labels.insert(change.key.clone(), change.values.clone());
            }
            LabelOperation::AddValues => {
                if change.values.is_empty() {
                    return Err(DomainError::bad_request(format!(
                        "add_values operation for label key \"{}\" requires values",
                        change.key
                    )));
                }
                let entry = labels.entry(change.key.clone()).or_default();
                for value in &change.values {
                    if !entry.contains(value) {
                        entry.push(value.clone());
                    }
                }
            }
            LabelOperation::Remove => {
                labels.remove(&change.key);
            }
            LabelOperation::RemoveValues => {
                if change.values.is_empty() {
                    return Err(DomainError::bad_request(format!(
                        "remove_values operation for label key \"{}\" requires values",
                        change.key
                    )));
                }
                if let Some(entry) = labels.get_mut(&change.key) {
                    entry.retain(|v| !change.values.contains(v));
                    if entry.is_empty() {
                        labels.remove(&change.key);
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels_with(key: &str, values: &[&str]) -> Labels {
        let mut labels = Labels::new();
        labels.insert(key.to_string(), values.iter().map(|v| v.to_string()).collect());
        labels
    }

    fn change(op: LabelOperation, key: &str, values: &[&str]) -> LabelChange {
        LabelChange {
            op,
            key: key.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn add_replaces_existing_values() {
        let mut labels = labels_with("cluster_id", &["old"]);
        apply_label_changes(&mut labels, &[change(LabelOperation::Add, "cluster_id", &["new"])])
            .unwrap();
        assert_eq!(labels["cluster_id"], vec!["new"]);
    }

    #[test]
    fn add_values_skips_duplicates() {
        let mut labels = labels_with("org_id", &["a"]);
        apply_label_changes(
            &mut labels,
            &[change(LabelOperation::AddValues, "org_id", &["a", "b"])],
        )
        .unwrap();
        assert_eq!(labels["org_id"], vec!["a", "b"]);
    }

    #[test]
    fn add_values_creates_missing_key() {
        let mut labels = Labels::new();
        apply_label_changes(
            &mut labels,
            &[change(LabelOperation::AddValues, "fresh", &["v"])],
        )
        .unwrap();
        assert_eq!(labels["fresh"], vec!["v"]);
    }

    #[test]
    fn removing_last_value_drops_the_key() {
        let mut labels = labels_with("cluster_id", &["only"]);
        apply_label_changes(
            &mut labels,
            &[change(LabelOperation::RemoveValues, "cluster_id", &["only"])],
        )
        .unwrap();
        assert!(!labels.contains_key("cluster_id"));
    }

    #[test]
    fn remove_values_without_values_is_rejected() {
        let mut labels = labels_with("cluster_id", &["v"]);
        let err = apply_label_changes(
            &mut labels,
            &[change(LabelOperation::RemoveValues, "cluster_id", &[])],
        )
        .unwrap_err();
        assert_eq!(err.kind(), "BadRequest");
    }

    #[test]
    fn remove_with_empty_key_is_rejected() {
        let mut labels = Labels::new();
        let err = apply_label_changes(&mut labels, &[change(LabelOperation::Remove, "", &[])])
            .unwrap_err();
        assert_eq!(err.kind(), "BadRequest");
    }

    #[test]
    fn keys_with_whitespace_are_rejected() {
        let mut labels = Labels::new();
        labels.insert("key with\nnew line".to_string(), vec!["v".to_string()]);
        let err = validate_labels(&labels).unwrap_err();
        assert!(err.to_string().contains("cannot contain whitespaces"));
    }
}
