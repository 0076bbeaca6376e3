//! Mapping from a requested feature change to pod-template annotations
//!
//! The companion operator reads these keys from the pod template. Traces
//! rollback is written as an explicit `"rollback"` value, never as a key
//! removal. The logs key is removed when no log type is given.

use crate::kinds::Action;
use std::collections::BTreeMap;

pub const TRACES_INSTRUMENT_ANNOTATION: &str = "logz.io/traces_instrument";
pub const SERVICE_NAME_ANNOTATION: &str = "logz.io/service-name";
pub const LOG_TYPE_ANNOTATION: &str = "logz.io/application_type";

pub const TRACES_ENABLED: &str = "true";
pub const TRACES_ROLLBACK: &str = "rollback";

/// Change to a single annotation key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationChange {
    Set(String),
    Remove,
}

/// Set of annotation changes to merge into a pod template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationDelta {
    changes: BTreeMap<String, AnnotationChange>,
}

impl AnnotationDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.changes
            .insert(key.to_string(), AnnotationChange::Set(value.into()));
        self
    }

    pub fn remove(mut self, key: &str) -> Self {
        self.changes.insert(key.to_string(), AnnotationChange::Remove);
        self
    }

    pub fn changes(&self) -> impl Iterator<Item = (&String, &AnnotationChange)> {
        self.changes.iter()
    }

    /// Merge into an existing annotation map, leaving unrelated keys untouched
    pub fn apply_to(&self, annotations: &mut BTreeMap<String, String>) {
        for (key, change) in &self.changes {
            match change {
                AnnotationChange::Set(value) => {
                    annotations.insert(key.clone(), value.clone());
                }
                AnnotationChange::Remove => {
                    annotations.remove(key);
                }
            }
        }
    }

    /// Keys that end up set after applying, as reported back to the caller.
    /// Removed keys are absent.
    pub fn updated_annotations(&self) -> BTreeMap<String, String> {
        self.changes
            .iter()
            .filter_map(|(key, change)| match change {
                AnnotationChange::Set(value) => Some((key.clone(), value.clone())),
                AnnotationChange::Remove => None,
            })
            .collect()
    }
}

/// Annotations for a traces toggle
pub fn traces_delta(action: Action, service_name: Option<&str>) -> AnnotationDelta {
    let value = match action {
        Action::Add => TRACES_ENABLED,
        Action::Delete => TRACES_ROLLBACK,
    };
    let delta = AnnotationDelta::new().set(TRACES_INSTRUMENT_ANNOTATION, value);
    match service_name.filter(|s| !s.is_empty()) {
        Some(service_name) => delta.set(SERVICE_NAME_ANNOTATION, service_name),
        None => delta,
    }
}

/// Annotations for a log type change; an empty log type removes the key
pub fn logs_delta(log_type: &str) -> AnnotationDelta {
    if log_type.is_empty() {
        AnnotationDelta::new().remove(LOG_TYPE_ANNOTATION)
    } else {
        AnnotationDelta::new().set(LOG_TYPE_ANNOTATION, log_type)
    }
}
