//! Controller kind and action vocabularies
//!
//! Every annotate request names the workload kind it targets and, for
//! traces, the action to take. Both are matched case-insensitively against
//! fixed sets; a batch is rejected as a whole if any item falls outside them.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Accepted `controller_kind` values (lowercase)
pub const VALID_KINDS: &[&str] = &["deployment", "statefulset"];

/// Accepted `action` values (lowercase)
pub const VALID_ACTIONS: &[&str] = &["add", "delete"];

/// Workload controller that owns a pod template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    Deployment,
    StatefulSet,
}

impl ControllerKind {
    /// Parse a request or owner-reference kind, ignoring case
    pub fn parse(kind: &str) -> Option<Self> {
        if kind.eq_ignore_ascii_case("deployment") {
            Some(Self::Deployment)
        } else if kind.eq_ignore_ascii_case("statefulset") {
            Some(Self::StatefulSet)
        } else {
            None
        }
    }

    /// Lowercase wire name, as used in requests and projected records
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::StatefulSet => "statefulset",
        }
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Traces toggle requested by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Delete,
}

impl Action {
    pub fn parse(action: &str) -> Option<Self> {
        if action.eq_ignore_ascii_case("add") {
            Some(Self::Add)
        } else if action.eq_ignore_ascii_case("delete") {
            Some(Self::Delete)
        } else {
            None
        }
    }
}

/// Identity of the workload a request item targets, after validation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub kind: ControllerKind,
    pub namespace: String,
    pub name: String,
}

/// Validate the fields shared by every request item
pub fn validate_target(
    index: usize,
    name: &str,
    namespace: &str,
    kind: &str,
) -> Result<Target, ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::new(index, "name must not be empty"));
    }
    if namespace.trim().is_empty() {
        return Err(ValidationError::new(index, "namespace must not be empty"));
    }
    let kind = ControllerKind::parse(kind).ok_or_else(|| {
        ValidationError::new(
            index,
            format!(
                "controller_kind {:?} is not one of {}",
                kind,
                VALID_KINDS.join(", ")
            ),
        )
    })?;
    Ok(Target {
        kind,
        namespace: namespace.to_string(),
        name: name.to_string(),
    })
}

pub fn validate_action(index: usize, action: &str) -> Result<Action, ValidationError> {
    Action::parse(action).ok_or_else(|| {
        ValidationError::new(
            index,
            format!(
                "action {:?} is not one of {}",
                action,
                VALID_ACTIONS.join(", ")
            ),
        )
    })
}
