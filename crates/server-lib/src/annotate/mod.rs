//! Annotate-and-confirm
//!
//! A batch of request items is validated as a whole before anything is
//! written. Each item then goes through
//! `Validated -> Mutated -> AwaitingConfirmation -> Confirmed | TimedOut`:
//! a watch is opened on the item's InstrumentedApplication, the workload's
//! pod-template annotations are updated, and the watch must see the
//! operator react before the batch deadline.
//!
//! The first cluster error or timeout aborts the rest of the batch. Items
//! already written stay written. Applying the same annotations again leaves
//! the annotation map unchanged, so callers may retry a failed batch.

#[cfg(test)]
mod tests;

use crate::crd::InstrumentedApplicationApi;
use crate::error::{AnnotateError, ValidationError};
use crate::kinds::{validate_action, validate_target, Target};
use crate::observability::{ServerMetrics, StructuredLogger};
use crate::policy::{logs_delta, traces_delta, AnnotationDelta};
use crate::watch::{ChangeWatch, Confirmation, WatchedField};
use crate::workload::WorkloadApi;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Which instrumentation feature a batch toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Traces,
    Logs,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Traces => "traces",
            Self::Logs => "logs",
        }
    }

    /// The operator reports traces instrumentation in `status` and mirrors
    /// the log type into `spec`.
    pub fn watched_field(&self) -> WatchedField {
        match self {
            Self::Traces => WatchedField::Status,
            Self::Logs => WatchedField::Spec,
        }
    }
}

/// Body item of `POST /api/v1/annotate/traces`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracesRequest {
    pub name: String,
    pub controller_kind: String,
    pub namespace: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
}

/// Body item of `POST /api/v1/annotate/logs`. An empty `log_type` clears it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogsRequest {
    pub name: String,
    pub controller_kind: String,
    pub namespace: String,
    pub log_type: String,
}

/// One confirmed item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotateResponse {
    pub name: String,
    pub namespace: String,
    pub controller_kind: String,
    pub updated_annotations: BTreeMap<String, String>,
}

/// A validated item: where to write and what
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationPlan {
    pub target: Target,
    pub delta: AnnotationDelta,
}

/// A request item that can be turned into an [`AnnotationPlan`]
pub trait AnnotateRequest {
    const FEATURE: Feature;

    fn plan(&self, index: usize) -> Result<AnnotationPlan, ValidationError>;
}

impl AnnotateRequest for TracesRequest {
    const FEATURE: Feature = Feature::Traces;

    fn plan(&self, index: usize) -> Result<AnnotationPlan, ValidationError> {
        let target = validate_target(index, &self.name, &self.namespace, &self.controller_kind)?;
        let action = validate_action(index, &self.action)?;
        Ok(AnnotationPlan {
            target,
            delta: traces_delta(action, self.service_name.as_deref()),
        })
    }
}

impl AnnotateRequest for LogsRequest {
    const FEATURE: Feature = Feature::Logs;

    fn plan(&self, index: usize) -> Result<AnnotationPlan, ValidationError> {
        let target = validate_target(index, &self.name, &self.namespace, &self.controller_kind)?;
        if self.log_type.trim() != self.log_type {
            return Err(ValidationError::new(
                index,
                "log_type must not have leading or trailing whitespace",
            ));
        }
        Ok(AnnotationPlan {
            target,
            delta: logs_delta(&self.log_type),
        })
    }
}

/// Validate every item; the first invalid one rejects the batch
pub fn validate_batch<R: AnnotateRequest>(items: &[R]) -> Result<Vec<AnnotationPlan>, ValidationError> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| item.plan(index))
        .collect()
}

/// Lifecycle of one batch item, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Validated,
    Mutated,
    AwaitingConfirmation,
    Confirmed,
    TimedOut,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validated => "validated",
            Self::Mutated => "mutated",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Confirmed => "confirmed",
            Self::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

/// Applies annotate batches and waits for the operator to react
#[derive(Clone)]
pub struct Annotator {
    workloads: Arc<dyn WorkloadApi>,
    applications: Arc<dyn InstrumentedApplicationApi>,
    timeout: Duration,
    metrics: ServerMetrics,
    logger: StructuredLogger,
}

impl Annotator {
    pub fn new(
        workloads: Arc<dyn WorkloadApi>,
        applications: Arc<dyn InstrumentedApplicationApi>,
        timeout: Duration,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            workloads,
            applications,
            timeout,
            metrics: ServerMetrics::new(),
            logger,
        }
    }

    /// Run a batch. All items share one deadline, `timeout` from now.
    pub async fn annotate<R: AnnotateRequest>(
        &self,
        items: &[R],
    ) -> Result<Vec<AnnotateResponse>, AnnotateError> {
        let feature = R::FEATURE;
        let result = self.run_batch(items).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(AnnotateError::Validation(_)) => "invalid",
            Err(AnnotateError::Cluster(_)) => "cluster_error",
            Err(AnnotateError::ConfirmationTimeout { .. }) => "timeout",
        };
        self.metrics.inc_annotate_batch(feature.as_str(), outcome);
        result
    }

    async fn run_batch<R: AnnotateRequest>(
        &self,
        items: &[R],
    ) -> Result<Vec<AnnotateResponse>, AnnotateError> {
        let plans = validate_batch(items)?;
        let deadline = Instant::now() + self.timeout;

        let mut responses = Vec::with_capacity(plans.len());
        for plan in plans {
            responses.push(self.apply_and_confirm(R::FEATURE, plan, deadline).await?);
        }
        Ok(responses)
    }

    async fn apply_and_confirm(
        &self,
        feature: Feature,
        plan: AnnotationPlan,
        deadline: Instant,
    ) -> Result<AnnotateResponse, AnnotateError> {
        let AnnotationPlan { target, delta } = plan;
        let transition = |state: ItemState| {
            debug!(
                feature = feature.as_str(),
                namespace = %target.namespace,
                name = %target.name,
                state = %state,
                "Annotate item"
            );
        };
        transition(ItemState::Validated);

        // Watch first so the operator's reaction cannot slip in before it
        let watch = ChangeWatch::establish(
            self.applications.watch(&target.namespace, &target.name),
            feature.watched_field(),
            &target.namespace,
            &target.name,
            deadline,
        )
        .await?;

        let mut workload = self.workloads.get(&target).await?;
        workload.apply_annotations(&delta)?;
        self.workloads.update(&workload).await?;
        let written = Instant::now();
        transition(ItemState::Mutated);

        let keys: Vec<&str> = delta.changes().map(|(k, _)| k.as_str()).collect();
        self.logger.log_workload_annotated(
            feature.as_str(),
            target.kind.as_str(),
            &target.namespace,
            &target.name,
            &keys,
        );

        transition(ItemState::AwaitingConfirmation);
        match watch.wait(deadline).await? {
            Confirmation::Confirmed => {
                transition(ItemState::Confirmed);
                let elapsed = written.elapsed();
                self.metrics.observe_confirmation(feature.as_str(), elapsed);
                self.logger
                    .log_confirmed(feature.as_str(), &target.namespace, &target.name, elapsed);
                Ok(AnnotateResponse {
                    name: target.name,
                    namespace: target.namespace,
                    controller_kind: target.kind.as_str().to_string(),
                    updated_annotations: delta.updated_annotations(),
                })
            }
            Confirmation::TimedOut => {
                transition(ItemState::TimedOut);
                self.metrics.inc_confirmation_timeout(feature.as_str());
                self.logger.log_confirmation_timeout(
                    feature.as_str(),
                    &target.namespace,
                    &target.name,
                );
                Err(AnnotateError::ConfirmationTimeout {
                    namespace: target.namespace,
                    name: target.name,
                })
            }
        }
    }
}
