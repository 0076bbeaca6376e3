//! State projection
//!
//! Every InstrumentedApplication in the cluster is flattened into one
//! [`ProjectedRecord`] per detected container, or a single record when the
//! operator has not reported any detection yet. Resources belonging to
//! ezkonnect itself are left out.

#[cfg(test)]
mod tests;

use crate::crd::{Detection, DetectionPhase, InstrumentedApplication, InstrumentedApplicationApi};
use crate::error::StateError;
use crate::kinds::ControllerKind;
use crate::observability::{ServerMetrics, StructuredLogger};
use crate::policy::SERVICE_NAME_ANNOTATION;
use crate::workload::{Workload, WorkloadApi};
use kube::core::DynamicObject;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

/// Resources whose name contains this belong to ezkonnect
pub const INTERNAL_NAME_MARKER: &str = "ezkonnect";

/// Other platform components that are never reported
pub const SYSTEM_RESOURCE_NAMES: &[&str] = &["kubernetes-instrumentor"];

pub fn is_internal_resource(name: &str) -> bool {
    name.contains(INTERNAL_NAME_MARKER) || SYSTEM_RESOURCE_NAMES.contains(&name)
}

/// One row of `GET /api/v1/state`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedRecord {
    pub name: String,
    pub namespace: String,
    pub controller_kind: String,
    pub container_name: Option<String>,
    pub traces_instrumented: bool,
    pub traces_instrumentable: bool,
    pub service_name: Option<String>,
    pub application: Option<String>,
    pub language: Option<String>,
    pub detection_status: DetectionPhase,
    pub opentelemetry_preconfigured: Option<bool>,
    pub log_type: Option<String>,
}

/// What service-name resolution needs from a workload's pod template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkloadTemplate {
    pub annotations: BTreeMap<String, String>,
    pub container_count: usize,
}

impl From<&Workload> for WorkloadTemplate {
    fn from(workload: &Workload) -> Self {
        Self {
            annotations: workload.template_annotations(),
            container_count: workload.container_count(),
        }
    }
}

/// Pod templates keyed by `(kind, namespace, name)`
#[derive(Debug, Clone, Default)]
pub struct WorkloadIndex {
    templates: HashMap<(ControllerKind, String, String), WorkloadTemplate>,
}

impl WorkloadIndex {
    pub fn from_workloads(workloads: &[Workload]) -> Self {
        let templates = workloads
            .iter()
            .map(|w| ((w.kind(), w.namespace(), w.name()), WorkloadTemplate::from(w)))
            .collect();
        Self { templates }
    }

    pub fn get(&self, kind: &str, namespace: &str, name: &str) -> Option<&WorkloadTemplate> {
        let kind = ControllerKind::parse(kind)?;
        self.templates
            .get(&(kind, namespace.to_string(), name.to_string()))
    }
}

/// Service name for a language-detected container.
///
/// An explicit annotation wins. Without one, multi-container pods use the
/// container name, as do workloads already named after the container;
/// everything else gets `<owner>-<container>`.
pub fn resolve_service_name(
    owner_name: &str,
    container: &str,
    template: Option<&WorkloadTemplate>,
) -> String {
    if let Some(template) = template {
        if let Some(name) = template
            .annotations
            .get(SERVICE_NAME_ANNOTATION)
            .filter(|n| !n.is_empty())
        {
            return name.clone();
        }
        if template.container_count > 1 {
            return container.to_string();
        }
    }
    if owner_name == container {
        return container.to_string();
    }
    format!("{}-{}", owner_name.to_lowercase(), container)
}

/// Expand one decoded resource into its records
pub fn project_application(
    app: &InstrumentedApplication,
    index: &WorkloadIndex,
) -> Vec<ProjectedRecord> {
    let base = ProjectedRecord {
        name: app.name.clone(),
        namespace: app.namespace.clone(),
        controller_kind: app.controller_kind(),
        container_name: None,
        traces_instrumented: app.status.traces_instrumented,
        traces_instrumentable: false,
        service_name: None,
        application: None,
        language: None,
        detection_status: app.status.instrumentation_detection.phase,
        opentelemetry_preconfigured: None,
        log_type: app.spec.log_type.clone(),
    };

    match &app.spec.detection {
        Detection::None => vec![base],
        Detection::Languages(languages) => {
            let (owner_kind, owner_name) = match &app.owner {
                Some(owner) => (owner.kind.as_str(), owner.name.as_str()),
                None => ("", app.name.as_str()),
            };
            let template = index.get(owner_kind, &app.namespace, owner_name);
            languages
                .iter()
                .map(|entry| ProjectedRecord {
                    container_name: Some(entry.container_name.clone()),
                    traces_instrumentable: true,
                    service_name: Some(resolve_service_name(
                        owner_name,
                        &entry.container_name,
                        template,
                    )),
                    language: Some(entry.language.clone()),
                    opentelemetry_preconfigured: Some(entry.opentelemetry_preconfigured),
                    ..base.clone()
                })
                .collect()
        }
        Detection::Applications(applications) => applications
            .iter()
            .map(|entry| ProjectedRecord {
                container_name: Some(entry.container_name.clone()),
                application: Some(entry.application.clone()),
                opentelemetry_preconfigured: Some(false),
                ..base.clone()
            })
            .collect(),
    }
}

/// Result of projecting a listing
#[derive(Debug, Clone, Default)]
pub struct Projection {
    pub records: Vec<ProjectedRecord>,
    /// `namespace/name` of documents that could not be decoded
    pub skipped: Vec<String>,
    /// Non-internal resources that were projected
    pub resources: usize,
}

/// Project a listing, dropping internal resources and undecodable documents
pub fn project(objects: &[DynamicObject], index: &WorkloadIndex) -> Projection {
    let mut projection = Projection::default();
    for obj in objects {
        let name = obj.name_any();
        if is_internal_resource(&name) {
            continue;
        }
        match InstrumentedApplication::from_dynamic(obj) {
            Ok(app) => {
                projection.resources += 1;
                projection
                    .records
                    .extend(project_application(&app, index));
            }
            Err(e) => {
                let key = format!("{}/{}", obj.namespace().unwrap_or_default(), name);
                warn!(resource = %key, error = %e, "Skipping undecodable InstrumentedApplication");
                projection.skipped.push(key);
            }
        }
    }
    projection
}

/// Reads the cluster and produces the state listing
#[derive(Clone)]
pub struct StateReader {
    workloads: Arc<dyn WorkloadApi>,
    applications: Arc<dyn InstrumentedApplicationApi>,
    metrics: ServerMetrics,
    logger: StructuredLogger,
}

impl StateReader {
    pub fn new(
        workloads: Arc<dyn WorkloadApi>,
        applications: Arc<dyn InstrumentedApplicationApi>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            workloads,
            applications,
            metrics: ServerMetrics::new(),
            logger,
        }
    }

    pub async fn read_state(&self) -> Result<Vec<ProjectedRecord>, StateError> {
        let (objects, workloads) =
            tokio::try_join!(self.applications.list_all(), self.workloads.list_all())?;

        let index = WorkloadIndex::from_workloads(&workloads);
        let projection = project(&objects, &index);

        self.metrics.set_projected_records(projection.records.len());
        self.metrics.inc_skipped_resources(projection.skipped.len());
        self.logger.log_state_projected(
            projection.resources,
            projection.records.len(),
            &projection.skipped,
        );
        Ok(projection.records)
    }
}
