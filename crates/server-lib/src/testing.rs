//! In-memory cluster for tests
//!
//! [`FakeCluster`] implements both [`WorkloadApi`] and
//! [`InstrumentedApplicationApi`]. When the simulated operator is enabled, a
//! workload update is mirrored onto the InstrumentedApplication of the same
//! name the way the companion operator does it: the traces annotation sets
//! `status.tracesInstrumented` and the log-type annotation is copied into
//! `spec.logType`.

use crate::crd::{api_resource, InstrumentedApplicationApi, WatchStream};
use crate::error::ClusterError;
use crate::kinds::{ControllerKind, Target};
use crate::policy::{LOG_TYPE_ANNOTATION, TRACES_ENABLED, TRACES_INSTRUMENT_ANNOTATION};
use crate::workload::{Workload, WorkloadApi};
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::core::DynamicObject;
use kube::error::ErrorResponse;
use kube::runtime::watcher::{self, Event};
use kube::ResourceExt;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

type WatchSender = mpsc::UnboundedSender<Result<Event<DynamicObject>, watcher::Error>>;
type WorkloadKey = (ControllerKind, String, String);

#[derive(Default)]
struct Inner {
    workloads: HashMap<WorkloadKey, Workload>,
    applications: BTreeMap<(String, String), DynamicObject>,
    watchers: Vec<(String, String, WatchSender)>,
    operator_reacts: bool,
    fail_updates: bool,
    fail_lists: bool,
    fail_watches: bool,
    updates: usize,
    revision: u64,
}

/// Shared in-memory cluster; clones see the same state
#[derive(Clone, Default)]
pub struct FakeCluster {
    inner: Arc<Mutex<Inner>>,
}

impl FakeCluster {
    /// A cluster whose simulated operator reacts to every update
    pub fn new() -> Self {
        let cluster = Self::default();
        cluster.set_operator_reacts(true);
        cluster
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_operator_reacts(&self, reacts: bool) {
        self.lock().operator_reacts = reacts;
    }

    /// Make every subsequent update fail with a 409 conflict
    pub fn set_fail_updates(&self, fail: bool) {
        self.lock().fail_updates = fail;
    }

    /// Make every subsequent list fail with a 403
    pub fn set_fail_lists(&self, fail: bool) {
        self.lock().fail_lists = fail;
    }

    /// Make every subsequent watch error out right after its initial listing
    pub fn set_fail_watches(&self, fail: bool) {
        self.lock().fail_watches = fail;
    }

    pub fn insert_workload(&self, workload: Workload) {
        let key = (workload.kind(), workload.namespace(), workload.name());
        self.lock().workloads.insert(key, workload);
    }

    pub fn insert_application(&self, application: DynamicObject) {
        let key = (application.namespace().unwrap_or_default(), application.name_any());
        self.lock().applications.insert(key, application);
    }

    pub fn workload(&self, kind: ControllerKind, namespace: &str, name: &str) -> Option<Workload> {
        self.lock()
            .workloads
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn annotations(
        &self,
        kind: ControllerKind,
        namespace: &str,
        name: &str,
    ) -> BTreeMap<String, String> {
        self.workload(kind, namespace, name)
            .map(|w| w.template_annotations())
            .unwrap_or_default()
    }

    pub fn application(&self, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.lock()
            .applications
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Number of successful workload writes
    pub fn update_count(&self) -> usize {
        self.lock().updates
    }

    /// Watches whose consumer is still alive
    pub fn active_watches(&self) -> usize {
        let mut inner = self.lock();
        inner.watchers.retain(|(_, _, tx)| !tx.is_closed());
        inner.watchers.len()
    }

    /// Mirror the workload's annotations onto its custom resource
    fn react(inner: &mut Inner, workload: &Workload) {
        let key = (workload.namespace(), workload.name());
        inner.revision += 1;
        let revision = inner.revision;
        let Some(application) = inner.applications.get_mut(&key) else {
            return;
        };

        let annotations = workload.template_annotations();
        let traces_on = annotations
            .get(TRACES_INSTRUMENT_ANNOTATION)
            .map(|v| v == TRACES_ENABLED)
            .unwrap_or(false);

        let data = &mut application.data;
        if !data.get("status").map(Value::is_object).unwrap_or(false) {
            data["status"] = json!({});
        }
        data["status"]["tracesInstrumented"] = Value::Bool(traces_on);
        data["status"]["observedRevision"] = json!(revision);

        if !data.get("spec").map(Value::is_object).unwrap_or(false) {
            data["spec"] = json!({});
        }
        data["spec"]["logType"] = json!(annotations
            .get(LOG_TYPE_ANNOTATION)
            .cloned()
            .unwrap_or_default());

        let updated = application.clone();
        inner.watchers.retain(|(namespace, name, tx)| {
            if *namespace == key.0 && *name == key.1 {
                tx.send(Ok(Event::Applied(updated.clone()))).is_ok()
            } else {
                !tx.is_closed()
            }
        });
    }
}

fn api_error(code: u16, reason: &str, message: String) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    })
}

#[async_trait]
impl WorkloadApi for FakeCluster {
    async fn get(&self, target: &Target) -> Result<Workload, ClusterError> {
        self.workload(target.kind, &target.namespace, &target.name)
            .ok_or_else(|| ClusterError::Get {
                kind: target.kind.as_str(),
                namespace: target.namespace.clone(),
                name: target.name.clone(),
                source: api_error(
                    404,
                    "NotFound",
                    format!("{} \"{}\" not found", target.kind, target.name),
                ),
            })
    }

    async fn update(&self, workload: &Workload) -> Result<(), ClusterError> {
        let mut inner = self.lock();
        if inner.fail_updates {
            return Err(ClusterError::Update {
                kind: workload.kind().as_str(),
                namespace: workload.namespace(),
                name: workload.name(),
                source: api_error(
                    409,
                    "Conflict",
                    "the object has been modified; please apply your changes to the latest version"
                        .to_string(),
                ),
            });
        }
        let key = (workload.kind(), workload.namespace(), workload.name());
        inner.workloads.insert(key, workload.clone());
        inner.updates += 1;
        if inner.operator_reacts {
            Self::react(&mut inner, workload);
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Workload>, ClusterError> {
        let inner = self.lock();
        if inner.fail_lists {
            return Err(ClusterError::List {
                resource: "deployments",
                source: api_error(403, "Forbidden", "deployments is forbidden".to_string()),
            });
        }
        Ok(inner.workloads.values().cloned().collect())
    }
}

#[async_trait]
impl InstrumentedApplicationApi for FakeCluster {
    async fn list_all(&self) -> Result<Vec<DynamicObject>, ClusterError> {
        let inner = self.lock();
        if inner.fail_lists {
            return Err(ClusterError::List {
                resource: crate::crd::PLURAL,
                source: api_error(
                    403,
                    "Forbidden",
                    "instrumentedapplications.logz.io is forbidden".to_string(),
                ),
            });
        }
        Ok(inner.applications.values().cloned().collect())
    }

    fn watch(&self, namespace: &str, name: &str) -> WatchStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let current: Vec<DynamicObject> = inner
            .applications
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .into_iter()
            .collect();
        let _ = tx.send(Ok(Event::Restarted(current)));
        if inner.fail_watches {
            let _ = tx.send(Err(watcher::Error::NoResourceVersion));
            return UnboundedReceiverStream::new(rx).boxed();
        }
        inner
            .watchers
            .push((namespace.to_string(), name.to_string(), tx));
        UnboundedReceiverStream::new(rx).boxed()
    }
}

/// Pod template with the given containers and annotations
fn pod_template(containers: &[&str], annotations: &[(&str, &str)]) -> PodTemplateSpec {
    let annotations: BTreeMap<String, String> = annotations
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: containers
                .iter()
                .map(|name| Container {
                    name: name.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
    }
}

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        resource_version: Some("1".to_string()),
        ..Default::default()
    }
}

pub fn deployment(
    namespace: &str,
    name: &str,
    containers: &[&str],
    annotations: &[(&str, &str)],
) -> Workload {
    Workload::Deployment(Deployment {
        metadata: meta(namespace, name),
        spec: Some(DeploymentSpec {
            template: pod_template(containers, annotations),
            ..Default::default()
        }),
        status: None,
    })
}

pub fn statefulset(
    namespace: &str,
    name: &str,
    containers: &[&str],
    annotations: &[(&str, &str)],
) -> Workload {
    Workload::StatefulSet(StatefulSet {
        metadata: meta(namespace, name),
        spec: Some(StatefulSetSpec {
            template: pod_template(containers, annotations),
            ..Default::default()
        }),
        status: None,
    })
}

/// An InstrumentedApplication owned by `owner_kind` of the same name
pub fn instrumented_application(
    namespace: &str,
    name: &str,
    owner_kind: &str,
    spec: Value,
    status: Value,
) -> DynamicObject {
    let mut obj = DynamicObject::new(name, &api_resource())
        .within(namespace)
        .data(json!({"spec": spec, "status": status}));
    obj.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: owner_kind.to_string(),
        name: name.to_string(),
        uid: format!("uid-{}-{}", namespace, name),
        controller: Some(true),
        ..Default::default()
    }]);
    obj
}
