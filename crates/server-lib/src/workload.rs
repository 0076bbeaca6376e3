//! Deployment / StatefulSet access
//!
//! Both controllers carry a pod template whose annotation map is what the
//! companion operator reads. Updates are a plain read-modify-write: the whole
//! object fetched by [`WorkloadApi::get`] is written back by
//! [`WorkloadApi::update`], so a concurrent writer surfaces as a conflict error
//! rather than being merged.

use crate::error::ClusterError;
use crate::kinds::{ControllerKind, Target};
use crate::policy::AnnotationDelta;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::api::{ListParams, PostParams};
use kube::{Api, Client, ResourceExt};
use std::collections::BTreeMap;
use tracing::debug;

/// A workload controller owning a pod template
#[derive(Debug, Clone)]
pub enum Workload {
    Deployment(Deployment),
    StatefulSet(StatefulSet),
}

impl Workload {
    pub fn kind(&self) -> ControllerKind {
        match self {
            Self::Deployment(_) => ControllerKind::Deployment,
            Self::StatefulSet(_) => ControllerKind::StatefulSet,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::Deployment(d) => d.name_any(),
            Self::StatefulSet(s) => s.name_any(),
        }
    }

    pub fn namespace(&self) -> String {
        match self {
            Self::Deployment(d) => d.namespace(),
            Self::StatefulSet(s) => s.namespace(),
        }
        .unwrap_or_default()
    }

    fn template(&self) -> Option<&PodTemplateSpec> {
        match self {
            Self::Deployment(d) => d.spec.as_ref().map(|s| &s.template),
            Self::StatefulSet(s) => s.spec.as_ref().map(|s| &s.template),
        }
    }

    fn template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        match self {
            Self::Deployment(d) => d.spec.as_mut().map(|s| &mut s.template),
            Self::StatefulSet(s) => s.spec.as_mut().map(|s| &mut s.template),
        }
    }

    /// Pod-template annotations; empty when the template has none
    pub fn template_annotations(&self) -> BTreeMap<String, String> {
        self.template()
            .and_then(|t| t.metadata.as_ref())
            .and_then(|m| m.annotations.clone())
            .unwrap_or_default()
    }

    pub fn container_count(&self) -> usize {
        self.template()
            .and_then(|t| t.spec.as_ref())
            .map(|s| s.containers.len())
            .unwrap_or(0)
    }

    /// Merge `delta` into the pod-template annotations, creating the map
    /// if the template has none yet.
    pub fn apply_annotations(&mut self, delta: &AnnotationDelta) -> Result<(), ClusterError> {
        let kind = self.kind().as_str();
        let (namespace, name) = (self.namespace(), self.name());
        let template = self.template_mut().ok_or(ClusterError::MissingSpec {
            kind,
            namespace,
            name,
        })?;
        let annotations = template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(BTreeMap::new);
        delta.apply_to(annotations);
        Ok(())
    }
}

/// Read and write access to workloads
#[async_trait]
pub trait WorkloadApi: Send + Sync {
    async fn get(&self, target: &Target) -> Result<Workload, ClusterError>;

    /// Write the whole object back, unconditionally
    async fn update(&self, workload: &Workload) -> Result<(), ClusterError>;

    /// Every Deployment and StatefulSet in the cluster
    async fn list_all(&self) -> Result<Vec<Workload>, ClusterError>;
}

/// [`WorkloadApi`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeWorkloads {
    client: Client,
}

impl KubeWorkloads {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkloadApi for KubeWorkloads {
    async fn get(&self, target: &Target) -> Result<Workload, ClusterError> {
        let get_error = |source| ClusterError::Get {
            kind: target.kind.as_str(),
            namespace: target.namespace.clone(),
            name: target.name.clone(),
            source,
        };
        match target.kind {
            ControllerKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), &target.namespace);
                api.get(&target.name)
                    .await
                    .map(Workload::Deployment)
                    .map_err(get_error)
            }
            ControllerKind::StatefulSet => {
                let api: Api<StatefulSet> =
                    Api::namespaced(self.client.clone(), &target.namespace);
                api.get(&target.name)
                    .await
                    .map(Workload::StatefulSet)
                    .map_err(get_error)
            }
        }
    }

    async fn update(&self, workload: &Workload) -> Result<(), ClusterError> {
        let namespace = workload.namespace();
        let name = workload.name();
        debug!(kind = %workload.kind(), namespace = %namespace, name = %name, "Replacing workload");

        let params = PostParams::default();
        let result = match workload {
            Workload::Deployment(d) => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
                api.replace(&name, &params, d).await.map(|_| ())
            }
            Workload::StatefulSet(s) => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &namespace);
                api.replace(&name, &params, s).await.map(|_| ())
            }
        };
        result.map_err(|source| ClusterError::Update {
            kind: workload.kind().as_str(),
            namespace,
            name,
            source,
        })
    }

    async fn list_all(&self) -> Result<Vec<Workload>, ClusterError> {
        let params = ListParams::default();

        let deployments: Api<Deployment> = Api::all(self.client.clone());
        let deployments = deployments
            .list(&params)
            .await
            .map_err(|source| ClusterError::List {
                resource: "deployments",
                source,
            })?;

        let statefulsets: Api<StatefulSet> = Api::all(self.client.clone());
        let statefulsets = statefulsets
            .list(&params)
            .await
            .map_err(|source| ClusterError::List {
                resource: "statefulsets",
                source,
            })?;

        Ok(deployments
            .items
            .into_iter()
            .map(Workload::Deployment)
            .chain(statefulsets.items.into_iter().map(Workload::StatefulSet))
            .collect())
    }
}
