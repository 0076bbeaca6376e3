//! The InstrumentedApplication custom resource
//!
//! The companion operator creates one of these per workload and records what
//! it detected in the workload's containers. This crate only reads them, so
//! they are fetched as [`DynamicObject`]s and decoded into a typed view on
//! demand; the raw document is what the confirmation watch compares.

use crate::error::ClusterError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::api::ListParams;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use serde::{Deserialize, Serialize};

pub const GROUP: &str = "logz.io";
pub const VERSION: &str = "v1alpha1";
pub const KIND: &str = "InstrumentedApplication";
pub const PLURAL: &str = "instrumentedapplications";

pub fn api_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk(GROUP, VERSION, KIND);
    ApiResource::from_gvk_with_plural(&gvk, PLURAL)
}

/// A container whose language the operator recognised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageDetection {
    pub language: String,
    pub container_name: String,
    #[serde(default)]
    pub opentelemetry_preconfigured: bool,
}

/// A container recognised by the application it runs (e.g. a database)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDetection {
    pub application: String,
    pub container_name: String,
}

/// What the operator detected. A resource carries at most one list; if a
/// document somehow carries both, the language list is used.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Detection {
    #[default]
    None,
    Languages(Vec<LanguageDetection>),
    Applications(Vec<ApplicationDetection>),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSpec {
    #[serde(default)]
    log_type: Option<String>,
    #[serde(default)]
    languages: Option<Vec<LanguageDetection>>,
    #[serde(default)]
    applications: Option<Vec<ApplicationDetection>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "RawSpec")]
pub struct InstrumentedApplicationSpec {
    /// Empty strings are normalised to `None`
    pub log_type: Option<String>,
    pub detection: Detection,
}

impl From<RawSpec> for InstrumentedApplicationSpec {
    fn from(raw: RawSpec) -> Self {
        let detection = match (raw.languages, raw.applications) {
            (Some(languages), _) => Detection::Languages(languages),
            (None, Some(applications)) => Detection::Applications(applications),
            (None, None) => Detection::None,
        };
        Self {
            log_type: raw.log_type.filter(|t| !t.is_empty()),
            detection,
        }
    }
}

/// Phase of the operator's language detection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionPhase {
    #[default]
    #[serde(rename = "pending")]
    Pending,
    Running,
    Completed,
    #[serde(rename = "error")]
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentationDetection {
    #[serde(default)]
    pub phase: DetectionPhase,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentedApplicationStatus {
    #[serde(default)]
    pub traces_instrumented: bool,
    #[serde(default)]
    pub instrumentation_detection: InstrumentationDetection,
}

/// Controller that owns the custom resource
#[derive(Debug, Clone, PartialEq)]
pub struct Owner {
    pub kind: String,
    pub name: String,
}

/// Typed view of one InstrumentedApplication
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentedApplication {
    pub name: String,
    pub namespace: String,
    pub owner: Option<Owner>,
    pub spec: InstrumentedApplicationSpec,
    pub status: InstrumentedApplicationStatus,
}

impl InstrumentedApplication {
    /// Decode the typed view. Missing `spec`/`status` decode to defaults.
    pub fn from_dynamic(obj: &DynamicObject) -> Result<Self, serde_json::Error> {
        let spec = match obj.data.get("spec").filter(|v| !v.is_null()) {
            Some(value) => InstrumentedApplicationSpec::deserialize(value)?,
            None => InstrumentedApplicationSpec::default(),
        };
        let status = match obj.data.get("status").filter(|v| !v.is_null()) {
            Some(value) => InstrumentedApplicationStatus::deserialize(value)?,
            None => InstrumentedApplicationStatus::default(),
        };
        let owner = obj.owner_references().first().map(|r| Owner {
            kind: r.kind.clone(),
            name: r.name.clone(),
        });

        Ok(Self {
            name: obj.name_any(),
            namespace: obj.namespace().unwrap_or_default(),
            owner,
            spec,
            status,
        })
    }

    /// Lowercased kind of the owning controller, empty when there is none
    pub fn controller_kind(&self) -> String {
        self.owner
            .as_ref()
            .map(|o| o.kind.to_lowercase())
            .unwrap_or_default()
    }
}

/// Events from a watch on InstrumentedApplication resources
pub type WatchStream = BoxStream<'static, Result<watcher::Event<DynamicObject>, watcher::Error>>;

/// Read access to InstrumentedApplication resources
#[async_trait]
pub trait InstrumentedApplicationApi: Send + Sync {
    /// Every InstrumentedApplication in every namespace
    async fn list_all(&self) -> Result<Vec<DynamicObject>, ClusterError>;

    /// Watch a single named resource. The stream opens with the current
    /// state of the resource before delivering changes.
    fn watch(&self, namespace: &str, name: &str) -> WatchStream;
}

/// [`InstrumentedApplicationApi`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeInstrumentedApplications {
    client: Client,
    resource: ApiResource,
}

impl KubeInstrumentedApplications {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resource: api_resource(),
        }
    }
}

#[async_trait]
impl InstrumentedApplicationApi for KubeInstrumentedApplications {
    async fn list_all(&self) -> Result<Vec<DynamicObject>, ClusterError> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &self.resource);
        api.list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|source| ClusterError::List {
                resource: PLURAL,
                source,
            })
    }

    fn watch(&self, namespace: &str, name: &str) -> WatchStream {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &self.resource);
        let config = watcher::Config::default().fields(&format!("metadata.name={}", name));
        watcher(api, config).boxed()
    }
}
