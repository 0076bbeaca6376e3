//! Error taxonomy shared by the annotate and state paths

use thiserror::Error;

/// A request batch failed validation; nothing was written to the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid input: item {index}: {reason}")]
pub struct ValidationError {
    /// Position of the offending item in the batch
    pub index: usize,
    pub reason: String,
}

impl ValidationError {
    pub fn new(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index,
            reason: reason.into(),
        }
    }
}

/// Any failure talking to the Kubernetes API.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Error getting Kubernetes config: {0}")]
    Config(String),

    #[error("Error creating Kubernetes client: {0}")]
    Client(#[source] kube::Error),

    #[error("Error getting {kind} {namespace}/{name}: {source}")]
    Get {
        kind: &'static str,
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("Error updating {kind} {namespace}/{name}: {source}")]
    Update {
        kind: &'static str,
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("Error listing {resource}: {source}")]
    List {
        resource: &'static str,
        #[source]
        source: kube::Error,
    },

    #[error("Error watching {namespace}/{name}: {message}")]
    Watch {
        namespace: String,
        name: String,
        message: String,
    },

    /// Workload exists but carries no spec to hold a pod template
    #[error("{kind} {namespace}/{name} has no spec")]
    MissingSpec {
        kind: &'static str,
        namespace: String,
        name: String,
    },
}

/// Failure of an annotate batch.
#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("Timeout while updating the instrumentation status: {namespace}/{name}")]
    ConfirmationTimeout { namespace: String, name: String },
}

/// Failure of the state read path.
#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}
