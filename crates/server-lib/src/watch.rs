//! Change confirmation for a single InstrumentedApplication
//!
//! After a workload's annotations are written, the companion operator reacts
//! by updating the matching custom resource. A [`ChangeWatch`] is opened on
//! that resource *before* the write, records the watched sub-document from
//! the initial listing, and resolves once a later event carries a different
//! value. Dropping the watch aborts its task and closes the server-side
//! watch, whichever way it resolved.

use crate::crd::WatchStream;
use crate::error::{AnnotateError, ClusterError};
use futures::StreamExt;
use kube::core::DynamicObject;
use kube::runtime::watcher::Event;
use kube::ResourceExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// Part of the custom resource that must change to confirm a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchedField {
    /// Traces: the operator reports instrumentation in `status`
    Status,
    /// Logs: the operator copies the log type into `spec`
    Spec,
}

impl WatchedField {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Spec => "spec",
        }
    }

    fn extract(&self, obj: &DynamicObject) -> Option<Value> {
        obj.data.get(self.key()).cloned()
    }
}

/// How a watch resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    TimedOut,
}

#[derive(Debug)]
enum Signal {
    /// Initial listing seen; changes from here on are detected
    Ready,
    Changed,
    Failed(ClusterError),
}

/// An open, single-use watch on one named resource
pub struct ChangeWatch {
    namespace: String,
    name: String,
    signals: mpsc::UnboundedReceiver<Signal>,
    task: JoinHandle<()>,
}

impl ChangeWatch {
    /// Start consuming `events` and return once the initial state of the
    /// resource has been recorded, so no later change can be missed.
    pub async fn establish(
        events: WatchStream,
        field: WatchedField,
        namespace: &str,
        name: &str,
        deadline: Instant,
    ) -> Result<Self, AnnotateError> {
        let (tx, signals) = mpsc::unbounded_channel();
        let task = tokio::spawn(observe(
            events,
            field,
            namespace.to_string(),
            name.to_string(),
            tx,
        ));
        let mut watch = Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            signals,
            task,
        };

        match timeout_at(deadline, watch.signals.recv()).await {
            Ok(Some(Signal::Ready)) => {
                debug!(namespace = %namespace, name = %name, field = field.key(), "Watch established");
                Ok(watch)
            }
            Ok(Some(Signal::Failed(e))) => Err(e.into()),
            Ok(Some(Signal::Changed)) | Ok(None) => Err(watch.ended().into()),
            Err(_) => Err(watch.timeout()),
        }
    }

    /// Wait for the watched sub-document to change, up to `deadline`
    pub async fn wait(mut self, deadline: Instant) -> Result<Confirmation, AnnotateError> {
        match timeout_at(deadline, self.signals.recv()).await {
            Ok(Some(Signal::Changed)) => Ok(Confirmation::Confirmed),
            Ok(Some(Signal::Failed(e))) => Err(e.into()),
            Ok(Some(Signal::Ready)) | Ok(None) => Err(self.ended().into()),
            Err(_) => Ok(Confirmation::TimedOut),
        }
    }

    fn ended(&self) -> ClusterError {
        ClusterError::Watch {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            message: "watch ended unexpectedly".to_string(),
        }
    }

    fn timeout(&self) -> AnnotateError {
        AnnotateError::ConfirmationTimeout {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

impl Drop for ChangeWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn observe(
    mut events: WatchStream,
    field: WatchedField,
    namespace: String,
    name: String,
    tx: mpsc::UnboundedSender<Signal>,
) {
    let mut ready = false;
    // Outer None: the resource has not been seen yet.
    // Inner None: the resource exists without the watched field.
    let mut last: Option<Option<Value>> = None;

    while let Some(event) = events.next().await {
        let seen: Vec<DynamicObject> = match event {
            Ok(Event::Restarted(objects)) => objects,
            Ok(Event::Applied(obj)) => vec![obj],
            Ok(Event::Deleted(_)) => continue,
            Err(e) => {
                warn!(namespace = %namespace, name = %name, error = %e, "Watch failed");
                let _ = tx.send(Signal::Failed(ClusterError::Watch {
                    namespace,
                    name: name.clone(),
                    message: e.to_string(),
                }));
                return;
            }
        };

        for obj in seen.iter().filter(|o| o.name_any() == name) {
            let current = field.extract(obj);
            match &last {
                Some(previous) if *previous != current => {
                    let _ = tx.send(Signal::Changed);
                    return;
                }
                Some(_) => {}
                // First sighting is a baseline, not a change
                None => last = Some(current),
            }
        }

        if !ready {
            ready = true;
            if tx.send(Signal::Ready).is_err() {
                return;
            }
        }
    }
}
