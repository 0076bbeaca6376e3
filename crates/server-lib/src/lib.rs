//! Core of the ezkonnect control surface
//!
//! This crate provides:
//! - Validation of workload kinds and actions
//! - The annotation policy for traces and logs instrumentation
//! - Read/write access to Deployments and StatefulSets
//! - Change confirmation through the InstrumentedApplication resource
//! - Projection of the cluster's instrumentation state
//! - Health checks and observability

pub mod annotate;
pub mod cluster;
pub mod crd;
pub mod error;
pub mod health;
pub mod kinds;
pub mod observability;
pub mod policy;
pub mod state;
pub mod watch;
pub mod workload;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use annotate::{AnnotateResponse, Annotator, Feature, LogsRequest, TracesRequest};
pub use crd::{InstrumentedApplicationApi, KubeInstrumentedApplications};
pub use error::{AnnotateError, ClusterError, StateError, ValidationError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use observability::{ServerMetrics, StructuredLogger};
pub use state::{ProjectedRecord, StateReader};
pub use workload::{KubeWorkloads, WorkloadApi};
