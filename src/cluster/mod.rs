//! Cluster access seam
//!
//! The engine talks to the cluster only through [`ClusterClient`]. The
//! production implementation shells out to `kubectl`/`oc`; tests use the
//! in-memory client from [`crate::testing`].

pub mod kubectl;
pub mod resource;
pub mod traits;

pub use kubectl::KubectlClient;
pub use resource::{
    label_selector, matches_selector, parse_label_selector, GroupVersionResource,
    OwnerReference, PodContainer, PodPhase, PodVolumeMount, Resource,
};
pub use traits::{ClusterClient, ComponentInfo, ExecutionResult};
