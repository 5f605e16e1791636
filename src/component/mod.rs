//! Devfile component lifecycle on the cluster

pub mod adapter;
pub mod context;
pub mod generator;
pub mod reconciler;
pub mod storage;

pub use adapter::{first_container_with_sources, ComponentAdapter, PushOutcome};
pub use context::{PushContext, PushParameters};
pub use generator::{
    component_labels, component_selector, ComponentSettings, ComponentSpec, ContainerSpec,
    SOURCE_VOLUME,
};
pub use reconciler::{carry_forward_service_fields, ReconcileOutcome, ResourceReconciler};
pub use storage::{claim_volume_name, generate_pvc_name, VolumeBinding};
