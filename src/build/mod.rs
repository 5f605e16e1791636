//! Image builds from local sources
//!
//! Two strategies: a cluster-side binary-input build when the build API is
//! served, otherwise a throwaway builder pod. Both run under an
//! [`InterruptSupervisor`] so their ephemeral objects are removed on any exit.

pub mod binary;
pub mod builder_pod;
pub mod interrupt;
pub mod pipeline;
pub mod registry;

pub use binary::{BinaryBuild, BinaryBuildRequest, BuildPhase, OutputKind, DOCKERFILE_PATH};
pub use builder_pod::{BuilderPodBuild, BuilderPodRequest};
pub use interrupt::{InterruptSource, InterruptSupervisor, ManualInterrupt, OsSignals};
pub use pipeline::{BuildOutcome, BuildParameters, BuildPipeline, BuildStrategy, BUILD_API_GROUP};
pub use registry::{ensure_registry_secret, is_internal_registry, ImageTag};
