//! Deploy manifests for a built component

pub mod applier;
pub mod mirror;
pub mod template;

pub use applier::{
    decode_document, DeployOutcome, DeployParameters, ManifestApplier, ResourceKind,
    DEPLOY_COMPONENT_SUFFIX,
};
pub use mirror::ManifestMirror;
pub use template::{pluralise_kind, render, split_documents};
