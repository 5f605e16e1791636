//! devpush - run devfile components on a Kubernetes/OpenShift cluster
//!
//! Reconciles the workload a devfile describes, builds images from local
//! sources, applies deploy manifests, and runs the devfile's lifecycle
//! commands inside the running component.

pub mod build;
pub mod cluster;
pub mod component;
pub mod config;
pub mod deploy;
pub mod devfile;
pub mod error;
pub mod exec;
pub mod sync;
pub mod testing;

pub use error::{AppError, Result};
