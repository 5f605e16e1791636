use super::resource::{GroupVersionResource, PodPhase, Resource};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Result of a command executed inside a container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub metadata: HashMap<String, String>,
}

impl ExecutionResult {
    pub fn new(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: String, value: String) -> Self {
        self.metadata.insert(key, value);
        self
    }

    pub fn success(stdout: String) -> Self {
        Self::new(0, stdout, String::new())
    }

    pub fn failure(exit_code: i32, stderr: String) -> Self {
        Self::new(exit_code, String::new(), stderr)
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr joined, for error messages
    pub fn combined_output(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        }
    }
}

/// Where a command is dispatched: built fresh for each dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentInfo {
    pub pod_name: String,
    pub container_name: String,
    pub source_mount: Option<String>,
}

impl ComponentInfo {
    pub fn new(pod_name: impl Into<String>, container_name: impl Into<String>) -> Self {
        Self {
            pod_name: pod_name.into(),
            container_name: container_name.into(),
            source_mount: None,
        }
    }

    pub fn with_source_mount(mut self, path: impl Into<String>) -> Self {
        self.source_mount = Some(path.into());
        self
    }
}

/// Cluster API surface the engine depends on.
///
/// Implementations must report a missing object as [`AppError::NotFound`] and
/// an RBAC denial as [`AppError::Forbidden`] so callers can tell them apart
/// from other failures.
///
/// [`AppError::NotFound`]: crate::error::AppError::NotFound
/// [`AppError::Forbidden`]: crate::error::AppError::Forbidden
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Namespace every namespaced call targets
    fn namespace(&self) -> &str;

    async fn get(&self, gvr: &GroupVersionResource, name: &str) -> Result<Resource>;

    async fn list(&self, gvr: &GroupVersionResource, label_selector: &str) -> Result<Vec<Resource>>;

    /// Create and return the object as stored by the server
    async fn create(&self, gvr: &GroupVersionResource, resource: &Resource) -> Result<Resource>;

    /// Replace and return the object as stored by the server
    async fn update(&self, gvr: &GroupVersionResource, resource: &Resource) -> Result<Resource>;

    async fn delete(&self, gvr: &GroupVersionResource, name: &str) -> Result<()>;

    async fn delete_collection(&self, gvr: &GroupVersionResource, label_selector: &str)
        -> Result<()>;

    /// Whether the server serves the given API group (e.g. `build.openshift.io`)
    async fn is_api_group_supported(&self, group: &str) -> Result<bool>;

    /// Block until the deployment's latest revision is fully rolled out
    async fn wait_for_deployment_rollout(&self, name: &str, timeout: Duration) -> Result<Resource>;

    /// Block until a pod matching `label_selector` reaches `phase`
    async fn wait_for_pod(
        &self,
        label_selector: &str,
        phase: PodPhase,
        timeout: Duration,
    ) -> Result<Resource>;

    async fn wait_for_init_container_started(
        &self,
        pod_name: &str,
        container_name: &str,
        timeout: Duration,
    ) -> Result<()>;

    /// Run a command in a container. A non-zero exit is reported through the
    /// returned [`ExecutionResult`], not as an error.
    async fn exec(
        &self,
        pod_name: &str,
        container_name: &str,
        command: &[String],
    ) -> Result<ExecutionResult>;

    /// Unpack a tar archive into `dest_dir` inside a container
    async fn extract_archive(
        &self,
        pod_name: &str,
        container_name: &str,
        dest_dir: &str,
        archive: Vec<u8>,
    ) -> Result<()>;

    /// Trigger a build of a binary-input build config from a context
    /// archive; returns the name of the build run
    async fn start_binary_build(&self, build_config: &str, archive: Vec<u8>) -> Result<String>;

    async fn build_logs(&self, build_name: &str) -> Result<String>;

    async fn pod_logs(&self, pod_name: &str, container_name: &str) -> Result<String>;

    /// Return the live object, creating it from `resource` when absent
    async fn get_or_create(
        &self,
        gvr: &GroupVersionResource,
        resource: &Resource,
    ) -> Result<Resource> {
        match self.get(gvr, resource.name()).await {
            Ok(existing) => {
                debug!("🔍 {} {} already exists", gvr.resource, resource.name());
                Ok(existing)
            }
            Err(e) if e.is_not_found() => self.create(gvr, resource).await,
            Err(e) => Err(e),
        }
    }
}
