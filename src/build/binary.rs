use super::interrupt::InterruptSupervisor;
use crate::cluster::{ClusterClient, GroupVersionResource, Resource};
use crate::error::{AppError, Result, ResultExt};
use crate::sync::SyncAdapter;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DOCKERFILE_PATH: &str = "Dockerfile";

/// Where the built image is pushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    DockerImage,
    ImageStreamTag,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::DockerImage => "DockerImage",
            OutputKind::ImageStreamTag => "ImageStreamTag",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    New,
    Pending,
    Running,
    Complete,
    Failed,
    Error,
    Cancelled,
}

impl BuildPhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => BuildPhase::Pending,
            "Running" => BuildPhase::Running,
            "Complete" => BuildPhase::Complete,
            "Failed" => BuildPhase::Failed,
            "Error" => BuildPhase::Error,
            "Cancelled" => BuildPhase::Cancelled,
            _ => BuildPhase::New,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildPhase::Complete | BuildPhase::Failed | BuildPhase::Error | BuildPhase::Cancelled
        )
    }
}

/// Inputs for one binary-input build
#[derive(Debug, Clone)]
pub struct BinaryBuildRequest {
    pub name: String,
    pub tag: String,
    pub output: OutputKind,
    pub push_secret: Option<String>,
    pub context_dir: PathBuf,
}

pub fn build_config_resource(request: &BinaryBuildRequest) -> Result<Resource> {
    let mut output = json!({
        "to": { "kind": request.output.as_str(), "name": request.tag },
    });
    if let Some(secret) = &request.push_secret {
        output["pushSecret"] = json!({ "name": secret });
    }

    Resource::from_value(json!({
        "apiVersion": "build.openshift.io/v1",
        "kind": "BuildConfig",
        "metadata": {
            "name": request.name,
            "labels": { "component": request.name },
        },
        "spec": {
            "source": { "type": "Binary", "binary": {} },
            "strategy": {
                "type": "Docker",
                "dockerStrategy": { "dockerfilePath": DOCKERFILE_PATH },
            },
            "output": output,
        },
    }))
}

/// Cluster-side Docker build fed with a context archive
pub struct BinaryBuild {
    cluster: Arc<dyn ClusterClient>,
    sync: Arc<dyn SyncAdapter>,
    timeout: Duration,
    poll_interval: Duration,
}

impl BinaryBuild {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        sync: Arc<dyn SyncAdapter>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            cluster,
            sync,
            timeout,
            poll_interval,
        }
    }

    /// Run the build; returns the name of the build run
    pub async fn run(
        &self,
        request: &BinaryBuildRequest,
        supervisor: &InterruptSupervisor,
    ) -> Result<String> {
        let gvr = GroupVersionResource::build_configs();
        let build_config = build_config_resource(request)?;
        self.cluster
            .create(&gvr, &build_config)
            .await
            .with_context(|| format!("unable to create BuildConfig {}", request.name))?;
        debug!("📦 Created BuildConfig {}", request.name);

        let label = format!("BuildConfig {}", request.name);
        supervisor
            .guard(&label, self.build(request), self.delete_build_config(&request.name))
            .await
    }

    async fn build(&self, request: &BinaryBuildRequest) -> Result<String> {
        let archive = self
            .sync
            .build_context(&request.context_dir)
            .await
            .context("unable to package the build context")?;

        let build_name = self
            .cluster
            .start_binary_build(&request.name, archive)
            .await
            .with_context(|| format!("unable to start build from BuildConfig {}", request.name))?;
        info!("🚀 Started build {} using BuildConfig", build_name);

        info!("⏳ Waiting for build to complete");
        self.wait_for_build(&build_name)
            .await
            .with_context(|| format!("unable to build image using BuildConfig {}", request.name))?;

        info!("✅ Successfully built container image: {}", request.tag);
        Ok(build_name)
    }

    async fn wait_for_build(&self, build_name: &str) -> Result<()> {
        let gvr = GroupVersionResource::builds();
        let start = Instant::now();

        loop {
            let build = self.cluster.get(&gvr, build_name).await?;
            let phase = build
                .pointer("/status/phase")
                .and_then(|p| p.as_str())
                .map(BuildPhase::parse)
                .unwrap_or(BuildPhase::New);
            debug!("🔍 Build {} phase: {:?}", build_name, phase);

            match phase {
                BuildPhase::Complete => return Ok(()),
                phase if phase.is_terminal() => {
                    let logs = self.captured_logs(build_name).await;
                    return Err(AppError::BuildError(format!(
                        "build {} finished with phase {:?}: {}",
                        build_name, phase, logs
                    )));
                }
                _ => {}
            }

            if start.elapsed() >= self.timeout {
                let logs = self.captured_logs(build_name).await;
                return Err(AppError::Timeout(format!(
                    "build {} did not finish within {:?}: {}",
                    build_name, self.timeout, logs
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn captured_logs(&self, build_name: &str) -> String {
        match self.cluster.build_logs(build_name).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!("⚠️ Unable to fetch logs of build {}: {}", build_name, e);
                String::new()
            }
        }
    }

    /// Deleting the BuildConfig also removes its build runs
    async fn delete_build_config(&self, name: &str) -> Result<()> {
        match self
            .cluster
            .delete(&GroupVersionResource::build_configs(), name)
            .await
        {
            Ok(()) => {
                debug!("🗑️ Deleted BuildConfig {}", name);
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.context(format!("unable to delete BuildConfig {}", name))),
        }
    }
}
