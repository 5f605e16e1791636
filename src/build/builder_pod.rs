use super::binary::DOCKERFILE_PATH;
use super::interrupt::InterruptSupervisor;
use crate::cluster::{label_selector, ClusterClient, GroupVersionResource, PodPhase, Resource};
use crate::error::{AppError, Result, ResultExt};
use crate::sync::SyncAdapter;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const INIT_CONTAINER: &str = "init";
pub const BUILDER_CONTAINER: &str = "build";
pub const BUILD_CONTEXT_VOLUME: &str = "build-context";
pub const BUILD_CONTEXT_PATH: &str = "/root/build-context";
pub const REGISTRY_SECRET_VOLUME: &str = "kaniko-secret";
pub const DOCKER_CONFIG_DIR: &str = "/root/.docker";
pub const COMPLETION_SENTINEL: &str = "/tmp/complete";
pub const BUILDER_LABEL: &str = "builder";
pub const BUILDER_LABEL_VALUE: &str = "kaniko";

/// Inputs for one builder-pod build
#[derive(Debug, Clone)]
pub struct BuilderPodRequest {
    pub name: String,
    pub tag: String,
    pub secret_name: String,
    /// Internal registry pushes need no credentials, so the secret may be absent
    pub secret_optional: bool,
    pub builder_image: String,
    pub init_image: String,
    pub context_dir: PathBuf,
}

pub fn builder_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("component".to_string(), name.to_string()),
        (BUILDER_LABEL.to_string(), BUILDER_LABEL_VALUE.to_string()),
    ])
}

/// Init container waits on the sentinel; builder runs once it is released
pub fn builder_pod_resource(request: &BuilderPodRequest) -> Result<Resource> {
    let wait_loop = format!(
        "while true; do sleep 1; if [ -f {} ]; then break; fi done",
        COMPLETION_SENTINEL
    );

    Resource::from_value(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": request.name,
            "labels": builder_labels(&request.name),
        },
        "spec": {
            "restartPolicy": "Never",
            "securityContext": { "runAsUser": 0 },
            "initContainers": [{
                "name": INIT_CONTAINER,
                "image": request.init_image,
                "command": ["/bin/sh", "-c", wait_loop],
                "volumeMounts": [
                    { "name": BUILD_CONTEXT_VOLUME, "mountPath": BUILD_CONTEXT_PATH },
                ],
            }],
            "containers": [{
                "name": BUILDER_CONTAINER,
                "image": request.builder_image,
                "args": [
                    format!("--dockerfile={}/{}", BUILD_CONTEXT_PATH, DOCKERFILE_PATH),
                    format!("--context=dir://{}", BUILD_CONTEXT_PATH),
                    format!("--destination={}", request.tag),
                ],
                "env": [
                    { "name": "DOCKER_CONFIG", "value": DOCKER_CONFIG_DIR },
                    { "name": "AWS_ACCESS_KEY_ID", "value": "NOT_SET" },
                    { "name": "AWS_SECRET_KEY", "value": "NOT_SET" },
                ],
                "volumeMounts": [
                    { "name": BUILD_CONTEXT_VOLUME, "mountPath": BUILD_CONTEXT_PATH },
                    { "name": REGISTRY_SECRET_VOLUME, "mountPath": DOCKER_CONFIG_DIR },
                ],
            }],
            "volumes": [
                {
                    "name": REGISTRY_SECRET_VOLUME,
                    "secret": {
                        "secretName": request.secret_name,
                        "optional": request.secret_optional,
                        "items": [{ "key": ".dockerconfigjson", "path": "config.json" }],
                    },
                },
                { "name": BUILD_CONTEXT_VOLUME, "emptyDir": {} },
            ],
        },
    }))
}

/// Image build inside a throwaway pod
pub struct BuilderPodBuild {
    cluster: Arc<dyn ClusterClient>,
    sync: Arc<dyn SyncAdapter>,
    start_timeout: Duration,
    build_timeout: Duration,
}

impl BuilderPodBuild {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        sync: Arc<dyn SyncAdapter>,
        start_timeout: Duration,
        build_timeout: Duration,
    ) -> Self {
        Self {
            cluster,
            sync,
            start_timeout,
            build_timeout,
        }
    }

    pub async fn run(
        &self,
        request: &BuilderPodRequest,
        supervisor: &InterruptSupervisor,
    ) -> Result<()> {
        let pod = builder_pod_resource(request)?;
        self.cluster
            .create(&GroupVersionResource::pods(), &pod)
            .await
            .with_context(|| format!("unable to create builder pod {}", request.name))?;
        info!("📦 Created builder pod {}", request.name);

        let label = format!("builder pod {}", request.name);
        supervisor
            .guard(&label, self.build(request), self.delete_pod(&request.name))
            .await
    }

    async fn build(&self, request: &BuilderPodRequest) -> Result<()> {
        self.cluster
            .wait_for_init_container_started(&request.name, INIT_CONTAINER, self.start_timeout)
            .await
            .with_context(|| format!("init container of pod {} did not start", request.name))?;

        let archive = self
            .sync
            .build_context(&request.context_dir)
            .await
            .context("unable to package the build context")?;
        self.cluster
            .extract_archive(&request.name, INIT_CONTAINER, BUILD_CONTEXT_PATH, archive)
            .await
            .context("unable to copy the build context to the builder pod")?;
        debug!("📤 Build context copied to {}", BUILD_CONTEXT_PATH);

        let release = vec!["touch".to_string(), COMPLETION_SENTINEL.to_string()];
        let result = self
            .cluster
            .exec(&request.name, INIT_CONTAINER, &release)
            .await?;
        if !result.is_success() {
            return Err(AppError::CommandFailed(format!(
                "unable to release the builder pod: {}",
                result.combined_output()
            )));
        }

        info!("⏳ Waiting for the image build to complete");
        let selector = label_selector(&builder_labels(&request.name));
        if let Err(e) = self
            .cluster
            .wait_for_pod(&selector, PodPhase::Succeeded, self.build_timeout)
            .await
        {
            let logs = match self.cluster.pod_logs(&request.name, BUILDER_CONTAINER).await {
                Ok(logs) => logs,
                Err(log_err) => {
                    warn!("⚠️ Unable to fetch builder logs: {}", log_err);
                    String::new()
                }
            };
            return Err(e.context(format!(
                "unable to build image {} in pod {}: {}",
                request.tag,
                request.name,
                logs.trim()
            )));
        }

        info!("✅ Successfully built container image: {}", request.tag);
        Ok(())
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        match self.cluster.delete(&GroupVersionResource::pods(), name).await {
            Ok(()) => {
                debug!("🗑️ Deleted builder pod {}", name);
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.context(format!("unable to delete builder pod {}", name))),
        }
    }
}
