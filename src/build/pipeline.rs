use super::binary::{BinaryBuild, BinaryBuildRequest, OutputKind};
use super::builder_pod::{BuilderPodBuild, BuilderPodRequest};
use super::interrupt::InterruptSupervisor;
use super::registry::{ensure_registry_secret, ImageTag};
use crate::cluster::ClusterClient;
use crate::config::EngineConfig;
use crate::error::{AppError, Result};
use crate::sync::SyncAdapter;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub const BUILD_API_GROUP: &str = "build.openshift.io";

#[derive(Debug, Clone, Default)]
pub struct BuildParameters {
    /// Destination image; empty means the component's image stream
    pub tag: String,
    pub rootless: bool,
    pub context_dir: PathBuf,
    /// Overrides the configured docker config for the registry secret
    pub docker_config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStrategy {
    BinaryInput,
    BuilderPod,
}

impl BuildStrategy {
    /// Cluster builds when available and the caller allows root builds
    pub fn select(build_api_supported: bool, rootless: bool) -> Self {
        if build_api_supported && !rootless {
            BuildStrategy::BinaryInput
        } else {
            BuildStrategy::BuilderPod
        }
    }
}

impl fmt::Display for BuildStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStrategy::BinaryInput => write!(f, "BuildConfig"),
            BuildStrategy::BuilderPod => write!(f, "builder pod"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub strategy: BuildStrategy,
    pub image: String,
    /// Set for cluster builds
    pub build_name: Option<String>,
}

/// Image build for one component
pub struct BuildPipeline {
    component: String,
    config: EngineConfig,
    cluster: Arc<dyn ClusterClient>,
    sync: Arc<dyn SyncAdapter>,
    interrupt: InterruptSupervisor,
}

impl BuildPipeline {
    pub fn new(
        component: impl Into<String>,
        config: EngineConfig,
        cluster: Arc<dyn ClusterClient>,
        sync: Arc<dyn SyncAdapter>,
        interrupt: InterruptSupervisor,
    ) -> Self {
        Self {
            component: component.into(),
            config,
            cluster,
            sync,
            interrupt,
        }
    }

    pub async fn build(&self, params: &BuildParameters) -> Result<BuildOutcome> {
        let parsed = if params.tag.is_empty() {
            None
        } else {
            Some(ImageTag::parse(&params.tag)?)
        };

        let supported = self.cluster.is_api_group_supported(BUILD_API_GROUP).await?;
        let strategy = BuildStrategy::select(supported, params.rootless);
        info!("🏗️ Building image for component {} using {}", self.component, strategy);

        let internal = match &parsed {
            Some(tag) => tag.is_internal(&self.config.registry.internal_host),
            None if strategy == BuildStrategy::BinaryInput => true,
            None => {
                return Err(AppError::ValidationError(
                    "an image tag is required when the cluster cannot run BuildConfig builds"
                        .to_string(),
                ))
            }
        };

        if !internal {
            let docker_config = match &params.docker_config {
                Some(path) => path.clone(),
                None => self.config.docker_config_path()?,
            };
            ensure_registry_secret(
                self.cluster.as_ref(),
                &self.config.registry.secret_name,
                &docker_config,
            )
            .await?;
        }

        match strategy {
            BuildStrategy::BinaryInput => self.run_binary(params, internal).await,
            BuildStrategy::BuilderPod => self.run_builder_pod(params, internal).await,
        }
    }

    async fn run_binary(&self, params: &BuildParameters, internal: bool) -> Result<BuildOutcome> {
        let (tag, output) = if params.tag.is_empty() {
            (format!("{}:latest", self.component), OutputKind::ImageStreamTag)
        } else {
            (params.tag.clone(), OutputKind::DockerImage)
        };

        let request = BinaryBuildRequest {
            name: self.component.clone(),
            tag: tag.clone(),
            output,
            push_secret: (!internal).then(|| self.config.registry.secret_name.clone()),
            context_dir: params.context_dir.clone(),
        };
        let build = BinaryBuild::new(
            self.cluster.clone(),
            self.sync.clone(),
            self.config.timeouts.build(),
            self.config.timeouts.poll_interval(),
        );
        let build_name = build.run(&request, &self.interrupt).await?;

        Ok(BuildOutcome {
            strategy: BuildStrategy::BinaryInput,
            image: tag,
            build_name: Some(build_name),
        })
    }

    async fn run_builder_pod(&self, params: &BuildParameters, internal: bool) -> Result<BuildOutcome> {
        let request = BuilderPodRequest {
            name: self.component.clone(),
            tag: params.tag.clone(),
            secret_name: self.config.registry.secret_name.clone(),
            secret_optional: internal,
            builder_image: self.config.images.builder_image.clone(),
            init_image: self.config.images.build_init_image.clone(),
            context_dir: params.context_dir.clone(),
        };
        let build = BuilderPodBuild::new(
            self.cluster.clone(),
            self.sync.clone(),
            self.config.timeouts.pod(),
            self.config.timeouts.build(),
        );
        build.run(&request, &self.interrupt).await?;

        Ok(BuildOutcome {
            strategy: BuildStrategy::BuilderPod,
            image: params.tag.clone(),
            build_name: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_selection() {
        assert_eq!(BuildStrategy::select(true, false), BuildStrategy::BinaryInput);
        assert_eq!(BuildStrategy::select(true, true), BuildStrategy::BuilderPod);
        assert_eq!(BuildStrategy::select(false, false), BuildStrategy::BuilderPod);
        assert_eq!(BuildStrategy::select(false, true), BuildStrategy::BuilderPod);
    }
}
