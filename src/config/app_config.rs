use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Workspace-relative directory holding local engine state
pub const LOCAL_STATE_DIR: &str = ".devpush";

/// Default file name for the engine configuration inside [`LOCAL_STATE_DIR`]
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub namespace: String,
    pub application: String,
    pub context_dir: PathBuf,
    pub timeouts: TimeoutConfig,
    pub registry: RegistryConfig,
    pub images: ImageConfig,
    pub tools: ToolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub rollout_seconds: u64,
    pub pod_seconds: u64,
    pub build_seconds: u64,
    pub poll_interval_ms: u64,
    pub deploy_settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Host of the cluster's internal image registry
    pub internal_host: String,
    /// Local container-registry credentials used for external registries
    pub docker_config_path: Option<PathBuf>,
    pub secret_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub supervisor_image: String,
    /// Payload directory inside `supervisor_image`, copied into each component pod
    pub supervisor_source_dir: String,
    pub builder_image: String,
    pub build_init_image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub kubectl_path: String,
    pub oc_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            application: "app".to_string(),
            context_dir: PathBuf::from("."),
            timeouts: TimeoutConfig::default(),
            registry: RegistryConfig::default(),
            images: ImageConfig::default(),
            tools: ToolConfig::default(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            rollout_seconds: 300,
            pod_seconds: 240,
            build_seconds: 300,
            poll_interval_ms: 1000,
            deploy_settle_ms: 2000,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            internal_host: "image-registry.openshift-image-registry.svc:5000".to_string(),
            docker_config_path: None,
            secret_name: "regcred".to_string(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            supervisor_image: "registry.access.redhat.com/ocp-tools-43-tech-preview/odo-init-image-rhel7:1.1.2".to_string(),
            supervisor_source_dir: "/opt/odo-init/.".to_string(),
            builder_image: "gcr.io/kaniko-project/executor:latest".to_string(),
            build_init_image: "busybox".to_string(),
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            kubectl_path: "kubectl".to_string(),
            oc_path: "oc".to_string(),
        }
    }
}

impl TimeoutConfig {
    pub fn rollout(&self) -> Duration {
        Duration::from_secs(self.rollout_seconds)
    }

    pub fn pod(&self) -> Duration {
        Duration::from_secs(self.pod_seconds)
    }

    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn deploy_settle(&self) -> Duration {
        Duration::from_millis(self.deploy_settle_ms)
    }
}

impl EngineConfig {
    /// Load configuration: defaults, then the YAML file (explicit path or
    /// `<context>/.devpush/config.yaml` when present), then `DEVPUSH_*` env vars.
    pub async fn load(explicit_path: Option<&Path>, context_dir: &Path) -> Result<Self> {
        let mut config = match explicit_path {
            Some(path) => Self::load_from_file(path).await?,
            None => {
                let default_path = context_dir.join(LOCAL_STATE_DIR).join(CONFIG_FILE_NAME);
                if tokio::fs::try_exists(&default_path).await.unwrap_or(false) {
                    Self::load_from_file(&default_path).await?
                } else {
                    debug!("No config file at {}, using defaults", default_path.display());
                    Self::default()
                }
            }
        };

        config.context_dir = context_dir.to_path_buf();
        config.load_from_env()?;
        config.validate()?;

        info!(
            "🔧 Configuration loaded (namespace={}, application={})",
            config.namespace, config.application
        );
        Ok(config)
    }

    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::ConfigError(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        serde_yaml::from_str(&content)
            .map_err(|e| AppError::ConfigError(format!("Invalid YAML config: {}", e)))
    }

    fn load_from_env(&mut self) -> Result<()> {
        if let Ok(namespace) = std::env::var("DEVPUSH_NAMESPACE") {
            self.namespace = namespace;
        }
        if let Ok(application) = std::env::var("DEVPUSH_APPLICATION") {
            self.application = application;
        }
        if let Ok(host) = std::env::var("DEVPUSH_INTERNAL_REGISTRY") {
            self.registry.internal_host = host;
        }
        if let Ok(path) = std::env::var("DEVPUSH_DOCKER_CONFIG") {
            self.registry.docker_config_path = Some(PathBuf::from(path));
        }
        if let Ok(image) = std::env::var("DEVPUSH_SUPERVISOR_IMAGE") {
            self.images.supervisor_image = image;
        }
        if let Ok(dir) = std::env::var("DEVPUSH_SUPERVISOR_SOURCE_DIR") {
            self.images.supervisor_source_dir = dir;
        }
        if let Ok(kubectl) = std::env::var("DEVPUSH_KUBECTL") {
            self.tools.kubectl_path = kubectl;
        }
        if let Ok(oc) = std::env::var("DEVPUSH_OC") {
            self.tools.oc_path = oc;
        }
        if let Ok(value) = std::env::var("DEVPUSH_BUILD_TIMEOUT") {
            self.timeouts.build_seconds = parse_seconds("DEVPUSH_BUILD_TIMEOUT", &value)?;
        }
        if let Ok(value) = std::env::var("DEVPUSH_ROLLOUT_TIMEOUT") {
            self.timeouts.rollout_seconds = parse_seconds("DEVPUSH_ROLLOUT_TIMEOUT", &value)?;
        }
        if let Ok(value) = std::env::var("DEVPUSH_POD_TIMEOUT") {
            self.timeouts.pod_seconds = parse_seconds("DEVPUSH_POD_TIMEOUT", &value)?;
        }

        debug!("🔧 Configuration loaded from environment variables");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(AppError::ConfigError("namespace cannot be empty".to_string()));
        }
        if self.application.trim().is_empty() {
            return Err(AppError::ConfigError("application name cannot be empty".to_string()));
        }
        if self.timeouts.rollout_seconds == 0
            || self.timeouts.pod_seconds == 0
            || self.timeouts.build_seconds == 0
        {
            return Err(AppError::ConfigError(
                "timeouts must be greater than 0".to_string(),
            ));
        }
        if self.timeouts.poll_interval_ms == 0 {
            return Err(AppError::ConfigError(
                "poll interval must be greater than 0".to_string(),
            ));
        }
        if self.images.supervisor_image.trim().is_empty()
            || self.images.supervisor_source_dir.trim().is_empty()
        {
            return Err(AppError::ConfigError(
                "supervisor image and source directory cannot be empty".to_string(),
            ));
        }
        if self.registry.secret_name.is_empty() {
            return Err(AppError::ConfigError(
                "registry secret name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the local mirror of the last deployed manifest
    pub fn manifest_mirror_path(&self) -> PathBuf {
        self.context_dir.join(LOCAL_STATE_DIR).join("manifest.yaml")
    }

    /// Docker config used for the registry secret, defaulting to `~/.docker/config.json`
    pub fn docker_config_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.registry.docker_config_path {
            return Ok(path.clone());
        }
        std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".docker").join("config.json"))
            .map_err(|_| {
                AppError::ConfigError(
                    "cannot locate docker config: HOME is not set and no path was configured"
                        .to_string(),
                )
            })
    }
}

fn parse_seconds(var: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| AppError::ConfigError(format!("{} must be a number of seconds, got '{}'", var, value)))
}
