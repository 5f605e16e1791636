use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Parsed devfile document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Devfile {
    #[serde(default)]
    pub schema_version: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub commands: Vec<DevfileCommand>,
    #[serde(default)]
    pub events: Events,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerComponent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeComponent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerComponent {
    pub image: String,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default)]
    pub mount_sources: bool,
    #[serde(default)]
    pub source_mapping: Option<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub memory_limit: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeComponent {
    #[serde(default)]
    pub size: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub name: String,
    pub target_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevfileCommand {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite: Option<CompositeCommand>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecCommand {
    pub component: String,
    pub command_line: String,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub group: Option<Group>,
    #[serde(default)]
    pub hot_reload_capable: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompositeCommand {
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub group: Option<Group>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub kind: GroupKind,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    Init,
    Build,
    Run,
    Debug,
    Test,
}

impl std::fmt::Display for GroupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupKind::Init => write!(f, "init"),
            GroupKind::Build => write!(f, "build"),
            GroupKind::Run => write!(f, "run"),
            GroupKind::Debug => write!(f, "debug"),
            GroupKind::Test => write!(f, "test"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Events {
    #[serde(default)]
    pub pre_start: Vec<String>,
    #[serde(default)]
    pub post_start: Vec<String>,
    #[serde(default)]
    pub pre_stop: Vec<String>,
    #[serde(default)]
    pub post_stop: Vec<String>,
}

impl Devfile {
    pub async fn from_path(path: &Path) -> Result<Self> {
        debug!("📄 Reading devfile: {}", path.display());
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::ValidationError(format!("unable to read devfile {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| AppError::ValidationError(format!("invalid devfile: {}", e)))
    }

    /// Container components, in declaration order
    pub fn containers(&self) -> impl Iterator<Item = (&str, &ContainerComponent)> {
        self.components
            .iter()
            .filter_map(|c| c.container.as_ref().map(|container| (c.name.as_str(), container)))
    }

    pub fn container(&self, name: &str) -> Option<&ContainerComponent> {
        self.containers()
            .find(|(container_name, _)| *container_name == name)
            .map(|(_, container)| container)
    }

    /// Volume components by name
    pub fn volumes(&self) -> HashMap<&str, &VolumeComponent> {
        self.components
            .iter()
            .filter_map(|c| c.volume.as_ref().map(|volume| (c.name.as_str(), volume)))
            .collect()
    }

    /// Commands declared in the given group, in declaration order
    pub fn commands_in_group(&self, kind: GroupKind) -> Vec<&DevfileCommand> {
        self.commands
            .iter()
            .filter(|c| c.group().map(|g| g.kind) == Some(kind))
            .collect()
    }

    pub fn events(&self) -> &Events {
        &self.events
    }

    /// Component type label value: devfile name without a trailing `-`
    pub fn component_type(&self) -> &str {
        self.metadata.name.trim_end_matches('-')
    }
}

impl DevfileCommand {
    pub fn group(&self) -> Option<&Group> {
        match (&self.exec, &self.composite) {
            (Some(exec), _) => exec.group.as_ref(),
            (None, Some(composite)) => composite.group.as_ref(),
            (None, None) => None,
        }
    }
}
