//! Generic structured cluster objects.
//!
//! A [`Resource`] is the JSON form of any object the API server returns,
//! with typed accessors for the metadata fields the engine reads or
//! carries forward between the live and desired object.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Group/version/resource-plural triple addressing a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupVersionResource {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl GroupVersionResource {
    pub fn new(group: &str, version: &str, resource: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
        }
    }

    pub fn core(resource: &str) -> Self {
        Self::new("", "v1", resource)
    }

    pub fn deployments() -> Self {
        Self::new("apps", "v1", "deployments")
    }

    pub fn services() -> Self {
        Self::core("services")
    }

    pub fn pods() -> Self {
        Self::core("pods")
    }

    pub fn persistent_volume_claims() -> Self {
        Self::core("persistentvolumeclaims")
    }

    pub fn secrets() -> Self {
        Self::core("secrets")
    }

    pub fn build_configs() -> Self {
        Self::new("build.openshift.io", "v1", "buildconfigs")
    }

    pub fn builds() -> Self {
        Self::new("build.openshift.io", "v1", "builds")
    }

    pub fn image_streams() -> Self {
        Self::new("image.openshift.io", "v1", "imagestreams")
    }

    pub fn routes() -> Self {
        Self::new("route.openshift.io", "v1", "routes")
    }

    /// `apiVersion` string for objects of this collection
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Split an `apiVersion` into (group, version)
    pub fn from_api_version(api_version: &str, resource: &str) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, resource),
            None => Self::new("", api_version, resource),
        }
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}, Resource={}", self.group, self.version, self.resource)
        }
    }
}

/// Link from a dependent object to its owner, used for cascading deletion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container as seen in a live pod spec
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodContainer {
    pub name: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub volume_mounts: Vec<PodVolumeMount>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodVolumeMount {
    pub name: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(Value);

impl Resource {
    pub fn new(api_version: &str, kind: &str, name: &str) -> Self {
        Self(json!({
            "apiVersion": api_version,
            "kind": kind,
            "metadata": { "name": name },
        }))
    }

    /// Wrap a decoded object; it must be a JSON object.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(AppError::ValidationError(
                "cluster object must be a mapping".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn as_value_mut(&mut self) -> &mut Value {
        &mut self.0
    }

    fn str_at(&self, pointer: &str) -> Option<&str> {
        self.0.pointer(pointer).and_then(Value::as_str)
    }

    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.0.pointer(pointer)
    }

    pub fn api_version(&self) -> &str {
        self.str_at("/apiVersion").unwrap_or_default()
    }

    pub fn kind(&self) -> &str {
        self.str_at("/kind").unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.str_at("/metadata/name").unwrap_or_default()
    }

    pub fn uid(&self) -> &str {
        self.str_at("/metadata/uid").unwrap_or_default()
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.str_at("/metadata/resourceVersion").filter(|rv| !rv.is_empty())
    }

    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        let root = ensure_object(&mut self.0);
        ensure_object(root.entry("metadata").or_insert(Value::Null))
    }

    pub fn set_namespace(&mut self, namespace: &str) {
        self.metadata_mut()
            .insert("namespace".to_string(), Value::String(namespace.to_string()));
    }

    pub fn set_resource_version(&mut self, resource_version: Option<&str>) {
        let metadata = self.metadata_mut();
        match resource_version {
            Some(rv) => {
                metadata.insert("resourceVersion".to_string(), Value::String(rv.to_string()));
            }
            None => {
                metadata.remove("resourceVersion");
            }
        }
    }

    fn string_map(&self, pointer: &str) -> BTreeMap<String, String> {
        self.0
            .pointer(pointer)
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.string_map("/metadata/labels")
    }

    pub fn set_labels(&mut self, labels: &BTreeMap<String, String>) {
        let value = serde_json::to_value(labels).unwrap_or(Value::Null);
        self.metadata_mut().insert("labels".to_string(), value);
    }

    /// Add `extra` on top of existing labels; existing keys not in `extra` survive.
    pub fn merge_labels(&mut self, extra: &BTreeMap<String, String>) {
        let mut labels = self.labels();
        labels.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.set_labels(&labels);
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.string_map("/metadata/annotations")
    }

    pub fn set_annotations(&mut self, annotations: &BTreeMap<String, String>) {
        let metadata = self.metadata_mut();
        if annotations.is_empty() {
            metadata.remove("annotations");
        } else {
            let value = serde_json::to_value(annotations).unwrap_or(Value::Null);
            metadata.insert("annotations".to_string(), value);
        }
    }

    pub fn owner_references(&self) -> Vec<OwnerReference> {
        self.0
            .pointer("/metadata/ownerReferences")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    pub fn add_owner_reference(&mut self, owner: OwnerReference) {
        let mut owners = self.owner_references();
        if owners.iter().any(|o| o.uid == owner.uid && o.name == owner.name) {
            return;
        }
        owners.push(owner);
        let value = serde_json::to_value(owners).unwrap_or(Value::Null);
        self.metadata_mut().insert("ownerReferences".to_string(), value);
    }

    /// Owner reference pointing at this object
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version().to_string(),
            kind: self.kind().to_string(),
            name: self.name().to_string(),
            uid: self.uid().to_string(),
            controller: Some(true),
        }
    }

    pub fn spec_cluster_ip(&self) -> Option<&str> {
        self.str_at("/spec/clusterIP").filter(|ip| !ip.is_empty())
    }

    pub fn set_spec_cluster_ip(&mut self, cluster_ip: &str) {
        let root = ensure_object(&mut self.0);
        ensure_object(root.entry("spec").or_insert(Value::Null))
            .insert("clusterIP".to_string(), Value::String(cluster_ip.to_string()));
    }

    pub fn pod_phase(&self) -> PodPhase {
        self.str_at("/status/phase")
            .map(PodPhase::parse)
            .unwrap_or(PodPhase::Unknown)
    }

    /// Containers of a pod (`spec.containers`) or a workload template
    /// (`spec.template.spec.containers`)
    pub fn containers(&self) -> Vec<PodContainer> {
        let containers = self
            .0
            .pointer("/spec/containers")
            .or_else(|| self.0.pointer("/spec/template/spec/containers"));
        containers
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Whether the named init container has reached the running state
    pub fn init_container_running(&self, name: &str) -> bool {
        self.0
            .pointer("/status/initContainerStatuses")
            .and_then(Value::as_array)
            .map(|statuses| {
                statuses.iter().any(|s| {
                    s.get("name").and_then(Value::as_str) == Some(name)
                        && s.pointer("/state/running").is_some()
                })
            })
            .unwrap_or(false)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.0)?)
    }
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            *other = Value::Object(Map::new());
            ensure_object(other)
        }
    }
}

impl From<Resource> for Value {
    fn from(resource: Resource) -> Self {
        resource.0
    }
}

/// Parse a `k=v,k2=v2` equality selector
pub fn parse_label_selector(selector: &str) -> BTreeMap<String, String> {
    selector
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn matches_selector(resource: &Resource, selector: &BTreeMap<String, String>) -> bool {
    let labels = resource.labels();
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}
