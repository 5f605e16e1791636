//! Desired cluster objects for a devfile component
//!
//! [`ComponentSpec`] is computed from the devfile plus the selected run and
//! debug commands. It renders the Deployment, Service and PVC objects that
//! the reconciler applies.

use super::storage::{claim_volume_name, VolumeBinding};
use crate::cluster::{OwnerReference, Resource};
use crate::devfile::{Command, ContainerComponent, Devfile};
use crate::error::{AppError, Result};
use crate::exec::supervisor;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Shared emptyDir holding the project sources
pub const SOURCE_VOLUME: &str = "devpush-projects";

pub const DEFAULT_SOURCE_MAPPING: &str = "/projects";

pub const DEFAULT_VOLUME_SIZE: &str = "1Gi";

pub const COMPONENT_LABEL: &str = "component";
pub const APP_LABEL: &str = "app";
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const COMPONENT_TYPE_LABEL: &str = "component-type";
pub const MANAGED_BY: &str = "devpush";

/// Inputs besides the devfile itself
#[derive(Debug, Clone, Copy)]
pub struct ComponentSettings<'a> {
    pub name: &'a str,
    pub application: &'a str,
    pub supervisor_image: &'a str,
    /// Directory inside the supervisor image copied into the shared volume
    pub supervisor_source_dir: &'a str,
    pub run: Option<&'a Command>,
    pub debug: Option<&'a Command>,
    pub debug_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub volume: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub ports: Vec<u16>,
    pub memory_limit: Option<String>,
    pub mounts: Vec<MountSpec>,
}

/// A devfile volume a container asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRequest {
    pub container: String,
    pub volume: String,
    pub path: String,
    pub size: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub containers: Vec<ContainerSpec>,
    pub volumes: Vec<VolumeRequest>,
    pub supervisor_image: String,
    pub supervisor_source_dir: String,
}

pub fn component_labels(name: &str, application: &str, component_type: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (COMPONENT_LABEL.to_string(), name.to_string()),
        (APP_LABEL.to_string(), application.to_string()),
        (PART_OF_LABEL.to_string(), application.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
        (COMPONENT_TYPE_LABEL.to_string(), component_type.to_string()),
    ])
}

pub fn component_selector(name: &str) -> String {
    format!("{}={}", COMPONENT_LABEL, name)
}

/// Pods of the component's Deployment; builder pods share the component label but not this one
pub fn component_pod_selector(name: &str) -> String {
    format!("{},{}={}", component_selector(name), MANAGED_BY_LABEL, MANAGED_BY)
}

impl ContainerSpec {
    fn from_devfile(name: &str, container: &ContainerComponent) -> Self {
        let mut spec = Self {
            name: name.to_string(),
            image: container.image.clone(),
            command: container.command.clone(),
            args: container.args.clone(),
            env: container
                .env
                .iter()
                .map(|e| (e.name.clone(), e.value.clone()))
                .collect(),
            ports: container.endpoints.iter().map(|e| e.target_port).collect(),
            memory_limit: container.memory_limit.clone(),
            mounts: Vec::new(),
        };

        if container.mount_sources {
            let path = container
                .source_mapping
                .clone()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_SOURCE_MAPPING.to_string());
            spec.add_env("PROJECTS_ROOT", &path);
            spec.add_env("PROJECT_SOURCE", &path);
            spec.mounts.push(MountSpec {
                volume: SOURCE_VOLUME.to_string(),
                path,
            });
        }
        spec
    }

    /// Add an env var unless the devfile already sets it
    fn add_env(&mut self, name: &str, value: &str) {
        if !self.env.iter().any(|(existing, _)| existing == name) {
            self.env.push((name.to_string(), value.to_string()));
        }
    }

    fn wire_supervisor(&mut self) {
        if self.command.is_empty() && self.args.is_empty() {
            let (command, args) = supervisor::entrypoint();
            self.command = command;
            self.args = args;
        }
        if !self.mounts.iter().any(|m| m.volume == supervisor::SUPERVISORD_VOLUME) {
            self.mounts.push(MountSpec {
                volume: supervisor::SUPERVISORD_VOLUME.to_string(),
                path: supervisor::SUPERVISORD_MOUNT_PATH.to_string(),
            });
        }
    }

    fn to_value(&self, bindings: &[VolumeBinding]) -> Value {
        let mut container = json!({
            "name": self.name,
            "image": self.image,
            "imagePullPolicy": "Always",
            "env": self.env.iter().map(|(name, value)| json!({ "name": name, "value": value })).collect::<Vec<_>>(),
            "ports": self.ports.iter().map(|port| json!({
                "name": format!("port-{}", port),
                "containerPort": port,
                "protocol": "TCP",
            })).collect::<Vec<_>>(),
            "volumeMounts": self.mounts.iter().map(|m| json!({
                "name": volume_name(&m.volume, bindings),
                "mountPath": m.path,
            })).collect::<Vec<_>>(),
        });

        if !self.command.is_empty() {
            container["command"] = json!(self.command);
        }
        if !self.args.is_empty() {
            container["args"] = json!(self.args);
        }
        if let Some(memory) = &self.memory_limit {
            container["resources"] = json!({ "limits": { "memory": memory } });
        }
        container
    }
}

/// Pod volume name for a mount: PVC-backed devfile volumes are named after their claim
fn volume_name(volume: &str, bindings: &[VolumeBinding]) -> String {
    bindings
        .iter()
        .find(|b| b.volume_name == volume)
        .map(|b| claim_volume_name(&b.pvc_name))
        .unwrap_or_else(|| volume.to_string())
}

impl ComponentSpec {
    pub fn from_devfile(devfile: &Devfile, settings: &ComponentSettings<'_>) -> Result<Self> {
        let mut containers: Vec<ContainerSpec> = devfile
            .containers()
            .map(|(name, container)| ContainerSpec::from_devfile(name, container))
            .collect();
        if containers.is_empty() {
            return Err(AppError::ValidationError(
                "No valid components found in the devfile".to_string(),
            ));
        }

        let declared_volumes = devfile.volumes();
        let mut volumes = Vec::new();
        for (name, container) in devfile.containers() {
            for mount in &container.volume_mounts {
                let volume = declared_volumes.get(mount.name.as_str()).ok_or_else(|| {
                    AppError::ValidationError(format!(
                        "container {} mounts undeclared volume {}",
                        name, mount.name
                    ))
                })?;
                volumes.push(VolumeRequest {
                    container: name.to_string(),
                    volume: mount.name.clone(),
                    path: mount
                        .path
                        .clone()
                        .filter(|p| !p.is_empty())
                        .unwrap_or_else(|| format!("/{}", mount.name)),
                    size: volume
                        .size
                        .clone()
                        .unwrap_or_else(|| DEFAULT_VOLUME_SIZE.to_string()),
                });
            }
        }

        if let Some(run) = settings.run.and_then(Command::exec) {
            let container = find_container(&mut containers, &run.component)?;
            container.wire_supervisor();
            container.add_env(supervisor::ENV_COMMAND_RUN, &run.command_line);
            if !run.working_dir.is_empty() {
                container.add_env(supervisor::ENV_COMMAND_RUN_WORKING_DIR, &run.working_dir);
            }
        }

        if let Some(debug) = settings.debug.and_then(Command::exec) {
            let container = find_container(&mut containers, &debug.component)?;
            container.wire_supervisor();
            container.add_env(supervisor::ENV_COMMAND_DEBUG, &debug.command_line);
            if !debug.working_dir.is_empty() {
                container.add_env(supervisor::ENV_COMMAND_DEBUG_WORKING_DIR, &debug.working_dir);
            }
            container.add_env(supervisor::ENV_DEBUG_PORT, &settings.debug_port.to_string());
        }

        Ok(Self {
            name: settings.name.to_string(),
            labels: component_labels(settings.name, settings.application, devfile.component_type()),
            containers,
            volumes,
            supervisor_image: settings.supervisor_image.to_string(),
            supervisor_source_dir: settings.supervisor_source_dir.to_string(),
        })
    }

    /// Union of container ports, first occurrence wins
    pub fn service_ports(&self) -> Vec<u16> {
        let mut seen = BTreeSet::new();
        self.containers
            .iter()
            .flat_map(|c| c.ports.iter().copied())
            .filter(|port| seen.insert(*port))
            .collect()
    }

    pub fn mounts_sources(&self) -> bool {
        self.containers
            .iter()
            .any(|c| c.mounts.iter().any(|m| m.volume == SOURCE_VOLUME))
    }

    fn selector(&self) -> Value {
        json!({ "component": self.name })
    }

    fn pod_template(&self, bindings: &[VolumeBinding]) -> Value {
        let mut volumes = vec![json!({ "name": supervisor::SUPERVISORD_VOLUME, "emptyDir": {} })];
        if self.mounts_sources() {
            volumes.push(json!({ "name": SOURCE_VOLUME, "emptyDir": {} }));
        }
        for binding in bindings {
            volumes.push(json!({
                "name": claim_volume_name(&binding.pvc_name),
                "persistentVolumeClaim": { "claimName": binding.pvc_name },
            }));
        }

        let bootstrap = json!({
            "name": supervisor::BOOTSTRAP_CONTAINER,
            "image": self.supervisor_image,
            "command": ["/usr/bin/cp"],
            "args": ["-r", self.supervisor_source_dir, supervisor::SUPERVISORD_MOUNT_PATH],
            "volumeMounts": [{
                "name": supervisor::SUPERVISORD_VOLUME,
                "mountPath": supervisor::SUPERVISORD_MOUNT_PATH,
            }],
        });

        let mut containers = Vec::new();
        for container in &self.containers {
            let mut value = container.to_value(bindings);
            for request in self.volumes.iter().filter(|v| v.container == container.name) {
                if let Some(mounts) = value["volumeMounts"].as_array_mut() {
                    mounts.push(json!({
                        "name": volume_name(&request.volume, bindings),
                        "mountPath": request.path,
                    }));
                }
            }
            containers.push(value);
        }

        json!({
            "metadata": { "name": self.name, "labels": self.labels },
            "spec": {
                "initContainers": [bootstrap],
                "containers": containers,
                "volumes": volumes,
            },
        })
    }

    pub fn deployment(&self, bindings: &[VolumeBinding]) -> Result<Resource> {
        Resource::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": self.name, "labels": self.labels },
            "spec": {
                "replicas": 1,
                "strategy": { "type": "Recreate" },
                "selector": { "matchLabels": self.selector() },
                "template": self.pod_template(bindings),
            },
        }))
    }

    pub fn service(&self, owner: Option<&OwnerReference>) -> Result<Resource> {
        let ports: Vec<Value> = self
            .service_ports()
            .into_iter()
            .map(|port| {
                json!({
                    "name": format!("port-{}", port),
                    "port": port,
                    "targetPort": port,
                    "protocol": "TCP",
                })
            })
            .collect();

        let mut service = Resource::from_value(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": self.name, "labels": self.labels },
            "spec": {
                "type": "ClusterIP",
                "selector": self.selector(),
                "ports": ports,
            },
        }))?;
        if let Some(owner) = owner {
            service.add_owner_reference(owner.clone());
        }
        Ok(service)
    }
}

fn find_container<'a>(containers: &'a mut [ContainerSpec], name: &str) -> Result<&'a mut ContainerSpec> {
    containers
        .iter_mut()
        .find(|c| c.name == name)
        .ok_or_else(|| {
            AppError::ValidationError(format!(
                "the command component {} does not exist in the devfile",
                name
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devfile::CommandGraph;

    const DEVFILE: &str = r#"
metadata:
  name: nodejs
components:
  - name: runtime
    container:
      image: node:14
      mountSources: true
      endpoints:
        - name: http
          targetPort: 3000
      volumeMounts:
        - name: cache
  - name: tools
    container:
      image: busybox
      command: ["tail"]
      args: ["-f", "/dev/null"]
      endpoints:
        - name: http
          targetPort: 3000
        - name: admin
          targetPort: 9000
      volumeMounts:
        - name: cache
          path: /data/cache
  - name: cache
    volume:
      size: 2Gi
commands:
  - id: run
    exec:
      component: runtime
      commandLine: npm start
      workingDir: /projects
      group:
        kind: run
  - id: debug
    exec:
      component: runtime
      commandLine: npm run debug
      group:
        kind: debug
"#;

    fn spec() -> ComponentSpec {
        let devfile = Devfile::from_yaml(DEVFILE).unwrap();
        let graph = CommandGraph::from_devfile(&devfile).unwrap();
        let settings = ComponentSettings {
            name: "web",
            application: "shop",
            supervisor_image: "supervisor:1",
            supervisor_source_dir: "/opt/supervisor/.",
            run: graph.get("run"),
            debug: graph.get("debug"),
            debug_port: 5858,
        };
        ComponentSpec::from_devfile(&devfile, &settings).unwrap()
    }

    fn env<'a>(container: &'a ContainerSpec, name: &str) -> Option<&'a str> {
        container
            .env
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_labels() {
        let spec = spec();
        assert_eq!(spec.labels["component"], "web");
        assert_eq!(spec.labels["app"], "shop");
        assert_eq!(spec.labels["app.kubernetes.io/managed-by"], "devpush");
        assert_eq!(spec.labels["component-type"], "nodejs");
    }

    #[test]
    fn test_supervisor_wiring_on_run_container() {
        let spec = spec();
        let runtime = &spec.containers[0];
        assert_eq!(runtime.command, vec![supervisor::SUPERVISORD_BIN]);
        assert_eq!(env(runtime, "DEVPUSH_COMMAND_RUN"), Some("npm start"));
        assert_eq!(env(runtime, "DEVPUSH_COMMAND_RUN_WORKING_DIR"), Some("/projects"));
        assert_eq!(env(runtime, "DEVPUSH_COMMAND_DEBUG"), Some("npm run debug"));
        assert_eq!(env(runtime, "DEBUG_PORT"), Some("5858"));
        assert_eq!(env(runtime, "PROJECTS_ROOT"), Some("/projects"));

        let tools = &spec.containers[1];
        assert_eq!(tools.command, vec!["tail"]);
        assert!(env(tools, "DEVPUSH_COMMAND_RUN").is_none());
    }

    #[test]
    fn test_service_ports_are_deduplicated() {
        let spec = spec();
        assert_eq!(spec.service_ports(), vec![3000, 9000]);

        let service = spec.service(None).unwrap();
        let ports = service.pointer("/spec/ports").unwrap().as_array().unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0]["name"], "port-3000");
    }

    #[test]
    fn test_deployment_mounts_claims() {
        let spec = spec();
        assert_eq!(spec.volumes.len(), 2);
        assert_eq!(spec.volumes[0].path, "/cache");
        assert_eq!(spec.volumes[0].size, "2Gi");

        let bindings = vec![VolumeBinding {
            volume_name: "cache".to_string(),
            pvc_name: "cache-web-1a2b".to_string(),
            size: "2Gi".to_string(),
        }];
        let deployment = spec.deployment(&bindings).unwrap();
        assert_eq!(
            deployment.pointer("/spec/strategy/type").unwrap(),
            "Recreate"
        );

        let volumes = deployment
            .pointer("/spec/template/spec/volumes")
            .unwrap()
            .as_array()
            .unwrap();
        let claims: Vec<&Value> = volumes
            .iter()
            .filter(|v| v.get("persistentVolumeClaim").is_some())
            .collect();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0]["persistentVolumeClaim"]["claimName"], "cache-web-1a2b");

        let tools_mounts = deployment
            .pointer("/spec/template/spec/containers/1/volumeMounts")
            .unwrap();
        assert_eq!(tools_mounts[0]["mountPath"], "/data/cache");
        assert_eq!(tools_mounts[0]["name"], "cache-web-1a2b-vol");

        let init = deployment
            .pointer("/spec/template/spec/initContainers/0")
            .unwrap();
        assert_eq!(init["name"], "copy-supervisord");
        assert_eq!(init["image"], "supervisor:1");
        assert_eq!(init["args"][1], "/opt/supervisor/.");
    }

    #[test]
    fn test_pod_selector_skips_builder_pods() {
        let selector = crate::cluster::parse_label_selector(&component_pod_selector("web"));
        let matches = |labels: &BTreeMap<String, String>| {
            selector.iter().all(|(k, v)| labels.get(k) == Some(v))
        };

        assert!(matches(&spec().labels));
        assert!(!matches(&crate::build::builder_pod::builder_labels("web")));
    }

    #[test]
    fn test_no_containers_is_an_error() {
        let devfile = Devfile::from_yaml("metadata:\n  name: empty\n").unwrap();
        let settings = ComponentSettings {
            name: "web",
            application: "app",
            supervisor_image: "img",
            supervisor_source_dir: "/opt/supervisor/.",
            run: None,
            debug: None,
            debug_port: 5858,
        };
        assert!(ComponentSpec::from_devfile(&devfile, &settings).is_err());
    }
}
