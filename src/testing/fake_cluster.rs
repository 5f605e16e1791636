use crate::build::ManualInterrupt;
use crate::build::BUILD_API_GROUP;
use crate::cluster::{
    matches_selector, parse_label_selector, ClusterClient, ExecutionResult,
    GroupVersionResource, PodPhase, Resource,
};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

pub const FAKE_CLUSTER_IP: &str = "10.0.0.5";

const POLL: Duration = Duration::from_millis(10);

/// One call made against the fake, in order
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterCall {
    Get { resource: String, name: String },
    List { resource: String, selector: String },
    Create { resource: String, name: String },
    Update { resource: String, name: String, body: Resource },
    Delete { resource: String, name: String },
    DeleteCollection { resource: String, selector: String },
    Exec { pod: String, container: String, command: Vec<String> },
    ExtractArchive { pod: String, container: String, dest: String },
    StartBuild { build_config: String },
}

impl ClusterCall {
    pub fn name(&self) -> &'static str {
        match self {
            ClusterCall::Get { .. } => "get",
            ClusterCall::List { .. } => "list",
            ClusterCall::Create { .. } => "create",
            ClusterCall::Update { .. } => "update",
            ClusterCall::Delete { .. } => "delete",
            ClusterCall::DeleteCollection { .. } => "delete_collection",
            ClusterCall::Exec { .. } => "exec",
            ClusterCall::ExtractArchive { .. } => "extract_archive",
            ClusterCall::StartBuild { .. } => "start_binary_build",
        }
    }
}

#[derive(Default)]
struct FakeState {
    /// (gvr, name) -> object
    objects: BTreeMap<(String, String), Resource>,
    calls: Vec<ClusterCall>,
    next_version: u64,
    pod_revisions: BTreeMap<String, u64>,
    forbidden: HashSet<String>,
    failing_exec: Vec<String>,
    exec_output: Vec<(String, String)>,
    build_api_unsupported: bool,
    build_phases: VecDeque<String>,
    builder_pod_fails: bool,
    builder_pod_stuck: bool,
    interrupt_on: Option<(String, ManualInterrupt)>,
}

impl FakeState {
    fn record(&mut self, call: ClusterCall) {
        let fire = matches!(&self.interrupt_on, Some((name, _)) if call.name() == name);
        if fire {
            if let Some((_, interrupt)) = self.interrupt_on.take() {
                interrupt.trigger();
            }
        }
        self.calls.push(call);
    }

    fn stamp(&mut self, resource: &mut Resource, namespace: &str, uid: Option<String>) {
        self.next_version += 1;
        let version = self.next_version.to_string();
        resource.set_namespace(namespace);
        resource.set_resource_version(Some(&version));

        let uid = uid.unwrap_or_else(|| format!("uid-{}", version));
        resource.as_value_mut()["metadata"]["uid"] = Value::String(uid);
    }

    fn find_by_uid(&self, uid: &str) -> Vec<(String, String)> {
        self.objects
            .iter()
            .filter(|(_, obj)| obj.owner_references().iter().any(|o| o.uid == uid))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Remove an object and everything it transitively owns
    fn remove_cascading(&mut self, key: &(String, String)) {
        if let Some(removed) = self.objects.remove(key) {
            for child in self.find_by_uid(removed.uid()) {
                self.remove_cascading(&child);
            }
        }
    }

    fn insert_pod_for(&mut self, deployment: &Resource, namespace: &str) {
        let revision = self.pod_revisions.entry(deployment.name().to_string()).or_insert(0);
        *revision += 1;
        let pod_name = format!("{}-{}", deployment.name(), revision);

        let template = deployment
            .pointer("/spec/template")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let mut pod = Resource::new("v1", "Pod", &pod_name);
        {
            let value = pod.as_value_mut();
            value["metadata"]["labels"] = template
                .pointer("/metadata/labels")
                .cloned()
                .unwrap_or_else(|| json!({}));
            value["spec"] = template.get("spec").cloned().unwrap_or_else(|| json!({}));
            value["status"] = json!({ "phase": "Running" });
        }
        pod.add_owner_reference(deployment.owner_reference());
        self.stamp(&mut pod, namespace, None);
        self.objects
            .insert((GroupVersionResource::pods().to_string(), pod_name), pod);
    }

    fn remove_pods_of(&mut self, deployment: &Resource) {
        let stale: Vec<_> = self
            .objects
            .iter()
            .filter(|((gvr, _), obj)| {
                *gvr == GroupVersionResource::pods().to_string()
                    && obj.owner_references().iter().any(|o| o.uid == deployment.uid())
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            self.objects.remove(&key);
        }
    }
}

/// In-memory [`ClusterClient`] that records every call.
///
/// Deployments get a running pod named `<deployment>-<n>`; a new pod is only
/// created when the pod template changes. Services get a cluster IP and
/// reject updates that drop it. Builder pods start Pending with their init
/// container running and finish once the build is released.
pub struct FakeCluster {
    namespace: String,
    state: Mutex<FakeState>,
}

impl FakeCluster {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Calls on this resource type fail with Forbidden
    pub fn with_forbidden(mut self, resource: &str) -> Self {
        self.state.get_mut().forbidden.insert(resource.to_string());
        self
    }

    /// Exec calls whose joined command contains `needle` exit non-zero
    pub fn with_failing_exec(mut self, needle: &str) -> Self {
        self.state.get_mut().failing_exec.push(needle.to_string());
        self
    }

    /// Exec calls whose joined command contains `needle` print `stdout`
    pub fn with_exec_output(mut self, needle: &str, stdout: &str) -> Self {
        self.state
            .get_mut()
            .exec_output
            .push((needle.to_string(), stdout.to_string()));
        self
    }

    pub fn without_build_api(mut self) -> Self {
        self.state.get_mut().build_api_unsupported = true;
        self
    }

    /// Phases reported by successive build status reads; the last one repeats
    pub fn with_build_phases(mut self, phases: &[&str]) -> Self {
        self.state.get_mut().build_phases = phases.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_failing_builder_pod(mut self) -> Self {
        self.state.get_mut().builder_pod_fails = true;
        self
    }

    /// Builder pods never finish
    pub fn with_stuck_builder_pod(mut self) -> Self {
        self.state.get_mut().builder_pod_stuck = true;
        self
    }

    /// Fire `interrupt` the first time a call named `call` is made
    pub fn interrupt_on(mut self, call: &str, interrupt: ManualInterrupt) -> Self {
        self.state.get_mut().interrupt_on = Some((call.to_string(), interrupt));
        self
    }

    /// Seed an object without recording a call
    pub async fn insert(&self, gvr: &GroupVersionResource, resource: Resource) {
        let mut state = self.state.lock().await;
        let mut resource = resource;
        state.stamp(&mut resource, &self.namespace, None);
        state
            .objects
            .insert((gvr.to_string(), resource.name().to_string()), resource);
    }

    pub async fn object(&self, gvr: &GroupVersionResource, name: &str) -> Option<Resource> {
        let state = self.state.lock().await;
        state.objects.get(&(gvr.to_string(), name.to_string())).cloned()
    }

    pub async fn objects(&self, gvr: &GroupVersionResource) -> Vec<Resource> {
        let key = gvr.to_string();
        let state = self.state.lock().await;
        state
            .objects
            .iter()
            .filter(|((g, _), _)| *g == key)
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    pub async fn calls(&self) -> Vec<ClusterCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn exec_commands(&self) -> Vec<Vec<String>> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                ClusterCall::Exec { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    fn not_found(gvr: &GroupVersionResource, name: &str) -> AppError {
        AppError::NotFound(format!("{} \"{}\" not found", gvr.resource, name))
    }

    fn check_forbidden(state: &FakeState, gvr: &GroupVersionResource) -> Result<()> {
        if state.forbidden.contains(&gvr.resource) {
            return Err(AppError::Forbidden(format!(
                "{} is forbidden: User cannot access resource",
                gvr.resource
            )));
        }
        Ok(())
    }

    fn is_builder_pod(resource: &Resource) -> bool {
        resource.kind() == "Pod" && resource.labels().contains_key("builder")
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get(&self, gvr: &GroupVersionResource, name: &str) -> Result<Resource> {
        let mut state = self.state.lock().await;
        state.record(ClusterCall::Get {
            resource: gvr.resource.clone(),
            name: name.to_string(),
        });
        Self::check_forbidden(&state, gvr)?;

        let key = (gvr.to_string(), name.to_string());
        if *gvr == GroupVersionResource::builds() && state.objects.contains_key(&key) {
            let phase = if state.build_phases.len() > 1 {
                state.build_phases.pop_front()
            } else {
                state.build_phases.front().cloned()
            }
            .unwrap_or_else(|| "Complete".to_string());
            if let Some(build) = state.objects.get_mut(&key) {
                build.as_value_mut()["status"] = json!({ "phase": phase });
            }
        }

        state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Self::not_found(gvr, name))
    }

    async fn list(&self, gvr: &GroupVersionResource, label_selector: &str) -> Result<Vec<Resource>> {
        let mut state = self.state.lock().await;
        state.record(ClusterCall::List {
            resource: gvr.resource.clone(),
            selector: label_selector.to_string(),
        });
        Self::check_forbidden(&state, gvr)?;

        let key = gvr.to_string();
        let selector = parse_label_selector(label_selector);
        Ok(state
            .objects
            .iter()
            .filter(|((g, _), obj)| *g == key && matches_selector(obj, &selector))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, gvr: &GroupVersionResource, resource: &Resource) -> Result<Resource> {
        let mut state = self.state.lock().await;
        state.record(ClusterCall::Create {
            resource: gvr.resource.clone(),
            name: resource.name().to_string(),
        });
        Self::check_forbidden(&state, gvr)?;

        let key = (gvr.to_string(), resource.name().to_string());
        if state.objects.contains_key(&key) {
            return Err(AppError::KubernetesError(format!(
                "{} \"{}\" already exists",
                gvr.resource,
                resource.name()
            )));
        }

        let mut created = resource.clone();
        if resource.kind() == "Service" && resource.spec_cluster_ip().unwrap_or("").is_empty() {
            created.set_spec_cluster_ip(FAKE_CLUSTER_IP);
        }
        if Self::is_builder_pod(resource) {
            let init = resource
                .pointer("/spec/initContainers/0/name")
                .cloned()
                .unwrap_or_else(|| json!("init"));
            created.as_value_mut()["status"] = json!({
                "phase": "Pending",
                "initContainerStatuses": [{ "name": init, "state": { "running": {} } }],
            });
        }
        state.stamp(&mut created, &self.namespace, None);
        state.objects.insert(key, created.clone());

        if resource.kind() == "Deployment" {
            state.insert_pod_for(&created, &self.namespace);
        }
        Ok(created)
    }

    async fn update(&self, gvr: &GroupVersionResource, resource: &Resource) -> Result<Resource> {
        let mut state = self.state.lock().await;
        state.record(ClusterCall::Update {
            resource: gvr.resource.clone(),
            name: resource.name().to_string(),
            body: resource.clone(),
        });
        Self::check_forbidden(&state, gvr)?;

        let key = (gvr.to_string(), resource.name().to_string());
        let live = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Self::not_found(gvr, resource.name()))?;

        if let Some(version) = resource.resource_version() {
            if Some(version) != live.resource_version() {
                return Err(AppError::KubernetesError(format!(
                    "Operation cannot be fulfilled on {} \"{}\": the object has been modified",
                    gvr.resource,
                    resource.name()
                )));
            }
        }
        if resource.kind() == "Service" {
            if resource.resource_version().is_none() {
                return Err(AppError::KubernetesError(
                    "metadata.resourceVersion: Invalid value: must be specified for an update"
                        .to_string(),
                ));
            }
            if resource.spec_cluster_ip().unwrap_or("").is_empty() {
                return Err(AppError::KubernetesError(
                    "spec.clusterIP: Invalid value: \"\": field is immutable".to_string(),
                ));
            }
        }

        let mut updated = resource.clone();
        state.stamp(&mut updated, &self.namespace, Some(live.uid().to_string()));
        state.objects.insert(key, updated.clone());

        if resource.kind() == "Deployment"
            && live.pointer("/spec/template") != updated.pointer("/spec/template")
        {
            state.remove_pods_of(&live);
            state.insert_pod_for(&updated, &self.namespace);
        }
        Ok(updated)
    }

    async fn delete(&self, gvr: &GroupVersionResource, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(ClusterCall::Delete {
            resource: gvr.resource.clone(),
            name: name.to_string(),
        });
        Self::check_forbidden(&state, gvr)?;

        let key = (gvr.to_string(), name.to_string());
        if !state.objects.contains_key(&key) {
            return Err(Self::not_found(gvr, name));
        }
        state.remove_cascading(&key);
        Ok(())
    }

    async fn delete_collection(&self, gvr: &GroupVersionResource, label_selector: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(ClusterCall::DeleteCollection {
            resource: gvr.resource.clone(),
            selector: label_selector.to_string(),
        });
        Self::check_forbidden(&state, gvr)?;

        let key = gvr.to_string();
        let selector = parse_label_selector(label_selector);
        let doomed: Vec<_> = state
            .objects
            .iter()
            .filter(|((g, _), obj)| *g == key && matches_selector(obj, &selector))
            .map(|(k, _)| k.clone())
            .collect();
        for k in doomed {
            state.remove_cascading(&k);
        }
        Ok(())
    }

    async fn is_api_group_supported(&self, group: &str) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(group != BUILD_API_GROUP || !state.build_api_unsupported)
    }

    async fn wait_for_deployment_rollout(&self, name: &str, _timeout: Duration) -> Result<Resource> {
        let state = self.state.lock().await;
        state
            .objects
            .get(&(GroupVersionResource::deployments().to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Self::not_found(&GroupVersionResource::deployments(), name))
    }

    async fn wait_for_pod(
        &self,
        label_selector: &str,
        phase: PodPhase,
        timeout: Duration,
    ) -> Result<Resource> {
        let start = Instant::now();
        let selector = parse_label_selector(label_selector);
        let pods_key = GroupVersionResource::pods().to_string();

        loop {
            {
                let state = self.state.lock().await;
                let pods = state
                    .objects
                    .iter()
                    .filter(|((g, _), obj)| *g == pods_key && matches_selector(obj, &selector))
                    .map(|(_, obj)| obj);
                for pod in pods {
                    if pod.pod_phase() == phase {
                        return Ok(pod.clone());
                    }
                    if pod.pod_phase() == PodPhase::Failed {
                        return Err(AppError::KubernetesError(format!(
                            "pod {} failed while waiting for it to be {}",
                            pod.name(),
                            phase
                        )));
                    }
                }
            }

            if start.elapsed() >= timeout {
                return Err(AppError::Timeout(format!(
                    "pod ({}) did not reach {} within {:?}",
                    label_selector, phase, timeout
                )));
            }
            sleep(POLL).await;
        }
    }

    async fn wait_for_init_container_started(
        &self,
        pod_name: &str,
        container_name: &str,
        timeout: Duration,
    ) -> Result<()> {
        let start = Instant::now();
        let key = (GroupVersionResource::pods().to_string(), pod_name.to_string());

        loop {
            {
                let state = self.state.lock().await;
                match state.objects.get(&key) {
                    Some(pod) if pod.init_container_running(container_name) => return Ok(()),
                    Some(_) => {}
                    None => return Err(Self::not_found(&GroupVersionResource::pods(), pod_name)),
                }
            }
            if start.elapsed() >= timeout {
                return Err(AppError::Timeout(format!(
                    "init container {} of pod {} did not start",
                    container_name, pod_name
                )));
            }
            sleep(POLL).await;
        }
    }

    async fn exec(
        &self,
        pod_name: &str,
        container_name: &str,
        command: &[String],
    ) -> Result<ExecutionResult> {
        let mut state = self.state.lock().await;
        state.record(ClusterCall::Exec {
            pod: pod_name.to_string(),
            container: container_name.to_string(),
            command: command.to_vec(),
        });

        let key = (GroupVersionResource::pods().to_string(), pod_name.to_string());
        if !state.objects.contains_key(&key) {
            return Err(Self::not_found(&GroupVersionResource::pods(), pod_name));
        }

        let joined = command.join(" ");
        if state.failing_exec.iter().any(|needle| joined.contains(needle)) {
            return Ok(ExecutionResult::failure(1, format!("{}: command failed", joined)));
        }

        if joined.starts_with("touch ") && !state.builder_pod_stuck {
            let phase = if state.builder_pod_fails { "Failed" } else { "Succeeded" };
            if let Some(pod) = state.objects.get_mut(&key) {
                if Self::is_builder_pod(pod) {
                    pod.as_value_mut()["status"]["phase"] = json!(phase);
                }
            }
        }
        let stdout = state
            .exec_output
            .iter()
            .find(|(needle, _)| joined.contains(needle.as_str()))
            .map(|(_, stdout)| stdout.clone())
            .unwrap_or_default();
        Ok(ExecutionResult::success(stdout))
    }

    async fn extract_archive(
        &self,
        pod_name: &str,
        container_name: &str,
        dest_dir: &str,
        _archive: Vec<u8>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(ClusterCall::ExtractArchive {
            pod: pod_name.to_string(),
            container: container_name.to_string(),
            dest: dest_dir.to_string(),
        });
        Ok(())
    }

    async fn start_binary_build(&self, build_config: &str, _archive: Vec<u8>) -> Result<String> {
        let mut state = self.state.lock().await;
        state.record(ClusterCall::StartBuild {
            build_config: build_config.to_string(),
        });

        let bc_gvr = GroupVersionResource::build_configs();
        let owner = state
            .objects
            .get(&(bc_gvr.to_string(), build_config.to_string()))
            .map(|bc| bc.owner_reference())
            .ok_or_else(|| Self::not_found(&bc_gvr, build_config))?;

        let name = format!("{}-1", build_config);
        let mut build = Resource::new("build.openshift.io/v1", "Build", &name);
        build.add_owner_reference(owner);
        state.stamp(&mut build, &self.namespace, None);
        state
            .objects
            .insert((GroupVersionResource::builds().to_string(), name.clone()), build);
        Ok(name)
    }

    async fn build_logs(&self, build_name: &str) -> Result<String> {
        Ok(format!("logs of build {}", build_name))
    }

    async fn pod_logs(&self, pod_name: &str, container_name: &str) -> Result<String> {
        Ok(format!("logs of {}/{}", pod_name, container_name))
    }
}
