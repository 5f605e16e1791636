//! `ClusterClient` backed by the `kubectl` and `oc` command-line tools
//!
//! Every call shells out with `-o json` and decodes the response with
//! `serde_json`. Errors reported by the API server are classified from
//! stderr so that "not found" and "forbidden" stay distinguishable.

use super::resource::{GroupVersionResource, PodPhase, Resource};
use super::traits::{ClusterClient, ExecutionResult};
use crate::config::EngineConfig;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct KubectlClient {
    kubectl: String,
    oc: String,
    namespace: String,
    poll_interval: Duration,
}

impl KubectlClient {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            oc: "oc".to_string(),
            namespace: namespace.into(),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            kubectl: config.tools.kubectl_path.clone(),
            oc: config.tools.oc_path.clone(),
            namespace: config.namespace.clone(),
            poll_interval: config.timeouts.poll_interval(),
        }
    }

    /// `resource.version.group` form understood by `kubectl get`
    fn resource_arg(gvr: &GroupVersionResource) -> String {
        if gvr.group.is_empty() {
            gvr.resource.clone()
        } else {
            format!("{}.{}.{}", gvr.resource, gvr.version, gvr.group)
        }
    }

    async fn run(&self, program: &str, args: &[String], stdin: Option<&[u8]>) -> Result<Output> {
        debug!("🔧 Running: {} {}", program, args.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = cmd.spawn().map_err(|e| {
            AppError::KubernetesError(format!("Failed to spawn {}: {}", program, e))
        })?;

        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(data).await.map_err(|e| {
                AppError::KubernetesError(format!("Failed to write to {} stdin: {}", program, e))
            })?;
            pipe.shutdown().await.map_err(|e| {
                AppError::KubernetesError(format!("Failed to close {} stdin: {}", program, e))
            })?;
        }

        child.wait_with_output().await.map_err(|e| {
            AppError::KubernetesError(format!("Failed to wait for {}: {}", program, e))
        })
    }

    /// Run a command that must succeed, returning its stdout
    async fn run_checked(
        &self,
        program: &str,
        args: Vec<String>,
        stdin: Option<&[u8]>,
        what: &str,
    ) -> Result<String> {
        let output = self.run(program, &args, stdin).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(what, &stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn ns_args(&self) -> [String; 2] {
        ["-n".to_string(), self.namespace.clone()]
    }

    async fn apply_object(&self, verb: &str, resource: &Resource) -> Result<Resource> {
        let mut body = resource.clone();
        body.set_namespace(&self.namespace);
        let payload = serde_json::to_vec(body.as_value())?;

        let mut args = vec![verb.to_string(), "-f".to_string(), "-".to_string()];
        args.extend(self.ns_args());
        args.extend(["-o".to_string(), "json".to_string()]);

        let what = format!("{} {} {}", verb, resource.kind(), resource.name());
        let stdout = self
            .run_checked(&self.kubectl, args, Some(payload.as_slice()), &what)
            .await?;
        parse_object(&stdout)
    }
}

/// Map kubectl stderr onto the error taxonomy
fn classify_failure(what: &str, stderr: &str) -> AppError {
    let message = format!("{}: {}", what, stderr.trim());
    if stderr.contains("NotFound") || stderr.contains("not found") {
        AppError::NotFound(message)
    } else if stderr.contains("Forbidden") || stderr.contains("forbidden") {
        AppError::Forbidden(message)
    } else {
        AppError::KubernetesError(message)
    }
}

fn parse_object(stdout: &str) -> Result<Resource> {
    let value: Value = serde_json::from_str(stdout).map_err(|e| {
        AppError::KubernetesError(format!("Failed to parse kubectl JSON output: {}", e))
    })?;
    Resource::from_value(value)
}

fn parse_list(stdout: &str) -> Result<Vec<Resource>> {
    let value: Value = serde_json::from_str(stdout).map_err(|e| {
        AppError::KubernetesError(format!("Failed to parse kubectl JSON output: {}", e))
    })?;
    value
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .map(Resource::from_value)
        .collect()
}

/// Whether a deployment's latest generation is observed and fully available
fn rollout_complete(deployment: &Resource) -> bool {
    let num = |pointer: &str| deployment.pointer(pointer).and_then(Value::as_i64);
    let generation = num("/metadata/generation").unwrap_or(0);
    let observed = num("/status/observedGeneration").unwrap_or(-1);
    let desired = num("/spec/replicas").unwrap_or(1);
    let updated = num("/status/updatedReplicas").unwrap_or(0);
    let available = num("/status/availableReplicas").unwrap_or(0);
    let total = num("/status/replicas").unwrap_or(0);

    observed >= generation && updated >= desired && available >= desired && total <= updated
}

#[async_trait]
impl ClusterClient for KubectlClient {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get(&self, gvr: &GroupVersionResource, name: &str) -> Result<Resource> {
        let mut args = vec!["get".to_string(), Self::resource_arg(gvr), name.to_string()];
        args.extend(self.ns_args());
        args.extend(["-o".to_string(), "json".to_string()]);

        let what = format!("get {} {}", gvr.resource, name);
        let stdout = self.run_checked(&self.kubectl, args, None, &what).await?;
        parse_object(&stdout)
    }

    async fn list(&self, gvr: &GroupVersionResource, label_selector: &str) -> Result<Vec<Resource>> {
        let mut args = vec!["get".to_string(), Self::resource_arg(gvr)];
        args.extend(self.ns_args());
        if !label_selector.is_empty() {
            args.extend(["-l".to_string(), label_selector.to_string()]);
        }
        args.extend(["-o".to_string(), "json".to_string()]);

        let what = format!("list {} ({})", gvr.resource, label_selector);
        let stdout = self.run_checked(&self.kubectl, args, None, &what).await?;
        parse_list(&stdout)
    }

    async fn create(&self, _gvr: &GroupVersionResource, resource: &Resource) -> Result<Resource> {
        self.apply_object("create", resource).await
    }

    async fn update(&self, _gvr: &GroupVersionResource, resource: &Resource) -> Result<Resource> {
        self.apply_object("replace", resource).await
    }

    async fn delete(&self, gvr: &GroupVersionResource, name: &str) -> Result<()> {
        let mut args = vec!["delete".to_string(), Self::resource_arg(gvr), name.to_string()];
        args.extend(self.ns_args());
        args.push("--wait=false".to_string());

        let what = format!("delete {} {}", gvr.resource, name);
        self.run_checked(&self.kubectl, args, None, &what).await?;
        debug!("🗑️ Deleted {} {}", gvr.resource, name);
        Ok(())
    }

    async fn delete_collection(&self, gvr: &GroupVersionResource, label_selector: &str) -> Result<()> {
        let mut args = vec![
            "delete".to_string(),
            Self::resource_arg(gvr),
            "-l".to_string(),
            label_selector.to_string(),
        ];
        args.extend(self.ns_args());
        args.push("--wait=false".to_string());

        let what = format!("delete {} ({})", gvr.resource, label_selector);
        self.run_checked(&self.kubectl, args, None, &what).await?;
        Ok(())
    }

    async fn is_api_group_supported(&self, group: &str) -> Result<bool> {
        let stdout = self
            .run_checked(
                &self.kubectl,
                vec!["api-versions".to_string()],
                None,
                "list api versions",
            )
            .await?;
        let prefix = format!("{}/", group);
        Ok(stdout.lines().any(|line| line.trim().starts_with(&prefix)))
    }

    async fn wait_for_deployment_rollout(&self, name: &str, timeout: Duration) -> Result<Resource> {
        info!("⏳ Waiting for deployment rollout: {}", name);
        let start_time = Instant::now();
        let gvr = GroupVersionResource::deployments();

        loop {
            let deployment = self.get(&gvr, name).await?;
            if rollout_complete(&deployment) {
                info!("✅ Deployment rolled out: {}", name);
                return Ok(deployment);
            }

            if start_time.elapsed() > timeout {
                return Err(AppError::Timeout(format!(
                    "deployment {} was not rolled out within {}s",
                    name,
                    timeout.as_secs()
                )));
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn wait_for_pod(
        &self,
        label_selector: &str,
        phase: PodPhase,
        timeout: Duration,
    ) -> Result<Resource> {
        info!("⏳ Waiting for pod ({}) to be {}", label_selector, phase);
        let start_time = Instant::now();
        let gvr = GroupVersionResource::pods();
        let mut last_phase = PodPhase::Unknown;

        loop {
            let pods = self.list(&gvr, label_selector).await?;
            for pod in pods {
                let current = pod.pod_phase();
                if current == phase {
                    info!("✅ Pod {} is {}", pod.name(), phase);
                    return Ok(pod);
                }
                if current == PodPhase::Failed {
                    return Err(AppError::KubernetesError(format!(
                        "pod {} failed while waiting for it to be {}",
                        pod.name(),
                        phase
                    )));
                }
                last_phase = current;
            }

            if start_time.elapsed() > timeout {
                return Err(AppError::Timeout(format!(
                    "pod ({}) did not reach {} within {}s (last phase {})",
                    label_selector,
                    phase,
                    timeout.as_secs(),
                    last_phase
                )));
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn wait_for_init_container_started(
        &self,
        pod_name: &str,
        container_name: &str,
        timeout: Duration,
    ) -> Result<()> {
        debug!("⏳ Waiting for init container {} in {}", container_name, pod_name);
        let start_time = Instant::now();
        let gvr = GroupVersionResource::pods();

        loop {
            match self.get(&gvr, pod_name).await {
                Ok(pod) if pod.init_container_running(container_name) => return Ok(()),
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }

            if start_time.elapsed() > timeout {
                return Err(AppError::Timeout(format!(
                    "init container {} in pod {} did not start within {}s",
                    container_name,
                    pod_name,
                    timeout.as_secs()
                )));
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn exec(
        &self,
        pod_name: &str,
        container_name: &str,
        command: &[String],
    ) -> Result<ExecutionResult> {
        let mut args = vec![
            "exec".to_string(),
            pod_name.to_string(),
            "-c".to_string(),
            container_name.to_string(),
        ];
        args.extend(self.ns_args());
        args.push("--".to_string());
        args.extend(command.iter().cloned());

        let output = self.run(&self.kubectl, &args, None).await?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() && stderr.contains("Forbidden") {
            return Err(classify_failure("exec", &stderr));
        }

        Ok(ExecutionResult::new(
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        )
        .with_metadata("pod".to_string(), pod_name.to_string())
        .with_metadata("container".to_string(), container_name.to_string()))
    }

    async fn extract_archive(
        &self,
        pod_name: &str,
        container_name: &str,
        dest_dir: &str,
        archive: Vec<u8>,
    ) -> Result<()> {
        let mut args = vec![
            "exec".to_string(),
            "-i".to_string(),
            pod_name.to_string(),
            "-c".to_string(),
            container_name.to_string(),
        ];
        args.extend(self.ns_args());
        args.extend([
            "--".to_string(),
            "tar".to_string(),
            "xf".to_string(),
            "-".to_string(),
            "-C".to_string(),
            dest_dir.to_string(),
        ]);

        let what = format!("copy archive to {}:{}", pod_name, dest_dir);
        self.run_checked(&self.kubectl, args, Some(archive.as_slice()), &what)
            .await?;
        Ok(())
    }

    async fn start_binary_build(&self, build_config: &str, archive: Vec<u8>) -> Result<String> {
        let archive_path =
            std::env::temp_dir().join(format!("devpush-build-{}.tar", Uuid::new_v4()));
        tokio::fs::write(&archive_path, &archive).await?;

        let mut args = vec![
            "start-build".to_string(),
            build_config.to_string(),
            format!("--from-archive={}", archive_path.display()),
            "-o".to_string(),
            "name".to_string(),
        ];
        args.extend(self.ns_args());

        let what = format!("start build {}", build_config);
        let result = self.run_checked(&self.oc, args, None, &what).await;

        if let Err(e) = tokio::fs::remove_file(&archive_path).await {
            warn!("⚠️ Failed to remove build archive {}: {}", archive_path.display(), e);
        }

        // `oc start-build -o name` prints `build.build.openshift.io/<name>`
        let stdout = result?;
        let name = stdout
            .trim()
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        if name.is_empty() {
            return Err(AppError::BuildError(format!(
                "start-build for {} did not report a build name",
                build_config
            )));
        }
        Ok(name)
    }

    async fn build_logs(&self, build_name: &str) -> Result<String> {
        let mut args = vec!["logs".to_string(), format!("build/{}", build_name)];
        args.extend(self.ns_args());
        self.run_checked(&self.oc, args, None, "read build logs").await
    }

    async fn pod_logs(&self, pod_name: &str, container_name: &str) -> Result<String> {
        let mut args = vec![
            "logs".to_string(),
            pod_name.to_string(),
            "-c".to_string(),
            container_name.to_string(),
        ];
        args.extend(self.ns_args());
        self.run_checked(&self.kubectl, args, None, "read pod logs").await
    }
}
