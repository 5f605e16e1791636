use super::context::{PushContext, PushParameters};
use super::generator::{
    component_pod_selector, component_selector, ComponentSettings, ComponentSpec, SOURCE_VOLUME,
};
use super::reconciler::{ReconcileOutcome, ResourceReconciler};
use crate::cluster::{
    ClusterClient, ComponentInfo, GroupVersionResource, PodContainer, PodPhase, Resource,
};
use crate::config::EngineConfig;
use crate::devfile::{CommandGraph, CommandOverrides, Devfile, GroupKind};
use crate::error::{AppError, Result, ResultExt};
use crate::exec::supervisor::DEFAULT_DEBUG_PORT;
use crate::exec::CommandExecutionEngine;
use crate::sync::{SyncAdapter, SyncParameters};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Summary of a successful push
#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub pod_name: String,
    pub component_existed: bool,
    pub pod_changed: bool,
    pub executed_commands: bool,
    pub resources: ReconcileOutcome,
}

/// Push, test, exec, log and delete for one devfile component
pub struct ComponentAdapter {
    name: String,
    devfile: Devfile,
    graph: Arc<CommandGraph>,
    config: EngineConfig,
    cluster: Arc<dyn ClusterClient>,
    sync: Arc<dyn SyncAdapter>,
}

/// First container with the project sources mounted, and the mount path
pub fn first_container_with_sources(containers: &[PodContainer]) -> Result<(String, String)> {
    containers
        .iter()
        .find_map(|c| {
            c.volume_mounts
                .iter()
                .find(|m| m.name == SOURCE_VOLUME)
                .map(|m| (c.name.clone(), m.mount_path.clone()))
        })
        .ok_or_else(|| {
            AppError::ValidationError(
                "at least one component must set mountSources: true in order to sync files"
                    .to_string(),
            )
        })
}

impl ComponentAdapter {
    pub fn new(
        name: impl Into<String>,
        devfile: Devfile,
        config: EngineConfig,
        cluster: Arc<dyn ClusterClient>,
        sync: Arc<dyn SyncAdapter>,
    ) -> Result<Self> {
        let graph = CommandGraph::from_devfile(&devfile)?;
        Ok(Self {
            name: name.into(),
            devfile,
            graph: Arc::new(graph),
            config,
            cluster,
            sync,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &CommandGraph {
        &self.graph
    }

    fn engine(&self) -> CommandExecutionEngine {
        CommandExecutionEngine::new(self.cluster.clone(), self.graph.clone())
    }

    /// Whether the component's Deployment exists
    pub async fn does_component_exist(&self) -> Result<bool> {
        match self
            .cluster
            .get(&GroupVersionResource::deployments(), &self.name)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn wait_for_component_pod(&self) -> Result<Resource> {
        let selector = component_pod_selector(&self.name);
        self.cluster
            .wait_for_pod(&selector, PodPhase::Running, self.config.timeouts.pod())
            .await
            .with_context(|| format!("error while waiting for pod {}", selector))
    }

    /// Current pod of the component, which must be running
    async fn running_pod(&self, action: &str) -> Result<Resource> {
        let pods = self
            .cluster
            .list(&GroupVersionResource::pods(), &component_pod_selector(&self.name))
            .await
            .context("error occurred while getting the pod")?;
        let pod = pods.into_iter().next().ok_or_else(|| {
            AppError::NotFound(format!(
                "the component {} doesn't exist on the cluster",
                self.name
            ))
        })?;

        if pod.pod_phase() != PodPhase::Running {
            return Err(AppError::KubernetesError(format!(
                "unable to {} as the component is not running. Current status={}",
                action,
                pod.pod_phase()
            )));
        }
        Ok(pod)
    }

    /// Reconcile resources, sync sources, then run the selected commands
    pub async fn push(&self, params: &PushParameters) -> Result<PushOutcome> {
        let component_exists = self
            .does_component_exist()
            .await
            .with_context(|| format!("unable to determine if component {} exists", self.name))?;

        let previous_pod = if component_exists {
            let pod = self
                .wait_for_component_pod()
                .await
                .with_context(|| format!("unable to get pod for component {}", self.name))?;
            Some(pod.name().to_string())
        } else {
            None
        };

        info!("🔍 Validating the devfile");
        let commands = self
            .graph
            .push_commands(&params.overrides, params.debug)
            .context("failed to validate devfile build and run commands")?;

        let ctx = PushContext {
            component_name: self.name.clone(),
            component_exists,
            commands,
            debug: params.debug,
            debug_port: params.debug_port.unwrap_or(DEFAULT_DEBUG_PORT),
            force_build: params.force_build || params.debug,
            show: params.show,
            previous_pod,
        };

        info!("🏗️ Creating Kubernetes resources for component {}", self.name);
        let resources = self
            .create_or_update_component(&ctx, &params.overrides)
            .await
            .context("unable to create or update component")?;

        self.cluster
            .wait_for_deployment_rollout(&self.name, self.config.timeouts.rollout())
            .await
            .context("error while waiting for deployment rollout")?;

        let pod = self
            .wait_for_component_pod()
            .await
            .with_context(|| format!("unable to get pod for component {}", self.name))?;
        let pod_name = pod.name().to_string();
        let pod_changed = ctx.pod_changed(&pod_name);
        let containers = pod.containers();

        let (container_name, source_mount) = first_container_with_sources(&containers)
            .with_context(|| {
                format!(
                    "error while retrieving container from pod {} with a mounted project volume",
                    pod_name
                )
            })?;

        info!("🔄 Syncing to component {}", self.name);
        let sync_params = SyncParameters {
            local_path: params.path.clone(),
            target: ComponentInfo::new(pod_name.as_str(), container_name)
                .with_source_mount(source_mount),
            component_exists,
            pod_changed,
            force: ctx.force_build,
        };
        let exec_required = self
            .sync
            .sync_files(&sync_params)
            .await
            .with_context(|| format!("Failed to sync to component with name {}", self.name))?;

        let engine = self.engine();
        let post_start = &self.devfile.events().post_start;
        if !component_exists && !post_start.is_empty() {
            info!("🎬 Executing postStart event commands for component {}", self.name);
            engine.execute_events(post_start, &pod_name).await?;
        }

        if exec_required {
            info!("⚙️ Executing devfile commands for component {}", self.name);
            engine.execute_push(&ctx, &pod_name, &containers).await?;
        } else {
            debug!("⏭️ No changes detected, skipping devfile commands");
        }

        info!("✅ Pushed component {}", self.name);
        Ok(PushOutcome {
            pod_name,
            component_existed: component_exists,
            pod_changed,
            executed_commands: exec_required,
            resources,
        })
    }

    async fn create_or_update_component(
        &self,
        ctx: &PushContext,
        overrides: &CommandOverrides,
    ) -> Result<ReconcileOutcome> {
        // the debug command is wired into the container even outside debug mode
        let debug = match &ctx.commands.debug {
            Some(command) => Some(command),
            None => self
                .graph
                .resolve_group(GroupKind::Debug, overrides.debug.as_deref())
                .ok()
                .flatten(),
        };

        let settings = ComponentSettings {
            name: &self.name,
            application: &self.config.application,
            supervisor_image: &self.config.images.supervisor_image,
            supervisor_source_dir: &self.config.images.supervisor_source_dir,
            run: ctx.commands.run.as_ref(),
            debug,
            debug_port: ctx.debug_port,
        };
        let spec = ComponentSpec::from_devfile(&self.devfile, &settings)?;

        ResourceReconciler::new(self.cluster.clone())
            .reconcile(&spec, ctx.component_exists)
            .await
    }

    /// Run the test command (override or group default)
    pub async fn test(&self, test_command: Option<&str>, show: bool) -> Result<()> {
        let pod = self.running_pod("test").await?;

        info!("🧪 Executing devfile test command for component {}", self.name);
        let command = self
            .graph
            .test_command(test_command)
            .context("failed to validate devfile test command")?;

        self.engine()
            .execute(command, pod.name(), show)
            .await
            .with_context(|| format!("failed to execute devfile commands for component {}", self.name))
    }

    /// Run an arbitrary command in the run command's container.
    ///
    /// Output is returned, not logged; the caller decides where it goes.
    pub async fn exec(&self, command: &[String]) -> Result<String> {
        let exists = self.does_component_exist().await?;
        if !exists {
            return Err(AppError::NotFound(format!(
                "the component {} doesn't exist on the cluster",
                self.name
            )));
        }

        let run = self
            .graph
            .resolve_group(GroupKind::Run, None)?
            .and_then(|c| c.exec())
            .ok_or_else(|| AppError::ValidationError("the devfile has no valid run command".to_string()))?;

        let pod = self
            .running_pod("exec")
            .await
            .with_context(|| format!("unable to get pod for component {}", self.name))?;
        let target = ComponentInfo::new(pod.name(), run.component.as_str());

        let result = self
            .engine()
            .run_in_container(&target, "command", command, false)
            .await?;
        Ok(result.stdout)
    }

    /// Logs of the run (or debug) container
    pub async fn log(&self, debug: bool) -> Result<String> {
        let pod = self.running_pod("show logs").await?;

        let kind = if debug { GroupKind::Debug } else { GroupKind::Run };
        let command = self.graph.resolve_group(kind, None)?;
        let exec = match (command.and_then(|c| c.exec()), debug) {
            (Some(exec), _) => exec,
            (None, true) => {
                return Err(AppError::ValidationError(
                    "no debug command found in devfile, please run \"devpush log\" for run command logs"
                        .to_string(),
                ))
            }
            (None, false) => {
                return Err(AppError::ValidationError(
                    "the devfile has no valid run command".to_string(),
                ))
            }
        };

        self.cluster.pod_logs(pod.name(), &exec.component).await
    }

    /// Delete the component's Deployment; owned Service and claims follow
    pub async fn delete(&self) -> Result<()> {
        let exists = match self.does_component_exist().await {
            Ok(exists) => exists,
            Err(e) if e.is_forbidden() => {
                warn!("⚠️ {}", e);
                return Ok(());
            }
            Err(e) => {
                return Err(e.context(format!(
                    "unable to determine if component {} exists",
                    self.name
                )))
            }
        };

        if !exists {
            warn!("⚠️ Component {} does not exist", self.name);
            return Ok(());
        }

        self.cluster
            .delete_collection(&GroupVersionResource::deployments(), &component_selector(&self.name))
            .await
            .with_context(|| format!("unable to delete component {}", self.name))?;

        info!("✅ Successfully deleted component {}", self.name);
        Ok(())
    }
}
