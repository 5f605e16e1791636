use super::supervisor::{self, CtlAction};
use crate::cluster::{ClusterClient, ComponentInfo, ExecutionResult, PodContainer};
use crate::component::PushContext;
use crate::devfile::{Command, CommandGraph, CommandKind, ExecAction, MAX_COMPOSITE_DEPTH};
use crate::error::{AppError, Result, ResultExt};
use futures::future::{try_join_all, BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Resolves commands through the [`CommandGraph`] and runs them in the
/// component's containers
pub struct CommandExecutionEngine {
    cluster: Arc<dyn ClusterClient>,
    graph: Arc<CommandGraph>,
}

/// `/bin/sh -c` invocation for an exec command: exported env, then
/// `cd <workingDir> &&`, then the command line
pub fn shell_command(action: &ExecAction) -> Vec<String> {
    let mut script = String::new();
    for var in &action.env {
        script.push_str(&format!("export {}=\"{}\" && ", var.name, var.value));
    }
    if !action.working_dir.is_empty() {
        script.push_str(&format!("cd {} && ", action.working_dir));
    }
    script.push_str(&action.command_line);

    vec!["/bin/sh".to_string(), "-c".to_string(), script]
}

impl CommandExecutionEngine {
    pub fn new(cluster: Arc<dyn ClusterClient>, graph: Arc<CommandGraph>) -> Self {
        Self { cluster, graph }
    }

    /// Run a raw command line, failing on a non-zero exit
    pub async fn run_in_container(
        &self,
        target: &ComponentInfo,
        label: &str,
        command: &[String],
        show: bool,
    ) -> Result<ExecutionResult> {
        debug!(
            "🔧 Executing {} in {}/{}: {:?}",
            label, target.pod_name, target.container_name, command
        );
        let result = self
            .cluster
            .exec(&target.pod_name, &target.container_name, command)
            .await?;

        if show {
            for line in result.stdout.lines() {
                info!("{}", line);
            }
        }

        if !result.is_success() {
            return Err(AppError::CommandFailed(format!(
                "{} exited with code {}: {}",
                label,
                result.exit_code,
                result.combined_output()
            )));
        }
        Ok(result)
    }

    async fn run_exec(&self, id: &str, action: &ExecAction, pod_name: &str, show: bool) -> Result<()> {
        info!("▶️ Executing devfile command {}", id);
        let target = ComponentInfo::new(pod_name, action.component.as_str());
        self.run_in_container(&target, &format!("command {}", id), &shell_command(action), show)
            .await?;
        Ok(())
    }

    /// Execute an exec or composite command in the given pod
    pub async fn execute(&self, command: &Command, pod_name: &str, show: bool) -> Result<()> {
        self.execute_nested(command, pod_name, show, Vec::new()).await
    }

    fn execute_nested<'a>(
        &'a self,
        command: &'a Command,
        pod_name: &'a str,
        show: bool,
        stack: Vec<String>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if stack.contains(&command.id) {
                let mut chain = stack.clone();
                chain.push(command.id.clone());
                return Err(AppError::ValidationError(format!(
                    "composite command cycle detected: {}",
                    chain.join(" -> ")
                )));
            }
            if stack.len() >= MAX_COMPOSITE_DEPTH {
                return Err(AppError::ValidationError(format!(
                    "composite command {} exceeds the maximum nesting depth of {}",
                    command.id, MAX_COMPOSITE_DEPTH
                )));
            }

            let composite = match &command.kind {
                CommandKind::Exec(action) => {
                    return self.run_exec(&command.id, action, pod_name, show).await
                }
                CommandKind::Composite(composite) => composite,
            };

            let children = composite
                .commands
                .iter()
                .map(|id| {
                    self.graph.get(id).ok_or_else(|| {
                        AppError::ValidationError(format!(
                            "composite command {} references unknown command {}",
                            command.id, id
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let mut stack = stack;
            stack.push(command.id.clone());

            if composite.parallel {
                let runs = children
                    .into_iter()
                    .map(|child| self.execute_nested(child, pod_name, show, stack.clone()));
                try_join_all(runs)
                    .await
                    .with_context(|| format!("composite command {} failed", command.id))?;
            } else {
                for child in children {
                    self.execute_nested(child, pod_name, show, stack.clone())
                        .await
                        .with_context(|| format!("composite command {} failed", command.id))?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// Init (first creation only), then build, then run or debug
    pub async fn execute_push(&self, ctx: &PushContext, pod_name: &str, containers: &[PodContainer]) -> Result<()> {
        if ctx.commands.is_empty() {
            return Err(AppError::ValidationError(
                "error executing devfile commands - there should be at least 1 command".to_string(),
            ));
        }

        if !ctx.component_exists {
            if let Some(init) = &ctx.commands.init {
                self.execute(init, pod_name, ctx.show).await?;
            }
        }

        if let Some(build) = &ctx.commands.build {
            self.execute(build, pod_name, ctx.show).await?;
        }

        let selected = if ctx.debug {
            ctx.commands.debug.as_ref()
        } else {
            ctx.commands.run.as_ref()
        };
        let Some(command) = selected else {
            return Ok(());
        };
        let action = command.exec().ok_or_else(|| {
            AppError::ValidationError(format!("command {} must be an exec command", command.id))
        })?;

        let target = ComponentInfo::new(pod_name, action.component.as_str());
        if !ctx.component_exists {
            self.ensure_supervisor(&target, containers).await?;
        }

        let restart = !(ctx.component_exists && !command.is_restart_required());
        self.dispatch_supervised(&command.id, &target, ctx.debug, restart, ctx.show)
            .await
    }

    /// Start the supervisor daemon when the container's entrypoint is something else
    pub async fn ensure_supervisor(&self, target: &ComponentInfo, containers: &[PodContainer]) -> Result<()> {
        let needs_start = containers
            .iter()
            .filter(|c| c.name == target.container_name)
            .any(|c| !supervisor::is_supervisor_entrypoint(&c.command));
        if !needs_start {
            return Ok(());
        }

        info!("🚀 Starting supervisor in container {}", target.container_name);
        self.run_in_container(target, "supervisor start", &supervisor::daemon_command(), false)
            .await
            .context("unable to start the process supervisor")?;
        Ok(())
    }

    async fn dispatch_supervised(
        &self,
        id: &str,
        target: &ComponentInfo,
        debug: bool,
        restart: bool,
        show: bool,
    ) -> Result<()> {
        let program = supervisor::program_name(debug);

        if restart {
            info!("🔁 Restarting {} command {}", program, id);
            let stop = supervisor::ctl_command(CtlAction::Stop, program);
            if let Err(e) = self.run_in_container(target, "supervisor stop", &stop, false).await {
                warn!("⚠️ Unable to stop {}: {}", program, e);
            }
        } else {
            info!("⏩ restart not required, delivering command {} to the running supervisor", id);
        }

        let start = supervisor::ctl_command(CtlAction::Start, program);
        self.run_in_container(target, &format!("command {}", id), &start, show)
            .await?;
        Ok(())
    }

    /// Run lifecycle event commands by id, resolved case-insensitively
    pub async fn execute_events(&self, ids: &[String], pod_name: &str) -> Result<()> {
        for id in ids {
            let command = self.graph.get(id).ok_or_else(|| {
                AppError::ValidationError(format!("event references unknown command {}", id))
            })?;
            self.execute(command, pod_name, false)
                .await
                .with_context(|| format!("unable to execute devfile command {}", id))?;
        }
        Ok(())
    }
}
