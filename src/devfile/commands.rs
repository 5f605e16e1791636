//! Command graph: lowercase id → command, group resolution and
//! composite validation.

use super::model::{Devfile, DevfileCommand, EnvVar, GroupKind};
use crate::error::{AppError, Result};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Maximum nesting of composite commands
pub const MAX_COMPOSITE_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Lowercase id
    pub id: String,
    pub group: Option<GroupKind>,
    pub is_default: bool,
    pub kind: CommandKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    Exec(ExecAction),
    Composite(CompositeAction),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecAction {
    pub component: String,
    pub command_line: String,
    pub working_dir: String,
    pub env: Vec<EnvVar>,
    pub restart_required: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeAction {
    /// Referenced ids, lowercase, in execution order
    pub commands: Vec<String>,
    pub parallel: bool,
}

impl Command {
    pub fn exec(&self) -> Option<&ExecAction> {
        match &self.kind {
            CommandKind::Exec(exec) => Some(exec),
            CommandKind::Composite(_) => None,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.kind, CommandKind::Composite(_))
    }

    /// Whether the run/debug process must be restarted when this command
    /// is pushed to an already running component
    pub fn is_restart_required(&self) -> bool {
        self.exec().map(|e| e.restart_required).unwrap_or(true)
    }
}

/// User-selected command ids for a push, test or log
#[derive(Debug, Clone, Default)]
pub struct CommandOverrides {
    pub init: Option<String>,
    pub build: Option<String>,
    pub run: Option<String>,
    pub debug: Option<String>,
    pub test: Option<String>,
}

impl CommandOverrides {
    fn for_group(&self, kind: GroupKind) -> Option<&str> {
        match kind {
            GroupKind::Init => self.init.as_deref(),
            GroupKind::Build => self.build.as_deref(),
            GroupKind::Run => self.run.as_deref(),
            GroupKind::Debug => self.debug.as_deref(),
            GroupKind::Test => self.test.as_deref(),
        }
        .filter(|id| !id.is_empty())
    }
}

/// The command selected for each group of a push
#[derive(Debug, Clone, Default)]
pub struct PushCommands {
    pub init: Option<Command>,
    pub build: Option<Command>,
    pub run: Option<Command>,
    pub debug: Option<Command>,
}

impl PushCommands {
    pub fn is_empty(&self) -> bool {
        self.init.is_none() && self.build.is_none() && self.run.is_none() && self.debug.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandGraph {
    commands: BTreeMap<String, Command>,
    containers: HashSet<String>,
}

impl CommandGraph {
    pub fn from_devfile(devfile: &Devfile) -> Result<Self> {
        let mut commands = BTreeMap::new();
        for raw in &devfile.commands {
            let command = convert(raw)?;
            if commands.insert(command.id.clone(), command).is_some() {
                return Err(AppError::ValidationError(format!(
                    "duplicate command id '{}'",
                    raw.id
                )));
            }
        }

        let containers = devfile.containers().map(|(name, _)| name.to_string()).collect();
        debug!("📚 Loaded {} devfile commands", commands.len());
        Ok(Self { commands, containers })
    }

    /// Case-insensitive lookup
    pub fn get(&self, id: &str) -> Option<&Command> {
        self.commands.get(&id.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn in_group(&self, kind: GroupKind) -> Vec<&Command> {
        self.commands.values().filter(|c| c.group == Some(kind)).collect()
    }

    /// Select at most one command for `kind`. An override must exist and
    /// belong to the group. Without one, a single command in the group wins;
    /// several require exactly one default.
    pub fn resolve_group(&self, kind: GroupKind, override_id: Option<&str>) -> Result<Option<&Command>> {
        if let Some(id) = override_id {
            let command = self.get(id).ok_or_else(|| {
                AppError::ValidationError(format!(
                    "the command \"{}\" is not found in the devfile",
                    id
                ))
            })?;
            if command.group != Some(kind) {
                return Err(AppError::ValidationError(format!(
                    "the command \"{}\" is not of group kind {}",
                    id, kind
                )));
            }
            self.validate(command)?;
            return Ok(Some(command));
        }

        let candidates = self.in_group(kind);
        let selected = match candidates.len() {
            0 => return Ok(None),
            1 => candidates[0],
            _ => {
                let defaults: Vec<&Command> =
                    candidates.iter().copied().filter(|c| c.is_default).collect();
                match defaults.len() {
                    0 => {
                        return Err(AppError::ValidationError(format!(
                            "there should be exactly one default command for command group {}, currently there is no default command",
                            kind
                        )))
                    }
                    1 => defaults[0],
                    _ => {
                        return Err(AppError::ValidationError(format!(
                            "there should be exactly one default command for command group {}, currently there is more than one default command",
                            kind
                        )))
                    }
                }
            }
        };

        self.validate(selected)?;
        Ok(Some(selected))
    }

    /// Resolve init, build and run (mandatory), plus debug when requested.
    pub fn push_commands(&self, overrides: &CommandOverrides, debug: bool) -> Result<PushCommands> {
        let init = self.resolve_group(GroupKind::Init, overrides.for_group(GroupKind::Init))?;
        let build = self.resolve_group(GroupKind::Build, overrides.for_group(GroupKind::Build))?;
        let run = self
            .resolve_group(GroupKind::Run, overrides.for_group(GroupKind::Run))?
            .ok_or_else(|| {
                AppError::ValidationError("the devfile has no valid run command".to_string())
            })?;
        require_exec(run)?;

        let debug = if debug {
            let command = self
                .resolve_group(GroupKind::Debug, overrides.for_group(GroupKind::Debug))
                .ok()
                .flatten()
                .ok_or_else(|| AppError::ValidationError("debug command is not valid".to_string()))?;
            require_exec(command)?;
            Some(command.clone())
        } else {
            None
        };

        Ok(PushCommands {
            init: init.cloned(),
            build: build.cloned(),
            run: Some(run.clone()),
            debug,
        })
    }

    pub fn test_command(&self, override_id: Option<&str>) -> Result<&Command> {
        self.resolve_group(GroupKind::Test, override_id.filter(|id| !id.is_empty()))?
            .ok_or_else(|| {
                AppError::ValidationError("the devfile has no valid test command".to_string())
            })
    }

    /// Exec leaves must target a declared container; composites must reference
    /// existing ids without cycles and within [`MAX_COMPOSITE_DEPTH`].
    pub fn validate(&self, command: &Command) -> Result<()> {
        let mut path = Vec::new();
        self.validate_inner(command, &mut path)
    }

    fn validate_inner(&self, command: &Command, path: &mut Vec<String>) -> Result<()> {
        if path.contains(&command.id) {
            path.push(command.id.clone());
            return Err(AppError::ValidationError(format!(
                "composite command cycle detected: {}",
                path.join(" -> ")
            )));
        }
        if path.len() >= MAX_COMPOSITE_DEPTH {
            return Err(AppError::ValidationError(format!(
                "composite command '{}' exceeds maximum nesting depth of {}",
                command.id, MAX_COMPOSITE_DEPTH
            )));
        }

        match &command.kind {
            CommandKind::Exec(exec) => {
                if !self.containers.contains(&exec.component) {
                    return Err(AppError::ValidationError(format!(
                        "command '{}' references unknown container component '{}'",
                        command.id, exec.component
                    )));
                }
                Ok(())
            }
            CommandKind::Composite(composite) => {
                if composite.commands.is_empty() {
                    return Err(AppError::ValidationError(format!(
                        "composite command '{}' has no sub-commands",
                        command.id
                    )));
                }
                path.push(command.id.clone());
                for id in &composite.commands {
                    let child = self.get(id).ok_or_else(|| {
                        AppError::ValidationError(format!(
                            "composite command '{}' references unknown command '{}'",
                            command.id, id
                        ))
                    })?;
                    self.validate_inner(child, path)?;
                }
                path.pop();
                Ok(())
            }
        }
    }
}

fn require_exec(command: &Command) -> Result<()> {
    if command.is_composite() {
        return Err(AppError::ValidationError(format!(
            "command '{}' must be an exec command to run under the supervisor",
            command.id
        )));
    }
    Ok(())
}

fn convert(raw: &DevfileCommand) -> Result<Command> {
    let id = raw.id.to_lowercase();
    if id.is_empty() {
        return Err(AppError::ValidationError("command id cannot be empty".to_string()));
    }
    let group = raw.group();

    let kind = match (&raw.exec, &raw.composite) {
        (Some(exec), None) => {
            let restart_attribute = raw
                .attributes
                .get("restart")
                .map(|v| !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true);
            let hot_reload = exec.hot_reload_capable.unwrap_or(false);
            CommandKind::Exec(ExecAction {
                component: exec.component.clone(),
                command_line: exec.command_line.clone(),
                working_dir: exec.working_dir.clone().unwrap_or_default(),
                env: exec.env.clone(),
                restart_required: restart_attribute && !hot_reload,
            })
        }
        (None, Some(composite)) => CommandKind::Composite(CompositeAction {
            commands: composite.commands.iter().map(|c| c.to_lowercase()).collect(),
            parallel: composite.parallel,
        }),
        _ => {
            return Err(AppError::ValidationError(format!(
                "command '{}' must declare exactly one of exec or composite",
                raw.id
            )))
        }
    };

    Ok(Command {
        id,
        group: group.map(|g| g.kind),
        is_default: group.map(|g| g.is_default).unwrap_or(false),
        kind,
    })
}
