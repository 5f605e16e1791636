//! In-container process supervisor protocol

/// Volume the bootstrap init container seeds with the supervisor
pub const SUPERVISORD_VOLUME: &str = "devpush-supervisord";

pub const SUPERVISORD_MOUNT_PATH: &str = "/opt/devpush/";

pub const SUPERVISORD_BIN: &str = "/opt/devpush/bin/supervisord";

pub const SUPERVISORD_CONF: &str = "/opt/devpush/conf/devfile-supervisor.conf";

/// Init container copying the supervisor into [`SUPERVISORD_VOLUME`]
pub const BOOTSTRAP_CONTAINER: &str = "copy-supervisord";

pub const RUN_PROGRAM: &str = "devrun";
pub const DEBUG_PROGRAM: &str = "debugrun";

pub const ENV_COMMAND_RUN: &str = "DEVPUSH_COMMAND_RUN";
pub const ENV_COMMAND_RUN_WORKING_DIR: &str = "DEVPUSH_COMMAND_RUN_WORKING_DIR";
pub const ENV_COMMAND_DEBUG: &str = "DEVPUSH_COMMAND_DEBUG";
pub const ENV_COMMAND_DEBUG_WORKING_DIR: &str = "DEVPUSH_COMMAND_DEBUG_WORKING_DIR";
pub const ENV_DEBUG_PORT: &str = "DEBUG_PORT";

pub const DEFAULT_DEBUG_PORT: u16 = 5858;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtlAction {
    Start,
    Stop,
}

impl CtlAction {
    fn as_str(&self) -> &'static str {
        match self {
            CtlAction::Start => "start",
            CtlAction::Stop => "stop",
        }
    }
}

/// Supervisor program for the run or debug process
pub fn program_name(debug: bool) -> &'static str {
    if debug {
        DEBUG_PROGRAM
    } else {
        RUN_PROGRAM
    }
}

/// Entrypoint given to a container that runs under the supervisor
pub fn entrypoint() -> (Vec<String>, Vec<String>) {
    (
        vec![SUPERVISORD_BIN.to_string()],
        vec!["-c".to_string(), SUPERVISORD_CONF.to_string()],
    )
}

/// Start the supervisor detached from the exec session
pub fn daemon_command() -> Vec<String> {
    vec![
        SUPERVISORD_BIN.to_string(),
        "-c".to_string(),
        SUPERVISORD_CONF.to_string(),
        "-d".to_string(),
    ]
}

pub fn ctl_command(action: CtlAction, program: &str) -> Vec<String> {
    vec![
        SUPERVISORD_BIN.to_string(),
        "ctl".to_string(),
        action.as_str().to_string(),
        program.to_string(),
    ]
}

/// Whether a container's declared command already is the supervisor
pub fn is_supervisor_entrypoint(command: &[String]) -> bool {
    command.len() == 1 && command[0] == SUPERVISORD_BIN
}
