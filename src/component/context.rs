use crate::devfile::{CommandOverrides, PushCommands};
use std::path::PathBuf;

/// Caller-supplied inputs of a push
#[derive(Debug, Clone, Default)]
pub struct PushParameters {
    /// Local source directory to sync
    pub path: PathBuf,
    pub overrides: CommandOverrides,
    pub debug: bool,
    pub debug_port: Option<u16>,
    /// Push all files and re-run commands even without local changes
    pub force_build: bool,
    /// Echo command output
    pub show: bool,
}

/// State that lives for exactly one push. Passed through the pipeline
/// instead of being kept on the adapter.
#[derive(Debug, Clone)]
pub struct PushContext {
    pub component_name: String,
    pub component_exists: bool,
    pub commands: PushCommands,
    pub debug: bool,
    pub debug_port: u16,
    pub force_build: bool,
    pub show: bool,
    /// Pod serving the component before this push, if it existed
    pub previous_pod: Option<String>,
}

impl PushContext {
    /// Whether the pod was replaced during this push
    pub fn pod_changed(&self, current_pod: &str) -> bool {
        self.component_exists && self.previous_pod.as_deref() != Some(current_pod)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(exists: bool, previous: Option<&str>) -> PushContext {
        PushContext {
            component_name: "web".to_string(),
            component_exists: exists,
            commands: PushCommands::default(),
            debug: false,
            debug_port: 5858,
            force_build: false,
            show: false,
            previous_pod: previous.map(str::to_string),
        }
    }

    #[test]
    fn test_pod_changed() {
        assert!(!context(false, None).pod_changed("web-abc"));
        assert!(!context(true, Some("web-abc")).pod_changed("web-abc"));
        assert!(context(true, Some("web-abc")).pod_changed("web-def"));
    }
}
