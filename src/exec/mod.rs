//! Command dispatch into running containers

pub mod engine;
pub mod supervisor;

pub use engine::{shell_command, CommandExecutionEngine};
