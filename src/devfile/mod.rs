//! Devfile document model and the command graph derived from it.

pub mod commands;
pub mod model;

pub use commands::{
    Command, CommandGraph, CommandKind, CommandOverrides, CompositeAction, ExecAction,
    PushCommands, MAX_COMPOSITE_DEPTH,
};
pub use model::{
    Component, ContainerComponent, Devfile, DevfileCommand, EnvVar, Events, GroupKind,
    VolumeComponent, VolumeMount,
};
