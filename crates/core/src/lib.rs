//! craftkube core types: server definitions and their translation into a
//! flat, orchestrator-ready resource descriptor.

#![forbid(unsafe_code)]

pub mod descriptor;
pub mod model;
pub mod startup;
pub mod validate;

pub use descriptor::{translate, ResourceDescriptor};
pub use model::{K8sConfig, MinecraftConfig, MinecraftServer, ServerIdentity, ServerKey};
pub use startup::{rcon_startup_commands, StartupCommands};
pub use validate::{validate, ValidationError};

pub mod prelude {
    pub use super::{
        rcon_startup_commands, translate, K8sConfig, MinecraftConfig, MinecraftServer, ResourceDescriptor,
        ServerIdentity, ServerKey, StartupCommands, ValidationError,
    };
}
