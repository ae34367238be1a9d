//! Deployable resource descriptor: the flat, orchestrator-ready view of a server.

use serde::{Deserialize, Serialize};

use crate::model::{K8sConfig, MinecraftConfig, MinecraftServer, ServerIdentity, ServerKey};
use crate::startup::rcon_startup_commands;

/// Union of identity, sizing and runtime fields plus the derived startup commands.
/// Produced by [`translate`]; never modified afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub namespace: String,
    pub name: String,
    pub replicas: i32,
    pub node_port: Option<i32>,
    pub server_type: String,
    pub online_mode: bool,
    pub max_players: i32,
    pub max_memory: String,
    pub memory_limit: String,
    pub memory_request: String,
    pub cpu_limit: String,
    pub cpu_request: String,
    pub storage_size: String,
    pub storage_class_name: Option<String>,
    pub jvm_options: Option<String>,
    pub version: String,
    pub modrinth_projects: Option<String>,
    pub modrinth_modpack: Option<String>,
    pub world_border_size: Option<i32>,
    pub pregen_radius: Option<i32>,
    pub rcon_startup_commands: String,
}

impl ResourceDescriptor {
    pub fn key(&self) -> ServerKey { ServerKey::new(&self.namespace, &self.name) }
}

/// Map a server definition onto a descriptor. Fields are copied verbatim;
/// nothing is converted or validated.
pub fn translate(identity: &ServerIdentity, k8s: &K8sConfig, mc: &MinecraftConfig) -> ResourceDescriptor {
    ResourceDescriptor {
        namespace: identity.namespace.clone(),
        name: identity.name.clone(),
        node_port: identity.node_port,

        replicas: k8s.replicas,
        memory_limit: k8s.memory_limit.clone(),
        memory_request: k8s.memory_request.clone(),
        cpu_limit: k8s.cpu_limit.clone(),
        cpu_request: k8s.cpu_request.clone(),
        storage_size: k8s.storage_size.clone(),
        storage_class_name: k8s.storage_class_name.clone(),

        server_type: mc.server_type.clone(),
        online_mode: mc.online_mode,
        max_players: mc.max_players,
        max_memory: mc.max_memory.clone(),
        jvm_options: mc.jvm_options.clone(),
        version: mc.version.clone(),
        modrinth_projects: mc.modrinth_projects.clone(),
        modrinth_modpack: mc.modrinth_modpack.clone(),
        world_border_size: mc.world_border_size,
        pregen_radius: mc.pregen_radius,
        rcon_startup_commands: rcon_startup_commands(mc.pregen_radius, mc.world_border_size),
    }
}

impl From<&MinecraftServer> for ResourceDescriptor {
    fn from(s: &MinecraftServer) -> Self { translate(&s.identity, &s.k8s, &s.minecraft) }
}
