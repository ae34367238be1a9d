//! Server value objects. Constructed once from validated input and only read afterwards.

use serde::{Deserialize, Serialize};

/// Where a server lives in the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ServerIdentity {
    pub namespace: String,
    /// Resource name; must be a DNS label.
    pub name: String,
    /// Externally assigned NodePort, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_port: Option<i32>,
}

impl ServerIdentity {
    pub fn key(&self) -> ServerKey {
        ServerKey { namespace: self.namespace.clone(), name: self.name.clone() }
    }
}

/// Cluster sizing. Quantities are orchestrator-native strings and are never parsed here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct K8sConfig {
    pub replicas: i32,
    pub memory_limit: String,
    pub memory_request: String,
    pub cpu_limit: String,
    pub cpu_request: String,
    pub storage_size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

/// Game runtime options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MinecraftConfig {
    /// Runtime flavor tag, e.g. `PAPER` or `FABRIC`.
    pub server_type: String,
    pub online_mode: bool,
    pub max_players: i32,
    pub max_memory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jvm_options: Option<String>,
    pub version: String,
    /// Serialized list of mod identifiers, passed through as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modrinth_projects: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modrinth_modpack: Option<String>,
    /// Circular world border size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_border_size: Option<i32>,
    /// Chunk pregeneration radius around 0,0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pregen_radius: Option<i32>,
}

/// A complete server definition as read from a manifest file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MinecraftServer {
    #[serde(flatten)]
    pub identity: ServerIdentity,
    pub k8s: K8sConfig,
    pub minecraft: MinecraftConfig,
}

/// Cache key for per-server runtime data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerKey {
    pub namespace: String,
    pub name: String,
}

impl ServerKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl std::fmt::Display for ServerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
