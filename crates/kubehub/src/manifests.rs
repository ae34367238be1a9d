//! Descriptor → Deployment, Service and PersistentVolumeClaim.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use craft_core::ResourceDescriptor;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, ResourceRequirements, Service, ServicePort,
    ServiceSpec, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::Serialize;

pub const DEFAULT_IMAGE: &str = "itzg/minecraft-server";
pub const GAME_PORT: i32 = 25565;
const CONTAINER: &str = "minecraft";
const DATA_VOLUME: &str = "data";
const DATA_PATH: &str = "/data";

fn image() -> String {
    std::env::var("CRAFT_IMAGE").ok().filter(|s| !s.is_empty()).unwrap_or_else(|| DEFAULT_IMAGE.to_string())
}

/// Objects making up one server, in apply order.
#[derive(Debug, Clone, Serialize)]
pub struct ServerManifests {
    pub pvc: PersistentVolumeClaim,
    pub service: Service,
    pub deployment: Deployment,
}

impl ServerManifests {
    /// Multi-document YAML, one object per document.
    pub fn to_yaml(&self) -> Result<String> {
        let docs = [
            serde_yaml::to_string(&self.pvc).context("serializing PersistentVolumeClaim")?,
            serde_yaml::to_string(&self.service).context("serializing Service")?,
            serde_yaml::to_string(&self.deployment).context("serializing Deployment")?,
        ];
        Ok(docs.join("---\n"))
    }
}

pub fn pvc_name(server: &str) -> String { format!("{}-data", server) }

fn labels(d: &ResourceDescriptor) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), d.name.clone()),
        ("app.kubernetes.io/managed-by".to_string(), crate::FIELD_MANAGER.to_string()),
    ])
}

fn meta(d: &ResourceDescriptor, name: String) -> ObjectMeta {
    ObjectMeta { name: Some(name), namespace: Some(d.namespace.clone()), labels: Some(labels(d)), ..Default::default() }
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar { name: name.to_string(), value: Some(value.into()), ..Default::default() }
}

fn env_vars(d: &ResourceDescriptor) -> Vec<EnvVar> {
    let mut out = vec![
        env("EULA", "TRUE"),
        env("TYPE", &d.server_type),
        env("VERSION", &d.version),
        env("ONLINE_MODE", if d.online_mode { "TRUE" } else { "FALSE" }),
        env("MAX_PLAYERS", d.max_players.to_string()),
        env("MAX_MEMORY", &d.max_memory),
    ];
    let optional = [
        ("JVM_OPTS", &d.jvm_options),
        ("MODRINTH_PROJECTS", &d.modrinth_projects),
        ("MODRINTH_MODPACK", &d.modrinth_modpack),
    ];
    for (k, v) in optional {
        if let Some(v) = v.as_deref().filter(|v| !v.is_empty()) {
            out.push(env(k, v));
        }
    }
    if !d.rcon_startup_commands.is_empty() {
        // The image runs one command per line.
        out.push(env("RCON_CMDS_STARTUP", d.rcon_startup_commands.replace(craft_core::startup::SEPARATOR, "\n")));
    }
    out
}

fn quantities(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ])
}

fn deployment(d: &ResourceDescriptor, image: &str) -> Deployment {
    let container = Container {
        name: CONTAINER.to_string(),
        image: Some(image.to_string()),
        ports: Some(vec![ContainerPort {
            name: Some(CONTAINER.to_string()),
            container_port: GAME_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(env_vars(d)),
        resources: Some(ResourceRequirements {
            limits: Some(quantities(&d.cpu_limit, &d.memory_limit)),
            requests: Some(quantities(&d.cpu_request, &d.memory_request)),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: DATA_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };
    let pod = PodSpec {
        containers: vec![container],
        volumes: Some(vec![Volume {
            name: DATA_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: pvc_name(&d.name),
                read_only: None,
            }),
            ..Default::default()
        }]),
        ..Default::default()
    };
    Deployment {
        metadata: meta(d, d.name.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(d.replicas),
            selector: LabelSelector { match_labels: Some(labels(d)), ..Default::default() },
            // Single ReadWriteOnce volume: old pod must go before the new one mounts it.
            strategy: Some(DeploymentStrategy { type_: Some("Recreate".to_string()), rolling_update: None }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels(d)), ..Default::default() }),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn service(d: &ResourceDescriptor) -> Service {
    let type_ = if d.node_port.is_some() { "NodePort" } else { "ClusterIP" };
    Service {
        metadata: meta(d, d.name.clone()),
        spec: Some(ServiceSpec {
            type_: Some(type_.to_string()),
            selector: Some(labels(d)),
            ports: Some(vec![ServicePort {
                name: Some(CONTAINER.to_string()),
                port: GAME_PORT,
                target_port: Some(IntOrString::Int(GAME_PORT)),
                node_port: d.node_port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn pvc(d: &ResourceDescriptor) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: meta(d, pvc_name(&d.name)),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: d.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), Quantity(d.storage_size.clone()))])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Render with the image from `CRAFT_IMAGE` (default `itzg/minecraft-server`).
pub fn render(d: &ResourceDescriptor) -> ServerManifests { render_with_image(d, &image()) }

pub fn render_with_image(d: &ResourceDescriptor, image: &str) -> ServerManifests {
    ServerManifests { pvc: pvc(d), service: service(d), deployment: deployment(d, image) }
}
