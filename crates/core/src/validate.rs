//! Checks run on a server definition before it is translated.
//! The translator itself never validates.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::model::MinecraftServer;

static DNS_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

const DNS_LABEL_MAX: usize = 63;
const NODE_PORT_RANGE: std::ops::RangeInclusive<i32> = 30000..=32767;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("namespace must not be empty")]
    EmptyNamespace,
    #[error("name {0:?} is not a valid DNS label")]
    InvalidName(String),
    #[error("replicas must be >= 0 (got {0})")]
    NegativeReplicas(i32),
    #[error("maxPlayers must be > 0 (got {0})")]
    MaxPlayers(i32),
    #[error("nodePort {0} outside the NodePort range 30000-32767")]
    NodePort(i32),
}

pub fn is_dns_label(s: &str) -> bool {
    s.len() <= DNS_LABEL_MAX && DNS_LABEL.is_match(s)
}

/// First violation wins. Modrinth projects and modpack may both be set.
pub fn validate(server: &MinecraftServer) -> Result<(), ValidationError> {
    let id = &server.identity;
    if id.namespace.trim().is_empty() {
        return Err(ValidationError::EmptyNamespace);
    }
    if !is_dns_label(&id.name) {
        return Err(ValidationError::InvalidName(id.name.clone()));
    }
    if server.k8s.replicas < 0 {
        return Err(ValidationError::NegativeReplicas(server.k8s.replicas));
    }
    if server.minecraft.max_players <= 0 {
        return Err(ValidationError::MaxPlayers(server.minecraft.max_players));
    }
    if let Some(p) = id.node_port {
        if !NODE_PORT_RANGE.contains(&p) {
            return Err(ValidationError::NodePort(p));
        }
    }
    Ok(())
}
