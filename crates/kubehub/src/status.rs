//! Server status snapshot read from the server's Deployment.

use anyhow::{anyhow, Context, Result};
use craft_cache::Loader;
use craft_core::ServerKey;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub replicas: i32,
    pub ready_replicas: i32,
    /// Deployment reports condition `Available=True`.
    pub available: bool,
    /// Seconds since epoch when the status was read.
    pub observed_at: i64,
}

impl ServerStatus {
    pub fn from_deployment(d: &Deployment, observed_at: i64) -> Self {
        let replicas = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
        let status = d.status.as_ref();
        let ready_replicas = status.and_then(|s| s.ready_replicas).unwrap_or(0);
        let available = status
            .and_then(|s| s.conditions.as_ref())
            .map(|cs| cs.iter().any(|c| c.type_ == "Available" && c.status == "True"))
            .unwrap_or(false);
        Self { replicas, ready_replicas, available, observed_at }
    }

    pub fn is_running(&self) -> bool { self.replicas > 0 && self.ready_replicas >= self.replicas }
}

/// Cache loader that reads the Deployment named after the server.
#[derive(Clone)]
pub struct KubeStatusLoader {
    client: Client,
}

impl KubeStatusLoader {
    pub fn new(client: Client) -> Self { Self { client } }
}

#[async_trait::async_trait]
impl Loader<ServerKey, ServerStatus> for KubeStatusLoader {
    async fn load(&self, key: &ServerKey) -> Result<ServerStatus> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &key.namespace);
        let d = api
            .get_opt(&key.name)
            .await
            .with_context(|| format!("reading deployment {}", key))?
            .ok_or_else(|| anyhow!("deployment {} not found", key))?;
        let status = ServerStatus::from_deployment(&d, chrono::Utc::now().timestamp());
        debug!(server = %key, ready = status.ready_replicas, replicas = status.replicas, "status loaded");
        Ok(status)
    }
}
