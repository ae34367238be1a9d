//! Server-side apply of rendered manifests. One shot; no reconcile loop.

use anyhow::{anyhow, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, Patch, PatchParams},
    Client, Resource, ResourceExt,
};
use metrics::{counter, histogram};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::info;

use crate::manifests::ServerManifests;
use crate::FIELD_MANAGER;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Applied {
    pub kind: String,
    pub name: String,
    pub resource_version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub dry_run: bool,
    pub objects: Vec<Applied>,
}

async fn apply_one<K>(client: &Client, namespace: &str, obj: &K, pp: &PatchParams) -> Result<Applied>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Serialize + DeserializeOwned + std::fmt::Debug,
{
    let kind = K::kind(&()).to_string();
    let name = obj.meta().name.clone().ok_or_else(|| anyhow!("{} without metadata.name", kind))?;
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    let res = match api.patch(&name, pp, &Patch::Apply(obj)).await {
        Ok(o) => o,
        Err(e) => {
            counter!("apply_err", 1u64);
            return Err(anyhow!("server-side apply of {} {}/{} failed: {}", kind, namespace, name, e));
        }
    };
    Ok(Applied { kind, name, resource_version: res.resource_version() })
}

/// Apply volume claim, service and deployment in that order.
pub async fn apply(client: Client, manifests: &ServerManifests, dry_run: bool) -> Result<ApplyOutcome> {
    let t0 = std::time::Instant::now();
    counter!("apply_attempts", 1u64);
    let namespace = manifests
        .deployment
        .metadata
        .namespace
        .clone()
        .ok_or_else(|| anyhow!("deployment without metadata.namespace"))?;
    let mut pp = PatchParams::apply(FIELD_MANAGER).force();
    if dry_run {
        pp = pp.dry_run();
    }

    let objects = vec![
        apply_one::<PersistentVolumeClaim>(&client, &namespace, &manifests.pvc, &pp).await?,
        apply_one::<Service>(&client, &namespace, &manifests.service, &pp).await?,
        apply_one::<Deployment>(&client, &namespace, &manifests.deployment, &pp).await?,
    ];
    histogram!("apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
    if dry_run {
        counter!("apply_dry_ok", 1u64);
    } else {
        counter!("apply_ok", 1u64);
    }
    info!(ns = %namespace, count = objects.len(), dry_run, "applied server manifests");
    Ok(ApplyOutcome { dry_run, objects })
}
