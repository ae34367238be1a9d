//! craftkube kubehub: turns resource descriptors into cluster objects and
//! reads server status back.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use kube::Client;

pub mod apply;
pub mod manifests;
pub mod status;

pub use apply::{apply, ApplyOutcome};
pub use manifests::{render, render_with_image, ServerManifests};
pub use status::{KubeStatusLoader, ServerStatus};

/// Field manager used for server-side apply.
pub const FIELD_MANAGER: &str = "craftkube";

/// Client for the current kubeconfig context (or in-cluster config).
pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client from default config")
}
