//! Keel kubehub: REST mapping discovery and object transport.
//!
//! The apply engine only talks to these traits; `KubeDiscovery` and
//! `KubeTransport` are the kube-rs backed implementations.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use kube::Client;

mod mapping;
mod transport;

pub use mapping::{KubeDiscovery, MappingError, ResourceDiscovery, ResourceHandle, RestMapper, RestMapping, Scope, StaticDiscovery};
pub use transport::{KubeTransport, ObjectTransport, PatchOptions, TransportError};

/// Client for the current kubeconfig context (or in-cluster config).
pub async fn kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client from default config")
}
