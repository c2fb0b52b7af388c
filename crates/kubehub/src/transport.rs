use anyhow::{anyhow, Context};
use keel_core::{PatchStrategy, ResourceObject};
use kube::{
    api::{Api, Patch, PatchParams, PostParams},
    core::DynamicObject,
    Client,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::trace;

use crate::ResourceHandle;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{message} (status {code})")]
    Status { code: u16, message: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TransportError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::NotFound(_))
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            TransportError::NotFound(_) => Some(404),
            TransportError::Status { code, .. } => Some(*code),
            TransportError::Other(_) => None,
        }
    }
}

impl From<kube::Error> for TransportError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(resp) if resp.code == 404 => TransportError::NotFound(resp.message),
            kube::Error::Api(resp) => TransportError::Status { code: resp.code, message: resp.message },
            other => TransportError::Other(anyhow!(other)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatchOptions {
    pub field_manager: Option<String>,
    /// Take ownership of conflicting fields (server-side apply only).
    pub force: bool,
}

/// Blocking request/response access to the object store. Dropping a returned
/// future abandons the in-flight request.
#[async_trait::async_trait]
pub trait ObjectTransport: Send + Sync {
    async fn get(&self, resource: &ResourceHandle, namespace: Option<&str>, name: &str) -> Result<ResourceObject, TransportError>;

    async fn create(&self, resource: &ResourceHandle, namespace: Option<&str>, object: &ResourceObject) -> Result<ResourceObject, TransportError>;

    async fn patch(
        &self,
        resource: &ResourceHandle,
        namespace: Option<&str>,
        name: &str,
        strategy: PatchStrategy,
        patch: &[u8],
        opts: &PatchOptions,
    ) -> Result<ResourceObject, TransportError>;
}

/// Transport over kube-rs dynamic APIs.
pub struct KubeTransport {
    client: Client,
}

impl KubeTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ResourceHandle, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = resource.to_api_resource();
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn to_object(obj: DynamicObject) -> Result<ResourceObject, TransportError> {
    let v = serde_json::to_value(&obj).context("serializing DynamicObject")?;
    ResourceObject::from_value(v).map_err(|e| TransportError::Other(anyhow!("server returned invalid object: {}", e)))
}

#[async_trait::async_trait]
impl ObjectTransport for KubeTransport {
    async fn get(&self, resource: &ResourceHandle, namespace: Option<&str>, name: &str) -> Result<ResourceObject, TransportError> {
        trace!(resource = %resource.plural, ns = ?namespace, name, "get");
        let obj = self.api(resource, namespace).get(name).await?;
        to_object(obj)
    }

    async fn create(&self, resource: &ResourceHandle, namespace: Option<&str>, object: &ResourceObject) -> Result<ResourceObject, TransportError> {
        trace!(resource = %resource.plural, ns = ?namespace, name = object.name(), "create");
        let body: DynamicObject = serde_json::from_value(object.as_value().clone()).context("converting object for create")?;
        let obj = self.api(resource, namespace).create(&PostParams::default(), &body).await?;
        to_object(obj)
    }

    async fn patch(
        &self,
        resource: &ResourceHandle,
        namespace: Option<&str>,
        name: &str,
        strategy: PatchStrategy,
        patch: &[u8],
        opts: &PatchOptions,
    ) -> Result<ResourceObject, TransportError> {
        trace!(resource = %resource.plural, ns = ?namespace, name, %strategy, "patch");
        let body: Json = serde_json::from_slice(patch).context("parsing patch body")?;
        let pp = PatchParams { field_manager: opts.field_manager.clone(), force: opts.force, ..Default::default() };
        let patch = match strategy {
            PatchStrategy::Merge => Patch::Merge(body),
            PatchStrategy::StrategicMerge => Patch::Strategic(body),
            PatchStrategy::Apply => Patch::Apply(body),
        };
        let obj = self.api(resource, namespace).patch(name, &pp, &patch).await?;
        to_object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_err(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse { status: "Failure".into(), message: format!("boom {}", code), reason: "x".into(), code })
    }

    #[test]
    fn classifies_kube_errors() {
        let nf = TransportError::from(api_err(404));
        assert!(nf.is_not_found());
        let unsupported = TransportError::from(api_err(415));
        assert!(!unsupported.is_not_found());
        assert_eq!(unsupported.status_code(), Some(415));
        assert_eq!(unsupported.to_string(), "boom 415 (status 415)");
    }
}
