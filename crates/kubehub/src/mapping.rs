use std::collections::HashMap;

use anyhow::Result;
use keel_core::{GroupKind, Gvk};
use kube::{
    core::ApiResource,
    discovery::{self, Discovery},
    Client,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Scope {
    Namespaced,
    Cluster,
}

/// Served resource an object maps to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceHandle {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

impl ResourceHandle {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }

    pub fn to_api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: self.kind.clone(),
            plural: self.plural.clone(),
        }
    }
}

impl From<&ApiResource> for ResourceHandle {
    fn from(ar: &ApiResource) -> Self {
        Self { group: ar.group.clone(), version: ar.version.clone(), kind: ar.kind.clone(), plural: ar.plural.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestMapping {
    pub resource: ResourceHandle,
    pub scope: Scope,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("no matches for kind \"{kind}\" in version \"{api_version}\"")]
    NoMatch { kind: String, api_version: String },
}

/// Group-kind + version lookup table built once per batch from discovery.
#[derive(Debug, Clone, Default)]
pub struct RestMapper {
    // versions kept in discovery order, preferred version first
    kinds: HashMap<GroupKind, Vec<(String, RestMapping)>>,
}

impl RestMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, resource: ResourceHandle, scope: Scope) {
        let gk = GroupKind { group: resource.group.clone(), kind: resource.kind.clone() };
        let versions = self.kinds.entry(gk).or_default();
        if versions.iter().any(|(v, _)| *v == resource.version) {
            return;
        }
        versions.push((resource.version.clone(), RestMapping { resource, scope }));
    }

    /// Register a built-in k8s-openapi type.
    pub fn insert_resource<K>(&mut self, scope: Scope)
    where
        K: kube::Resource<DynamicType = ()>,
    {
        let ar = ApiResource::erase::<K>(&());
        self.insert(ResourceHandle::from(&ar), scope);
    }

    /// Resolve a group-kind at `version`; an empty version picks the preferred one.
    pub fn resolve(&self, gk: &GroupKind, version: &str) -> Result<RestMapping, MappingError> {
        let no_match = || MappingError::NoMatch {
            kind: gk.to_string(),
            api_version: Gvk::new(&gk.group, version, &gk.kind).api_version(),
        };
        let versions = self.kinds.get(gk).ok_or_else(no_match)?;
        let found = if version.is_empty() { versions.first() } else { versions.iter().find(|(v, _)| v == version) };
        found.map(|(_, m)| m.clone()).ok_or_else(no_match)
    }

    pub fn len(&self) -> usize {
        self.kinds.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Source of the REST mapping used for one batch.
#[async_trait::async_trait]
pub trait ResourceDiscovery: Send + Sync {
    async fn rest_mapper(&self) -> Result<RestMapper>;
}

/// Discovery against a live API server.
pub struct KubeDiscovery {
    client: Client,
}

impl KubeDiscovery {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ResourceDiscovery for KubeDiscovery {
    async fn rest_mapper(&self) -> Result<RestMapper> {
        let t0 = std::time::Instant::now();
        let discovery = Discovery::new(self.client.clone()).run().await?;
        let mut mapper = RestMapper::new();
        for group in discovery.groups() {
            // preferred version first so an empty version resolves to it
            let preferred = group.preferred_version_or_latest().to_string();
            let mut versions: Vec<String> = group.versions().map(|v| v.to_string()).collect();
            versions.sort_by_key(|v| *v != preferred);
            for ver in versions {
                for (ar, caps) in group.versioned_resources(&ver) {
                    let scope = match caps.scope {
                        discovery::Scope::Namespaced => Scope::Namespaced,
                        discovery::Scope::Cluster => Scope::Cluster,
                    };
                    mapper.insert(ResourceHandle::from(&ar), scope);
                }
            }
        }
        metrics::histogram!("discovery_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        debug!(resources = mapper.len(), "rest mapper built");
        Ok(mapper)
    }
}

/// Fixed mapping, for offline use and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    mapper: RestMapper,
}

impl StaticDiscovery {
    pub fn new(mapper: RestMapper) -> Self {
        Self { mapper }
    }
}

#[async_trait::async_trait]
impl ResourceDiscovery for StaticDiscovery {
    async fn rest_mapper(&self) -> Result<RestMapper> {
        Ok(self.mapper.clone())
    }
}
