#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use keel_apply::Applier;
use keel_core::{PatchStrategy, ResourceObject};
use keel_kubehub::{ObjectTransport, PatchOptions, ResourceDiscovery, ResourceHandle, RestMapper, Scope, StaticDiscovery, TransportError};
use serde_json::Value as Json;

type Key = (String, Option<String>, String);

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Get { plural: String, namespace: Option<String>, name: String },
    Create { plural: String, namespace: Option<String>, object: Json },
    Patch { plural: String, namespace: Option<String>, name: String, strategy: PatchStrategy, body: Json, opts: PatchOptions },
}

/// In-memory object store. Merge and strategic patches are applied as RFC 7386
/// merge patches, which is exact for the map-only objects used in tests.
#[derive(Default)]
pub struct MemoryTransport {
    objects: Mutex<BTreeMap<Key, Json>>,
    requests: Mutex<Vec<Request>>,
    apply_status: Option<u16>,
    broken_get: Option<String>,
    hang: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer server-side apply requests with this HTTP status.
    pub fn rejecting_apply(mut self, code: u16) -> Self {
        self.apply_status = Some(code);
        self
    }

    /// Fail `get` for this name with a 500.
    pub fn breaking_get(mut self, name: &str) -> Self {
        self.broken_get = Some(name.to_string());
        self
    }

    /// Never answer any request.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn seed(&self, plural: &str, namespace: Option<&str>, object: Json) {
        let name = object["metadata"]["name"].as_str().unwrap_or_default().to_string();
        self.objects.lock().unwrap().insert(key(plural, namespace, &name), object);
    }

    pub fn object(&self, plural: &str, namespace: Option<&str>, name: &str) -> Option<Json> {
        self.objects.lock().unwrap().get(&key(plural, namespace, name)).cloned()
    }

    pub fn edit(&self, plural: &str, namespace: Option<&str>, name: &str, f: impl FnOnce(&mut Json)) {
        if let Some(obj) = self.objects.lock().unwrap().get_mut(&key(plural, namespace, name)) {
            f(obj);
        }
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn patches(&self) -> Vec<Request> {
        self.requests().into_iter().filter(|r| matches!(r, Request::Patch { .. })).collect()
    }

    fn record(&self, r: Request) {
        self.requests.lock().unwrap().push(r);
    }
}

fn key(plural: &str, namespace: Option<&str>, name: &str) -> Key {
    (plural.to_string(), namespace.map(|s| s.to_string()), name.to_string())
}

fn with_namespace(mut obj: Json, namespace: Option<&str>) -> Json {
    if let Some(ns) = namespace {
        obj["metadata"]["namespace"] = Json::String(ns.to_string());
    }
    obj
}

fn to_object(v: Json) -> Result<ResourceObject, TransportError> {
    ResourceObject::from_value(v).map_err(|e| TransportError::Other(anyhow::anyhow!(e)))
}

#[async_trait::async_trait]
impl ObjectTransport for MemoryTransport {
    async fn get(&self, resource: &ResourceHandle, namespace: Option<&str>, name: &str) -> Result<ResourceObject, TransportError> {
        self.record(Request::Get { plural: resource.plural.clone(), namespace: namespace.map(|s| s.to_string()), name: name.to_string() });
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.broken_get.as_deref() == Some(name) {
            return Err(TransportError::Status { code: 500, message: "etcdserver: request timed out".into() });
        }
        match self.object(&resource.plural, namespace, name) {
            Some(v) => to_object(v),
            None => Err(TransportError::NotFound(format!("{} \"{}\" not found", resource.plural, name))),
        }
    }

    async fn create(&self, resource: &ResourceHandle, namespace: Option<&str>, object: &ResourceObject) -> Result<ResourceObject, TransportError> {
        self.record(Request::Create { plural: resource.plural.clone(), namespace: namespace.map(|s| s.to_string()), object: object.as_value().clone() });
        if self.object(&resource.plural, namespace, object.name()).is_some() {
            return Err(TransportError::Status { code: 409, message: "already exists".into() });
        }
        let stored = with_namespace(object.as_value().clone(), namespace);
        self.objects.lock().unwrap().insert(key(&resource.plural, namespace, object.name()), stored.clone());
        to_object(stored)
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
        let body: Json = serde_json::from_slice(patch).map_err(|e| TransportError::Other(e.into()))?;
        self.record(Request::Patch {
            plural: resource.plural.clone(),
            namespace: namespace.map(|s| s.to_string()),
            name: name.to_string(),
            strategy,
            body: body.clone(),
            opts: opts.clone(),
        });
        if self.hang {
            std::future::pending::<()>().await;
        }
        let k = key(&resource.plural, namespace, name);
        if strategy == PatchStrategy::Apply {
            if let Some(code) = self.apply_status {
                return Err(TransportError::Status { code, message: "the server rejected the request".into() });
            }
            let stored = with_namespace(body, namespace);
            self.objects.lock().unwrap().insert(k, stored.clone());
            return to_object(stored);
        }
        let mut objects = self.objects.lock().unwrap();
        let doc = objects.get_mut(&k).ok_or_else(|| TransportError::NotFound(name.to_string()))?;
        json_patch::merge(doc, &body);
        to_object(doc.clone())
    }
}

/// configmaps, secrets and widgets are namespaced; namespaces are not.
pub fn mapper() -> RestMapper {
    let mut m = RestMapper::new();
    let h = |group: &str, kind: &str, plural: &str| ResourceHandle { group: group.into(), version: "v1".into(), kind: kind.into(), plural: plural.into() };
    m.insert(h("", "ConfigMap", "configmaps"), Scope::Namespaced);
    m.insert(h("", "Secret", "secrets"), Scope::Namespaced);
    m.insert(h("", "Namespace", "namespaces"), Scope::Cluster);
    m.insert(h("example.io", "Widget", "widgets"), Scope::Namespaced);
    m
}

pub fn applier(transport: Arc<MemoryTransport>) -> Applier {
    let discovery: Arc<dyn ResourceDiscovery> = Arc::new(StaticDiscovery::new(mapper()));
    Applier::new(discovery, transport)
}
