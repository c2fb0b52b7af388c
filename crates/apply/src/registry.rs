//! Registry of well-known kinds and their strategic merge directives.
//!
//! Kinds found here are patched with strategic merge; everything else falls
//! back to JSON merge. The registry is an explicit value handed to the
//! applier, so tests and embedders can scope or replace it.

use std::collections::{BTreeMap, HashMap};

use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
    batch::v1::{CronJob, Job},
    core::v1::{ConfigMap, Namespace, PersistentVolumeClaim, Pod, Secret, Service, ServiceAccount},
    networking::v1::{Ingress, NetworkPolicy},
    rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding},
};
use keel_core::Gvk;

/// Merge directives for one field and, through `fields`, for its children.
/// For list fields the children describe the list items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMeta {
    merge: bool,
    merge_key: Option<String>,
    retain_keys: bool,
    fields: BTreeMap<String, FieldMeta>,
}

impl FieldMeta {
    /// Plain map: children merge key by key.
    pub fn object() -> Self {
        Self::default()
    }

    /// `patchStrategy: merge` list of maps identified by `key`.
    pub fn keyed_list(key: &str) -> Self {
        Self { merge: true, merge_key: Some(key.to_string()), ..Self::default() }
    }

    /// `patchStrategy: merge` list of scalars, merged as a set.
    pub fn set_list() -> Self {
        Self { merge: true, ..Self::default() }
    }

    /// `patchStrategy: retainKeys`: keys absent from the desired map are cleared.
    pub fn retain_keys(mut self) -> Self {
        self.retain_keys = true;
        self
    }

    pub fn field(mut self, name: &str, meta: FieldMeta) -> Self {
        self.fields.insert(name.to_string(), meta);
        self
    }

    pub fn child(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.get(name)
    }

    pub fn merges_lists(&self) -> bool {
        self.merge
    }

    pub fn merge_key(&self) -> Option<&str> {
        self.merge_key.as_deref()
    }

    pub fn retains_keys(&self) -> bool {
        self.retain_keys
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    pub gvk: Gvk,
    pub root: FieldMeta,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("no kind \"{kind}\" is registered for version \"{api_version}\"")]
    NotRegistered { kind: String, api_version: String },
    #[error("invalid group-version-kind \"{0}\"")]
    Invalid(String),
}

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<Gvk, SchemaDescriptor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the common built-in workload, config and RBAC kinds.
    pub fn builtin() -> Self {
        let mut r = Self::new();
        r.register_type::<ConfigMap>(FieldMeta::object());
        r.register_type::<Secret>(FieldMeta::object());
        r.register_type::<Namespace>(FieldMeta::object());
        r.register_type::<PersistentVolumeClaim>(FieldMeta::object());
        r.register_type::<ServiceAccount>(
            FieldMeta::object()
                .field("secrets", FieldMeta::keyed_list("name"))
                .field("imagePullSecrets", FieldMeta::keyed_list("name")),
        );
        r.register_type::<Service>(FieldMeta::object().field("spec", FieldMeta::object().field("ports", FieldMeta::keyed_list("port"))));
        r.register_type::<Pod>(FieldMeta::object().field("spec", pod_spec()));
        r.register_type::<Deployment>(workload_spec().field_mut("spec", |spec| spec.field("strategy", FieldMeta::object().retain_keys())));
        r.register_type::<StatefulSet>(workload_spec());
        r.register_type::<DaemonSet>(workload_spec());
        r.register_type::<ReplicaSet>(workload_spec());
        r.register_type::<Job>(workload_spec());
        r.register_type::<CronJob>(FieldMeta::object().field(
            "spec",
            FieldMeta::object().field("jobTemplate", FieldMeta::object().field("metadata", object_meta()).field("spec", FieldMeta::object().field("template", pod_template()))),
        ));
        r.register_type::<Ingress>(FieldMeta::object());
        r.register_type::<NetworkPolicy>(FieldMeta::object());
        r.register_type::<Role>(FieldMeta::object());
        r.register_type::<ClusterRole>(FieldMeta::object());
        r.register_type::<RoleBinding>(FieldMeta::object());
        r.register_type::<ClusterRoleBinding>(FieldMeta::object());
        r
    }

    /// Register directives for a kind. `metadata` directives are added unless
    /// `root` already declares them.
    pub fn register(&mut self, gvk: Gvk, root: FieldMeta) {
        let root = if root.child("metadata").is_some() { root } else { root.field("metadata", object_meta()) };
        self.types.insert(gvk.clone(), SchemaDescriptor { gvk, root });
    }

    pub fn register_type<K: k8s_openapi::Resource>(&mut self, root: FieldMeta) {
        self.register(Gvk::new(K::GROUP, K::VERSION, K::KIND), root);
    }

    pub fn lookup(&self, gvk: &Gvk) -> Result<&SchemaDescriptor, LookupError> {
        if gvk.version.is_empty() || gvk.kind.is_empty() {
            return Err(LookupError::Invalid(gvk.key()));
        }
        self.types
            .get(gvk)
            .ok_or_else(|| LookupError::NotRegistered { kind: gvk.kind.clone(), api_version: gvk.api_version() })
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl FieldMeta {
    fn field_mut(mut self, name: &str, f: impl FnOnce(FieldMeta) -> FieldMeta) -> Self {
        let cur = self.fields.remove(name).unwrap_or_default();
        self.fields.insert(name.to_string(), f(cur));
        self
    }
}

fn object_meta() -> FieldMeta {
    FieldMeta::object()
        .field("finalizers", FieldMeta::set_list())
        .field("ownerReferences", FieldMeta::keyed_list("uid"))
}

fn container() -> FieldMeta {
    FieldMeta::keyed_list("name")
        .field("ports", FieldMeta::keyed_list("containerPort"))
        .field("env", FieldMeta::keyed_list("name"))
        .field("volumeMounts", FieldMeta::keyed_list("mountPath"))
        .field("volumeDevices", FieldMeta::keyed_list("devicePath"))
}

fn pod_spec() -> FieldMeta {
    FieldMeta::object()
        .field("containers", container())
        .field("initContainers", container())
        .field("ephemeralContainers", container())
        .field("volumes", FieldMeta::keyed_list("name").retain_keys())
        .field("imagePullSecrets", FieldMeta::keyed_list("name"))
        .field("hostAliases", FieldMeta::keyed_list("ip"))
        .field("topologySpreadConstraints", FieldMeta::keyed_list("topologyKey"))
        .field("schedulingGates", FieldMeta::keyed_list("name"))
        .field("resourceClaims", FieldMeta::keyed_list("name").retain_keys())
}

fn pod_template() -> FieldMeta {
    FieldMeta::object().field("metadata", object_meta()).field("spec", pod_spec())
}

fn workload_spec() -> FieldMeta {
    FieldMeta::object().field("spec", FieldMeta::object().field("template", pod_template()))
}
