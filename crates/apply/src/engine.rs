//! Per-object apply state machine and the in-order batch driver.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use keel_core::{FailedObject, PatchStrategy, ResourceObject, LAST_APPLIED_ANNOTATION};
use keel_kubehub::{ObjectTransport, PatchOptions, ResourceDiscovery, RestMapper, Scope};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::annotate;
use crate::config::ApplyConfig;
use crate::decode::decode;
use crate::error::{ApplyError, ApplyObjectError};
use crate::patch::compute_patch;
use crate::registry::TypeRegistry;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ApplyAction {
    Created,
    Configured,
    Unchanged,
    ServerSideApplied,
}

impl std::fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApplyAction::Created => "created",
            ApplyAction::Configured => "configured",
            ApplyAction::Unchanged => "unchanged",
            ApplyAction::ServerSideApplied => "serverside-applied",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppliedObject {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    pub action: ApplyAction,
    /// Live object returned by the server (or the untouched live object when unchanged).
    pub object: ResourceObject,
}

impl AppliedObject {
    /// `configmap/foo`, as kubectl prints it.
    pub fn display_ref(&self) -> String {
        format!("{}/{}", self.kind.to_lowercase(), self.name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchReport {
    pub applied: Vec<AppliedObject>,
    pub failures: Vec<FailedObject>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.applied.len() + self.failures.len()
    }
}

/// A failed object together with the last known state of it.
#[derive(Debug)]
pub struct ObjectFailure {
    pub object: ResourceObject,
    pub error: ApplyObjectError,
}

impl ObjectFailure {
    pub fn to_record(&self) -> FailedObject {
        FailedObject { name: self.object.name().to_string(), kind: self.object.kind().to_string(), message: self.error.to_string() }
    }
}

struct Outcome {
    object: ResourceObject,
    action: ApplyAction,
    namespace: Option<String>,
}

/// Applies manifests through the discovery and transport collaborators.
///
/// Holds no per-batch state; one `Applier` can serve concurrent `apply` calls.
pub struct Applier {
    discovery: Arc<dyn ResourceDiscovery>,
    transport: Arc<dyn ObjectTransport>,
    registry: Arc<TypeRegistry>,
    config: ApplyConfig,
}

impl Applier {
    pub fn new(discovery: Arc<dyn ResourceDiscovery>, transport: Arc<dyn ObjectTransport>) -> Self {
        Self { discovery, transport, registry: Arc::new(TypeRegistry::builtin()), config: ApplyConfig::default() }
    }

    pub fn with_registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_config(mut self, config: ApplyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_server_side(mut self, server_side: bool) -> Self {
        self.config.server_side = server_side;
        self
    }

    /// Decode `manifest` and apply every object in document order.
    ///
    /// Per-object problems land in `BatchReport::failures` and do not stop the
    /// batch. Malformed input, an unavailable discovery endpoint or
    /// cancellation are returned as errors.
    pub async fn apply(&self, manifest: &[u8], cancel: &CancellationToken) -> Result<BatchReport, ApplyError> {
        let t0 = Instant::now();
        let objects = decode(manifest, &self.config.limits)?;
        let total = objects.len();
        debug!(objects = total, server_side = self.config.server_side, "decoded manifest");

        let mapper = match until_cancelled(cancel, self.discovery.rest_mapper()).await {
            Some(res) => res.map_err(ApplyError::Discovery)?,
            None => return Err(ApplyError::Cancelled { report: BatchReport::default(), pending: total }),
        };

        let mut report = BatchReport::default();
        for (idx, obj) in objects.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ApplyError::Cancelled { report, pending: total - idx });
            }
            counter!("apply_objects_total", 1u64);
            match self.apply_object(&mapper, obj, cancel).await {
                Ok(applied) => {
                    info!(object = %applied.display_ref(), ns = ?applied.namespace, action = %applied.action, "applied");
                    report.applied.push(applied);
                }
                Err(failure) if failure.error.is_cancelled() => {
                    return Err(ApplyError::Cancelled { report, pending: total - idx });
                }
                Err(failure) => {
                    counter!("apply_failed_total", 1u64);
                    warn!(object = %failure.object.display_ref(), error = %failure.error, "apply failed; continuing");
                    report.failures.push(failure.to_record());
                }
            }
        }
        histogram!("apply_batch_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        Ok(report)
    }

    /// Apply one object. Not retried; on failure the returned object is the
    /// last known state of the input (e.g. with its namespace defaulted).
    pub async fn apply_object(&self, mapper: &RestMapper, mut obj: ResourceObject, cancel: &CancellationToken) -> Result<AppliedObject, ObjectFailure> {
        match self.run(mapper, &mut obj, cancel).await {
            Ok(out) => Ok(AppliedObject {
                kind: obj.kind().to_string(),
                namespace: out.namespace,
                name: obj.name().to_string(),
                action: out.action,
                object: out.object,
            }),
            Err(error) => Err(ObjectFailure { object: obj, error }),
        }
    }

    async fn run(&self, mapper: &RestMapper, obj: &mut ResourceObject, cancel: &CancellationToken) -> Result<Outcome, ApplyObjectError> {
        if obj.name().is_empty() {
            if !obj.generate_name().is_empty() {
                return Err(ApplyObjectError::GenerateName(obj.generate_name().to_string()));
            }
            return Err(ApplyObjectError::MissingName);
        }

        let gvk = obj.gvk();
        let mapping = mapper.resolve(&gvk.group_kind(), &gvk.version)?;
        let namespace = match mapping.scope {
            Scope::Namespaced => {
                if obj.namespace().is_empty() {
                    obj.set_namespace(&self.config.default_namespace);
                }
                Some(obj.namespace().to_string())
            }
            Scope::Cluster => None,
        };
        let ns = namespace.as_deref();
        let name = obj.name().to_string();
        let resource = &mapping.resource;
        debug!(object = %obj.display_ref(), ns = ?ns, resource = %resource.plural, "resolved mapping");

        if self.config.server_side {
            // both are meaningless to the apply patch and would conflict with field ownership
            obj.remove_annotation(LAST_APPLIED_ANNOTATION);
            obj.clear_managed_fields();
            let body = obj.to_json_bytes().map_err(|source| ApplyObjectError::Serialize { name: name.clone(), source })?;
            let opts = PatchOptions { field_manager: Some(self.config.field_manager.clone()), force: true };
            let res = until_cancelled(cancel, self.transport.patch(resource, ns, &name, PatchStrategy::Apply, &body, &opts))
                .await
                .ok_or(ApplyObjectError::Cancelled)?;
            return match res {
                Ok(object) => Ok(Outcome { object, action: ApplyAction::ServerSideApplied, namespace }),
                Err(source) if source.status_code() == Some(415) => Err(ApplyObjectError::ServerSideApplyUnsupported { source }),
                Err(source) => Err(ApplyObjectError::ServerSideApply { name, source }),
            };
        }

        let modified = annotate::modified_configuration(obj).map_err(|source| ApplyObjectError::Serialize { name: name.clone(), source })?;

        let got = until_cancelled(cancel, self.transport.get(resource, ns, &name)).await.ok_or(ApplyObjectError::Cancelled)?;
        let current = match got {
            Ok(live) => live,
            Err(e) if e.is_not_found() => {
                debug!(object = %obj.display_ref(), "not found; creating");
                annotate::stamp_configuration(obj).map_err(|source| ApplyObjectError::Serialize { name: name.clone(), source })?;
                let created = until_cancelled(cancel, self.transport.create(resource, ns, obj))
                    .await
                    .ok_or(ApplyObjectError::Cancelled)?
                    .map_err(|source| ApplyObjectError::Create { name, source })?;
                counter!("apply_created_total", 1u64);
                return Ok(Outcome { object: created, action: ApplyAction::Created, namespace });
            }
            Err(source) => return Err(ApplyObjectError::Get { name, source }),
        };

        let original = annotate::original_configuration(&current);
        if original.is_none() {
            // Without a recorded baseline the merge only adds and updates what
            // the manifest declares; nothing is pruned and external changes to
            // undeclared fields are invisible.
            warn!(object = %obj.display_ref(), "apply should be used on resource created by either create --save-config or apply");
        }
        let current_bytes = current.to_json_bytes().map_err(|source| ApplyObjectError::Serialize { name: name.clone(), source })?;
        let patch = compute_patch(&self.registry, original.as_deref(), &modified, &current_bytes, &gvk)?;
        if patch.is_empty() {
            counter!("apply_unchanged_total", 1u64);
            return Ok(Outcome { object: current, action: ApplyAction::Unchanged, namespace });
        }

        debug!(object = %obj.display_ref(), strategy = %patch.strategy, bytes = patch.bytes.len(), "patching");
        let patched = until_cancelled(cancel, self.transport.patch(resource, ns, &name, patch.strategy, &patch.bytes, &PatchOptions::default()))
            .await
            .ok_or(ApplyObjectError::Cancelled)?
            .map_err(|source| ApplyObjectError::Patch { name, source })?;
        counter!("apply_patched_total", 1u64);
        Ok(Outcome { object: patched, action: ApplyAction::Configured, namespace })
    }
}

/// `None` if `cancel` fired first; the in-flight future is dropped.
async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}
