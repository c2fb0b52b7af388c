//! Keel core types: the semi-structured resource object, GVK identity and
//! the records shared between the apply engine and its collaborators.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

mod gvk;
mod object;

pub use gvk::{GroupKind, Gvk};
pub use object::{ObjectError, ResourceObject};

/// Annotation holding the serialized desired state of the previous apply.
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// How a patch body is interpreted by the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PatchStrategy {
    /// RFC 7386 JSON merge patch.
    Merge,
    /// Kubernetes strategic merge patch (type-aware list merging).
    StrategicMerge,
    /// Server-side apply.
    Apply,
}

impl std::fmt::Display for PatchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PatchStrategy::Merge => "merge",
            PatchStrategy::StrategicMerge => "strategic",
            PatchStrategy::Apply => "apply",
        };
        f.write_str(s)
    }
}

/// One object of a batch that could not be applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailedObject {
    pub name: String,
    pub kind: String,
    pub message: String,
}
