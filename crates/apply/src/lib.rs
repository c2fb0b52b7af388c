//! Keel apply: reconcile a batch of manifests against the object store with
//! `kubectl apply` semantics (create, three-way patch, or server-side apply).

#![forbid(unsafe_code)]

pub mod annotate;
pub mod config;
pub mod decode;
mod engine;
mod error;
mod merge;
pub mod patch;
pub mod registry;

pub use config::ApplyConfig;
pub use decode::{decode, DecodeError, DecodeFailure, DecodeLimits};
pub use engine::{AppliedObject, ApplyAction, Applier, BatchReport, ObjectFailure};
pub use error::{ApplyError, ApplyObjectError};
pub use merge::MergeError;
pub use patch::{compute_patch, ComputedPatch, PatchError};
pub use registry::{FieldMeta, LookupError, SchemaDescriptor, TypeRegistry};

pub use tokio_util::sync::CancellationToken;
