use keel_kubehub::{MappingError, TransportError};

use crate::decode::DecodeError;
use crate::engine::BatchReport;
use crate::patch::PatchError;

/// Why a single object failed. These end up in the batch's failure records;
/// the batch keeps going.
#[derive(Debug, thiserror::Error)]
pub enum ApplyObjectError {
    #[error("from {0}: cannot use generate name with apply")]
    GenerateName(String),
    #[error("object has no metadata.name")]
    MissingName,
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("serializing configuration of {name}: {source}")]
    Serialize { name: String, source: serde_json::Error },
    #[error("retrieving current configuration of {name} from server: {source}")]
    Get { name: String, source: TransportError },
    #[error("creating {name}: {source}")]
    Create { name: String, source: TransportError },
    #[error("patching {name}: {source}")]
    Patch { name: String, source: TransportError },
    #[error(transparent)]
    ComputePatch(#[from] PatchError),
    /// The server rejected the apply patch content type (HTTP 415).
    #[error("server-side apply not available on the server: ({source})")]
    ServerSideApplyUnsupported { source: TransportError },
    #[error("server-side apply of {name}: {source}")]
    ServerSideApply { name: String, source: TransportError },
    #[error("cancelled")]
    Cancelled,
}

impl ApplyObjectError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApplyObjectError::Cancelled)
    }
}

/// Errors that stop the whole batch.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("building REST mapping: {0:#}")]
    Discovery(anyhow::Error),
    /// `report` covers the objects handled before cancellation.
    #[error("apply cancelled with {pending} object(s) not attempted")]
    Cancelled { report: BatchReport, pending: usize },
}
