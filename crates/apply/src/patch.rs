//! Patch strategy selection: strategic merge for registered kinds, JSON merge
//! (with identity preconditions) for everything else.

use keel_core::{Gvk, PatchStrategy};
use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::merge::{three_way, MergeError};
use crate::registry::{LookupError, TypeRegistry};

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("parsing {what} configuration: {source}")]
    Parse { what: &'static str, source: serde_json::Error },
    #[error("{0} configuration is not a mapping")]
    NotAMapping(&'static str),
    #[error("at least one of apiVersion, kind and name was changed")]
    IdentityChanged,
    #[error("unable to apply patch, {0}")]
    Merge(#[from] MergeError),
    #[error("getting patch metadata for {gvk}: {source}")]
    Lookup { gvk: Gvk, source: LookupError },
    #[error("serializing patch: {0}")]
    Serialize(serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedPatch {
    pub bytes: Vec<u8>,
    pub strategy: PatchStrategy,
}

impl ComputedPatch {
    /// True when applying the patch would change nothing.
    pub fn is_empty(&self) -> bool {
        self.bytes == b"{}"
    }
}

/// Compute the patch from the three-way triple. A missing `original` is
/// treated as an empty document.
pub fn compute_patch(registry: &TypeRegistry, original: Option<&[u8]>, modified: &[u8], current: &[u8], gvk: &Gvk) -> Result<ComputedPatch, PatchError> {
    let original = match original {
        Some(bytes) => parse_map("original", bytes)?,
        None => Map::new(),
    };
    let modified = parse_map("modified", modified)?;
    let current = parse_map("current", current)?;

    let (patch, strategy) = match registry.lookup(gvk) {
        Ok(schema) => {
            let patch = three_way(&original, &modified, &current, Some(&schema.root))?;
            (patch, PatchStrategy::StrategicMerge)
        }
        Err(LookupError::NotRegistered { .. }) => {
            let patch = three_way(&original, &modified, &current, None)?;
            if changes_identity(&patch) {
                return Err(PatchError::IdentityChanged);
            }
            (patch, PatchStrategy::Merge)
        }
        Err(source) => return Err(PatchError::Lookup { gvk: gvk.clone(), source }),
    };
    debug!(gvk = %gvk, %strategy, keys = patch.len(), "computed patch");
    let bytes = serde_json::to_vec(&patch).map_err(PatchError::Serialize)?;
    Ok(ComputedPatch { bytes, strategy })
}

fn parse_map(what: &'static str, bytes: &[u8]) -> Result<Map<String, Json>, PatchError> {
    match serde_json::from_slice::<Json>(bytes).map_err(|source| PatchError::Parse { what, source })? {
        Json::Object(map) => Ok(map),
        Json::Null => Ok(Map::new()),
        _ => Err(PatchError::NotAMapping(what)),
    }
}

// A JSON merge patch must leave apiVersion, kind and name alone.
fn changes_identity(patch: &Map<String, Json>) -> bool {
    if patch.contains_key("apiVersion") || patch.contains_key("kind") || patch.contains_key("name") {
        return true;
    }
    patch.get("metadata").and_then(Json::as_object).map(|m| m.contains_key("name")).unwrap_or(false)
}
