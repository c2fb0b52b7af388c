//! Last-applied-configuration bookkeeping that makes three-way merges possible.

use keel_core::{ResourceObject, LAST_APPLIED_ANNOTATION};

/// Store the object's own serialization (without the annotation itself) under
/// the last-applied key.
pub fn stamp_configuration(obj: &mut ResourceObject) -> serde_json::Result<()> {
    obj.remove_annotation(LAST_APPLIED_ANNOTATION);
    let config = serde_json::to_string(obj.as_value())?;
    obj.set_annotation(LAST_APPLIED_ANNOTATION, config);
    Ok(())
}

/// Bytes of `obj` as it would look once stamped. `obj` itself is untouched.
pub fn modified_configuration(obj: &ResourceObject) -> serde_json::Result<Vec<u8>> {
    let mut stamped = obj.clone();
    stamp_configuration(&mut stamped)?;
    stamped.to_json_bytes()
}

/// The configuration recorded by the previous apply, if any.
pub fn original_configuration(live: &ResourceObject) -> Option<Vec<u8>> {
    live.annotation(LAST_APPLIED_ANNOTATION).filter(|s| !s.is_empty()).map(|s| s.as_bytes().to_vec())
}
