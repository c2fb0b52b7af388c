//! Three-way patch computation over (original, modified, current).
//!
//! With no field metadata the result is an RFC 7386 JSON merge patch. With
//! metadata from the type registry, merge-strategy lists are diffed item by
//! item and the strategic merge directives are emitted.

use serde_json::{Map, Value as Json};

use crate::registry::FieldMeta;

const PATCH_DIRECTIVE: &str = "$patch";
const RETAIN_KEYS_DIRECTIVE: &str = "$retainKeys";
const DELETE_FROM_PRIMITIVE_LIST: &str = "$deleteFromPrimitiveList";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("list \"{field}\" contains an item without merge key \"{key}\"")]
    MissingMergeKey { field: String, key: String },
    #[error("list \"{field}\" must contain only maps")]
    NonMapItem { field: String },
    #[error("list \"{field}\" must contain only scalars")]
    NonScalarItem { field: String },
}

/// Compute the patch taking `current` to `modified`, deleting what `original`
/// had and `modified` dropped. Deletions are only emitted for fields `current`
/// still carries.
pub(crate) fn three_way(original: &Map<String, Json>, modified: &Map<String, Json>, current: &Map<String, Json>, meta: Option<&FieldMeta>) -> Result<Map<String, Json>, MergeError> {
    let empty = Map::new();
    let mut patch = Map::new();

    for (key, m) in modified {
        let child = meta.and_then(|x| x.child(key));
        let Some(c) = current.get(key) else {
            patch.insert(key.clone(), m.clone());
            continue;
        };
        match (m, c, child.filter(|x| x.merges_lists())) {
            (Json::Object(mm), Json::Object(cm), _) => {
                let om = original.get(key).and_then(Json::as_object).unwrap_or(&empty);
                let sub = three_way(om, mm, cm, child)?;
                if !sub.is_empty() {
                    patch.insert(key.clone(), Json::Object(sub));
                }
            }
            (Json::Array(ma), Json::Array(ca), Some(list_meta)) => {
                let oa = original.get(key).and_then(Json::as_array).map(Vec::as_slice).unwrap_or(&[]);
                match list_meta.merge_key() {
                    Some(merge_key) => {
                        let items = diff_keyed_list(key, merge_key, oa, ma, ca, list_meta)?;
                        if !items.is_empty() {
                            patch.insert(key.clone(), Json::Array(items));
                        }
                    }
                    None => diff_set_list(key, oa, ma, ca, &mut patch)?,
                }
            }
            (m, c, _) => {
                if m != c {
                    patch.insert(key.clone(), m.clone());
                }
            }
        }
    }

    for key in original.keys() {
        if !modified.contains_key(key) && current.contains_key(key) {
            patch.insert(key.clone(), Json::Null);
        }
    }

    if meta.map(FieldMeta::retains_keys).unwrap_or(false) && !patch.is_empty() {
        let keys: Vec<Json> = modified.keys().map(|k| Json::String(k.clone())).collect();
        patch.insert(RETAIN_KEYS_DIRECTIVE.to_string(), Json::Array(keys));
    }
    Ok(patch)
}

fn diff_keyed_list(field: &str, merge_key: &str, original: &[Json], modified: &[Json], current: &[Json], item_meta: &FieldMeta) -> Result<Vec<Json>, MergeError> {
    let empty = Map::new();
    let key_of = |item: &Json| -> Result<Json, MergeError> {
        let map = item.as_object().ok_or_else(|| MergeError::NonMapItem { field: field.to_string() })?;
        map.get(merge_key).cloned().ok_or_else(|| MergeError::MissingMergeKey { field: field.to_string(), key: merge_key.to_string() })
    };
    let mut items = Vec::new();
    for mi in modified {
        let k = key_of(mi)?;
        let Some(mm) = mi.as_object() else { continue };
        match find_item(current, merge_key, &k) {
            None => items.push(mi.clone()),
            Some(cm) => {
                let om = find_item(original, merge_key, &k).unwrap_or(&empty);
                let mut sub = three_way(om, mm, cm, Some(item_meta))?;
                if !sub.is_empty() {
                    sub.insert(merge_key.to_string(), k);
                    items.push(Json::Object(sub));
                }
            }
        }
    }

    for oi in original {
        let k = key_of(oi)?;
        if find_item(modified, merge_key, &k).is_none() && find_item(current, merge_key, &k).is_some() {
            let mut del = Map::new();
            del.insert(PATCH_DIRECTIVE.to_string(), Json::String("delete".into()));
            del.insert(merge_key.to_string(), k);
            items.push(Json::Object(del));
        }
    }
    Ok(items)
}

fn find_item<'a>(list: &'a [Json], merge_key: &str, k: &Json) -> Option<&'a Map<String, Json>> {
    list.iter().find(|i| i.get(merge_key) == Some(k)).and_then(Json::as_object)
}

fn diff_set_list(field: &str, original: &[Json], modified: &[Json], current: &[Json], patch: &mut Map<String, Json>) -> Result<(), MergeError> {
    if modified.iter().chain(original).chain(current).any(|v| v.is_object() || v.is_array()) {
        return Err(MergeError::NonScalarItem { field: field.to_string() });
    }
    let additions: Vec<Json> = modified.iter().filter(|v| !current.contains(v)).cloned().collect();
    let deletions: Vec<Json> = original.iter().filter(|v| !modified.contains(v) && current.contains(v)).cloned().collect();
    if !additions.is_empty() {
        patch.insert(field.to_string(), Json::Array(additions));
    }
    if !deletions.is_empty() {
        patch.insert(format!("{}/{}", DELETE_FROM_PRIMITIVE_LIST, field), Json::Array(deletions));
    }
    Ok(())
}
