use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::Gvk;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ObjectError {
    #[error("object is not a mapping")]
    NotAMapping,
    #[error("object missing {0}")]
    MissingField(&'static str),
}

/// A single API resource instance kept as a generic JSON tree.
///
/// The set of kinds is open-ended, so only the handful of fields the apply
/// engine needs get typed accessors; everything else stays opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Json", into = "Json")]
pub struct ResourceObject(Json);

impl ResourceObject {
    /// Wrap a JSON value. It must be a mapping with non-empty `apiVersion` and `kind`.
    pub fn from_value(v: Json) -> Result<Self, ObjectError> {
        let obj = v.as_object().ok_or(ObjectError::NotAMapping)?;
        if str_field(obj, "apiVersion").is_empty() {
            return Err(ObjectError::MissingField("apiVersion"));
        }
        if str_field(obj, "kind").is_empty() {
            return Err(ObjectError::MissingField("kind"));
        }
        Ok(Self(v))
    }

    pub fn as_value(&self) -> &Json {
        &self.0
    }

    pub fn into_value(self) -> Json {
        self.0
    }

    pub fn api_version(&self) -> &str {
        self.root().map(|o| str_field(o, "apiVersion")).unwrap_or_default()
    }

    pub fn kind(&self) -> &str {
        self.root().map(|o| str_field(o, "kind")).unwrap_or_default()
    }

    pub fn gvk(&self) -> Gvk {
        Gvk::from_api_version(self.api_version(), self.kind())
    }

    pub fn name(&self) -> &str {
        self.meta_str("name")
    }

    pub fn generate_name(&self) -> &str {
        self.meta_str("generateName")
    }

    /// Empty string when unset.
    pub fn namespace(&self) -> &str {
        self.meta_str("namespace")
    }

    pub fn set_namespace(&mut self, ns: &str) {
        if let Some(meta) = self.metadata_mut() {
            meta.insert("namespace".into(), Json::String(ns.to_string()));
        }
    }

    pub fn annotations(&self) -> Option<&Map<String, Json>> {
        self.metadata().and_then(|m| m.get("annotations")).and_then(Json::as_object)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations().and_then(|a| a.get(key)).and_then(Json::as_str)
    }

    pub fn set_annotation(&mut self, key: &str, value: String) {
        let Some(meta) = self.metadata_mut() else { return };
        let annos = meta.entry("annotations").or_insert_with(|| Json::Object(Map::new()));
        if !annos.is_object() {
            *annos = Json::Object(Map::new());
        }
        if let Some(a) = annos.as_object_mut() {
            a.insert(key.to_string(), Json::String(value));
        }
    }

    /// Remove one annotation; an annotations map left empty is dropped.
    pub fn remove_annotation(&mut self, key: &str) -> Option<String> {
        let meta = self.0.get_mut("metadata")?.as_object_mut()?;
        let annos = meta.get_mut("annotations")?.as_object_mut()?;
        let removed = annos.remove(key);
        if annos.is_empty() {
            meta.remove("annotations");
        }
        removed.and_then(|v| v.as_str().map(|s| s.to_string()))
    }

    pub fn clear_managed_fields(&mut self) {
        if let Some(meta) = self.0.get_mut("metadata").and_then(Json::as_object_mut) {
            meta.remove("managedFields");
        }
    }

    /// Canonical byte form: compact JSON, map keys sorted.
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.0)
    }

    /// `configmap/foo`, as kubectl prints it.
    pub fn display_ref(&self) -> String {
        format!("{}/{}", self.kind().to_lowercase(), self.name())
    }

    fn root(&self) -> Option<&Map<String, Json>> {
        self.0.as_object()
    }

    fn metadata(&self) -> Option<&Map<String, Json>> {
        self.0.get("metadata").and_then(Json::as_object)
    }

    fn metadata_mut(&mut self) -> Option<&mut Map<String, Json>> {
        let root = self.0.as_object_mut()?;
        let meta = root.entry("metadata").or_insert_with(|| Json::Object(Map::new()));
        if !meta.is_object() {
            *meta = Json::Object(Map::new());
        }
        meta.as_object_mut()
    }

    fn meta_str(&self, key: &str) -> &str {
        self.metadata().map(|m| str_field(m, key)).unwrap_or_default()
    }
}

fn str_field<'a>(obj: &'a Map<String, Json>, key: &str) -> &'a str {
    obj.get(key).and_then(Json::as_str).unwrap_or_default()
}

impl TryFrom<Json> for ResourceObject {
    type Error = ObjectError;

    fn try_from(v: Json) -> Result<Self, Self::Error> {
        Self::from_value(v)
    }
}

impl From<ResourceObject> for Json {
    fn from(o: ResourceObject) -> Self {
        o.0
    }
}
