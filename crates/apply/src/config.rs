//! Apply configuration with `KEEL_*` environment overrides.

use serde::{Deserialize, Serialize};

use crate::decode::DecodeLimits;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyConfig {
    /// Delegate every object of the batch to server-side apply.
    pub server_side: bool,
    /// Field manager recorded for server-side apply.
    pub field_manager: String,
    /// Namespace given to namespaced objects that do not declare one.
    pub default_namespace: String,
    pub limits: DecodeLimits,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            server_side: false,
            field_manager: "keel".to_string(),
            default_namespace: "default".to_string(),
            limits: DecodeLimits::default(),
        }
    }
}

impl ApplyConfig {
    /// Defaults overridden by `KEEL_SERVER_SIDE`, `KEEL_FIELD_MANAGER`,
    /// `KEEL_DEFAULT_NAMESPACE`, `KEEL_MAX_YAML_BYTES` and `KEEL_MAX_YAML_NODES`.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = get("KEEL_SERVER_SIDE") {
            cfg.server_side = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = get("KEEL_FIELD_MANAGER").filter(|s| !s.is_empty()) {
            cfg.field_manager = v;
        }
        if let Some(v) = get("KEEL_DEFAULT_NAMESPACE").filter(|s| !s.is_empty()) {
            cfg.default_namespace = v;
        }
        if let Some(n) = get("KEEL_MAX_YAML_BYTES").and_then(|s| s.parse::<usize>().ok()) {
            cfg.limits.max_bytes = n;
        }
        if let Some(n) = get("KEEL_MAX_YAML_NODES").and_then(|s| s.parse::<usize>().ok()) {
            cfg.limits.max_nodes = n;
        }
        cfg
    }
}
