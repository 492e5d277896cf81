//! Cluster configuration, error map and the collection-id cache.
//!
//! The configuration is opaque to the session except for its revision, the
//! node list and (for push filtering) the bucket name. Everything else is
//! passed through to higher layers untouched.

use std::collections::HashMap;

use serde::Deserialize;

/// Cluster topology as served by the data service.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClusterConfig {
    /// Monotonic revision; the cache only accepts strictly newer ones.
    #[serde(default)]
    pub rev: u64,
    /// Bucket name, present on bucket-scoped configurations only.
    #[serde(default, rename = "name")]
    pub bucket: Option<String>,
    #[serde(default, rename = "nodesExt")]
    pub nodes: Vec<ClusterNode>,
}

impl ClusterConfig {
    /// Synthetic configuration for servers that refuse GCCCP: a single
    /// node at the connected endpoint, revision zero.
    pub fn blank(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            rev: 0,
            bucket: None,
            nodes: vec![ClusterNode {
                hostname: hostname.into(),
                this_node: true,
                services: ServicePorts {
                    kv: Some(port),
                    ..ServicePorts::default()
                },
            }],
        }
    }
}

/// One entry of the `nodesExt` list.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClusterNode {
    /// May be empty on the wire; the session fills it with the connected
    /// endpoint address when `this_node` is set.
    #[serde(default)]
    pub hostname: String,
    #[serde(default, rename = "thisNode")]
    pub this_node: bool,
    #[serde(default)]
    pub services: ServicePorts,
}

/// Service port map of a node.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServicePorts {
    #[serde(default)]
    pub kv: Option<u16>,
    #[serde(default, rename = "kvSSL")]
    pub kv_tls: Option<u16>,
    #[serde(default)]
    pub mgmt: Option<u16>,
    #[serde(default, rename = "mgmtSSL")]
    pub mgmt_tls: Option<u16>,
}

/// Error map returned by GET-ERROR-MAP when xerror is negotiated.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorMap {
    #[serde(default)]
    pub version: u16,
    #[serde(default)]
    pub revision: u16,
    #[serde(default)]
    pub errors: HashMap<String, ErrorMapEntry>,
}

/// One error-map record, keyed by the hex status code.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorMapEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "desc")]
    pub description: String,
    #[serde(default)]
    pub attrs: Vec<String>,
}

/// Cache mapping fully-qualified collection paths (`scope.collection`) to
/// their numeric ids. Pre-seeded with the default collection.
#[derive(Debug, Clone)]
pub struct CollectionCache {
    ids: HashMap<String, u32>,
}

impl CollectionCache {
    pub fn new() -> Self {
        let mut ids = HashMap::new();
        ids.insert("_default._default".to_owned(), 0);
        Self { ids }
    }

    /// Look up a cached collection id. Empty paths are never cached.
    pub fn get(&self, path: &str) -> Option<u32> {
        if path.is_empty() {
            return None;
        }
        self.ids.get(path).copied()
    }

    /// Cache or overwrite a collection id. Empty paths are rejected.
    pub fn update(&mut self, path: &str, id: u32) {
        if path.is_empty() {
            return;
        }
        self.ids.insert(path.to_owned(), id);
    }

    /// Drop everything and restore the default-collection seed.
    pub fn reset(&mut self) {
        self.ids.clear();
        self.ids.insert("_default._default".to_owned(), 0);
    }
}

impl Default for CollectionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_nodes_ext() {
        let raw = br#"{
            "rev": 42,
            "name": "travel-sample",
            "nodesExt": [
                {"hostname": "10.0.0.1", "services": {"kv": 11210, "mgmt": 8091}},
                {"hostname": "", "thisNode": true, "services": {"kv": 11210}}
            ]
        }"#;
        let config: ClusterConfig = serde_json::from_slice(raw).unwrap();
        assert_eq!(config.rev, 42);
        assert_eq!(config.bucket.as_deref(), Some("travel-sample"));
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[0].services.kv, Some(11210));
        assert!(!config.nodes[0].this_node);
        assert!(config.nodes[1].this_node);
        assert!(config.nodes[1].hostname.is_empty());
    }

    #[test]
    fn cluster_level_config_has_no_bucket() {
        let config: ClusterConfig = serde_json::from_slice(br#"{"rev": 1}"#).unwrap();
        assert!(config.bucket.is_none());
    }

    #[test]
    fn blank_config_points_at_endpoint() {
        let config = ClusterConfig::blank("192.168.1.10", 11210);
        assert_eq!(config.rev, 0);
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.nodes[0].hostname, "192.168.1.10");
        assert!(config.nodes[0].this_node);
        assert_eq!(config.nodes[0].services.kv, Some(11210));
    }

    #[test]
    fn collection_cache_is_seeded() {
        let cache = CollectionCache::new();
        assert_eq!(cache.get("_default._default"), Some(0));
        assert_eq!(cache.get("inventory.airline"), None);
    }

    #[test]
    fn collection_cache_update_and_reset() {
        let mut cache = CollectionCache::new();
        cache.update("inventory.airline", 8);
        assert_eq!(cache.get("inventory.airline"), Some(8));

        cache.update("inventory.airline", 9);
        assert_eq!(cache.get("inventory.airline"), Some(9));

        cache.reset();
        assert_eq!(cache.get("inventory.airline"), None);
        assert_eq!(cache.get("_default._default"), Some(0));
    }

    #[test]
    fn collection_cache_rejects_empty_paths() {
        let mut cache = CollectionCache::new();
        cache.update("", 3);
        assert_eq!(cache.get(""), None);
    }

    #[test]
    fn error_map_entries() {
        let raw = br#"{
            "version": 1,
            "revision": 4,
            "errors": {
                "1": {"name": "KEY_ENOENT", "desc": "key not found", "attrs": ["item-only"]}
            }
        }"#;
        let errmap: ErrorMap = serde_json::from_slice(raw).unwrap();
        assert_eq!(errmap.revision, 4);
        assert_eq!(errmap.errors["1"].name, "KEY_ENOENT");
        assert_eq!(errmap.errors["1"].attrs, vec!["item-only"]);
    }
}
