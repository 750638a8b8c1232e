//! # Secret Data Tree
//!
//! Merges many flat key/value bundles into one hierarchical document and
//! renders it as env pairs, JSON or YAML.
//!
//! The tree is a tagged union: an inner node maps path segments to children,
//! a leaf holds one secret value. A given key in a given node is set at most
//! once across the whole merge; a second write is a hard conflict, never a
//! silent overwrite.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use super::error::VaultError;

/// Flat key/value content of one Vault path, as returned by a single read.
pub type SecretBundle = serde_json::Map<String, Value>;

/// Children of an inner node, keyed by path segment.
pub type Branch = BTreeMap<String, DataNode>;

/// One node of the merged document.
#[derive(Debug, Clone, PartialEq)]
pub enum DataNode {
    /// Inner node: path segment -> child.
    Branch(Branch),
    /// Leaf: one secret value (scalar or structured).
    Leaf(Value),
}

impl Default for DataNode {
    fn default() -> Self {
        DataNode::Branch(Branch::new())
    }
}

/// The merged document, rooted at an anonymous inner node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecretData(Branch);

impl SecretData {
    /// Merge one fetched bundle at its position relative to the declared path.
    ///
    /// `relative_path` is the fetched path with the declared base stripped;
    /// `prefix` is the declared key prefix. Empty `prefix + relative_path`
    /// merges the bundle straight into the root.
    pub fn merge_bundle(
        &mut self,
        relative_path: &str,
        prefix: &str,
        bundle: &SecretBundle,
    ) -> Result<(), VaultError> {
        let effective = format!("{prefix}{relative_path}");
        if effective.is_empty() {
            return insert_bundle(&mut self.0, bundle, "");
        }

        let mut segments: Vec<&str> = effective.split('/').collect();

        // A literal path with a prefix: the last prefix segment glues onto the
        // key names instead of becoming a node of its own, so "db_" yields
        // keys like "db_user" rather than a "db_" sub-node holding "user".
        let mut key_prefix = "";
        if relative_path.is_empty() && !prefix.is_empty() {
            key_prefix = segments.pop().unwrap_or("");
        }

        let mut node = &mut self.0;
        for segment in segments {
            node = child_branch(node, segment)?;
        }
        insert_bundle(node, bundle, key_prefix)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Structural view of the tree. `BTreeMap` iteration keeps the byte
    /// representation stable across runs.
    pub fn to_value(&self) -> Value {
        fn node_value(node: &DataNode) -> Value {
            match node {
                DataNode::Branch(children) => Value::Object(
                    children
                        .iter()
                        .map(|(name, child)| (name.clone(), node_value(child)))
                        .collect(),
                ),
                DataNode::Leaf(value) => value.clone(),
            }
        }

        Value::Object(
            self.0
                .iter()
                .map(|(name, child)| (name.clone(), node_value(child)))
                .collect(),
        )
    }

    pub fn json(&self) -> Result<Vec<u8>, VaultError> {
        Ok(serde_json::to_vec_pretty(&self.to_value())?)
    }

    pub fn yaml(&self) -> Result<Vec<u8>, VaultError> {
        Ok(serde_yaml::to_string(&self.to_value())?.into_bytes())
    }

    /// Flatten the tree into a single-level env mapping, joining path
    /// segments with `separator`. Keys containing characters outside
    /// `[A-Za-z0-9._-]` are dropped with a warning rather than failing the
    /// whole sync.
    pub fn env(&self, separator: &str) -> BTreeMap<String, String> {
        let mut flat = BTreeMap::new();
        for (name, child) in &self.0 {
            flatten_node(child, name, separator, &mut flat);
        }

        flat.retain(|key, _| {
            if valid_env_key(key) {
                true
            } else {
                warn!(key = %key, "dropping secret with invalid env key");
                false
            }
        });
        flat
    }

    /// `KEY=value` lines, sorted lexicographically by key.
    pub fn env_bytes(&self, separator: &str) -> Vec<u8> {
        let mut out = Vec::new();
        for (key, value) in self.env(separator) {
            out.extend_from_slice(format!("{key}={value}\n").as_bytes());
        }
        out
    }
}

/// Descend into (creating if absent) the child branch `name`.
/// A leaf already stored under `name` is a merge conflict.
fn child_branch<'a>(node: &'a mut Branch, name: &str) -> Result<&'a mut Branch, VaultError> {
    let child = node.entry(name.to_owned()).or_default();
    match child {
        DataNode::Branch(children) => Ok(children),
        DataNode::Leaf(_) => Err(VaultError::DuplicateKey(name.to_owned())),
    }
}

/// Add a bundle's keys (with `key_prefix` prepended) as leaves of `node`.
fn insert_bundle(
    node: &mut Branch,
    bundle: &SecretBundle,
    key_prefix: &str,
) -> Result<(), VaultError> {
    for (key, value) in bundle {
        let name = format!("{key_prefix}{key}");
        if node.contains_key(&name) {
            return Err(VaultError::DuplicateKey(name));
        }
        node.insert(name, DataNode::Leaf(value.clone()));
    }
    Ok(())
}

fn flatten_node(node: &DataNode, key: &str, separator: &str, out: &mut BTreeMap<String, String>) {
    match node {
        DataNode::Branch(children) => {
            for (name, child) in children {
                flatten_node(child, &format!("{key}{separator}{name}"), separator, out);
            }
        }
        DataNode::Leaf(value) => flatten_value(value, key, separator, out),
    }
}

/// Structured leaf values flatten the same way sub-trees do: objects by key,
/// arrays by index.
fn flatten_value(value: &Value, key: &str, separator: &str, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(fields) => {
            for (name, field) in fields {
                flatten_value(field, &format!("{key}{separator}{name}"), separator, out);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                flatten_value(item, &format!("{key}{separator}{index}"), separator, out);
            }
        }
        Value::String(text) => {
            out.insert(key.to_owned(), text.clone());
        }
        scalar => {
            out.insert(key.to_owned(), scalar.to_string());
        }
    }
}

/// Env keys must consist of alphanumeric characters, `-`, `_` or `.` to be
/// accepted as Secret data keys.
fn valid_env_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle(pairs: &[(&str, Value)]) -> SecretBundle {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_merge_literal_path_into_root() {
        let mut data = SecretData::default();
        data.merge_bundle("", "", &bundle(&[("a", json!("1")), ("b", json!("10"))]))
            .unwrap();

        let env = data.env("_");
        assert_eq!(env.get("a"), Some(&"1".to_string()));
        assert_eq!(env.get("b"), Some(&"10".to_string()));
    }

    #[test]
    fn test_merge_creates_sibling_nodes() {
        let mut data = SecretData::default();
        data.merge_bundle("project1/secret", "", &bundle(&[("user", json!("u1"))]))
            .unwrap();
        data.merge_bundle("project2/secret", "", &bundle(&[("user", json!("u2"))]))
            .unwrap();

        let value = data.to_value();
        assert_eq!(value["project1"]["secret"]["user"], json!("u1"));
        assert_eq!(value["project2"]["secret"]["user"], json!("u2"));
    }

    #[test]
    fn test_literal_path_prefix_glues_onto_keys() {
        let mut data = SecretData::default();
        data.merge_bundle("", "db_", &bundle(&[("user", json!("admin"))]))
            .unwrap();

        let env = data.env("_");
        assert_eq!(env.get("db_user"), Some(&"admin".to_string()));
        assert!(data.to_value().get("db_").is_none());
    }

    #[test]
    fn test_wildcard_prefix_becomes_node_segments() {
        let mut data = SecretData::default();
        data.merge_bundle("project1/secret", "team_", &bundle(&[("user", json!("u"))]))
            .unwrap();

        let value = data.to_value();
        assert_eq!(value["team_project1"]["secret"]["user"], json!("u"));
    }

    #[test]
    fn test_duplicate_key_at_same_node_is_conflict() {
        let mut data = SecretData::default();
        data.merge_bundle("", "", &bundle(&[("user", json!("one"))]))
            .unwrap();
        let err = data
            .merge_bundle("", "", &bundle(&[("user", json!("two"))]))
            .unwrap_err();
        assert!(matches!(err, VaultError::DuplicateKey(key) if key == "user"));
    }

    #[test]
    fn test_leaf_blocks_descent() {
        let mut data = SecretData::default();
        data.merge_bundle("", "", &bundle(&[("project1", json!("scalar"))]))
            .unwrap();
        let err = data
            .merge_bundle("project1/secret", "", &bundle(&[("user", json!("u"))]))
            .unwrap_err();
        assert!(matches!(err, VaultError::DuplicateKey(_)));
    }

    #[test]
    fn test_env_lines_sorted() {
        let mut data = SecretData::default();
        data.merge_bundle("", "", &bundle(&[("b", json!("10")), ("a", json!("1"))]))
            .unwrap();

        let rendered = String::from_utf8(data.env_bytes("_")).unwrap();
        assert_eq!(rendered, "a=1\nb=10\n");
    }

    #[test]
    fn test_env_invalid_keys_dropped() {
        let mut data = SecretData::default();
        data.merge_bundle(
            "",
            "",
            &bundle(&[("good-key", json!("ok")), ("bad key!", json!("skip"))]),
        )
        .unwrap();

        let env = data.env("_");
        assert_eq!(env.len(), 1);
        assert!(env.contains_key("good-key"));
    }

    #[test]
    fn test_structured_values_flatten() {
        let mut data = SecretData::default();
        data.merge_bundle(
            "",
            "",
            &bundle(&[(
                "db",
                json!({"host": "localhost", "ports": [5432, 5433], "tls": true}),
            )]),
        )
        .unwrap();

        let env = data.env("_");
        assert_eq!(env.get("db_host"), Some(&"localhost".to_string()));
        assert_eq!(env.get("db_ports_0"), Some(&"5432".to_string()));
        assert_eq!(env.get("db_ports_1"), Some(&"5433".to_string()));
        assert_eq!(env.get("db_tls"), Some(&"true".to_string()));
    }

    #[test]
    fn test_env_round_trip() {
        let mut data = SecretData::default();
        data.merge_bundle("app/config", "", &bundle(&[("user", json!("admin"))]))
            .unwrap();
        data.merge_bundle("", "", &bundle(&[("top", json!("level"))]))
            .unwrap();

        let flattened = data.env("_");
        let rendered = String::from_utf8(data.env_bytes("_")).unwrap();
        let parsed: BTreeMap<String, String> = rendered
            .lines()
            .map(|line| {
                let (k, v) = line.split_once('=').unwrap();
                (k.to_string(), v.to_string())
            })
            .collect();
        assert_eq!(parsed, flattened);
    }

    #[test]
    fn test_json_yaml_stable_shape() {
        let mut data = SecretData::default();
        data.merge_bundle("app/secret", "", &bundle(&[("token", json!("t"))]))
            .unwrap();

        let parsed: Value = serde_json::from_slice(&data.json().unwrap()).unwrap();
        assert_eq!(parsed["app"]["secret"]["token"], json!("t"));

        let yaml: Value = serde_yaml::from_slice(&data.yaml().unwrap()).unwrap();
        assert_eq!(yaml["app"]["secret"]["token"], json!("t"));
    }
}
