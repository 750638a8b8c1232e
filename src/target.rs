//! # Target Secret Construction
//!
//! Builds the Kubernetes `Secret` a `VaultSecret` resource owns:
//!
//! - `env` format writes one Secret data entry per flattened key
//! - `json`/`yaml` formats write a single `secrets.json`/`secrets.yaml` file
//! - every managed Secret carries `owner` and `managed-by` labels plus a
//!   Vault UI URL annotation so operators can jump from the Secret to the
//!   source paths

use std::collections::{BTreeMap, HashMap};

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::Resource;
use sha2::{Digest, Sha256};

use crate::crd::{VaultSecret, VaultSecretPath};
use crate::validation::{EffectiveSpec, TargetFormat};
use crate::vault::{SecretData, VaultError};

pub const MANAGED_BY: &str = "vault-secret-operator";
pub const UI_URLS_ANNOTATION: &str = "vault-secret-operator/vault-ui-urls";

const MAX_LABEL_LEN: usize = 63;

/// Label value identifying the owning `VaultSecret`. Label values are capped
/// at 63 characters, so longer names are replaced by a truncated sha256 hex
/// digest to stay unique.
fn owner_label(name: &str) -> String {
    if name.len() <= MAX_LABEL_LEN {
        return name.to_string();
    }
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..MAX_LABEL_LEN].to_string()
}

/// Vault UI links for the configured paths, comma-joined in spec order.
///
/// KV1 paths use the `show` view. KV2 literal paths use the `kv` view, which
/// expects the path after the mount percent-encoded as a single segment. KV2
/// wildcard paths link to the `kv/list` view of the crawled folder. Engines
/// whose version was never observed (no leaf fetched under the path) are
/// linked as KV2.
pub fn vault_ui_urls(
    ui_base: &str,
    paths: &[VaultSecretPath],
    versions: &HashMap<String, u8>,
) -> String {
    let ui_base = ui_base.trim_end_matches('/');
    let urls: Vec<String> = paths
        .iter()
        .map(|p| {
            let path = p.path.trim_start_matches('/');
            let wildcard = path.ends_with('*');
            let base = path.strip_suffix('*').unwrap_or(path);
            let version = versions.get(base).copied().unwrap_or(2);

            let (mount, rest) = match base.split_once('/') {
                Some((mount, rest)) => (mount, rest),
                None => (base, ""),
            };

            match (version, wildcard) {
                (1, _) => format!("{ui_base}/vault/secrets/{mount}/show/{rest}"),
                (_, true) => format!("{ui_base}/vault/secrets/{mount}/kv/list/{rest}"),
                (_, false) => {
                    let encoded = rest.replace('/', "%2F");
                    format!("{ui_base}/vault/secrets/{mount}/kv/{encoded}")
                }
            }
        })
        .collect();
    urls.join(",")
}

/// Fold the live Secret's annotations into the desired set. Keys this
/// operator manages keep their desired value; keys added by other tools
/// survive the sync untouched.
pub fn merge_annotations(
    desired: Option<BTreeMap<String, String>>,
    existing: Option<&BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    let Some(existing) = existing else {
        return desired;
    };
    let mut merged = desired.unwrap_or_default();
    for (key, value) in existing {
        merged.entry(key.clone()).or_insert_with(|| value.clone());
    }
    (!merged.is_empty()).then_some(merged)
}

fn env_contents(data: &SecretData, separator: &str) -> BTreeMap<String, ByteString> {
    data.env(separator)
        .into_iter()
        .map(|(key, value)| (key, ByteString(value.into_bytes())))
        .collect()
}

fn file_contents(data: &SecretData, format: TargetFormat) -> Result<BTreeMap<String, ByteString>, VaultError> {
    let (filename, bytes) = match format {
        TargetFormat::Json => ("secrets.json", data.json()?),
        TargetFormat::Yaml => ("secrets.yaml", data.yaml()?),
        TargetFormat::Env => unreachable!("env format has no file representation"),
    };
    Ok(BTreeMap::from([(filename.to_string(), ByteString(bytes))]))
}

/// Build the target Secret for one reconciled resource. The Secret is owned
/// by the `VaultSecret` so deleting the resource garbage-collects it.
pub fn build_secret(
    resource: &VaultSecret,
    spec: &EffectiveSpec,
    data: &SecretData,
    versions: &HashMap<String, u8>,
    ui_base: &str,
) -> Result<Secret, VaultError> {
    let contents = match spec.target_format {
        TargetFormat::Env => env_contents(data, &spec.separator),
        TargetFormat::Json | TargetFormat::Yaml => file_contents(data, spec.target_format)?,
    };

    let name = resource.metadata.name.as_deref().unwrap_or_default();
    let labels = BTreeMap::from([
        ("owner".to_string(), owner_label(name)),
        ("managed-by".to_string(), MANAGED_BY.to_string()),
    ]);
    let mut annotations = BTreeMap::new();
    if !spec.paths.is_empty() {
        annotations.insert(
            UI_URLS_ANNOTATION.to_string(),
            vault_ui_urls(ui_base, &spec.paths, versions),
        );
    }

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(spec.target_secret_name.clone()),
            namespace: resource.metadata.namespace.clone(),
            labels: Some(labels),
            // An empty map would diff against the None the API server stores.
            annotations: (!annotations.is_empty()).then_some(annotations),
            owner_references: resource.controller_owner_ref(&()).map(|or| vec![or]),
            ..ObjectMeta::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(contents),
        ..Secret::default()
    })
}
