//! # VaultSecret CRD
//!
//! The declarative resource: a list of Vault paths (optionally wildcarded),
//! a target Secret name/format, and authentication coordinates. Defaulting
//! and validation into an effective spec live in [`crate::validation`].

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "vault.microscaler.io",
    version = "v1",
    kind = "VaultSecret",
    namespaced,
    status = "VaultSecretStatus",
    shortname = "vs",
    printcolumn = r#"{"name":"LastUpdated", "type":"string", "jsonPath":".status.lastUpdated"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VaultSecretSpec {
    /// Vault server address; falls back to the operator default when unset
    #[serde(default)]
    pub addr: Option<String>,
    /// Separator joining path segments in env output (default "_")
    #[serde(default)]
    pub separator: Option<String>,
    /// Source paths to read; a trailing `*` crawls recursively
    pub paths: Vec<VaultSecretPath>,
    /// Name of the Secret to converge; defaults to the resource name
    #[serde(default)]
    pub target_secret_name: Option<String>,
    /// Output format: "env", "json" or "yaml" (default "env")
    #[serde(default)]
    pub target_format: Option<String>,
    /// Re-sync interval as a Kubernetes duration string (default "10m")
    #[serde(default)]
    pub reconcile_period: Option<String>,
    #[serde(default)]
    pub auth: VaultSecretAuth,
}

/// One declared source location.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultSecretPath {
    pub path: String,
    /// Optional key prefix applied when merging this path's secrets
    #[serde(default)]
    pub prefix: String,
}

/// Either a static token or service-account coordinates for a JWT exchange.
/// A non-empty token wins; otherwise unset fields fall back to operator
/// defaults during validation.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultSecretAuth {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub service_account_ref: Option<ServiceAccountRef>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountRef {
    #[serde(default)]
    pub name: Option<String>,
    /// Login endpoint, e.g. "auth/kubernetes/login"
    #[serde(default)]
    pub auth_path: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultSecretStatus {
    /// RFC3339 timestamp of the last successful sync
    #[serde(default)]
    pub last_updated: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let spec: VaultSecretSpec = serde_yaml::from_str(
            r"
paths:
  - path: secret/seeds/team1/*
",
        )
        .unwrap();

        assert!(spec.addr.is_none());
        assert_eq!(spec.paths.len(), 1);
        assert_eq!(spec.paths[0].path, "secret/seeds/team1/*");
        assert_eq!(spec.paths[0].prefix, "");
        assert!(spec.auth.token.is_none());
        assert!(spec.auth.service_account_ref.is_none());
    }

    #[test]
    fn test_spec_deserializes_full_form() {
        let spec: VaultSecretSpec = serde_yaml::from_str(
            r#"
addr: http://vault:8200
separator: "."
paths:
  - path: secret/app/config
    prefix: db_
targetSecretName: app-secrets
targetFormat: yaml
reconcilePeriod: 5m
auth:
  serviceAccountRef:
    name: app-sync
    authPath: auth/kubernetes/login
    role: app
"#,
        )
        .unwrap();

        assert_eq!(spec.addr.as_deref(), Some("http://vault:8200"));
        assert_eq!(spec.separator.as_deref(), Some("."));
        assert_eq!(spec.paths[0].prefix, "db_");
        assert_eq!(spec.target_format.as_deref(), Some("yaml"));
        let sa = spec.auth.service_account_ref.unwrap();
        assert_eq!(sa.role.as_deref(), Some("app"));
    }
}
