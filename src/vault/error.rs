//! # Vault Errors
//!
//! Error taxonomy for the Vault pipeline.
//!
//! Two of these are soft: `NotFound` and `Empty` are absorbed by the fetch
//! stage (skip the path, keep the sync going). Everything else aborts the
//! current reconciliation pass and is retried on the next scheduled period.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    /// Path does not exist in Vault. Logged and skipped by the fetch stage.
    #[error("path doesn't exist: {0}")]
    NotFound(String),

    /// Read succeeded but carried no payload. Skipped silently.
    #[error("path is empty: {0}")]
    Empty(String),

    /// The mount reports a KV engine version other than 1 or 2.
    #[error("unsupported secret engine version {version:?} for path {path:?}")]
    UnsupportedVersion { path: String, version: String },

    /// The crawl root of a wildcard path could not be listed (404 or empty
    /// listing). An unreachable engine is an error, not an empty result.
    #[error("no value found in path: {0}")]
    EngineUnavailable(String),

    /// The JWT source (projected token file or TokenRequest API) failed.
    #[error("could not obtain JWT: {0}")]
    IdentityUnavailable(String),

    /// Vault rejected the JWT login.
    #[error("failed to login to Vault: {0}")]
    ExchangeFailed(String),

    /// A response was received but its token/TTL/data could not be parsed.
    #[error("malformed Vault response: {0}")]
    MalformedResponse(String),

    /// A key would be written twice at the same node of the merge tree.
    /// Overlapping declared paths are a user error, never a silent overwrite.
    #[error("override detected: key {0:?} is already used")]
    DuplicateKey(String),

    /// Transport-level failure talking to Vault.
    #[error("Vault request for {path:?} failed: {source}")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-2xx response outside the classified cases above.
    #[error("Vault returned status {status} for {path:?}")]
    Api { path: String, status: u16 },

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("YAML serialization failed: {0}")]
    SerializeYaml(#[from] serde_yaml::Error),
}

impl VaultError {
    /// Soft errors never abort a sync on their own.
    pub fn is_soft(&self) -> bool {
        matches!(self, VaultError::NotFound(_) | VaultError::Empty(_))
    }
}
