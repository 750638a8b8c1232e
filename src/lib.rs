//! Vault Secret Operator Library
//!
//! Core functionality for syncing HashiCorp Vault secrets into Kubernetes
//! `Secret` resources. Unit tests live in the module files; the end-to-end
//! pipeline tests against a mock Vault server live under `tests/`.

pub mod config;
pub mod crd;
pub mod metrics;
pub mod reconciler;
pub mod server;
pub mod target;
pub mod validation;
pub mod vault;

pub use config::AppConfig;
pub use crd::{VaultSecret, VaultSecretSpec};
pub use reconciler::Reconciler;
