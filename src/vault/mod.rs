//! # Vault Pipeline
//!
//! Everything between a validated `VaultSecret` spec and the merged secret
//! document:
//!
//! - `auth` - token providers (static or service-account exchange) and the
//!   process-wide credential cache
//! - `client` - minimal Vault HTTP client (preflight, read, list, login)
//! - `paths` - wildcard expansion and the recursive crawl
//! - `reader` - the concurrent fetch pipeline
//! - `data` - the merge tree and its env/JSON/YAML renderings
//! - `error` - the pipeline error taxonomy

pub mod auth;
pub mod client;
pub mod data;
pub mod error;
pub mod paths;
pub mod reader;

pub use auth::{AuthCache, ServiceAccountAuth, StaticToken, TokenProvider};
pub use client::VaultClient;
pub use data::{DataNode, SecretBundle, SecretData};
pub use error::VaultError;
pub use paths::{resolve_paths, ResolvedPath};
pub use reader::{FetchedPath, Reader};
