//! # Path Resolution
//!
//! Expands declared paths (literal or trailing-wildcard) into the concrete
//! set of Vault locations they cover. Wildcards crawl the engine recursively
//! with bounded parallelism; directories are listing entries ending in `/`.

use futures::future::BoxFuture;
use futures::{stream, StreamExt, TryStreamExt};
use tracing::debug;

use super::client::{add_kv_prefix, VaultClient};
use super::error::VaultError;
use crate::crd::VaultSecretPath;

/// Concurrent crawl branches per listing level.
const CRAWL_CONCURRENCY: usize = 10;

/// One concrete secret location discovered from a declared path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub absolute_path: String,
    /// The declared path with any trailing `*` stripped; positions in the
    /// merge tree are computed relative to this.
    pub base_path: String,
    pub prefix: String,
}

impl ResolvedPath {
    pub fn relative_path(&self) -> &str {
        self.absolute_path
            .strip_prefix(&self.base_path)
            .unwrap_or(&self.absolute_path)
    }
}

/// Expand every declared path. Literal paths resolve to themselves; wildcard
/// paths crawl the engine below their root.
pub async fn resolve_paths(
    client: &VaultClient,
    declared: &[VaultSecretPath],
) -> Result<Vec<ResolvedPath>, VaultError> {
    let mut resolved = Vec::new();
    for spec in declared {
        // "my/path" and "/my/path" must resolve identically; a leading slash
        // otherwise turns into confusing 403s.
        let path = spec.path.strip_prefix('/').unwrap_or(&spec.path);

        if let Some(root) = path.strip_suffix('*') {
            let leaves = crawl(client, root.to_string()).await?;
            debug!(root = %root, leaves = leaves.len(), "expanded wildcard path");
            for absolute_path in leaves {
                resolved.push(ResolvedPath {
                    absolute_path,
                    base_path: root.to_string(),
                    prefix: spec.prefix.clone(),
                });
            }
        } else {
            resolved.push(ResolvedPath {
                absolute_path: path.to_string(),
                base_path: path.to_string(),
                prefix: spec.prefix.clone(),
            });
        }
    }
    Ok(resolved)
}

/// Recursively collect every leaf path under `root`. Each step consumes at
/// least one path segment, so the recursion terminates; the first hard error
/// cancels the outstanding branches of that level.
fn crawl(client: &VaultClient, root: String) -> BoxFuture<'_, Result<Vec<String>, VaultError>> {
    Box::pin(async move {
        let (mount, version) = client.mount_info(&root).await?;
        let api_path = if version == 2 {
            add_kv_prefix(&root, &mount, "metadata")
        } else {
            root.clone()
        };

        let keys = match client.list(&api_path).await {
            Ok(keys) if keys.is_empty() => return Err(VaultError::EngineUnavailable(root)),
            Ok(keys) => keys,
            Err(VaultError::NotFound(_)) => return Err(VaultError::EngineUnavailable(root)),
            Err(e) => return Err(e),
        };

        let branches = stream::iter(keys.into_iter().map(|key| {
            let full_path = format!("{root}{key}");
            async move {
                if key.ends_with('/') {
                    crawl(client, full_path).await
                } else {
                    Ok(vec![full_path])
                }
            }
        }))
        .buffer_unordered(CRAWL_CONCURRENCY)
        .try_collect::<Vec<Vec<String>>>()
        .await?;

        Ok(branches.into_iter().flatten().collect())
    })
}
