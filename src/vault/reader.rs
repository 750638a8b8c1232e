//! # Vault Reader
//!
//! Pipeline orchestration for one resource: resolve declared paths, fetch
//! every leaf with bounded parallelism, merge the bundles into one
//! conflict-checked tree, render on demand.
//!
//! The fetch fan-out absorbs soft failures (missing or empty paths are
//! skipped) and aborts on the first hard one; dropping the outstanding
//! futures cancels the work still in flight.

use std::collections::HashMap;

use futures::{stream, StreamExt, TryStreamExt};
use tracing::warn;

use super::auth::TokenProvider;
use super::client::VaultClient;
use super::data::{SecretBundle, SecretData};
use super::error::VaultError;
use super::paths::{resolve_paths, ResolvedPath};
use crate::config::AppConfig;
use crate::crd::VaultSecretPath;
use crate::validation::{EffectiveSpec, TargetFormat};

/// Leaf reads in flight per reconciliation.
const FETCH_CONCURRENCY: usize = 20;

/// One successfully read leaf, with the engine version the read discovered.
#[derive(Debug, Clone)]
pub struct FetchedPath {
    pub resolved: ResolvedPath,
    pub bundle: SecretBundle,
    pub engine_version: u8,
}

pub struct Reader {
    client: VaultClient,
    paths: Vec<VaultSecretPath>,
    separator: String,
    fetched: Vec<FetchedPath>,
    data: SecretData,
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

impl Reader {
    pub fn new(client: VaultClient, paths: Vec<VaultSecretPath>, separator: String) -> Self {
        Self {
            client,
            paths,
            separator,
            fetched: Vec::new(),
            data: SecretData::default(),
        }
    }

    /// Build a reader for a validated resource: obtain a token from the
    /// provider and point a client at the resource's Vault address.
    pub async fn connect(
        provider: &dyn TokenProvider,
        spec: &EffectiveSpec,
        config: &AppConfig,
    ) -> Result<Self, VaultError> {
        let token = provider.token().await?;
        let client = VaultClient::new(&spec.addr, config.client_timeout, config.client_max_retries)?
            .with_token(token);
        Ok(Self::new(client, spec.paths.clone(), spec.separator.clone()))
    }

    /// Run the fetch pipeline: resolve, read, merge.
    pub async fn read_data(&mut self) -> Result<(), VaultError> {
        let resolved = resolve_paths(&self.client, &self.paths).await?;
        self.fetched = self.fetch(resolved).await?;
        self.data = self.build_tree()?;
        Ok(())
    }

    pub fn data(&self) -> &SecretData {
        &self.data
    }

    /// KV engine version per declared base path, for annotation building.
    /// All leaves of one declared path share a mount, so the first one wins.
    pub fn path_versions(&self) -> HashMap<String, u8> {
        let mut versions = HashMap::new();
        for fetched in &self.fetched {
            versions
                .entry(fetched.resolved.base_path.clone())
                .or_insert(fetched.engine_version);
        }
        versions
    }

    /// Render the merged document for the one-shot reader mode.
    pub fn write_data(&self, format: TargetFormat) -> Result<Vec<u8>, VaultError> {
        match format {
            TargetFormat::Json => {
                let mut bytes = self.data.json()?;
                bytes.push(b'\n');
                Ok(bytes)
            }
            TargetFormat::Yaml => self.data.yaml(),
            TargetFormat::Env => Ok(self.data.env_bytes(&self.separator)),
        }
    }

    async fn fetch(&self, resolved: Vec<ResolvedPath>) -> Result<Vec<FetchedPath>, VaultError> {
        let client = &self.client;
        let outcomes = stream::iter(resolved.into_iter().map(|resolved| async move {
            match client.read(&resolved.absolute_path).await {
                Ok((bundle, engine_version)) => Ok(Some(FetchedPath {
                    resolved,
                    bundle,
                    engine_version,
                })),
                // A broken path degrades to a skip; the rest of the sync
                // proceeds rather than crashing the reconciliation loop.
                Err(VaultError::NotFound(path)) => {
                    warn!(path = %path, "skipping missing Vault path");
                    Ok(None)
                }
                Err(VaultError::Empty(_)) => Ok(None),
                Err(e) => Err(e),
            }
        }))
        .buffer_unordered(FETCH_CONCURRENCY)
        .try_collect::<Vec<Option<FetchedPath>>>()
        .await?;

        Ok(outcomes.into_iter().flatten().collect())
    }

    fn build_tree(&self) -> Result<SecretData, VaultError> {
        let mut data = SecretData::default();
        for fetched in &self.fetched {
            data.merge_bundle(
                fetched.resolved.relative_path(),
                &fetched.resolved.prefix,
                &fetched.bundle,
            )?;
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fetched(absolute: &str, base: &str, prefix: &str, pairs: &[(&str, &str)]) -> FetchedPath {
        FetchedPath {
            resolved: ResolvedPath {
                absolute_path: absolute.to_string(),
                base_path: base.to_string(),
                prefix: prefix.to_string(),
            },
            bundle: pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), json!(v)))
                .collect(),
            engine_version: 2,
        }
    }

    fn reader_with(fetched_paths: Vec<FetchedPath>) -> Reader {
        let client = VaultClient::new(
            "http://127.0.0.1:8200",
            std::time::Duration::from_secs(1),
            0,
        )
        .unwrap();
        let mut reader = Reader::new(client, Vec::new(), "_".to_string());
        reader.fetched = fetched_paths;
        reader
    }

    #[test]
    fn test_build_tree_merges_sibling_leaves() {
        let mut reader = reader_with(vec![
            fetched(
                "secret/seeds/team1/project1/secret",
                "secret/seeds/team1/",
                "",
                &[("user", "u1")],
            ),
            fetched(
                "secret/seeds/team1/project2/secret",
                "secret/seeds/team1/",
                "",
                &[("user", "u2")],
            ),
        ]);
        reader.data = reader.build_tree().unwrap();

        let value = reader.data().to_value();
        assert_eq!(value["project1"]["secret"]["user"], json!("u1"));
        assert_eq!(value["project2"]["secret"]["user"], json!("u2"));
    }

    #[test]
    fn test_build_tree_surfaces_conflicts() {
        let reader = reader_with(vec![
            fetched("secret/app", "secret/app", "", &[("token", "a")]),
            fetched("secret/app", "secret/app", "", &[("token", "b")]),
        ]);
        let err = reader.build_tree().unwrap_err();
        assert!(matches!(err, VaultError::DuplicateKey(_)));
    }

    #[test]
    fn test_path_versions_first_leaf_wins() {
        let mut paths = vec![
            fetched(
                "secret/seeds/team1/project1/secret",
                "secret/seeds/team1/",
                "",
                &[("a", "1")],
            ),
            fetched(
                "secret/seeds/team1/project2/secret",
                "secret/seeds/team1/",
                "",
                &[("b", "2")],
            ),
        ];
        paths[1].engine_version = 1;
        let reader = reader_with(paths);

        let versions = reader.path_versions();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions.get("secret/seeds/team1/"), Some(&2));
    }

    #[test]
    fn test_write_data_env_sorted() {
        let mut reader = reader_with(vec![fetched(
            "secret/seeds/team1/project1/secret",
            "secret/seeds/team1/project1/secret",
            "",
            &[("b", "10"), ("a", "1")],
        )]);
        reader.data = reader.build_tree().unwrap();

        let rendered = String::from_utf8(reader.write_data(TargetFormat::Env).unwrap()).unwrap();
        assert_eq!(rendered, "a=1\nb=10\n");
    }
}
