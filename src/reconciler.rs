//! # Reconciler
//!
//! Core reconciliation logic for `VaultSecret` resources.
//!
//! The reconciler:
//! - Watches `VaultSecret` resources across all namespaces
//! - Authenticates against Vault with a static token or a service account JWT
//! - Reads and merges the declared Vault paths into one document
//! - Writes the result into the target Kubernetes `Secret`
//! - Updates resource status with the last sync time
//!
//! ## Reconciliation Flow
//!
//! 1. Validate the resource and fill defaults from the operator config
//! 2. Obtain a Vault token (static, or cached JWT login per service account)
//! 3. Resolve wildcard paths, fetch all leaves concurrently, merge
//! 4. Build the target Secret (env/json/yaml) with labels and UI annotations
//! 5. Create or update the Secret, preserving annotations owned by others
//! 6. Update status when the Secret changed, requeue after the resource's
//!    reconcile period
//!
//! A no-op pass issues zero writes. The status patch bumps the resource
//! version, which the watch reports back as a change; patching on every pass
//! would re-trigger reconciliation in a tight loop.
//!
//! Validation failures are terminal: the resource stays broken until a user
//! edits it, which itself triggers a new reconciliation, so they are reported
//! as warning events without a requeue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams, PostParams};
use kube_runtime::controller::Action;
use kube_runtime::events::{Event, EventType, Recorder};
use kube::{Api, Client, Resource};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::crd::VaultSecret;
use crate::metrics;
use crate::target::{self, MANAGED_BY};
use crate::validation::{self, EffectiveAuth, EffectiveSpec};
use crate::vault::{
    AuthCache, Reader, ServiceAccountAuth, StaticToken, TokenProvider, VaultClient, VaultError,
};

const ERROR_REQUEUE: Duration = Duration::from_secs(60);

/// The desired Secret (with external annotations already merged in) needs no
/// write when its data and annotations match what the cluster holds.
fn secret_in_sync(desired: &Secret, found: &Secret) -> bool {
    desired.data == found.data && desired.metadata.annotations == found.metadata.annotations
}

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("vault: {0}")]
    Vault(#[from] VaultError),

    #[error("kubernetes api: {0}")]
    Kube(#[from] kube::Error),
}

/// Shared controller state, one instance for the whole process.
pub struct Reconciler {
    client: Client,
    config: AppConfig,
    auth_cache: AuthCache,
    recorder: Recorder,
}

impl Reconciler {
    pub fn new(client: Client, config: AppConfig) -> Self {
        let recorder = Recorder::new(client.clone(), MANAGED_BY.to_string().into());
        Self {
            client,
            config,
            auth_cache: AuthCache::default(),
            recorder,
        }
    }

    pub async fn reconcile(
        resource: Arc<VaultSecret>,
        ctx: Arc<Reconciler>,
    ) -> Result<Action, ReconcilerError> {
        let start = Instant::now();
        let name = resource.metadata.name.as_deref().unwrap_or("unknown");
        let namespace = resource.metadata.namespace.as_deref().unwrap_or("default");

        info!("Reconciling VaultSecret: {}/{}", namespace, name);
        metrics::increment_reconciliations();

        let spec = match validation::validate(&resource, &ctx.config) {
            Ok(spec) => spec,
            Err(e) => {
                // Terminal until the user edits the resource, which triggers
                // its own reconciliation.
                error!("Invalid VaultSecret {}/{}: {}", namespace, name, e);
                ctx.warning(&resource, "invalid resource", &e.to_string()).await;
                return Ok(Action::await_change());
            }
        };

        let result = ctx.sync(&resource, &spec).await;
        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        match result {
            Ok(operation) => {
                info!(
                    "Reconciliation complete for {}/{} ({})",
                    namespace, name, operation
                );
                metrics::record_sync_operation(operation);
                Ok(Action::requeue(spec.reconcile_period))
            }
            Err(e) => {
                metrics::increment_reconciliation_errors();
                let reason = match &e {
                    // Overlapping declared paths; the conflict can also clear
                    // when the data in Vault changes, so it is retried.
                    ReconcilerError::Vault(VaultError::DuplicateKey(_)) => "sync rejected",
                    ReconcilerError::Vault(_) => "vault read failed",
                    ReconcilerError::Kube(_) => "secret update failed",
                };
                ctx.warning(&resource, reason, &e.to_string()).await;
                Err(e)
            }
        }
    }

    pub fn error_policy(
        resource: Arc<VaultSecret>,
        error: &ReconcilerError,
        _ctx: Arc<Reconciler>,
    ) -> Action {
        error!(
            "Reconciliation error for {}: {:?}",
            resource.metadata.name.as_deref().unwrap_or("unknown"),
            error
        );
        Action::requeue(ERROR_REQUEUE)
    }

    /// One full sync of a validated resource. Returns the operation applied
    /// to the target Secret (`created`, `updated` or `unchanged`).
    async fn sync(
        &self,
        resource: &VaultSecret,
        spec: &EffectiveSpec,
    ) -> Result<&'static str, ReconcilerError> {
        let provider = self.token_provider(resource, spec).await?;
        let mut reader = Reader::connect(provider.as_ref(), spec, &self.config).await?;
        reader.read_data().await?;

        let ui_base = if self.config.vault_ui_addr.is_empty() {
            format!("{}/ui", spec.addr.trim_end_matches('/'))
        } else {
            self.config.vault_ui_addr.clone()
        };

        let mut desired = target::build_secret(
            resource,
            spec,
            reader.data(),
            &reader.path_versions(),
            &ui_base,
        )?;

        let namespace = resource.metadata.namespace.as_deref().unwrap_or("default");
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);

        let operation = match secrets.get_opt(&spec.target_secret_name).await? {
            None => {
                info!(
                    "Creating a new Secret {}/{}",
                    namespace, spec.target_secret_name
                );
                secrets.create(&PostParams::default(), &desired).await?;
                self.normal(resource, "created", "Secret has been created.").await;
                "created"
            }
            Some(found) => {
                let managed_by = found
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get("managed-by"));
                if managed_by.is_some_and(|owner| owner != MANAGED_BY) {
                    warn!(
                        "syncing existing secret that was not managed by vault operator: {}",
                        spec.target_secret_name
                    );
                }

                desired.metadata.annotations = target::merge_annotations(
                    desired.metadata.annotations.take(),
                    found.metadata.annotations.as_ref(),
                );

                if secret_in_sync(&desired, &found) {
                    "unchanged"
                } else {
                    info!(
                        "Secret exists, updating: {}/{}",
                        namespace, spec.target_secret_name
                    );
                    desired.metadata.resource_version = found.metadata.resource_version.clone();
                    secrets
                        .replace(&spec.target_secret_name, &PostParams::default(), &desired)
                        .await?;
                    self.normal(resource, "updated", "Secret has been updated.").await;
                    "updated"
                }
            }
        };

        // A no-op pass writes nothing, status included: the patch would bump
        // the resource version and the watch would schedule the next pass
        // immediately instead of after the reconcile period.
        if operation != "unchanged" {
            self.update_status(resource).await?;
        }
        Ok(operation)
    }

    async fn token_provider(
        &self,
        resource: &VaultSecret,
        spec: &EffectiveSpec,
    ) -> Result<Arc<dyn TokenProvider>, VaultError> {
        match &spec.auth {
            EffectiveAuth::Token(token) => Ok(Arc::new(StaticToken::new(token.clone()))),
            EffectiveAuth::ServiceAccount {
                name,
                auth_path,
                role,
            } => {
                let namespace = resource.metadata.namespace.as_deref().unwrap_or("default");
                let key = AuthCache::key(&spec.addr, namespace, name, role, auth_path);
                let auth = self
                    .auth_cache
                    .get_or_create(&key, || {
                        let vault = VaultClient::new(
                            &spec.addr,
                            self.config.client_timeout,
                            self.config.client_max_retries,
                        )?;
                        Ok(ServiceAccountAuth::new(
                            vault,
                            Some(self.client.clone()),
                            name.as_str(),
                            namespace,
                            role.as_str(),
                            auth_path.as_str(),
                            self.config.refresh_token_before,
                        ))
                    })
                    .await?;
                Ok(auth)
            }
        }
    }

    async fn update_status(&self, resource: &VaultSecret) -> Result<(), ReconcilerError> {
        let namespace = resource.metadata.namespace.as_deref().unwrap_or("default");
        let api: Api<VaultSecret> = Api::namespaced(self.client.clone(), namespace);

        let patch = serde_json::json!({
            "status": {
                "lastUpdated": chrono::Utc::now().to_rfc3339(),
            }
        });

        api.patch_status(
            resource.metadata.name.as_deref().unwrap_or("unknown"),
            &PatchParams::apply(MANAGED_BY),
            &Patch::Merge(patch),
        )
        .await?;

        Ok(())
    }

    async fn normal(&self, resource: &VaultSecret, reason: &str, note: &str) {
        self.publish(resource, EventType::Normal, reason, note).await;
    }

    async fn warning(&self, resource: &VaultSecret, reason: &str, note: &str) {
        self.publish(resource, EventType::Warning, reason, note).await;
    }

    /// Events are best-effort: a failure to record one never fails the sync.
    async fn publish(&self, resource: &VaultSecret, type_: EventType, reason: &str, note: &str) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note.to_string()),
            action: "Reconciling".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &resource.object_ref(&())).await {
            warn!("Failed to publish event for {:?}: {}", resource.metadata.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn secret(pairs: &[(&str, &str)], annotations: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("app-secrets".to_string()),
                annotations: (!annotations.is_empty()).then(|| {
                    annotations
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect()
                }),
                ..ObjectMeta::default()
            },
            data: Some(
                pairs
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Secret::default()
        }
    }

    #[test]
    fn test_identical_secrets_need_no_write() {
        let desired = secret(&[("user", "admin")], &[("vault-secret-operator/vault-ui-urls", "u")]);
        let found = secret(&[("user", "admin")], &[("vault-secret-operator/vault-ui-urls", "u")]);
        assert!(secret_in_sync(&desired, &found));
    }

    #[test]
    fn test_changed_data_needs_a_write() {
        let desired = secret(&[("user", "admin")], &[]);
        let found = secret(&[("user", "rotated")], &[]);
        assert!(!secret_in_sync(&desired, &found));
    }

    #[test]
    fn test_changed_annotations_need_a_write() {
        let desired = secret(&[("user", "admin")], &[("vault-secret-operator/vault-ui-urls", "new")]);
        let found = secret(&[("user", "admin")], &[("vault-secret-operator/vault-ui-urls", "old")]);
        assert!(!secret_in_sync(&desired, &found));
    }
}
