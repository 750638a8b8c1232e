//! # Vault Secret Operator
//!
//! A Kubernetes controller that syncs secrets from HashiCorp Vault into
//! Kubernetes `Secret` resources.
//!
//! ## Overview
//!
//! This controller provides declarative Vault-to-Kubernetes secret sync by:
//!
//! 1. **Watching VaultSecret resources** - Monitors `VaultSecret` custom resources across all namespaces
//! 2. **Authenticating against Vault** - Static tokens or service-account JWT exchange, with token caching
//! 3. **Reading secret paths** - Literal and wildcard (`path/*`) paths against KV1 and KV2 engines
//! 4. **Merging with conflict detection** - Paths merge into one document; duplicate keys reject the sync
//! 5. **Writing targets** - `env`, `json` or `yaml` formatted `Secret` data, owned by the resource
//!
//! ## Features
//!
//! - **Multi-namespace**: Watches `VaultSecret` resources across all namespaces
//! - **Wildcard crawl**: Recursively enumerates folders with bounded concurrency
//! - **Vault UI links**: Annotates every target Secret with UI URLs for its source paths
//! - **Prometheus metrics**: Exposes metrics for monitoring and observability
//! - **Health probes**: HTTP endpoints for liveness and readiness checks
//!
//! ## Usage
//!
//! See the [README.md](../README.md) for detailed usage instructions and examples.

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use kube::{Api, Client};
use kube_runtime::{controller, watcher, Controller};
use tracing::{error, info};

use vault_secret_operator::config::AppConfig;
use vault_secret_operator::crd::VaultSecret;
use vault_secret_operator::reconciler::Reconciler;
use vault_secret_operator::metrics;
use vault_secret_operator::server::{start_server, ServerState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vault_secret_operator=info".into()),
        )
        .init();

    info!(
        "Starting Vault Secret Operator (build {})",
        env!("BUILD_GIT_HASH")
    );

    let config = AppConfig::from_env();

    metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_state_clone = Arc::clone(&server_state);
    let server_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    let client = Client::try_default().await?;

    // Watch all namespaces so teams can create VaultSecret resources wherever
    // their workloads live.
    let resources: Api<VaultSecret> = Api::all(client.clone());

    let max_concurrent = config.max_concurrent_reconciles;
    let reconciler = Arc::new(Reconciler::new(client, config));

    server_state.mark_ready();

    Controller::new(resources, watcher::Config::default())
        .with_config(controller::Config::default().concurrency(max_concurrent))
        .shutdown_on_signal()
        .run(
            Reconciler::reconcile,
            Reconciler::error_policy,
            reconciler,
        )
        .for_each(|_| std::future::ready(()))
        .await;

    info!("Controller stopped");

    Ok(())
}
