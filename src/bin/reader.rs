//! # Vault Reader CLI
//!
//! One-shot reader for local debugging: reads a `VaultSecret` manifest from
//! disk, runs the same fetch-and-merge pipeline the operator runs in-cluster,
//! and prints the result to stdout instead of writing a Kubernetes Secret.
//!
//! ## Usage
//!
//! ```bash
//! # Render a manifest's secrets as env pairs
//! VAULT_TOKEN=s.xxxx vault-reader --path manifest.yaml
//!
//! # Or as JSON / YAML
//! VAULT_TOKEN=s.xxxx vault-reader --path manifest.yaml -o json
//! ```
//!
//! The token always comes from `VAULT_TOKEN`; the manifest's auth section is
//! ignored so a local run never needs cluster credentials.

use std::io::Write;

use anyhow::{bail, Context, Result};
use clap::Parser;

use vault_secret_operator::config::AppConfig;
use vault_secret_operator::crd::VaultSecret;
use vault_secret_operator::validation::{self, TargetFormat};
use vault_secret_operator::vault::{Reader, StaticToken};

/// Read a VaultSecret manifest and print its merged secrets.
#[derive(Parser)]
#[command(name = "vault-reader")]
#[command(about = "Render the secrets of a VaultSecret manifest to stdout", long_about = None)]
struct Args {
    /// Path to a VaultSecret Kubernetes manifest
    #[arg(long)]
    path: String,

    /// Output format: env/json/yaml
    #[arg(short, default_value = "env")]
    output: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vault_secret_operator=warn".into()),
        )
        .init();

    let args = Args::parse();

    let token = std::env::var("VAULT_TOKEN")
        .context("VAULT_TOKEN env variable must be set")?;
    if token.is_empty() {
        bail!("VAULT_TOKEN env variable must be set");
    }

    let manifest = std::fs::read_to_string(&args.path)
        .with_context(|| format!("could not read file ({})", args.path))?;
    let mut resource: VaultSecret =
        serde_yaml::from_str(&manifest).context("could not parse YAML")?;
    // The manifest's auth section is irrelevant here: the CLI token wins.
    resource.spec.auth.token = Some(token.clone());

    let format = TargetFormat::parse(&args.output)?;

    let config = AppConfig::from_env();
    let mut spec = validation::validate(&resource, &config)?;
    spec.target_format = format;

    let provider = StaticToken::new(token);
    let mut reader = Reader::connect(&provider, &spec, &config).await?;
    reader.read_data().await?;

    std::io::stdout().write_all(&reader.write_data(format)?)?;
    Ok(())
}
