//! # Operator Configuration
//!
//! Process-wide defaults, read from environment variables at startup. Every
//! value has a fallback so the operator runs unconfigured against a local
//! Vault.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Per-request timeout for Vault HTTP calls.
    pub client_timeout: Duration,
    /// Transport-level retries for Vault HTTP calls.
    pub client_max_retries: u32,
    /// Fallback service-account auth path for resources that omit one.
    /// Empty means resources must set their own.
    pub default_sa_auth_path: String,
    /// Fallback service-account name.
    pub default_sa_name: String,
    /// Fallback reconcile period (Kubernetes duration string).
    pub default_reconcile_period: String,
    /// Fallback Vault role; empty falls back to the resource namespace.
    pub role: String,
    /// Fallback Vault address.
    pub default_vault_addr: String,
    /// Vault UI base address for annotation links; empty derives it from the
    /// resource's Vault address.
    pub vault_ui_addr: String,
    /// Refresh exchanged tokens this long before they expire.
    pub refresh_token_before: Duration,
    pub max_concurrent_reconciles: u16,
    pub metrics_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            client_timeout: Duration::from_secs(30),
            client_max_retries: 2,
            default_sa_auth_path: String::new(),
            default_sa_name: "vault-operator-sync".to_string(),
            default_reconcile_period: "10m".to_string(),
            role: String::new(),
            default_vault_addr: "http://127.0.0.1:8200".to_string(),
            vault_ui_addr: String::new(),
            refresh_token_before: Duration::from_secs(60),
            max_concurrent_reconciles: 5,
            metrics_port: 8080,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            client_timeout: Duration::from_secs(parse_var(
                "VAULT_CLIENT_TIMEOUT_SECS",
                defaults.client_timeout.as_secs(),
            )),
            client_max_retries: parse_var("VAULT_CLIENT_MAX_RETRIES", defaults.client_max_retries),
            default_sa_auth_path: var_or("DEFAULT_SA_AUTH_PATH", &defaults.default_sa_auth_path),
            default_sa_name: var_or("DEFAULT_SA_NAME", &defaults.default_sa_name),
            default_reconcile_period: var_or(
                "DEFAULT_RECONCILE_PERIOD",
                &defaults.default_reconcile_period,
            ),
            role: var_or("VAULT_ROLE", &defaults.role),
            default_vault_addr: var_or("VAULT_ADDR", &defaults.default_vault_addr),
            vault_ui_addr: var_or("VAULT_UI_ADDR", &defaults.vault_ui_addr),
            refresh_token_before: Duration::from_secs(parse_var(
                "REFRESH_TOKEN_BEFORE_SECS",
                defaults.refresh_token_before.as_secs(),
            )),
            max_concurrent_reconciles: parse_var(
                "MAX_CONCURRENT_RECONCILES",
                defaults.max_concurrent_reconciles,
            ),
            metrics_port: parse_var("METRICS_PORT", defaults.metrics_port),
        }
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.default_reconcile_period, "10m");
        assert_eq!(config.default_vault_addr, "http://127.0.0.1:8200");
        assert_eq!(config.default_sa_name, "vault-operator-sync");
        assert_eq!(config.max_concurrent_reconciles, 5);
        assert!(config.vault_ui_addr.is_empty());
    }
}
