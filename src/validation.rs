//! # Resource Validation
//!
//! Fills defaults and validates a `VaultSecret` into an [`EffectiveSpec`].
//! Validation failures are terminal: the resource is broken until a user
//! fixes it, so the reconciler surfaces them as events and does not requeue.

use std::time::Duration;

use regex::Regex;
use thiserror::Error;

use crate::config::AppConfig;
use crate::crd::{VaultSecret, VaultSecretPath};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("spec.addr is empty and no default Vault address is configured")]
    MissingAddr,

    #[error("spec.auth.serviceAccountRef.name is empty and no default service account is configured")]
    MissingServiceAccountName,

    #[error("spec.auth.serviceAccountRef.authPath is empty and no default auth path is configured")]
    MissingAuthPath,

    #[error("spec.reconcilePeriod is invalid: {0}")]
    InvalidReconcilePeriod(String),

    #[error("{0:?} is not a supported target format (env, json, yaml)")]
    InvalidTargetFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFormat {
    Env,
    Json,
    Yaml,
}

impl TargetFormat {
    pub fn parse(format: &str) -> Result<Self, ValidationError> {
        match format.to_lowercase().as_str() {
            "env" => Ok(TargetFormat::Env),
            "json" => Ok(TargetFormat::Json),
            "yaml" => Ok(TargetFormat::Yaml),
            other => Err(ValidationError::InvalidTargetFormat(other.to_string())),
        }
    }
}

/// How the pipeline authenticates for one resource.
#[derive(Debug, Clone)]
pub enum EffectiveAuth {
    Token(String),
    ServiceAccount {
        name: String,
        auth_path: String,
        role: String,
    },
}

/// A `VaultSecretSpec` with every default filled in.
#[derive(Debug, Clone)]
pub struct EffectiveSpec {
    pub addr: String,
    pub separator: String,
    pub paths: Vec<VaultSecretPath>,
    pub target_secret_name: String,
    pub target_format: TargetFormat,
    pub reconcile_period: Duration,
    pub auth: EffectiveAuth,
}

/// Validate and default one resource against the operator configuration.
pub fn validate(resource: &VaultSecret, config: &AppConfig) -> Result<EffectiveSpec, ValidationError> {
    let spec = &resource.spec;
    let name = resource.metadata.name.as_deref().unwrap_or_default();
    let namespace = resource.metadata.namespace.as_deref().unwrap_or_default();

    let addr = spec
        .addr
        .clone()
        .filter(|addr| !addr.is_empty())
        .or_else(|| {
            (!config.default_vault_addr.is_empty()).then(|| config.default_vault_addr.clone())
        })
        .ok_or(ValidationError::MissingAddr)?;

    let period = spec
        .reconcile_period
        .clone()
        .filter(|period| !period.is_empty())
        .unwrap_or_else(|| config.default_reconcile_period.clone());
    let reconcile_period = parse_kubernetes_duration(&period)
        .map_err(|e| ValidationError::InvalidReconcilePeriod(e.to_string()))?;

    let target_format = TargetFormat::parse(spec.target_format.as_deref().unwrap_or("env"))?;

    let auth = match spec.auth.token.clone().filter(|token| !token.is_empty()) {
        Some(token) => EffectiveAuth::Token(token),
        None => {
            let sa = spec.auth.service_account_ref.clone().unwrap_or_default();
            let sa_name = sa
                .name
                .filter(|n| !n.is_empty())
                .or_else(|| (!config.default_sa_name.is_empty()).then(|| config.default_sa_name.clone()))
                .ok_or(ValidationError::MissingServiceAccountName)?;
            let auth_path = sa
                .auth_path
                .filter(|p| !p.is_empty())
                .or_else(|| {
                    (!config.default_sa_auth_path.is_empty())
                        .then(|| config.default_sa_auth_path.clone())
                })
                .ok_or(ValidationError::MissingAuthPath)?;
            // A resource without a role authenticates as its namespace.
            let role = sa
                .role
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| {
                    if config.role.is_empty() {
                        namespace.to_string()
                    } else {
                        config.role.clone()
                    }
                });
            EffectiveAuth::ServiceAccount {
                name: sa_name,
                auth_path,
                role,
            }
        }
    };

    Ok(EffectiveSpec {
        addr,
        separator: spec
            .separator
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "_".to_string()),
        paths: spec.paths.clone(),
        target_secret_name: spec
            .target_secret_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| name.to_string()),
        target_format,
        reconcile_period,
        auth,
    })
}

/// Parse a Kubernetes duration string into a `Duration`. One or more
/// `<number><unit>` groups, unit one of s/m/h/d, so `"10m"` and `"1h30m"`
/// both parse.
pub fn parse_kubernetes_duration(duration_str: &str) -> Result<Duration, ValidationError> {
    let trimmed = duration_str.trim().to_lowercase();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidReconcilePeriod(
            "duration string cannot be empty".to_string(),
        ));
    }

    let shape = Regex::new(r"^(\d+[smhd])+$")
        .map_err(|e| ValidationError::InvalidReconcilePeriod(e.to_string()))?;
    if !shape.is_match(&trimmed) {
        return Err(ValidationError::InvalidReconcilePeriod(format!(
            "invalid duration format {duration_str:?}, expected <number><unit> groups (e.g. \"5m\", \"1h30m\")"
        )));
    }

    let groups = Regex::new(r"(?P<number>\d+)(?P<unit>[smhd])")
        .map_err(|e| ValidationError::InvalidReconcilePeriod(e.to_string()))?;
    let mut seconds: u64 = 0;
    for captures in groups.captures_iter(&trimmed) {
        let number: u64 = captures["number"].parse().map_err(|e| {
            ValidationError::InvalidReconcilePeriod(format!(
                "invalid number in {duration_str:?}: {e}"
            ))
        })?;
        let per_unit = match &captures["unit"] {
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            _ => 86400,
        };
        seconds = seconds.saturating_add(number.saturating_mul(per_unit));
    }
    if seconds == 0 {
        return Err(ValidationError::InvalidReconcilePeriod(format!(
            "duration must be greater than 0, got {duration_str:?}"
        )));
    }

    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ServiceAccountRef, VaultSecretAuth, VaultSecretSpec};
    use kube::core::ObjectMeta;

    fn resource(spec: VaultSecretSpec) -> VaultSecret {
        let mut vs = VaultSecret::new("my-secrets", spec);
        vs.metadata = ObjectMeta {
            name: Some("my-secrets".to_string()),
            namespace: Some("team1".to_string()),
            ..ObjectMeta::default()
        };
        vs
    }

    fn minimal_spec() -> VaultSecretSpec {
        VaultSecretSpec {
            addr: None,
            separator: None,
            paths: vec![VaultSecretPath {
                path: "secret/app/config".to_string(),
                prefix: String::new(),
            }],
            target_secret_name: None,
            target_format: None,
            reconcile_period: None,
            auth: VaultSecretAuth {
                token: Some("s.token".to_string()),
                service_account_ref: None,
            },
        }
    }

    #[test]
    fn test_defaults_applied() {
        let config = AppConfig::default();
        let effective = validate(&resource(minimal_spec()), &config).unwrap();

        assert_eq!(effective.addr, "http://127.0.0.1:8200");
        assert_eq!(effective.separator, "_");
        assert_eq!(effective.target_secret_name, "my-secrets");
        assert_eq!(effective.target_format, TargetFormat::Env);
        assert_eq!(effective.reconcile_period, Duration::from_secs(600));
        assert!(matches!(effective.auth, EffectiveAuth::Token(_)));
    }

    #[test]
    fn test_missing_addr_is_terminal() {
        let config = AppConfig {
            default_vault_addr: String::new(),
            ..AppConfig::default()
        };
        let err = validate(&resource(minimal_spec()), &config).unwrap_err();
        assert!(matches!(err, ValidationError::MissingAddr));
    }

    #[test]
    fn test_compound_period_accepted() {
        let mut spec = minimal_spec();
        spec.reconcile_period = Some("1h30m".to_string());
        let effective = validate(&resource(spec), &AppConfig::default()).unwrap();
        assert_eq!(effective.reconcile_period, Duration::from_secs(5400));
    }

    #[test]
    fn test_invalid_period_is_terminal() {
        let mut spec = minimal_spec();
        spec.reconcile_period = Some("soon".to_string());
        let err = validate(&resource(spec), &AppConfig::default()).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidReconcilePeriod(_)));
    }

    #[test]
    fn test_invalid_format_is_terminal() {
        let mut spec = minimal_spec();
        spec.target_format = Some("toml".to_string());
        let err = validate(&resource(spec), &AppConfig::default()).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTargetFormat(_)));
    }

    #[test]
    fn test_service_account_defaults() {
        let mut spec = minimal_spec();
        spec.auth = VaultSecretAuth {
            token: None,
            service_account_ref: Some(ServiceAccountRef {
                name: None,
                auth_path: Some("auth/kubernetes/login".to_string()),
                role: None,
            }),
        };
        let effective = validate(&resource(spec), &AppConfig::default()).unwrap();

        match effective.auth {
            EffectiveAuth::ServiceAccount { name, auth_path, role } => {
                assert_eq!(name, "vault-operator-sync");
                assert_eq!(auth_path, "auth/kubernetes/login");
                // Role falls back to the resource namespace.
                assert_eq!(role, "team1");
            }
            EffectiveAuth::Token(_) => panic!("expected service-account auth"),
        }
    }

    #[test]
    fn test_missing_auth_path_is_terminal() {
        let mut spec = minimal_spec();
        spec.auth = VaultSecretAuth {
            token: None,
            service_account_ref: None,
        };
        let err = validate(&resource(spec), &AppConfig::default()).unwrap_err();
        assert!(matches!(err, ValidationError::MissingAuthPath));
    }

    #[test]
    fn test_parse_kubernetes_duration() {
        assert_eq!(parse_kubernetes_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_kubernetes_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_kubernetes_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_kubernetes_duration("1d").unwrap(), Duration::from_secs(86400));
        assert!(parse_kubernetes_duration("").is_err());
        assert!(parse_kubernetes_duration("5x").is_err());
        assert!(parse_kubernetes_duration("0m").is_err());
        assert!(parse_kubernetes_duration("90").is_err());
        assert!(parse_kubernetes_duration("m").is_err());
    }

    #[test]
    fn test_parse_compound_durations() {
        assert_eq!(parse_kubernetes_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_kubernetes_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(
            parse_kubernetes_duration("1d2h3m4s").unwrap(),
            Duration::from_secs(86400 + 7200 + 180 + 4)
        );
        // Zero totals stay rejected even when spelled across groups.
        assert!(parse_kubernetes_duration("0h0m").is_err());
    }
}
