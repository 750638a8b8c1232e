//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `vault_secret_operator_reconciliations_total` - Total number of reconciliations
//! - `vault_secret_operator_reconciliation_errors_total` - Total number of reconciliation errors
//! - `vault_secret_operator_reconciliation_duration_seconds` - Duration of reconciliation operations
//! - `vault_secret_operator_sync_operations_total` - Secret sync outcomes by operation (created/updated/unchanged)
//! - `vault_secret_operator_vault_logins_total` - Total number of Vault JWT logins
//! - `vault_secret_operator_vault_login_errors_total` - Total number of failed Vault JWT logins

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_secret_operator_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_secret_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "vault_secret_operator_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static SYNC_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_secret_operator_sync_operations_total",
            "Secret sync outcomes by operation",
        ),
        &["operation"],
    )
    .expect("Failed to create SYNC_OPERATIONS_TOTAL metric - this should never happen")
});

static VAULT_LOGINS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_secret_operator_vault_logins_total",
        "Total number of Vault JWT logins",
    )
    .expect("Failed to create VAULT_LOGINS_TOTAL metric - this should never happen")
});

static VAULT_LOGIN_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_secret_operator_vault_login_errors_total",
        "Total number of failed Vault JWT logins",
    )
    .expect("Failed to create VAULT_LOGIN_ERRORS_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(SYNC_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VAULT_LOGINS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VAULT_LOGIN_ERRORS_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

/// `operation` is one of `created`, `updated` or `unchanged`.
pub fn record_sync_operation(operation: &str) {
    SYNC_OPERATIONS_TOTAL.with_label_values(&[operation]).inc();
}

pub fn increment_vault_logins() {
    VAULT_LOGINS_TOTAL.inc();
}

pub fn increment_vault_login_errors() {
    VAULT_LOGIN_ERRORS_TOTAL.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // This should not panic - metrics should register successfully
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn test_increment_reconciliations() {
        let before = RECONCILIATIONS_TOTAL.get();
        increment_reconciliations();
        let after = RECONCILIATIONS_TOTAL.get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_reconciliation_errors() {
        let before = RECONCILIATION_ERRORS_TOTAL.get();
        increment_reconciliation_errors();
        let after = RECONCILIATION_ERRORS_TOTAL.get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_observe_reconciliation_duration() {
        observe_reconciliation_duration(1.5);
        // Just verify it doesn't panic - histogram observation doesn't return a value
    }

    #[test]
    fn test_record_sync_operation() {
        let before = SYNC_OPERATIONS_TOTAL.with_label_values(&["created"]).get();
        record_sync_operation("created");
        let after = SYNC_OPERATIONS_TOTAL.with_label_values(&["created"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_vault_logins() {
        let before = VAULT_LOGINS_TOTAL.get();
        increment_vault_logins();
        let after = VAULT_LOGINS_TOTAL.get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_vault_login_errors() {
        let before = VAULT_LOGIN_ERRORS_TOTAL.get();
        increment_vault_login_errors();
        let after = VAULT_LOGIN_ERRORS_TOTAL.get();
        assert_eq!(after, before + 1u64);
    }
}
