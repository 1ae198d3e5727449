// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Operator configuration loaded from environment variables.
/// Built once at start-up and shared read-only by every reconciler.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace consulted when the operator secret/config map is absent from a record's namespace
    pub control_namespace: String,
    /// Steady-state polling interval used to detect drift
    pub sync_period: Duration,
    /// Short requeue while waiting on a dependency or a provider transition
    pub dependency_requeue: Duration,
    /// Requeue after a retryable failure
    pub retry_interval: Duration,
    /// Requeue after the provider's endpoints failed to resolve
    pub dns_backoff: Duration,
    /// Number of records reconciled in parallel per controller
    pub max_concurrent_reconciles: u16,
    /// Secret holding the provider API key
    pub operator_secret_name: String,
    /// Config map holding default resource context values
    pub operator_config_map_name: String,
    pub iam_endpoint: String,
    pub resource_controller_endpoint: String,
    pub global_catalog_endpoint: String,
    pub cf_endpoint: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            control_namespace: "default".to_string(),
            sync_period: Duration::from_secs(150),
            dependency_requeue: Duration::from_secs(10),
            retry_interval: Duration::from_secs(60),
            dns_backoff: Duration::from_secs(300),
            max_concurrent_reconciles: 1,
            operator_secret_name: "secret-ibm-cloud-operator".to_string(),
            operator_config_map_name: "config-ibm-cloud-operator".to_string(),
            iam_endpoint: "https://iam.cloud.ibm.com".to_string(),
            resource_controller_endpoint: "https://resource-controller.cloud.ibm.com".to_string(),
            global_catalog_endpoint: "https://globalcatalog.cloud.ibm.com".to_string(),
            cf_endpoint: "https://api.us-south.cf.cloud.ibm.com".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let seconds = |key: &str, default: Duration| -> Result<Duration> {
            match lookup(key) {
                Some(v) => {
                    let secs: u64 = v
                        .parse()
                        .with_context(|| format!("{} must be a number of seconds, got '{}'", key, v))?;
                    Ok(Duration::from_secs(secs))
                }
                None => Ok(default),
            }
        };

        let max_concurrent_reconciles = match lookup("MAX_CONCURRENT_RECONCILES") {
            Some(v) => v
                .parse()
                .with_context(|| format!("MAX_CONCURRENT_RECONCILES must be a number, got '{}'", v))?,
            None => defaults.max_concurrent_reconciles,
        };

        Ok(Config {
            control_namespace: lookup("CONTROL_NAMESPACE").unwrap_or(defaults.control_namespace),
            sync_period: seconds("SYNC_PERIOD_SECS", defaults.sync_period)?,
            dependency_requeue: seconds("DEPENDENCY_REQUEUE_SECS", defaults.dependency_requeue)?,
            retry_interval: seconds("RETRY_INTERVAL_SECS", defaults.retry_interval)?,
            dns_backoff: seconds("DNS_BACKOFF_SECS", defaults.dns_backoff)?,
            max_concurrent_reconciles,
            operator_secret_name: lookup("OPERATOR_SECRET_NAME").unwrap_or(defaults.operator_secret_name),
            operator_config_map_name: lookup("OPERATOR_CONFIG_MAP_NAME")
                .unwrap_or(defaults.operator_config_map_name),
            iam_endpoint: lookup("IAM_ENDPOINT").unwrap_or(defaults.iam_endpoint),
            resource_controller_endpoint: lookup("RESOURCE_CONTROLLER_ENDPOINT")
                .unwrap_or(defaults.resource_controller_endpoint),
            global_catalog_endpoint: lookup("GLOBAL_CATALOG_ENDPOINT")
                .unwrap_or(defaults.global_catalog_endpoint),
            cf_endpoint: lookup("CF_ENDPOINT").unwrap_or(defaults.cf_endpoint),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.control_namespace, "default");
        assert_eq!(config.sync_period, Duration::from_secs(150));
        assert_eq!(config.dns_backoff, Duration::from_secs(300));
        assert_eq!(config.max_concurrent_reconciles, 1);
    }

    #[test]
    fn test_overrides_from_lookup() {
        let config = Config::from_lookup(lookup_from(&[
            ("CONTROL_NAMESPACE", "ibm-operators"),
            ("SYNC_PERIOD_SECS", "30"),
            ("MAX_CONCURRENT_RECONCILES", "8"),
            ("OPERATOR_SECRET_NAME", "my-api-key"),
        ]))
        .unwrap();

        assert_eq!(config.control_namespace, "ibm-operators");
        assert_eq!(config.sync_period, Duration::from_secs(30));
        assert_eq!(config.max_concurrent_reconciles, 8);
        assert_eq!(config.operator_secret_name, "my-api-key");
        assert_eq!(config.retry_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_interval_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("SYNC_PERIOD_SECS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("SYNC_PERIOD_SECS"));
    }
}
