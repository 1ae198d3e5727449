// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes reconcilers that react to watch events.

pub mod binding;
pub mod service;

pub use binding::BindingReconciler;
pub use service::ServiceReconciler;

use crate::config::Config;
use crate::error::{OperatorError, Result};
use crate::kubernetes::write_status;
use crate::types::{LifecycleStatus, Phase};
use kube::{runtime::controller::Action, Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::{error, warn};

/// Map a failed pass onto the record's status and pick the retry.
///
/// Unreachable provider endpoints keep the current state and back off for a
/// long time. Spec errors fail the record until its spec changes. Everything
/// else fails the record and is retried.
pub(crate) fn apply_failure<S: LifecycleStatus>(status: &mut S, err: &OperatorError, config: &Config) -> Action {
    if err.is_unreachable() {
        let state = status.state().clone();
        status.set_state(state, err.to_string());
        Action::requeue(config.dns_backoff)
    } else if err.is_terminal() {
        status.set_state(Phase::Failed, err.to_string());
        Action::await_change()
    } else {
        status.set_state(Phase::Failed, err.to_string());
        Action::requeue(config.retry_interval)
    }
}

/// Write `status` unless it equals what was last persisted.
///
/// On success `obj` and `persisted` follow the write. Returns `false` when a
/// concurrent writer won.
pub(crate) async fn persist_status<K, S>(api: &Api<K>, obj: &mut K, persisted: &mut S, status: &S) -> Result<bool>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    S: LifecycleStatus,
{
    if status == persisted {
        return Ok(true);
    }
    match write_status(api, obj, status).await? {
        Some(updated) => {
            *obj = updated;
            *persisted = status.clone();
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Record a failed pass on the record and return the retry action
pub(crate) async fn record_failure<K, S>(
    api: &Api<K>,
    obj: &mut K,
    persisted: &mut S,
    status: &mut S,
    err: OperatorError,
    config: &Config,
) -> Result<Action>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    S: LifecycleStatus,
{
    let name = format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any());
    if err.is_unreachable() || err.is_terminal() {
        warn!("Reconciliation of {} failed: {}", name, err);
    } else {
        error!("Reconciliation of {} failed: {}", name, err);
    }

    let action = apply_failure(status, &err, config);
    if persist_status(api, obj, persisted, status).await? {
        Ok(action)
    } else {
        Ok(Action::await_change())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use crate::types::BindingStatus;

    fn online_status() -> BindingStatus {
        BindingStatus {
            state: Phase::Online,
            message: "Online".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_unreachable_keeps_state_and_backs_off() {
        let config = Config::default();
        let mut status = online_status();
        let err = OperatorError::from(ProviderError::Unreachable("dns error".to_string()));

        let action = apply_failure(&mut status, &err, &config);

        assert_eq!(status.state, Phase::Online);
        assert!(status.message.contains("dns error"));
        assert_eq!(action, Action::requeue(config.dns_backoff));
    }

    #[test]
    fn test_spec_error_waits_for_change() {
        let config = Config::default();
        let mut status = online_status();
        let err = OperatorError::InvalidSpec("unknown role Owner".to_string());

        let action = apply_failure(&mut status, &err, &config);

        assert_eq!(status.state, Phase::Failed);
        assert_eq!(action, Action::await_change());
    }

    #[test]
    fn test_other_errors_retry() {
        let config = Config::default();
        let mut status = online_status();
        let err = OperatorError::from(ProviderError::Api {
            status: 500,
            message: "internal".to_string(),
        });

        let action = apply_failure(&mut status, &err, &config);

        assert_eq!(status.state, Phase::Failed);
        assert_eq!(action, Action::requeue(config.retry_interval));
    }
}
