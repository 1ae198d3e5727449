// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Resolution of provider parameters from inline values and ConfigMap/Secret keys

use crate::error::{OperatorError, Result};
use crate::types::{KeyRef, Param};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};
use serde_json::{Map, Value};
use tracing::instrument;

/// Interpret a looked-up string as JSON when it is entirely valid JSON, and as
/// a plain string otherwise (including when trailing input remains).
pub fn parse_loose(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Resolve every parameter into a JSON object keyed by parameter name
pub async fn resolve_params(client: &Client, namespace: &str, params: &[Param]) -> Result<Map<String, Value>> {
    let mut resolved = Map::new();
    for param in params {
        resolved.insert(param.name.clone(), param_to_json(client, namespace, param).await?);
    }
    Ok(resolved)
}

/// Resolve one parameter; `value` and `valueFrom` are mutually exclusive
#[instrument(skip(client, param), fields(param = %param.name))]
pub async fn param_to_json(client: &Client, namespace: &str, param: &Param) -> Result<Value> {
    match (&param.value, &param.value_from) {
        (Some(_), Some(_)) => Err(OperatorError::InvalidSpec(format!(
            "parameter {} sets both value and valueFrom",
            param.name
        ))),
        (Some(value), None) => Ok(value.clone()),
        (None, Some(source)) => match (&source.secret_key_ref, &source.config_map_key_ref) {
            (Some(_), Some(_)) => Err(OperatorError::InvalidSpec(format!(
                "parameter {} sets both secretKeyRef and configMapKeyRef",
                param.name
            ))),
            (Some(key_ref), None) => Ok(parse_loose(&secret_key(client, namespace, key_ref).await?)),
            (None, Some(key_ref)) => Ok(parse_loose(&config_map_key(client, namespace, key_ref).await?)),
            (None, None) => Ok(Value::Null),
        },
        (None, None) => Ok(Value::Null),
    }
}

async fn secret_key(client: &Client, namespace: &str, key_ref: &KeyRef) -> Result<String> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = secrets.get_opt(&key_ref.name).await?.ok_or_else(|| {
        OperatorError::InvalidParameter(format!("secret {}/{} not found", namespace, key_ref.name))
    })?;

    let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(&key_ref.key)) else {
        return Err(OperatorError::InvalidParameter(format!(
            "secret {}/{} has no key {}",
            namespace, key_ref.name, key_ref.key
        )));
    };

    String::from_utf8(bytes.0.clone()).map_err(|e| {
        OperatorError::InvalidParameter(format!(
            "secret {}/{} key {} is not valid UTF-8: {}",
            namespace, key_ref.name, key_ref.key, e
        ))
    })
}

async fn config_map_key(client: &Client, namespace: &str, key_ref: &KeyRef) -> Result<String> {
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let config_map = config_maps.get_opt(&key_ref.name).await?.ok_or_else(|| {
        OperatorError::InvalidParameter(format!("config map {}/{} not found", namespace, key_ref.name))
    })?;

    config_map
        .data
        .as_ref()
        .and_then(|d| d.get(&key_ref.key))
        .cloned()
        .ok_or_else(|| {
            OperatorError::InvalidParameter(format!(
                "config map {}/{} has no key {}",
                namespace, key_ref.name, key_ref.key
            ))
        })
}
