// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Credential secret materialization and drift detection

use crate::constants::secret_annotations;
use crate::error::Result;
use crate::provider::RemoteKey;
use crate::types::Binding;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::{
    api::{DeleteParams, ObjectMeta, PostParams},
    Api, Client, Resource, ResourceExt,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{info, instrument};

/// Outcome of bringing a credential secret in line with its key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSync {
    Created,
    Recreated,
    InSync,
}

/// Flatten a credential map into secret data.
///
/// Spaces in keys become underscores. Values are JSON-encoded with one
/// surrounding quote pair stripped, so strings end up raw and everything else
/// keeps its JSON text.
pub fn flatten_credentials(credentials: &Map<String, Value>) -> Result<BTreeMap<String, ByteString>> {
    let mut data = BTreeMap::new();
    for (key, value) in credentials {
        let encoded = serde_json::to_string(value)?;
        let encoded = encoded.strip_prefix('"').unwrap_or(&encoded);
        let encoded = encoded.strip_suffix('"').unwrap_or(encoded);
        data.insert(key.replace(' ', "_"), ByteString(encoded.as_bytes().to_vec()));
    }
    Ok(data)
}

/// Build the secret a binding's credentials are materialized into
pub fn credentials_secret(binding: &Binding, instance_id: &str, key: &RemoteKey) -> Result<Secret> {
    let annotations = BTreeMap::from([
        (secret_annotations::INSTANCE_ID.to_string(), instance_id.to_string()),
        (secret_annotations::KEY_ID.to_string(), key.id.clone()),
        (
            secret_annotations::SERVICE_NAME.to_string(),
            binding.spec.service_name.clone(),
        ),
    ]);

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(binding.secret_name()),
            namespace: binding.namespace(),
            annotations: Some(annotations),
            owner_references: binding.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        },
        data: Some(flatten_credentials(&key.credentials)?),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    })
}

/// Whether a stored secret still reflects `desired` byte for byte
pub fn is_in_sync(existing: &Secret, desired: &Secret) -> bool {
    let existing_data = existing.data.clone().unwrap_or_default();
    let desired_data = desired.data.clone().unwrap_or_default();
    let key_id = |s: &Secret| s.annotations().get(secret_annotations::KEY_ID).cloned();

    existing_data == desired_data && key_id(existing) == key_id(desired)
}

/// Create the binding's secret, or delete and recreate it if it drifted
#[instrument(skip(client, binding, key), fields(binding = %binding.name_any()))]
pub async fn sync_credentials_secret(
    client: &Client,
    binding: &Binding,
    instance_id: &str,
    key: &RemoteKey,
) -> Result<SecretSync> {
    let namespace = binding.namespace().unwrap_or_default();
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    let desired = credentials_secret(binding, instance_id, key)?;
    let name = binding.secret_name();

    let outcome = match secrets.get_opt(&name).await? {
        None => SecretSync::Created,
        Some(existing) if is_in_sync(&existing, &desired) => return Ok(SecretSync::InSync),
        Some(_) => {
            info!("Secret {}/{} drifted from its credentials, recreating", namespace, name);
            delete_secret(client, &namespace, &name).await?;
            SecretSync::Recreated
        }
    };

    secrets.create(&PostParams::default(), &desired).await?;
    info!("Secret {}/{} written for key {}", namespace, name, key.id);
    Ok(outcome)
}

/// Delete a secret, treating "already gone" as success
pub async fn delete_secret(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    match secrets.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}
