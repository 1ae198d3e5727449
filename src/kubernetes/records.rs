// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Optimistic-concurrency writes against desired-state records.
//!
//! Every write carries the record's resourceVersion. A conflict means another
//! writer got there first; it is reported as `Ok(None)` so the caller can stop
//! and wait for the change notification that write produced.

use crate::error::Result;
use kube::{
    api::{Patch, PatchParams, PostParams},
    Api, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use std::fmt::Debug;
use tracing::debug;

fn lost_race<K>(result: kube::Result<K>, name: &str) -> Result<Option<K>> {
    match result {
        Ok(updated) => Ok(Some(updated)),
        Err(kube::Error::Api(err)) if err.code == 409 => {
            debug!("Write to {} lost a concurrent update, waiting for next event", name);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Persist `status` on the record's status subresource
pub async fn write_status<K, S>(api: &Api<K>, obj: &K, status: &S) -> Result<Option<K>>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    S: Serialize,
{
    let name = obj.name_any();
    let patch = json!({
        "metadata": { "resourceVersion": obj.resource_version() },
        "status": status,
    });
    lost_race(
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await,
        &name,
    )
}

/// Replace the whole record (spec and metadata)
pub async fn replace<K>(api: &Api<K>, obj: &K) -> Result<Option<K>>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    let name = obj.name_any();
    lost_race(api.replace(&name, &PostParams::default(), obj).await, &name)
}

pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

pub fn is_deleting<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

pub async fn add_finalizer<K>(api: &Api<K>, obj: &K, finalizer: &str) -> Result<Option<K>>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    let mut updated = obj.clone();
    updated.finalizers_mut().push(finalizer.to_string());
    replace(api, &updated).await
}

pub async fn remove_finalizer<K>(api: &Api<K>, obj: &K, finalizer: &str) -> Result<Option<K>>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    let mut updated = obj.clone();
    updated.finalizers_mut().retain(|f| f != finalizer);
    replace(api, &updated).await
}
