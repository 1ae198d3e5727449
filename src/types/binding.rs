// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::annotations;
use crate::types::common::{LifecycleStatus, Param, Phase, RemoteRef};
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[kube(group = "ibmcloud.ibm.com", version = "v1", kind = "Binding")]
#[kube(namespaced)]
#[kube(status = "BindingStatus")]
#[serde(rename_all = "camelCase")]
pub struct BindingSpec {
    pub service_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Param>,
}

impl Binding {
    /// Name of the Secret the credentials are materialized into
    pub fn secret_name(&self) -> String {
        self.spec
            .secret_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.name_any())
    }

    /// Namespace the parent Service lives in
    pub fn service_namespace(&self) -> String {
        self.spec
            .service_namespace
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.namespace().unwrap_or_default())
    }

    /// Name of the pre-existing credential this binding adopts, if any
    pub fn alias(&self) -> Option<&str> {
        self.spec.alias.as_deref().filter(|a| !a.is_empty())
    }

    /// Alias-bound credentials are foreign and never deleted remotely
    pub fn is_alias(&self) -> bool {
        self.alias().is_some()
    }

    /// Key ID pinned by annotation for alias lookups
    pub fn pinned_key_id(&self) -> Option<&str> {
        self.annotations()
            .get(annotations::KEY_ID)
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BindingStatus {
    #[schemars(with = "String")]
    pub state: Phase,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub secret_name: String,
    #[serde(default)]
    #[schemars(with = "String")]
    pub instance_id: RemoteRef,
    #[serde(default)]
    #[schemars(with = "String")]
    pub key_instance_id: RemoteRef,
}

impl BindingStatus {
    pub fn pending(binding: &Binding) -> Self {
        BindingStatus {
            state: Phase::Pending,
            message: "Processing Resource".to_string(),
            secret_name: binding.secret_name(),
            instance_id: RemoteRef::Unset,
            key_instance_id: RemoteRef::Unset,
        }
    }
}

impl LifecycleStatus for BindingStatus {
    fn state(&self) -> &Phase {
        &self.state
    }

    fn set_state(&mut self, state: Phase, message: impl Into<String>) {
        self.state = state;
        self.message = message.into();
    }
}
