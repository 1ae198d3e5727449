// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Shapes shared by the Service and Binding resources.

use serde::{Deserialize, Serialize};
use std::fmt;

const IN_PROGRESS: &str = "IN PROGRESS";

/// Lifecycle phase reported in `status.state`.
///
/// Provider lifecycle states that do not map onto one of the controller's own
/// phases are carried verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Phase {
    #[default]
    Pending,
    Online,
    Failed,
    Deleting,
    Provider(String),
}

impl Phase {
    /// Map a provider lifecycle state onto a phase
    pub fn from_provider(state: &str) -> Phase {
        match state.to_ascii_lowercase().as_str() {
            "succeeded" | "active" | "provisioned" => Phase::Online,
            _ => Phase::Provider(state.to_string()),
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Phase::Online)
    }
}

impl From<String> for Phase {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Pending" => Phase::Pending,
            "Online" => Phase::Online,
            "Failed" => Phase::Failed,
            "Deleting" => Phase::Deleting,
            _ => Phase::Provider(s),
        }
    }
}

impl From<Phase> for String {
    fn from(p: Phase) -> Self {
        p.to_string()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Pending => f.write_str("Pending"),
            Phase::Online => f.write_str("Online"),
            Phase::Failed => f.write_str("Failed"),
            Phase::Deleting => f.write_str("Deleting"),
            Phase::Provider(s) => f.write_str(s),
        }
    }
}

/// Reference to a remote object owned or adopted by a record.
///
/// `InProgress` is persisted before a create call is issued so that a restart
/// between the create and the status write looks the object up instead of
/// creating it twice.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RemoteRef {
    #[default]
    Unset,
    InProgress,
    Bound(String),
}

impl RemoteRef {
    pub fn id(&self) -> Option<&str> {
        match self {
            RemoteRef::Bound(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, RemoteRef::Unset)
    }
}

impl From<String> for RemoteRef {
    fn from(s: String) -> Self {
        match s.as_str() {
            "" => RemoteRef::Unset,
            IN_PROGRESS => RemoteRef::InProgress,
            _ => RemoteRef::Bound(s),
        }
    }
}

impl From<RemoteRef> for String {
    fn from(r: RemoteRef) -> Self {
        match r {
            RemoteRef::Unset => String::new(),
            RemoteRef::InProgress => IN_PROGRESS.to_string(),
            RemoteRef::Bound(id) => id,
        }
    }
}

/// A parameter handed to the provider on create, either inline or looked up
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Param {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ParamSource>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParamSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<KeyRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map_key_ref: Option<KeyRef>,
}

/// A key inside a named ConfigMap or Secret in the record's namespace
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
pub struct KeyRef {
    pub name: String,
    pub key: String,
}

/// Where in the provider account a service instance lives
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_location: Option<String>,
}

impl ResourceContext {
    /// Fill every unset field from `defaults`
    pub fn or(&self, defaults: &ResourceContext) -> ResourceContext {
        ResourceContext {
            org: self.org.clone().or_else(|| defaults.org.clone()),
            space: self.space.clone().or_else(|| defaults.space.clone()),
            region: self.region.clone().or_else(|| defaults.region.clone()),
            resource_group: self
                .resource_group
                .clone()
                .or_else(|| defaults.resource_group.clone()),
            resource_group_id: self
                .resource_group_id
                .clone()
                .or_else(|| defaults.resource_group_id.clone()),
            resource_location: self
                .resource_location
                .clone()
                .or_else(|| defaults.resource_location.clone()),
        }
    }
}

/// Status fields every reconciled resource carries
pub trait LifecycleStatus: Clone + PartialEq + Serialize {
    fn state(&self) -> &Phase;
    fn set_state(&mut self, state: Phase, message: impl Into<String>);
}
