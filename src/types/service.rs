// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::{annotations, ALIAS_PLAN, LEGACY_CLASS_TYPE};
use crate::types::common::{LifecycleStatus, Param, Phase, RemoteRef, ResourceContext};
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[kube(group = "ibmcloud.ibm.com", version = "v1", kind = "Service")]
#[kube(namespaced)]
#[kube(status = "ServiceStatus")]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    pub service_class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_class_type: Option<String>,
    pub plan: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Param>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ResourceContext>,
}

/// Which provider API backs a service class
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceClassType {
    /// Legacy marketplace (Cloud Foundry) API
    Legacy,
    /// Resource-controller API
    ResourceController,
}

impl ServiceClassType {
    pub fn from_spec(class_type: Option<&str>) -> Self {
        match class_type {
            Some(LEGACY_CLASS_TYPE) => ServiceClassType::Legacy,
            _ => ServiceClassType::ResourceController,
        }
    }
}

impl ServiceSpec {
    pub fn class_type(&self) -> ServiceClassType {
        ServiceClassType::from_spec(self.service_class_type.as_deref())
    }

    pub fn is_alias(&self) -> bool {
        self.plan == ALIAS_PLAN
    }
}

impl Service {
    /// Name of the instance on the provider side
    pub fn external_name(&self) -> String {
        self.spec
            .external_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.name_any())
    }

    /// Self-healing is opt-in and never applies to instances this record does not own
    pub fn self_healing(&self) -> bool {
        !self.spec.is_alias()
            && self
                .annotations()
                .get(annotations::SELF_HEALING)
                .is_some_and(|v| v == annotations::ENABLED)
    }

    /// Instance ID pinned by annotation, used to pick between same-named alias targets
    pub fn pinned_instance_id(&self) -> Option<&str> {
        self.annotations()
            .get(annotations::INSTANCE_ID)
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Remote instance ID once the record is bound to one
    pub fn instance_id(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.instance_id.id())
    }

    /// Returns a copy with plan and class fields restored from status, if the
    /// spec diverged after an instance was assigned.
    pub fn reverted_immutable_fields(&self) -> Option<Service> {
        let status = self.status.as_ref()?;
        if status.instance_id.is_unset() {
            return None;
        }
        if self.spec.plan == status.plan
            && self.spec.service_class == status.service_class
            && self.spec.service_class_type == status.service_class_type
        {
            return None;
        }
        let mut reverted = self.clone();
        reverted.spec.plan = status.plan.clone();
        reverted.spec.service_class = status.service_class.clone();
        reverted.spec.service_class_type = status.service_class_type.clone();
        Some(reverted)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[schemars(with = "String")]
    pub state: Phase,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub service_class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_class_type: Option<String>,
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    #[schemars(with = "String")]
    pub instance_id: RemoteRef,
    #[serde(default)]
    pub external_name: String,
    #[serde(default)]
    pub context: ResourceContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
}

impl ServiceStatus {
    /// Initial status echoing the spec fields that become immutable
    pub fn pending(service: &Service) -> Self {
        ServiceStatus {
            state: Phase::Pending,
            message: "Processing Resource".to_string(),
            service_class: service.spec.service_class.clone(),
            service_class_type: service.spec.service_class_type.clone(),
            plan: service.spec.plan.clone(),
            instance_id: RemoteRef::Unset,
            external_name: service.external_name(),
            context: service.spec.context.clone().unwrap_or_default(),
            dashboard_url: None,
        }
    }

    /// Record the spec fields a new instance is created from. They stay
    /// editable until an instance ID is assigned.
    pub fn echo_spec(&mut self, service: &Service) {
        self.service_class = service.spec.service_class.clone();
        self.service_class_type = service.spec.service_class_type.clone();
        self.plan = service.spec.plan.clone();
        self.external_name = service.external_name();
    }
}

impl LifecycleStatus for ServiceStatus {
    fn state(&self) -> &Phase {
        &self.state
    }

    fn set_state(&mut self, state: Phase, message: impl Into<String>) {
        self.state = state;
        self.message = message.into();
    }
}
