// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Remote resource provider abstraction and its two API variants.

pub mod http;
pub mod marketplace;
pub mod resource_controller;
pub mod session;

use crate::constants::REDACTED;
use crate::types::ResourceContext;
use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub use marketplace::MarketplaceClient;
pub use resource_controller::ResourceControllerClient;
pub use session::{CloudSessionResolver, ProviderSession, SessionResolver};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Remote resource not found: {0}")]
    NotFound(String),

    #[error("Credentials are redacted: {0}")]
    Redacted(String),

    #[error("Provider endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Provider transport error: {0}")]
    Transport(String),

    #[error("Provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Missing and redacted are handled identically by callers
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_) | ProviderError::Redacted(_))
    }
}

/// A service instance as reported by the provider
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteInstance {
    pub id: String,
    pub name: String,
    /// Provider lifecycle state, e.g. "active" or "provisioning"
    pub state: String,
    pub dashboard_url: Option<String>,
}

/// A service key (credential) bound to an instance
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteKey {
    pub id: String,
    pub name: String,
    pub credentials: Map<String, Value>,
}

impl RemoteKey {
    /// The provider hides credential data from callers lacking access
    pub fn is_redacted(&self) -> bool {
        self.credentials.contains_key(REDACTED)
            || self
                .credentials
                .values()
                .any(|v| v.as_str() == Some(REDACTED))
    }

    /// Fails with [`ProviderError::Redacted`] when no real credential data came back
    pub fn revealed(self) -> Result<Self, ProviderError> {
        if self.is_redacted() {
            Err(ProviderError::Redacted(self.id))
        } else {
            Ok(self)
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Role {
    pub name: String,
    pub id: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstanceRequest {
    pub name: String,
    pub service_class: String,
    pub plan: String,
    pub context: ResourceContext,
    pub parameters: Map<String, Value>,
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyRequest {
    pub instance_id: String,
    pub name: String,
    pub role: Option<Role>,
    pub parameters: Map<String, Value>,
}

/// Operations the reconcilers need from a cloud provider.
///
/// Deletes report 404/410 as [`ProviderError::NotFound`]; callers decide
/// whether "already gone" counts as success.
#[async_trait]
pub trait RemoteResourceClient: Send + Sync {
    async fn create_instance(&self, request: &InstanceRequest) -> Result<RemoteInstance, ProviderError>;

    async fn get_instance(&self, id: &str) -> Result<RemoteInstance, ProviderError>;

    async fn find_instances_by_name(
        &self,
        name: &str,
        service_class: &str,
    ) -> Result<Vec<RemoteInstance>, ProviderError>;

    async fn delete_instance(&self, id: &str) -> Result<(), ProviderError>;

    async fn create_key(&self, request: &KeyRequest) -> Result<RemoteKey, ProviderError>;

    async fn get_key(&self, id: &str) -> Result<RemoteKey, ProviderError>;

    async fn find_keys_by_name(&self, instance_id: &str, name: &str) -> Result<Vec<RemoteKey>, ProviderError>;

    async fn delete_key(&self, id: &str) -> Result<(), ProviderError>;

    async fn list_roles(&self, service_class: &str) -> Result<Vec<Role>, ProviderError>;
}
