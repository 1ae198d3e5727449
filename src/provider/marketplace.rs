// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Legacy marketplace (Cloud Foundry v2) variant of the remote resource client.

use crate::provider::http::RestClient;
use crate::provider::{
    InstanceRequest, KeyRequest, ProviderError, RemoteInstance, RemoteKey, RemoteResourceClient, Role,
};
use crate::types::ResourceContext;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, instrument};

pub struct MarketplaceClient {
    api: RestClient,
    context: ResourceContext,
}

#[derive(Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    resources: Vec<Resource<T>>,
}

#[derive(Deserialize)]
struct Resource<T> {
    metadata: Metadata,
    entity: T,
}

#[derive(Deserialize)]
struct Metadata {
    guid: String,
}

#[derive(Deserialize)]
struct Named {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct InstanceEntity {
    name: String,
    #[serde(default)]
    last_operation: Option<LastOperation>,
    #[serde(default)]
    dashboard_url: Option<String>,
}

#[derive(Deserialize)]
struct LastOperation {
    state: String,
}

#[derive(Deserialize)]
struct KeyEntity {
    name: String,
    #[serde(default)]
    credentials: Map<String, Value>,
}

fn instance_from(resource: Resource<InstanceEntity>) -> RemoteInstance {
    RemoteInstance {
        id: resource.metadata.guid,
        name: resource.entity.name,
        state: resource
            .entity
            .last_operation
            .map(|op| op.state)
            .unwrap_or_else(|| "succeeded".to_string()),
        dashboard_url: resource.entity.dashboard_url,
    }
}

fn key_from(resource: Resource<KeyEntity>) -> RemoteKey {
    RemoteKey {
        id: resource.metadata.guid,
        name: resource.entity.name,
        credentials: resource.entity.credentials,
    }
}

impl MarketplaceClient {
    pub fn new(api: RestClient, context: ResourceContext) -> Self {
        Self { api, context }
    }

    async fn first_guid(&self, segments: &[&str], query: &[(&str, &str)], what: &str) -> Result<String, ProviderError> {
        let url = self.api.url(segments, query)?;
        let page: Page<Named> = self.api.get(url).await?;
        page.resources
            .into_iter()
            .next()
            .map(|r| r.metadata.guid)
            .ok_or_else(|| ProviderError::NotFound(what.to_string()))
    }

    /// Resolve the space GUID for the session's org/space pair
    async fn space_guid(&self) -> Result<String, ProviderError> {
        let org = self.context.org.as_deref().unwrap_or_default();
        let space = self.context.space.as_deref().unwrap_or_default();
        let org_filter = format!("name:{}", org);
        let org_guid = self
            .first_guid(&["v2", "organizations"], &[("q", org_filter.as_str())], &format!("organization {}", org))
            .await?;
        let space_filter = format!("name:{}", space);
        let org_guid_filter = format!("organization_guid:{}", org_guid);
        self.first_guid(
            &["v2", "spaces"],
            &[("q", space_filter.as_str()), ("q", org_guid_filter.as_str())],
            &format!("space {}", space),
        )
        .await
    }

    async fn plan_guid(&self, service_class: &str, plan: &str) -> Result<String, ProviderError> {
        let label_filter = format!("label:{}", service_class);
        let service_guid = self
            .first_guid(&["v2", "services"], &[("q", label_filter.as_str())], &format!("service {}", service_class))
            .await?;
        let service_filter = format!("service_guid:{}", service_guid);
        let url = self
            .api
            .url(&["v2", "service_plans"], &[("q", service_filter.as_str())])?;
        let page: Page<Named> = self.api.get(url).await?;
        page.resources
            .into_iter()
            .find(|p| p.entity.name == plan)
            .map(|p| p.metadata.guid)
            .ok_or_else(|| ProviderError::NotFound(format!("plan {}", plan)))
    }
}

#[async_trait]
impl RemoteResourceClient for MarketplaceClient {
    #[instrument(skip(self, request), fields(name = %request.name))]
    async fn create_instance(&self, request: &InstanceRequest) -> Result<RemoteInstance, ProviderError> {
        let space_guid = self.space_guid().await?;
        let plan_guid = self.plan_guid(&request.service_class, &request.plan).await?;

        info!("Creating marketplace instance {} ({}/{})", request.name, request.service_class, request.plan);
        let body = json!({
            "name": request.name,
            "space_guid": space_guid,
            "service_plan_guid": plan_guid,
            "parameters": request.parameters,
            "tags": request.tags,
        });
        let url = self
            .api
            .url(&["v2", "service_instances"], &[("accepts_incomplete", "true")])?;
        let created: Resource<InstanceEntity> = self.api.post(url, &body).await?;
        Ok(instance_from(created))
    }

    async fn get_instance(&self, id: &str) -> Result<RemoteInstance, ProviderError> {
        let url = self.api.url(&["v2", "service_instances", id], &[])?;
        let instance: Resource<InstanceEntity> = self.api.get(url).await?;
        Ok(instance_from(instance))
    }

    async fn find_instances_by_name(
        &self,
        name: &str,
        _service_class: &str,
    ) -> Result<Vec<RemoteInstance>, ProviderError> {
        let space_guid = self.space_guid().await?;
        let name_filter = format!("name:{}", name);
        let url = self.api.url(
            &["v2", "spaces", space_guid.as_str(), "service_instances"],
            &[("q", name_filter.as_str())],
        )?;
        let page: Page<InstanceEntity> = self.api.get(url).await?;
        Ok(page.resources.into_iter().map(instance_from).collect())
    }

    #[instrument(skip(self))]
    async fn delete_instance(&self, id: &str) -> Result<(), ProviderError> {
        let url = self.api.url(
            &["v2", "service_instances", id],
            &[("accepts_incomplete", "true"), ("recursive", "true")],
        )?;
        self.api.delete(url).await
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    async fn create_key(&self, request: &KeyRequest) -> Result<RemoteKey, ProviderError> {
        let body = json!({
            "name": request.name,
            "service_instance_guid": request.instance_id,
            "parameters": request.parameters,
        });
        let url = self.api.url(&["v2", "service_keys"], &[])?;
        let created: Resource<KeyEntity> = self.api.post(url, &body).await?;
        Ok(key_from(created))
    }

    async fn get_key(&self, id: &str) -> Result<RemoteKey, ProviderError> {
        let url = self.api.url(&["v2", "service_keys", id], &[])?;
        let key: Resource<KeyEntity> = self.api.get(url).await?;
        Ok(key_from(key))
    }

    async fn find_keys_by_name(&self, instance_id: &str, name: &str) -> Result<Vec<RemoteKey>, ProviderError> {
        let name_filter = format!("name:{}", name);
        let url = self.api.url(
            &["v2", "service_instances", instance_id, "service_keys"],
            &[("q", name_filter.as_str())],
        )?;
        let page: Page<KeyEntity> = self.api.get(url).await?;
        Ok(page.resources.into_iter().map(key_from).collect())
    }

    #[instrument(skip(self))]
    async fn delete_key(&self, id: &str) -> Result<(), ProviderError> {
        let url = self.api.url(&["v2", "service_keys", id], &[])?;
        self.api.delete(url).await
    }

    /// Marketplace keys carry no IAM role
    async fn list_roles(&self, _service_class: &str) -> Result<Vec<Role>, ProviderError> {
        Ok(Vec::new())
    }
}
