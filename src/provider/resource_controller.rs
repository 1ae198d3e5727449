// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Resource-controller API variant of the remote resource client.

use crate::config::Config;
use crate::provider::http::RestClient;
use crate::provider::{
    InstanceRequest, KeyRequest, ProviderError, RemoteInstance, RemoteKey, RemoteResourceClient, Role,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, instrument};

/// Lifecycle state of an instance that has been deleted but is still listed
const REMOVED: &str = "removed";

pub struct ResourceControllerClient {
    resources: RestClient,
    catalog: RestClient,
    iam: RestClient,
}

#[derive(Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    resources: Vec<T>,
}

#[derive(Deserialize)]
struct InstanceBody {
    id: String,
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    resource_id: Option<String>,
    #[serde(default)]
    dashboard_url: Option<String>,
}

impl From<InstanceBody> for RemoteInstance {
    fn from(body: InstanceBody) -> Self {
        RemoteInstance {
            id: body.id,
            name: body.name,
            state: body.state,
            dashboard_url: body.dashboard_url,
        }
    }
}

#[derive(Deserialize)]
struct KeyBody {
    id: String,
    name: String,
    #[serde(default)]
    source_crn: Option<String>,
    #[serde(default)]
    credentials: Map<String, Value>,
}

impl From<KeyBody> for RemoteKey {
    fn from(body: KeyBody) -> Self {
        RemoteKey {
            id: body.id,
            name: body.name,
            credentials: body.credentials,
        }
    }
}

#[derive(Deserialize)]
struct CatalogEntry {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct ResourceGroup {
    id: String,
}

#[derive(Deserialize)]
struct RolePage {
    #[serde(default)]
    service_roles: Vec<RoleBody>,
    #[serde(default)]
    system_roles: Vec<RoleBody>,
}

#[derive(Deserialize)]
struct RoleBody {
    display_name: String,
    crn: String,
}

impl ResourceControllerClient {
    pub fn new(http: reqwest::Client, config: &Config, token: String) -> Result<Self, ProviderError> {
        Ok(Self {
            resources: RestClient::new(http.clone(), &config.resource_controller_endpoint, token.clone())?,
            catalog: RestClient::new(http.clone(), &config.global_catalog_endpoint, token.clone())?,
            iam: RestClient::new(http, &config.iam_endpoint, token)?,
        })
    }

    /// Look up a catalog entry by name, returning its ID
    async fn catalog_id(&self, name: &str) -> Result<String, ProviderError> {
        let url = self.catalog.url(&["api", "v1"], &[("q", name)])?;
        let page: Page<CatalogEntry> = self.catalog.get(url).await?;
        page.resources
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| e.id)
            .ok_or_else(|| ProviderError::NotFound(format!("service class {}", name)))
    }

    async fn plan_id(&self, service_id: &str, plan: &str) -> Result<String, ProviderError> {
        let url = self.catalog.url(&["api", "v1", service_id, "plan"], &[])?;
        let page: Page<CatalogEntry> = self.catalog.get(url).await?;
        page.resources
            .into_iter()
            .find(|e| e.name == plan)
            .map(|e| e.id)
            .ok_or_else(|| ProviderError::NotFound(format!("plan {}", plan)))
    }

    async fn resource_group_id(&self, request: &InstanceRequest) -> Result<String, ProviderError> {
        if let Some(id) = request.context.resource_group_id.clone() {
            return Ok(id);
        }
        let url = match request.context.resource_group.as_deref() {
            Some(name) => self.resources.url(&["v2", "resource_groups"], &[("name", name)])?,
            None => self.resources.url(&["v2", "resource_groups"], &[("default", "true")])?,
        };
        let page: Page<ResourceGroup> = self.resources.get(url).await?;
        page.resources
            .into_iter()
            .next()
            .map(|g| g.id)
            .ok_or_else(|| ProviderError::NotFound("resource group".to_string()))
    }
}

#[async_trait]
impl RemoteResourceClient for ResourceControllerClient {
    #[instrument(skip(self, request), fields(name = %request.name))]
    async fn create_instance(&self, request: &InstanceRequest) -> Result<RemoteInstance, ProviderError> {
        let service_id = self.catalog_id(&request.service_class).await?;
        let plan_id = self.plan_id(&service_id, &request.plan).await?;
        let resource_group = self.resource_group_id(request).await?;
        let target = request
            .context
            .resource_location
            .clone()
            .or_else(|| request.context.region.clone())
            .unwrap_or_else(|| "global".to_string());

        info!("Creating resource instance {} ({}/{})", request.name, request.service_class, request.plan);
        let body = json!({
            "name": request.name,
            "target": target,
            "resource_group": resource_group,
            "resource_plan_id": plan_id,
            "parameters": request.parameters,
            "tags": request.tags,
        });
        let url = self.resources.url(&["v2", "resource_instances"], &[])?;
        let created: InstanceBody = self.resources.post(url, &body).await?;
        Ok(created.into())
    }

    async fn get_instance(&self, id: &str) -> Result<RemoteInstance, ProviderError> {
        let url = self.resources.url(&["v2", "resource_instances", id], &[])?;
        let instance: InstanceBody = self.resources.get(url).await?;
        if instance.state == REMOVED {
            return Err(ProviderError::NotFound(id.to_string()));
        }
        Ok(instance.into())
    }

    async fn find_instances_by_name(
        &self,
        name: &str,
        service_class: &str,
    ) -> Result<Vec<RemoteInstance>, ProviderError> {
        let service_id = self.catalog_id(service_class).await?;
        let url = self.resources.url(
            &["v2", "resource_instances"],
            &[("name", name), ("type", "service_instance")],
        )?;
        let page: Page<InstanceBody> = self.resources.get(url).await?;
        Ok(page
            .resources
            .into_iter()
            .filter(|i| i.state != REMOVED)
            .filter(|i| i.resource_id.as_deref().map_or(true, |r| r == service_id))
            .map(RemoteInstance::from)
            .collect())
    }

    #[instrument(skip(self))]
    async fn delete_instance(&self, id: &str) -> Result<(), ProviderError> {
        let url = self
            .resources
            .url(&["v2", "resource_instances", id], &[("recursive", "true")])?;
        self.resources.delete(url).await
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    async fn create_key(&self, request: &KeyRequest) -> Result<RemoteKey, ProviderError> {
        let mut body = json!({
            "name": request.name,
            "source": request.instance_id,
            "parameters": request.parameters,
        });
        if let Some(role) = &request.role {
            body["role"] = Value::String(role.id.clone());
        }
        let url = self.resources.url(&["v2", "resource_keys"], &[])?;
        let created: KeyBody = self.resources.post(url, &body).await?;
        Ok(created.into())
    }

    async fn get_key(&self, id: &str) -> Result<RemoteKey, ProviderError> {
        let url = self.resources.url(&["v2", "resource_keys", id], &[])?;
        let key: KeyBody = self.resources.get(url).await?;
        Ok(key.into())
    }

    async fn find_keys_by_name(&self, instance_id: &str, name: &str) -> Result<Vec<RemoteKey>, ProviderError> {
        let url = self.resources.url(&["v2", "resource_keys"], &[("name", name)])?;
        let page: Page<KeyBody> = self.resources.get(url).await?;
        Ok(page
            .resources
            .into_iter()
            .filter(|k| k.source_crn.as_deref().map_or(true, |s| s == instance_id))
            .map(RemoteKey::from)
            .collect())
    }

    #[instrument(skip(self))]
    async fn delete_key(&self, id: &str) -> Result<(), ProviderError> {
        let url = self.resources.url(&["v2", "resource_keys", id], &[])?;
        self.resources.delete(url).await
    }

    async fn list_roles(&self, service_class: &str) -> Result<Vec<Role>, ProviderError> {
        let url = self.iam.url(&["v2", "roles"], &[("service_name", service_class)])?;
        let page: RolePage = self.iam.get(url).await?;
        Ok(page
            .service_roles
            .into_iter()
            .chain(page.system_roles)
            .map(|r| Role { name: r.display_name, id: r.crn })
            .collect())
    }
}
