// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Resolves the provider session (credentials, account context, API variant)
//! a record is reconciled against.

use crate::config::Config;
use crate::error::{OperatorError, Result};
use crate::provider::http::{status_error, transport_error, RestClient};
use crate::provider::{MarketplaceClient, ProviderError, RemoteResourceClient, ResourceControllerClient};
use crate::types::{ResourceContext, ServiceClassType};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, instrument};

const API_KEY: &str = "api-key";
const REGION: &str = "region";
const APIKEY_GRANT: &str = "urn:ibm:params:oauth:grant-type:apikey";

/// A provider client paired with the fully resolved account context
#[derive(Clone)]
pub struct ProviderSession {
    pub client: Arc<dyn RemoteResourceClient>,
    pub context: ResourceContext,
}

#[async_trait]
pub trait SessionResolver: Send + Sync {
    /// Resolve the session for a record in `namespace`; `overrides` wins over operator defaults
    async fn resolve(
        &self,
        namespace: &str,
        class_type: ServiceClassType,
        overrides: Option<&ResourceContext>,
    ) -> Result<ProviderSession>;
}

/// Resolves sessions from the operator secret and config map, exchanging the
/// API key for a bearer token on every call.
pub struct CloudSessionResolver {
    client: Client,
    http: reqwest::Client,
    config: Arc<Config>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    uaa_token: Option<String>,
}

impl CloudSessionResolver {
    pub fn new(client: Client, config: Arc<Config>) -> Self {
        Self {
            client,
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Look the object up in `namespace`, then in the control namespace
    async fn lookup<K>(&self, namespace: &str, name: &str) -> Result<Option<K>>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        for ns in [namespace, self.config.control_namespace.as_str()] {
            let api: Api<K> = Api::namespaced(self.client.clone(), ns);
            if let Some(found) = api.get_opt(name).await? {
                debug!("Found {} in namespace {}", name, ns);
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    #[instrument(skip(self, api_key))]
    async fn exchange_token(&self, api_key: &str) -> std::result::Result<TokenResponse, ProviderError> {
        let url = format!("{}/identity/token", self.config.iam_endpoint.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .basic_auth("bx", Some("bx"))
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", APIKEY_GRANT),
                ("apikey", api_key),
                ("response_type", "cloud_iam uaa"),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), text));
        }
        serde_json::from_str(&text).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

/// Decode one key of the operator secret
fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .and_then(|v| String::from_utf8(v.0.clone()).ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Default context from the operator config map, with the secret's region as a fallback
pub fn default_context(data: &BTreeMap<String, String>, secret_region: Option<String>) -> ResourceContext {
    let get = |key: &str| data.get(key).cloned().filter(|v| !v.is_empty());
    ResourceContext {
        org: get("org"),
        space: get("space"),
        region: get("region").or(secret_region),
        resource_group: get("resourcegroup"),
        resource_group_id: get("resourcegroupid"),
        resource_location: get("resourcelocation"),
    }
}

#[async_trait]
impl SessionResolver for CloudSessionResolver {
    #[instrument(skip(self, overrides))]
    async fn resolve(
        &self,
        namespace: &str,
        class_type: ServiceClassType,
        overrides: Option<&ResourceContext>,
    ) -> Result<ProviderSession> {
        let secret_name = &self.config.operator_secret_name;
        let secret: Secret = self.lookup(namespace, secret_name).await?.ok_or_else(|| {
            OperatorError::ContextNotFound(format!(
                "secret {} not found in {} or {}",
                secret_name, namespace, self.config.control_namespace
            ))
        })?;
        let api_key = secret_value(&secret, API_KEY).ok_or_else(|| {
            OperatorError::ContextNotFound(format!("secret {} has no '{}' key", secret_name, API_KEY))
        })?;

        let defaults = self
            .lookup::<ConfigMap>(namespace, &self.config.operator_config_map_name)
            .await?
            .and_then(|cm| cm.data)
            .unwrap_or_default();
        let defaults = default_context(&defaults, secret_value(&secret, REGION));
        let context = overrides.map(|o| o.or(&defaults)).unwrap_or(defaults);

        let token = self.exchange_token(&api_key).await?;

        let client: Arc<dyn RemoteResourceClient> = match class_type {
            ServiceClassType::Legacy => {
                let bearer = token.uaa_token.unwrap_or(token.access_token);
                let endpoint = match context.region.as_deref() {
                    Some(region) => format!("https://api.{}.cf.cloud.ibm.com", region),
                    None => self.config.cf_endpoint.clone(),
                };
                let api = RestClient::new(self.http.clone(), &endpoint, bearer)?;
                Arc::new(MarketplaceClient::new(api, context.clone()))
            }
            ServiceClassType::ResourceController => Arc::new(ResourceControllerClient::new(
                self.http.clone(),
                &self.config,
                token.access_token,
            )?),
        };

        Ok(ProviderSession { client, context })
    }
}
