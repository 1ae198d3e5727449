// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Authenticated JSON-over-HTTP plumbing shared by the provider variants.

use crate::provider::ProviderError;
use reqwest::{Method, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use std::error::Error as StdError;
use tracing::debug;
use url::Url;

/// REST client bound to one API endpoint and bearer token
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base: Url,
    token: String,
}

impl RestClient {
    pub fn new(http: reqwest::Client, base: &str, token: String) -> Result<Self, ProviderError> {
        let base = Url::parse(base)
            .map_err(|e| ProviderError::InvalidResponse(format!("Invalid endpoint {}: {}", base, e)))?;
        Ok(Self { http, base, token })
    }

    /// Build a URL under the base endpoint; segments are percent-encoded
    pub fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url, ProviderError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::InvalidResponse(format!("Endpoint {} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    pub async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ProviderError> {
        let text = self.send(self.http.request(Method::GET, url)).await?;
        parse_body(&text)
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, url: Url, body: &B) -> Result<T, ProviderError> {
        let text = self.send(self.http.request(Method::POST, url).json(body)).await?;
        parse_body(&text)
    }

    pub async fn delete(&self, url: Url) -> Result<(), ProviderError> {
        self.send(self.http.request(Method::DELETE, url)).await.map(|_| ())
    }

    async fn send(&self, request: RequestBuilder) -> Result<String, ProviderError> {
        let response = request
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        debug!("Provider responded with {} for {}", status, response.url());
        let text = response.text().await.map_err(transport_error)?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(status_error(status.as_u16(), text))
        }
    }
}

fn parse_body<T: DeserializeOwned>(text: &str) -> Result<T, ProviderError> {
    serde_json::from_str(text).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

/// Map a non-success HTTP status onto the provider error taxonomy
pub fn status_error(status: u16, body: String) -> ProviderError {
    match status {
        404 | 410 => ProviderError::NotFound(body),
        _ => ProviderError::Api { status, message: body },
    }
}

/// Classify a transport failure; name resolution failures are reported separately
pub fn transport_error(err: reqwest::Error) -> ProviderError {
    if is_dns_failure(&err) {
        ProviderError::Unreachable(err.to_string())
    } else {
        ProviderError::Transport(err.to_string())
    }
}

fn is_dns_failure(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        let text = e.to_string().to_ascii_lowercase();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return true;
        }
        current = e.source();
    }
    false
}
