//! Control-plane client
//!
//! Whole-document GET/PUT/DELETE against the resource manager API. The
//! [`ControlPlane`] trait is the seam the resources talk to; [`ArmClient`]
//! is the HTTP implementation.

use crate::error::StorageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use storeflow_cloud::{CloudError, OperationContext, ResourceId, Result};

pub const DEFAULT_API_VERSION: &str = "2023-01-01";

/// Whole-document access to control-plane resources
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn get(&self, ctx: &OperationContext, id: &ResourceId) -> Result<Value>;

    /// Create or replace; returns the document as stored by the service
    async fn put(&self, ctx: &OperationContext, id: &ResourceId, body: Value) -> Result<Value>;

    async fn delete(&self, ctx: &OperationContext, id: &ResourceId) -> Result<()>;

    /// Children of `parent` in `collection` (e.g. `objectReplicationPolicies`)
    async fn list(
        &self,
        ctx: &OperationContext,
        parent: &ResourceId,
        collection: &str,
    ) -> Result<Vec<Value>>;
}

/// GET and decode
pub async fn get_json<T: DeserializeOwned>(
    control_plane: &dyn ControlPlane,
    ctx: &OperationContext,
    id: &ResourceId,
) -> Result<T> {
    let value = control_plane.get(ctx, id).await?;
    Ok(serde_json::from_value(value)?)
}

/// Encode, PUT and decode the response
pub async fn put_json<T: Serialize + DeserializeOwned>(
    control_plane: &dyn ControlPlane,
    ctx: &OperationContext,
    id: &ResourceId,
    body: &T,
) -> Result<T> {
    let value = control_plane.put(ctx, id, serde_json::to_value(body)?).await?;
    Ok(serde_json::from_value(value)?)
}

pub async fn list_json<T: DeserializeOwned>(
    control_plane: &dyn ControlPlane,
    ctx: &OperationContext,
    parent: &ResourceId,
    collection: &str,
) -> Result<Vec<T>> {
    control_plane
        .list(ctx, parent, collection)
        .await?
        .into_iter()
        .map(|v| serde_json::from_value(v).map_err(CloudError::from))
        .collect()
}

/// Resource manager error body
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    value: Vec<Value>,
}

/// HTTP client for the resource manager API
pub struct ArmClient {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    api_version: String,
}

impl ArmClient {
    /// `token` is an already-acquired bearer credential
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: token.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn send(
        &self,
        ctx: &OperationContext,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<Option<Value>> {
        let request = request
            .bearer_auth(&self.token)
            .query(&[("api-version", self.api_version.as_str())]);

        let response = tokio::select! {
            biased;
            _ = ctx.done() => {
                return Err(CloudError::Timeout(format!("request to {} abandoned", url)));
            }
            response = request.send() => response.map_err(StorageError::from)?,
        };

        let status = response.status();
        tracing::debug!("{} -> {}", url, status);

        if status.is_success() {
            let body = response.text().await.map_err(StorageError::from)?;
            if body.trim().is_empty() {
                return Ok(None);
            }
            return Ok(Some(serde_json::from_str(&body)?));
        }

        let message = error_message(url, response.text().await);

        Err(match status.as_u16() {
            404 => CloudError::NotFound(format!("{} ({})", url, message)),
            409 => CloudError::AlreadyExists(format!("{} ({})", url, message)),
            400 => CloudError::RemoteValidation(message),
            code => CloudError::ApiError(format!("{} returned {}: {}", url, code, message)),
        })
    }
}

#[async_trait]
impl ControlPlane for ArmClient {
    async fn get(&self, ctx: &OperationContext, id: &ResourceId) -> Result<Value> {
        let url = self.url(&id.to_string());
        self.send(ctx, self.client.get(&url), &url)
            .await?
            .ok_or_else(|| {
                StorageError::UnexpectedResponse {
                    url: url.clone(),
                    message: "empty body".to_string(),
                }
                .into()
            })
    }

    async fn put(&self, ctx: &OperationContext, id: &ResourceId, body: Value) -> Result<Value> {
        let url = self.url(&id.to_string());
        let response = self
            .send(ctx, self.client.put(&url).json(&body), &url)
            .await?;
        // Some services answer 202/204 without a body; echo what was sent
        Ok(response.unwrap_or(body))
    }

    async fn delete(&self, ctx: &OperationContext, id: &ResourceId) -> Result<()> {
        let url = self.url(&id.to_string());
        self.send(ctx, self.client.delete(&url), &url).await?;
        Ok(())
    }

    async fn list(
        &self,
        ctx: &OperationContext,
        parent: &ResourceId,
        collection: &str,
    ) -> Result<Vec<Value>> {
        let url = self.url(&format!("{}/{}", parent, collection));
        let Some(body) = self.send(ctx, self.client.get(&url), &url).await? else {
            return Ok(Vec::new());
        };
        let list: ListResponse = serde_json::from_value(body)?;
        Ok(list.value)
    }
}

/// Message for a failed response, from its body when one could be read
fn error_message<E: std::fmt::Display>(
    url: &str,
    body: std::result::Result<String, E>,
) -> String {
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!("Could not read error body from {}: {}", url, e);
            return format!("error body unreadable: {}", e);
        }
    };
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(parsed) if !parsed.error.message.is_empty() => {
            format!("{}: {}", parsed.error.code, parsed.error.message)
        }
        _ => body,
    }
}
