use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::ServerConfig;

use super::api_types::{ApiFeatureCollection, ApiLayer, ApiRole, ApiUser};
use super::error::RemoteError;
use super::types::{Feature, Layer, Role, Stored, User};
use super::RemoteSource;

/// HTTP client for the MAGE server API
#[derive(Clone)]
pub struct MageClient {
  http: reqwest::Client,
  base: Url,
  token: Option<String>,
}

impl MageClient {
  pub fn new(config: &ServerConfig, token: Option<String>) -> Result<Self> {
    // Url::join drops the last path segment unless the base ends with '/'
    let mut raw = config.url.clone();
    if !raw.ends_with('/') {
      raw.push('/');
    }
    let base =
      Url::parse(&raw).map_err(|e| eyre!("Invalid server url {}: {}", config.url, e))?;

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base, token })
  }

  /// GET a JSON document relative to the server url.
  async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
    let url = self.base.join(path)?;
    debug!(%url, "GET");

    let mut request = self.http.get(url.clone());
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(|source| RemoteError::Transport {
      url: url.to_string(),
      source,
    })?;

    let status = response.status();
    if !status.is_success() {
      return Err(RemoteError::Status {
        url: url.to_string(),
        status,
      });
    }

    let body = response
      .bytes()
      .await
      .map_err(|source| RemoteError::Transport {
        url: url.to_string(),
        source,
      })?;

    serde_json::from_slice(&body).map_err(|e| RemoteError::Parse {
      url: url.to_string(),
      reason: e.to_string(),
    })
  }
}

#[async_trait]
impl RemoteSource for MageClient {
  async fn list_roles(&self) -> Result<Vec<Role>, RemoteError> {
    let roles: Vec<ApiRole> = self.get("api/roles").await?;
    Ok(roles.into_iter().map(Role::from).collect())
  }

  async fn list_users(&self) -> Result<Vec<User>, RemoteError> {
    let users: Vec<ApiUser> = self.get("api/users").await?;
    Ok(users.into_iter().map(User::from).collect())
  }

  async fn list_layers(&self) -> Result<Vec<Layer>, RemoteError> {
    let layers: Vec<ApiLayer> = self.get("api/layers").await?;
    Ok(layers.into_iter().map(Layer::from).collect())
  }

  async fn list_features(&self, layer: &Stored<Layer>) -> Result<Vec<Feature>, RemoteError> {
    let endpoint = format!("api/layers/{}/features", layer.remote_id);
    let collection: ApiFeatureCollection = self.get(&endpoint).await?;

    Ok(
      collection
        .features
        .into_iter()
        .map(|f| f.into_feature(layer.id))
        .collect(),
    )
  }
}
