//! Serde-deserializable types matching MAGE server responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on what gets persisted.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use super::types::{Feature, FeatureProperty, Layer, Role, User};

/// Server ids are strings for most entities but plain numbers for layers.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  match Value::deserialize(deserializer)? {
    Value::String(s) => Ok(s),
    Value::Number(n) => Ok(n.to_string()),
    other => Err(serde::de::Error::custom(format!(
      "expected string or number id, got {}",
      other
    ))),
  }
}

// ============================================================================
// Roles
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiRole {
  #[serde(deserialize_with = "deserialize_id")]
  pub id: String,
  pub name: String,
  pub description: Option<String>,
  #[serde(default)]
  pub permissions: Vec<String>,
}

impl From<ApiRole> for Role {
  fn from(api: ApiRole) -> Self {
    Role {
      remote_id: api.id,
      name: api.name,
      description: api.description,
      permissions: api.permissions,
    }
  }
}

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiRoleRef {
  #[serde(deserialize_with = "deserialize_id")]
  pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiUser {
  #[serde(deserialize_with = "deserialize_id")]
  pub id: String,
  pub username: String,
  #[serde(rename = "displayName")]
  pub display_name: Option<String>,
  pub email: Option<String>,
  /// Populated when the server expands the role
  pub role: Option<ApiRoleRef>,
  #[serde(rename = "roleId")]
  pub role_id: Option<String>,
}

impl From<ApiUser> for User {
  fn from(api: ApiUser) -> Self {
    User {
      remote_id: api.id,
      username: api.username,
      display_name: api.display_name,
      email: api.email,
      role_remote_id: api.role.map(|r| r.id).or(api.role_id),
    }
  }
}

// ============================================================================
// Layers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiLayer {
  #[serde(deserialize_with = "deserialize_id")]
  pub id: String,
  pub name: String,
  #[serde(rename = "type")]
  pub layer_type: String,
  pub url: Option<String>,
}

impl From<ApiLayer> for Layer {
  fn from(api: ApiLayer) -> Self {
    Layer {
      remote_id: api.id,
      name: api.name,
      layer_type: api.layer_type,
      url: api.url,
    }
  }
}

// ============================================================================
// Static features (GeoJSON)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiFeatureCollection {
  #[serde(default)]
  pub features: Vec<ApiFeature>,
}

#[derive(Debug, Deserialize)]
pub struct ApiFeature {
  #[serde(deserialize_with = "deserialize_id")]
  pub id: String,
  pub geometry: Value,
  #[serde(default)]
  pub properties: Map<String, Value>,
}

impl ApiFeature {
  /// Bind the feature to the local layer it was fetched for.
  pub fn into_feature(self, layer_id: i64) -> Feature {
    Feature {
      remote_id: self.id,
      layer_id,
      geometry: self.geometry,
      properties: self
        .properties
        .into_iter()
        .map(|(key, value)| FeatureProperty::new(key, value))
        .collect(),
    }
  }
}
