use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Layer type whose features live on the server and must be fetched per layer.
pub const EXTERNAL_LAYER_TYPE: &str = "external";

/// Organizational role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
  pub remote_id: String,
  pub name: String,
  pub description: Option<String>,
  pub permissions: Vec<String>,
}

/// Field user, optionally bound to a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub remote_id: String,
  pub username: String,
  pub display_name: Option<String>,
  pub email: Option<String>,
  /// Remote id of the user's role; resolved to a local role on persist
  pub role_remote_id: Option<String>,
}

/// Map layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
  pub remote_id: String,
  pub name: String,
  pub layer_type: String, // "external", "feature", "imagery", ...
  pub url: Option<String>,
}

impl Layer {
  /// Whether this layer's features have to be pulled separately.
  pub fn is_external(&self) -> bool {
    self.layer_type.eq_ignore_ascii_case(EXTERNAL_LAYER_TYPE)
  }
}

/// Static feature belonging to exactly one layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
  pub remote_id: String,
  /// Local id of the owning layer
  pub layer_id: i64,
  /// GeoJSON geometry, stored opaquely
  pub geometry: Value,
  pub properties: Vec<FeatureProperty>,
}

/// Key/value attribute of a feature. Keys are unique within one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureProperty {
  pub key: String,
  pub value: Value,
}

impl FeatureProperty {
  pub fn new(key: impl Into<String>, value: Value) -> Self {
    Self {
      key: key.into(),
      value,
    }
  }
}

/// A record together with the local id it was persisted under.
#[derive(Debug, Clone, PartialEq)]
pub struct Stored<T> {
  pub id: i64,
  pub record: T,
}

impl<T> std::ops::Deref for Stored<T> {
  type Target = T;

  fn deref(&self) -> &T {
    &self.record
  }
}
