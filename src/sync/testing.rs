//! Test doubles for sync tests: a scripted remote source and failing records.

use async_trait::async_trait;
use rusqlite::{params, Connection, Row};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::stage::CancelFlag;
use crate::remote::types::{Feature, FeatureProperty, Layer, Role, Stored, User};
use crate::remote::{RemoteError, RemoteSource};
use crate::store::{Entity, Persist, SqliteStore, StoreError};

fn parse_error(path: &str) -> RemoteError {
  RemoteError::Parse {
    url: format!("http://mage.test/{}", path),
    reason: "scripted failure".to_string(),
  }
}

pub fn layer(remote_id: &str, layer_type: &str) -> Layer {
  Layer {
    remote_id: remote_id.to_string(),
    name: format!("Layer {}", remote_id),
    layer_type: layer_type.to_string(),
    url: None,
  }
}

/// Feature template; the layer id is filled in when the fake serves it.
pub fn feature(remote_id: &str) -> Feature {
  Feature {
    remote_id: remote_id.to_string(),
    layer_id: 0,
    geometry: json!({"type": "Point", "coordinates": [-104.9, 39.7]}),
    properties: vec![FeatureProperty::new("name", json!(remote_id))],
  }
}

/// Make every insert of the static feature `remote_id` fail with a plain
/// SQLite error, the kind that aborts a whole batch.
pub fn break_feature_insert(store: &SqliteStore, remote_id: &str) {
  let sql = format!(
    "CREATE TRIGGER \"break_{id}\" BEFORE INSERT ON staticfeatures
     WHEN NEW.remote_id = '{id}'
     BEGIN SELECT abs(-9223372036854775808); END;",
    id = remote_id
  );
  store
    .run_in_transaction(|tx| Ok(tx.execute_batch(&sql)?))
    .unwrap();
}

/// Layer-shaped record that can fail on demand.
#[derive(Debug, Clone)]
pub struct Flaky {
  pub remote_id: String,
  pub fatal: bool,
}

impl Flaky {
  pub fn ok(remote_id: &str) -> Self {
    Self {
      remote_id: remote_id.to_string(),
      fatal: false,
    }
  }

  /// Fails with a transaction-level error on insert.
  pub fn fatal(remote_id: &str) -> Self {
    Self {
      remote_id: remote_id.to_string(),
      fatal: true,
    }
  }
}

impl Entity for Flaky {
  const TABLE: &'static str = "layers";
  const SELECT: &'static str = "SELECT layers.id, layers.remote_id FROM layers";

  fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Self>> {
    Ok(Stored {
      id: row.get(0)?,
      record: Flaky::ok(&row.get::<_, String>(1)?),
    })
  }
}

impl Persist for Flaky {
  const GROUP_COLUMN: &'static str = "id";
  const KIND: &'static str = "flaky";

  fn remote_id(&self) -> &str {
    &self.remote_id
  }

  fn insert(&self, conn: &Connection) -> Result<i64, StoreError> {
    if self.fatal {
      return Err(StoreError::Transaction("connection lost".to_string()));
    }
    conn.execute(
      "INSERT INTO layers (remote_id, name, type) VALUES (?1, 'flaky', 'internal')",
      params![self.remote_id],
    )?;
    Ok(conn.last_insert_rowid())
  }
}

/// In-memory `RemoteSource` that records every call it receives.
#[derive(Default)]
pub struct FakeRemote {
  roles: Vec<Role>,
  users: Vec<User>,
  layers: Vec<Layer>,
  layers_fail: bool,
  features: HashMap<String, Vec<Feature>>,
  failing_layers: HashSet<String>,
  cancel_after: Option<(String, CancelFlag)>,
  calls: Mutex<Vec<String>>,
}

impl FakeRemote {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_roles(mut self, roles: Vec<Role>) -> Self {
    self.roles = roles;
    self
  }

  pub fn with_users(mut self, users: Vec<User>) -> Self {
    self.users = users;
    self
  }

  pub fn with_layers(mut self, layers: Vec<Layer>) -> Self {
    self.layers = layers;
    self
  }

  pub fn failing_layer_list(mut self) -> Self {
    self.layers_fail = true;
    self
  }

  pub fn with_features(mut self, layer_remote_id: &str, features: Vec<Feature>) -> Self {
    self.features.insert(layer_remote_id.to_string(), features);
    self
  }

  pub fn failing_features(mut self, layer_remote_id: &str) -> Self {
    self.failing_layers.insert(layer_remote_id.to_string());
    self
  }

  /// Trip `flag` while serving the features of `layer_remote_id`.
  pub fn cancel_after(mut self, layer_remote_id: &str, flag: CancelFlag) -> Self {
    self.cancel_after = Some((layer_remote_id.to_string(), flag));
    self
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  fn record(&self, call: String) {
    self.calls.lock().unwrap().push(call);
  }
}

#[async_trait]
impl RemoteSource for FakeRemote {
  async fn list_roles(&self) -> Result<Vec<Role>, RemoteError> {
    self.record("roles".to_string());
    Ok(self.roles.clone())
  }

  async fn list_users(&self) -> Result<Vec<User>, RemoteError> {
    self.record("users".to_string());
    Ok(self.users.clone())
  }

  async fn list_layers(&self) -> Result<Vec<Layer>, RemoteError> {
    self.record("layers".to_string());
    if self.layers_fail {
      return Err(parse_error("api/layers"));
    }
    Ok(self.layers.clone())
  }

  async fn list_features(&self, layer: &Stored<Layer>) -> Result<Vec<Feature>, RemoteError> {
    self.record(format!("features:{}", layer.remote_id));

    if let Some((remote_id, flag)) = &self.cancel_after {
      if *remote_id == layer.remote_id {
        flag.cancel();
      }
    }

    if self.failing_layers.contains(&layer.remote_id) {
      return Err(parse_error(&format!("api/layers/{}/features", layer.remote_id)));
    }

    Ok(
      self
        .features
        .get(&layer.remote_id)
        .into_iter()
        .flatten()
        .cloned()
        .map(|mut feature| {
          feature.layer_id = layer.id;
          feature
        })
        .collect(),
    )
  }
}
