//! Storage mapping for the synced record types.

use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde_json::Value;

use super::entity::{find_id_by_remote_id, ChildEntity, Entity, Persist};
use super::error::StoreError;
use crate::remote::types::{Feature, FeatureProperty, Layer, Role, Stored, User};

/// Decode a JSON text column.
fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
  let text: String = row.get(idx)?;
  serde_json::from_str(&text)
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ============================================================================
// Roles
// ============================================================================

impl Entity for Role {
  const TABLE: &'static str = "roles";
  const SELECT: &'static str =
    "SELECT roles.id, roles.remote_id, roles.name, roles.description, roles.permissions FROM roles";

  fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Self>> {
    Ok(Stored {
      id: row.get(0)?,
      record: Role {
        remote_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        permissions: json_column(row, 4)?,
      },
    })
  }
}

impl Persist for Role {
  const GROUP_COLUMN: &'static str = "id";
  const KIND: &'static str = "role";

  fn remote_id(&self) -> &str {
    &self.remote_id
  }

  fn insert(&self, conn: &Connection) -> Result<i64, StoreError> {
    let permissions = serde_json::to_string(&self.permissions)?;
    conn.execute(
      "INSERT INTO roles (remote_id, name, description, permissions) VALUES (?1, ?2, ?3, ?4)",
      params![self.remote_id, self.name, self.description, permissions],
    )?;
    Ok(conn.last_insert_rowid())
  }
}

// ============================================================================
// Users
// ============================================================================

impl Entity for User {
  const TABLE: &'static str = "users";
  const SELECT: &'static str = "SELECT users.id, users.remote_id, users.username, users.display_name, users.email, roles.remote_id
     FROM users LEFT JOIN roles ON roles.id = users.role_id";

  fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Self>> {
    Ok(Stored {
      id: row.get(0)?,
      record: User {
        remote_id: row.get(1)?,
        username: row.get(2)?,
        display_name: row.get(3)?,
        email: row.get(4)?,
        role_remote_id: row.get(5)?,
      },
    })
  }
}

impl ChildEntity for User {
  const PARENT_COLUMN: &'static str = "role_id";
}

impl Persist for User {
  const GROUP_COLUMN: &'static str = "role_id";
  const KIND: &'static str = "user";

  fn remote_id(&self) -> &str {
    &self.remote_id
  }

  fn insert(&self, conn: &Connection) -> Result<i64, StoreError> {
    // Roles are synced before users, so an unknown role is a bad record
    let role_id = match &self.role_remote_id {
      Some(role) => Some(find_id_by_remote_id::<Role>(conn, role)?.ok_or_else(|| {
        StoreError::InvalidRecord {
          remote_id: self.remote_id.clone(),
          reason: format!("unknown role {}", role),
        }
      })?),
      None => None,
    };

    conn.execute(
      "INSERT INTO users (remote_id, username, display_name, email, role_id) VALUES (?1, ?2, ?3, ?4, ?5)",
      params![
        self.remote_id,
        self.username,
        self.display_name,
        self.email,
        role_id
      ],
    )?;
    Ok(conn.last_insert_rowid())
  }
}

// ============================================================================
// Layers
// ============================================================================

impl Entity for Layer {
  const TABLE: &'static str = "layers";
  const SELECT: &'static str =
    "SELECT layers.id, layers.remote_id, layers.name, layers.type, layers.url FROM layers";

  fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Self>> {
    Ok(Stored {
      id: row.get(0)?,
      record: Layer {
        remote_id: row.get(1)?,
        name: row.get(2)?,
        layer_type: row.get(3)?,
        url: row.get(4)?,
      },
    })
  }
}

impl Persist for Layer {
  const GROUP_COLUMN: &'static str = "id";
  const KIND: &'static str = "layer";

  fn remote_id(&self) -> &str {
    &self.remote_id
  }

  fn insert(&self, conn: &Connection) -> Result<i64, StoreError> {
    conn.execute(
      "INSERT INTO layers (remote_id, name, type, url) VALUES (?1, ?2, ?3, ?4)",
      params![self.remote_id, self.name, self.layer_type, self.url],
    )?;
    Ok(conn.last_insert_rowid())
  }
}

// ============================================================================
// Static features
// ============================================================================

impl Entity for Feature {
  const TABLE: &'static str = "staticfeatures";
  const SELECT: &'static str = "SELECT staticfeatures.id, staticfeatures.remote_id, staticfeatures.layer_id, staticfeature_geometries.geometry
     FROM staticfeatures
     INNER JOIN staticfeature_geometries ON staticfeature_geometries.id = staticfeatures.geometry_id";

  fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Self>> {
    Ok(Stored {
      id: row.get(0)?,
      record: Feature {
        remote_id: row.get(1)?,
        layer_id: row.get(2)?,
        geometry: json_column(row, 3)?,
        properties: Vec::new(),
      },
    })
  }

  fn load_children(stored: &mut Stored<Self>, conn: &Connection) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
      "SELECT key, value FROM staticfeature_properties WHERE staticfeature_id = ?1 ORDER BY key",
    )?;

    let properties = stmt
      .query_map(params![stored.id], |row| {
        let key: String = row.get(0)?;
        let value: Option<String> = row.get(1)?;
        Ok((key, value))
      })?
      .map(|r| {
        let (key, value) = r?;
        let value = match value {
          Some(text) => serde_json::from_str(&text)?,
          None => Value::Null,
        };
        Ok::<_, StoreError>(FeatureProperty { key, value })
      })
      .collect::<Result<Vec<_>, _>>()?;

    stored.record.properties = properties;
    Ok(())
  }
}

impl ChildEntity for Feature {
  const PARENT_COLUMN: &'static str = "layer_id";
}

impl Persist for Feature {
  const GROUP_COLUMN: &'static str = "layer_id";
  const KIND: &'static str = "static feature";

  fn remote_id(&self) -> &str {
    &self.remote_id
  }

  fn insert(&self, conn: &Connection) -> Result<i64, StoreError> {
    if self.geometry.is_null() {
      return Err(StoreError::InvalidRecord {
        remote_id: self.remote_id.clone(),
        reason: "missing geometry".to_string(),
      });
    }

    // Geometry first: the feature row references it
    let geometry = serde_json::to_string(&self.geometry)?;
    conn.execute(
      "INSERT INTO staticfeature_geometries (geometry) VALUES (?1)",
      params![geometry],
    )?;
    let geometry_id = conn.last_insert_rowid();

    conn.execute(
      "INSERT INTO staticfeatures (remote_id, layer_id, geometry_id) VALUES (?1, ?2, ?3)",
      params![self.remote_id, self.layer_id, geometry_id],
    )?;
    let feature_id = conn.last_insert_rowid();

    let mut stmt = conn.prepare(
      "INSERT INTO staticfeature_properties (staticfeature_id, key, value) VALUES (?1, ?2, ?3)",
    )?;
    for property in &self.properties {
      let value = serde_json::to_string(&property.value)?;
      stmt.execute(params![feature_id, property.key, value])?;
    }

    Ok(feature_id)
  }
}
