//! SQLite implementation of the local store.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::entity::{ChildEntity, Entity};
use super::error::StoreError;
use super::flags::FlagStore;
use crate::db;
use crate::remote::types::Stored;

/// Local store backed by a single SQLite connection.
///
/// All access is serialized through the connection mutex, so a transaction
/// holds the store for its whole duration.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> color_eyre::Result<Self> {
    let conn = db::open(path)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Open an empty store that lives as long as this value.
  pub fn open_in_memory() -> color_eyre::Result<Self> {
    let conn = db::open_in_memory()?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
    self.conn.lock().map_err(|_| StoreError::Poisoned)
  }

  /// Run `f` inside one transaction.
  ///
  /// The transaction commits if `f` returns `Ok` and rolls back otherwise.
  /// A failure to begin or commit is reported as `StoreError::Transaction`.
  pub fn run_in_transaction<T, F>(&self, f: F) -> Result<T, StoreError>
  where
    F: FnOnce(&mut Transaction<'_>) -> Result<T, StoreError>,
  {
    let mut conn = self.lock()?;
    let mut tx = conn
      .transaction()
      .map_err(|e| StoreError::Transaction(format!("failed to begin: {}", e)))?;

    // Dropping the transaction on error rolls it back
    let value = f(&mut tx)?;

    tx.commit()
      .map_err(|e| StoreError::Transaction(format!("failed to commit: {}", e)))?;
    Ok(value)
  }

  /// Get a single record by local id.
  pub fn read_by_id<E: Entity>(&self, id: i64) -> Result<Option<Stored<E>>, StoreError> {
    let sql = format!("{} WHERE {}.id = ?1", E::SELECT, E::TABLE);
    let conn = self.lock()?;
    Ok(query_entities(&conn, &sql, params![id])?.into_iter().next())
  }

  /// Get a single record by remote id.
  pub fn read_by_remote_id<E: Entity>(
    &self,
    remote_id: &str,
  ) -> Result<Option<Stored<E>>, StoreError> {
    let sql = format!("{} WHERE {}.remote_id = ?1", E::SELECT, E::TABLE);
    let conn = self.lock()?;
    Ok(query_entities(&conn, &sql, params![remote_id])?.into_iter().next())
  }

  /// Get every record of a type, in insertion order.
  pub fn read_all<E: Entity>(&self) -> Result<Vec<Stored<E>>, StoreError> {
    let sql = format!("{} ORDER BY {}.id", E::SELECT, E::TABLE);
    let conn = self.lock()?;
    query_entities(&conn, &sql, [])
  }

  /// Get every record owned by the parent with local id `parent_id`.
  pub fn read_all_by_parent<E: ChildEntity>(
    &self,
    parent_id: i64,
  ) -> Result<Vec<Stored<E>>, StoreError> {
    let sql = format!(
      "{} WHERE {}.{} = ?1 ORDER BY {}.id",
      E::SELECT,
      E::TABLE,
      E::PARENT_COLUMN,
      E::TABLE
    );
    let conn = self.lock()?;
    query_entities(&conn, &sql, params![parent_id])
  }

  /// Number of records of a type.
  pub fn count<E: Entity>(&self) -> Result<i64, StoreError> {
    let sql = format!("SELECT COUNT(*) FROM {}", E::TABLE);
    let conn = self.lock()?;
    Ok(conn.query_row(&sql, [], |row| row.get(0))?)
  }

  /// When a flag was last written.
  pub fn flag_updated_at(&self, name: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    let conn = self.lock()?;
    let updated_at: Option<String> = conn
      .query_row(
        "SELECT updated_at FROM flags WHERE name = ?1",
        params![name],
        |row| row.get(0),
      )
      .optional()?;

    Ok(
      updated_at
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc)),
    )
  }
}

fn query_entities<E: Entity, P: Params>(
  conn: &Connection,
  sql: &str,
  params: P,
) -> Result<Vec<Stored<E>>, StoreError> {
  let mut stmt = conn.prepare(sql)?;
  let mut entities = stmt
    .query_map(params, E::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  for entity in &mut entities {
    E::load_children(entity, conn)?;
  }
  Ok(entities)
}

impl FlagStore for SqliteStore {
  fn get_flag(&self, name: &str) -> Result<bool, StoreError> {
    let conn = self.lock()?;
    let value: Option<bool> = conn
      .query_row(
        "SELECT value FROM flags WHERE name = ?1",
        params![name],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value.unwrap_or(false))
  }

  fn set_flag(&self, name: &str, value: bool) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT INTO flags (name, value, updated_at) VALUES (?1, ?2, ?3)
       ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
      params![name, value, Utc::now().to_rfc3339()],
    )?;
    Ok(())
  }
}
