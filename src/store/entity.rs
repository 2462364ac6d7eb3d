//! Core traits for entities kept in the local store.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::error::StoreError;
use crate::remote::types::Stored;

/// An entity that can be read back from the store.
///
/// `SELECT` lists the local id first and is extended with a `WHERE` or
/// `ORDER BY` clause, so column references in it must be qualified with
/// `TABLE`.
pub trait Entity: Sized {
  /// Table holding one row per record, with `id` and `remote_id` columns
  const TABLE: &'static str;

  /// Select statement without filter
  const SELECT: &'static str;

  fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Self>>;

  /// Fill in data kept in dependent tables.
  fn load_children(_stored: &mut Stored<Self>, _conn: &Connection) -> Result<(), StoreError> {
    Ok(())
  }
}

/// An entity owned by a parent record.
pub trait ChildEntity: Entity {
  /// Column of `TABLE` holding the parent's local id
  const PARENT_COLUMN: &'static str;
}

/// An entity that the batch persister can write.
pub trait Persist: Entity + Send + Sync {
  /// Column of `TABLE` reported to batch listeners as the record's group
  const GROUP_COLUMN: &'static str;

  /// Name used in log lines
  const KIND: &'static str;

  fn remote_id(&self) -> &str;

  /// Write the record and its dependent rows, returning the new local id.
  ///
  /// Only called for remote ids not yet present in the store.
  fn insert(&self, conn: &Connection) -> Result<i64, StoreError>;
}

/// Local id of the record with `remote_id`, if any.
pub fn find_id_by_remote_id<E: Entity>(
  conn: &Connection,
  remote_id: &str,
) -> Result<Option<i64>, StoreError> {
  let sql = format!("SELECT id FROM {} WHERE remote_id = ?1", E::TABLE);
  let id = conn
    .query_row(&sql, params![remote_id], |row| row.get(0))
    .optional()?;
  Ok(id)
}

/// Insert `record` unless its remote id is already known.
///
/// Returns the local id and whether a row was created.
pub fn create_if_absent_by_remote_id<E: Persist>(
  conn: &Connection,
  record: &E,
) -> Result<(i64, bool), StoreError> {
  if let Some(id) = find_id_by_remote_id::<E>(conn, record.remote_id())? {
    return Ok((id, false));
  }
  let id = record.insert(conn)?;
  Ok((id, true))
}

/// Group of the stored record with local id `id`.
pub fn group_of<E: Persist>(conn: &Connection, id: i64) -> Result<Option<i64>, StoreError> {
  let sql = format!("SELECT {} FROM {} WHERE id = ?1", E::GROUP_COLUMN, E::TABLE);
  let group = conn
    .query_row(&sql, params![id], |row| row.get::<_, Option<i64>>(0))
    .optional()?;
  Ok(group.flatten())
}
