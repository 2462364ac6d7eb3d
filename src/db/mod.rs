mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Open or create the database at `path` and bring its schema up to date.
pub fn open(path: &Path) -> Result<Connection> {
  // Ensure parent directory exists
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)
      .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
  }

  let conn = Connection::open(path)
    .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

  prepare(&conn)?;
  Ok(conn)
}

/// Open a private in-memory database with the full schema.
pub fn open_in_memory() -> Result<Connection> {
  let conn =
    Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
  prepare(&conn)?;
  Ok(conn)
}

/// Get the default database path
pub fn default_path() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("mage-sync").join("mage.db"))
}

fn prepare(conn: &Connection) -> Result<()> {
  conn
    .execute_batch("PRAGMA foreign_keys = ON;")
    .map_err(|e| eyre!("Failed to enable foreign keys: {}", e))?;
  run_migrations(conn)
}

/// Run database migrations
fn run_migrations(conn: &Connection) -> Result<()> {
  conn
    .execute_batch(schema::SCHEMA)
    .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
  Ok(())
}
