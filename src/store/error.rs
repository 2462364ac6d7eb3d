use rusqlite::ErrorCode;

/// Errors raised by the local store.
///
/// Record-level errors concern a single record and are absorbed by the batch
/// persister; everything else fails the whole batch.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("constraint violation: {0}")]
  Constraint(#[source] rusqlite::Error),

  #[error("record {remote_id} rejected: {reason}")]
  InvalidRecord { remote_id: String, reason: String },

  #[error("failed to serialize payload: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("database error: {0}")]
  Sqlite(#[source] rusqlite::Error),

  #[error("transaction failed: {0}")]
  Transaction(String),

  #[error("store lock poisoned")]
  Poisoned,
}

impl StoreError {
  /// Whether the error concerns only the record being written.
  pub fn is_record_level(&self) -> bool {
    matches!(
      self,
      Self::Constraint(_) | Self::InvalidRecord { .. } | Self::Serialization(_)
    )
  }
}

impl From<rusqlite::Error> for StoreError {
  fn from(e: rusqlite::Error) -> Self {
    match e.sqlite_error_code() {
      Some(ErrorCode::ConstraintViolation) => Self::Constraint(e),
      _ => Self::Sqlite(e),
    }
  }
}
