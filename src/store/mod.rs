//! Local persistent store for synced records.
//!
//! Records are keyed by remote id: a remote id already present locally is
//! never inserted again. Readers see a batch only once its transaction
//! commits.

mod entity;
mod error;
mod flags;
mod records;
mod sqlite;

pub use entity::{
  create_if_absent_by_remote_id, find_id_by_remote_id, group_of, ChildEntity, Entity, Persist,
};
pub use error::StoreError;
pub use flags::{FlagStore, LAYERS_FETCHED_ONCE};
pub use sqlite::SqliteStore;
