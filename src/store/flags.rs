use super::error::StoreError;

/// Set once the full layer list has been fetched and persisted.
pub const LAYERS_FETCHED_ONCE: &str = "have_layers_been_fetched_once";

/// Process-wide boolean markers read by collaborators outside the sync core.
///
/// Unset flags read as `false`.
pub trait FlagStore: Send + Sync {
  fn get_flag(&self, name: &str) -> Result<bool, StoreError>;

  fn set_flag(&self, name: &str, value: bool) -> Result<(), StoreError>;
}
