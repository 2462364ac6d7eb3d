//! Remote source of roles, users, layers and static features.

pub mod api_types;
mod client;
mod error;
pub mod types;

use async_trait::async_trait;

pub use client::MageClient;
pub use error::RemoteError;
use types::{Feature, Layer, Role, Stored, User};

/// Fetch operations against the server.
///
/// Each call either fails with a transport/parse error or returns a
/// well-formed, possibly empty collection.
#[async_trait]
pub trait RemoteSource: Send + Sync {
  async fn list_roles(&self) -> Result<Vec<Role>, RemoteError>;

  async fn list_users(&self) -> Result<Vec<User>, RemoteError>;

  async fn list_layers(&self) -> Result<Vec<Layer>, RemoteError>;

  /// Features of one locally persisted layer, bound to its local id.
  async fn list_features(&self, layer: &Stored<Layer>) -> Result<Vec<Feature>, RemoteError>;
}
