//! Wiring of store, remote client and pipeline pieces.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::remote::types::{Feature, Layer, Role, User};
use crate::remote::{MageClient, RemoteSource};
use crate::store::{FlagStore, SqliteStore, StoreError, LAYERS_FETCHED_ONCE};
use crate::sync::{BatchPersister, ChainController, FeatureFetch, Stage, StageRunner};

/// Local record counts and sync markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
  pub roles: i64,
  pub users: i64,
  pub layers: i64,
  pub features: i64,
  pub layers_fetched_once: bool,
  pub layers_fetched_at: Option<DateTime<Utc>>,
}

/// Owns the store, the remote source and one persister per record type.
///
/// Built once at startup and passed to whoever needs it. Persisters are
/// shared, so listeners registered here see batches from every stage.
pub struct SyncService {
  store: Arc<SqliteStore>,
  remote: Arc<dyn RemoteSource>,
  roles: Arc<BatchPersister<Role>>,
  users: Arc<BatchPersister<User>>,
  layers: Arc<BatchPersister<Layer>>,
  features: Arc<BatchPersister<Feature>>,
}

impl SyncService {
  pub fn new(store: Arc<SqliteStore>, remote: Arc<dyn RemoteSource>) -> Self {
    Self {
      roles: Arc::new(BatchPersister::new(store.clone())),
      users: Arc::new(BatchPersister::new(store.clone())),
      layers: Arc::new(BatchPersister::new(store.clone())),
      features: Arc::new(BatchPersister::new(store.clone())),
      store,
      remote,
    }
  }

  /// Open the database and create the HTTP client described by `config`.
  pub fn open(config: &Config, database: &Path, token: Option<String>) -> Result<Self> {
    let store = Arc::new(SqliteStore::open(database)?);
    let client = MageClient::new(&config.server, token)?;
    Ok(Self::new(store, Arc::new(client)))
  }

  pub fn store(&self) -> &Arc<SqliteStore> {
    &self.store
  }

  pub fn roles(&self) -> &Arc<BatchPersister<Role>> {
    &self.roles
  }

  pub fn users(&self) -> &Arc<BatchPersister<User>> {
    &self.users
  }

  pub fn layers(&self) -> &Arc<BatchPersister<Layer>> {
    &self.layers
  }

  pub fn features(&self) -> &Arc<BatchPersister<Feature>> {
    &self.features
  }

  pub fn roles_stage(&self) -> StageRunner<Role> {
    let remote = self.remote.clone();
    StageRunner::new("roles", self.roles.clone(), move || {
      let remote = remote.clone();
      async move { remote.list_roles().await }
    })
  }

  pub fn users_stage(&self) -> StageRunner<User> {
    let remote = self.remote.clone();
    StageRunner::new("users", self.users.clone(), move || {
      let remote = remote.clone();
      async move { remote.list_users().await }
    })
  }

  /// Roles, then users. Users reference roles, so they never run alone.
  pub fn initialization_chain(&self) -> ChainController {
    let stages: Vec<Arc<dyn Stage>> = vec![
      Arc::new(self.roles_stage()),
      Arc::new(self.users_stage()),
    ];
    ChainController::new("initialization", stages)
  }

  pub fn feature_fetch(&self) -> FeatureFetch {
    FeatureFetch::new(
      self.remote.clone(),
      self.layers.clone(),
      self.features.clone(),
      self.store.clone(),
    )
  }

  /// Initialization chain followed by the feature sync.
  pub fn full_sync_chain(&self) -> ChainController {
    let stages: Vec<Arc<dyn Stage>> = vec![
      Arc::new(self.initialization_chain()),
      Arc::new(self.feature_fetch()),
    ];
    ChainController::new("full sync", stages)
  }

  pub fn status(&self) -> Result<SyncStatus, StoreError> {
    Ok(SyncStatus {
      roles: self.store.count::<Role>()?,
      users: self.store.count::<User>()?,
      layers: self.store.count::<Layer>()?,
      features: self.store.count::<Feature>()?,
      layers_fetched_once: self.store.get_flag(LAYERS_FETCHED_ONCE)?,
      layers_fetched_at: self.store.flag_updated_at(LAYERS_FETCHED_ONCE)?,
    })
  }
}
