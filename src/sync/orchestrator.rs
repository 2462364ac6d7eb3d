//! Layer list and per-layer static feature sync.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use super::persister::{BatchPersister, BatchReport};
use super::stage::{CancelFlag, Stage, StageOutcome};
use crate::remote::types::{Feature, Layer, Stored};
use crate::remote::{RemoteError, RemoteSource};
use crate::store::{FlagStore, StoreError, LAYERS_FETCHED_ONCE};

/// Failure of the layer-list step, which aborts a feature sync.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("failed to fetch layers: {0}")]
  Remote(#[from] RemoteError),

  #[error("failed to save layers: {0}")]
  Store(#[from] StoreError),
}

/// What one feature sync did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
  pub layers: BatchReport,
  /// Remote ids of external layers whose features were persisted
  pub synced_layers: Vec<String>,
  /// Remote ids of external layers whose feature sync failed
  pub failed_layers: Vec<String>,
  pub features_created: usize,
  /// Stopped at a layer boundary because of a cancel request
  pub canceled: bool,
}

/// Syncs the layer list, then the static features of every external layer.
///
/// A layer whose features fail to fetch or persist is logged and listed in
/// [`FetchReport::failed_layers`]; the remaining layers are still synced.
/// Cancellation is checked before each layer, never in the middle of one.
pub struct FeatureFetch {
  remote: Arc<dyn RemoteSource>,
  layers: Arc<BatchPersister<Layer>>,
  features: Arc<BatchPersister<Feature>>,
  flags: Arc<dyn FlagStore>,
  cancel: CancelFlag,
}

impl FeatureFetch {
  pub fn new(
    remote: Arc<dyn RemoteSource>,
    layers: Arc<BatchPersister<Layer>>,
    features: Arc<BatchPersister<Feature>>,
    flags: Arc<dyn FlagStore>,
  ) -> Self {
    Self {
      remote,
      layers,
      features,
      flags,
      cancel: CancelFlag::new(),
    }
  }

  /// Share an existing cancellation flag instead of a fresh one.
  pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  pub fn cancel_flag(&self) -> CancelFlag {
    self.cancel.clone()
  }

  pub fn have_layers_been_fetched_once(&self) -> Result<bool, StoreError> {
    self.flags.get_flag(LAYERS_FETCHED_ONCE)
  }

  pub async fn fetch(&self) -> Result<FetchReport, FetchError> {
    let mut report = FetchReport::default();

    if self.cancel.is_canceled() {
      warn!("feature sync canceled before start");
      report.canceled = true;
      return Ok(report);
    }

    info!("fetching layers");
    let layers = self.remote.list_layers().await.map_err(|e| {
      error!(error = %e, "There was a failure while fetching layers");
      e
    })?;
    report.layers = self.layers.persist(&layers)?;

    if let Err(e) = self.flags.set_flag(LAYERS_FETCHED_ONCE, true) {
      // Only downstream consumers read the flag; the sync itself goes on
      error!(error = %e, "Failed to record that layers have been fetched");
    }

    for layer in self.layers.store().read_all::<Layer>()? {
      if self.cancel.is_canceled() {
        warn!(layer = %layer.remote_id, "feature sync canceled");
        report.canceled = true;
        break;
      }
      if !layer.is_external() {
        continue;
      }

      match self.sync_layer(&layer).await {
        Ok(created) => {
          report.features_created += created;
          report.synced_layers.push(layer.remote_id.clone());
        }
        Err(e) => {
          error!(
            layer = %layer.remote_id,
            error = %e,
            "There was a failure while performing a feature fetch operation"
          );
          report.failed_layers.push(layer.remote_id.clone());
        }
      }
    }

    info!(
      synced = report.synced_layers.len(),
      failed = report.failed_layers.len(),
      created = report.features_created,
      "feature sync finished"
    );
    Ok(report)
  }

  async fn sync_layer(&self, layer: &Stored<Layer>) -> Result<usize, FetchError> {
    info!(layer = %layer.remote_id, name = %layer.name, "fetching static features");
    let features = self.remote.list_features(layer).await?;
    let persisted = self.features.persist(&features)?;
    Ok(persisted.created)
  }
}

#[async_trait]
impl Stage for FeatureFetch {
  fn name(&self) -> &str {
    "features"
  }

  async fn run(&self) -> StageOutcome {
    match self.fetch().await {
      Ok(report) if report.canceled => StageOutcome::Canceled,
      Ok(_) => StageOutcome::Succeeded,
      Err(_) => StageOutcome::Failed,
    }
  }

  fn cancel(&self) {
    FeatureFetch::cancel(self);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::SqliteStore;
  use crate::sync::testing::{break_feature_insert, feature, layer, FakeRemote};
  use std::collections::BTreeSet;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct Fixture {
    store: Arc<SqliteStore>,
    remote: Arc<FakeRemote>,
    fetch: FeatureFetch,
  }

  fn fixture(remote: FakeRemote, cancel: CancelFlag) -> Fixture {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let remote = Arc::new(remote);
    let fetch = FeatureFetch::new(
      remote.clone(),
      Arc::new(BatchPersister::new(store.clone())),
      Arc::new(BatchPersister::new(store.clone())),
      store.clone(),
    )
    .with_cancel_flag(cancel);
    Fixture {
      store,
      remote,
      fetch,
    }
  }

  fn wells_and_roads() -> FakeRemote {
    FakeRemote::new()
      .with_layers(vec![layer("L1", "External"), layer("L2", "internal")])
      .with_features("L1", vec![feature("F1"), feature("F2")])
      .with_features("L2", vec![feature("F9")])
  }

  #[tokio::test]
  async fn test_only_external_layers_get_features() {
    let f = fixture(wells_and_roads(), CancelFlag::new());
    assert!(!f.fetch.have_layers_been_fetched_once().unwrap());

    let report = f.fetch.fetch().await.unwrap();

    assert!(f.fetch.have_layers_been_fetched_once().unwrap());
    assert_eq!(f.remote.calls(), vec!["layers", "features:L1"]);
    assert_eq!(report.layers.created, 2);
    assert_eq!(report.synced_layers, vec!["L1"]);
    assert_eq!(report.features_created, 2);
    assert!(!report.canceled);

    let l1 = f.store.read_by_remote_id::<Layer>("L1").unwrap().unwrap();
    let features = f.store.read_all_by_parent::<Feature>(l1.id).unwrap();
    assert_eq!(features.len(), 2);
    assert!(f.store.read_by_remote_id::<Feature>("F9").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_second_fetch_creates_nothing() {
    let f = fixture(wells_and_roads(), CancelFlag::new());
    f.fetch.fetch().await.unwrap();

    let report = f.fetch.fetch().await.unwrap();
    assert_eq!(report.layers.created, 0);
    assert_eq!(report.layers.existing, 2);
    assert_eq!(report.features_created, 0);
    assert_eq!(f.store.count::<Feature>().unwrap(), 2);
    assert_eq!(f.store.count::<Layer>().unwrap(), 2);
  }

  #[tokio::test]
  async fn test_cancel_stops_at_layer_boundary() {
    let cancel = CancelFlag::new();
    let remote = FakeRemote::new()
      .with_layers(vec![
        layer("L1", "external"),
        layer("L2", "external"),
        layer("L3", "external"),
      ])
      .with_features("L1", vec![feature("F1")])
      .with_features("L2", vec![feature("F2")])
      .with_features("L3", vec![feature("F3")])
      .cancel_after("L1", cancel.clone());
    let f = fixture(remote, cancel);

    let report = f.fetch.fetch().await.unwrap();

    assert!(report.canceled);
    // The layer in flight is finished, later ones are never requested
    assert_eq!(f.remote.calls(), vec!["layers", "features:L1"]);
    assert_eq!(report.synced_layers, vec!["L1"]);
    assert!(f.store.read_by_remote_id::<Feature>("F1").unwrap().is_some());
    assert_eq!(f.store.count::<Feature>().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_cancel_before_fetch_does_nothing() {
    let f = fixture(wells_and_roads(), CancelFlag::new());
    f.fetch.cancel();

    assert_eq!(f.fetch.run().await, StageOutcome::Canceled);
    assert!(f.remote.calls().is_empty());
    assert!(!f.fetch.have_layers_been_fetched_once().unwrap());
  }

  #[tokio::test]
  async fn test_layer_list_failure_aborts() {
    let remote = wells_and_roads().failing_layer_list();
    let f = fixture(remote, CancelFlag::new());

    let err = f.fetch.fetch().await.unwrap_err();
    assert!(matches!(err, FetchError::Remote(_)));
    assert_eq!(f.remote.calls(), vec!["layers"]);
    assert!(!f.fetch.have_layers_been_fetched_once().unwrap());
    assert_eq!(f.fetch.run().await, StageOutcome::Failed);
  }

  #[tokio::test]
  async fn test_layer_failure_does_not_stop_others() {
    let remote = FakeRemote::new()
      .with_layers(vec![layer("L1", "external"), layer("L2", "external")])
      .with_features("L2", vec![feature("F2")])
      .failing_features("L1");
    let f = fixture(remote, CancelFlag::new());

    let report = f.fetch.fetch().await.unwrap();

    assert_eq!(report.failed_layers, vec!["L1"]);
    assert_eq!(report.synced_layers, vec!["L2"]);
    assert_eq!(f.remote.calls(), vec!["layers", "features:L1", "features:L2"]);
    assert_eq!(f.store.count::<Feature>().unwrap(), 1);
    assert_eq!(f.fetch.run().await, StageOutcome::Succeeded);
  }

  #[tokio::test]
  async fn test_layer_persist_failure_does_not_stop_others() {
    let remote = FakeRemote::new()
      .with_layers(vec![
        layer("L1", "external"),
        layer("L2", "external"),
        layer("L3", "external"),
      ])
      .with_features("L1", vec![feature("F1")])
      .with_features("L2", vec![feature("F2"), feature("F2-broken")])
      .with_features("L3", vec![feature("F3")]);
    let f = fixture(remote, CancelFlag::new());
    break_feature_insert(&f.store, "F2-broken");

    let report = f.fetch.fetch().await.unwrap();

    assert_eq!(report.failed_layers, vec!["L2"]);
    assert_eq!(report.synced_layers, vec!["L1", "L3"]);
    assert_eq!(report.features_created, 2);
    // The whole L2 batch rolled back, including its good feature
    assert!(f.store.read_by_remote_id::<Feature>("F2").unwrap().is_none());
    assert!(f.store.read_by_remote_id::<Feature>("F3").unwrap().is_some());
  }

  #[tokio::test]
  async fn test_feature_listener_sees_owning_layer() {
    let f = fixture(wells_and_roads(), CancelFlag::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let store = f.store.clone();
    f.fetch
      .features
      .add_listener(Arc::new(move |groups: &BTreeSet<i64>| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
        let l1 = store.read_by_remote_id::<Layer>("L1").unwrap().unwrap();
        assert_eq!(*groups, BTreeSet::from([l1.id]));
      }));

    f.fetch.fetch().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
