//! Batch persistence of fetched records.

use rusqlite::Connection;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::listeners::{BatchListener, GroupId, ListenerSet};
use crate::store::{create_if_absent_by_remote_id, group_of, Persist, SqliteStore, StoreError};

/// Record that was left out of a committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
  pub remote_id: String,
  pub reason: String,
}

/// Outcome of one committed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
  /// Groups the persisted records belong to, new or already known
  pub groups: BTreeSet<GroupId>,
  /// Records inserted by this batch
  pub created: usize,
  /// Records whose remote id was already present
  pub existing: usize,
  pub skipped: Vec<SkippedRecord>,
}

/// Persists batches of one record type under a single transaction.
///
/// Records already known by remote id are reused, never inserted twice.
/// Each record is written inside its own savepoint: a record that fails on
/// its own is rolled back, logged and skipped while the rest of the batch
/// still commits. Any other failure rolls back the entire batch.
pub struct BatchPersister<R> {
  store: Arc<SqliteStore>,
  listeners: ListenerSet,
  _records: PhantomData<fn(&R)>,
}

impl<R: Persist> BatchPersister<R> {
  pub fn new(store: Arc<SqliteStore>) -> Self {
    Self {
      store,
      listeners: ListenerSet::new(),
      _records: PhantomData,
    }
  }

  pub fn store(&self) -> &Arc<SqliteStore> {
    &self.store
  }

  /// Register a listener for committed batches. Idempotent.
  pub fn add_listener(&self, listener: Arc<dyn BatchListener>) -> bool {
    self.listeners.add(listener)
  }

  /// Unregister a listener. Idempotent.
  pub fn remove_listener(&self, listener: &Arc<dyn BatchListener>) -> bool {
    self.listeners.remove(listener)
  }

  /// Persist `records` atomically and notify listeners once on commit.
  pub fn persist(&self, records: &[R]) -> Result<BatchReport, StoreError> {
    let report = self
      .store
      .run_in_transaction(|tx| {
        let mut report = BatchReport::default();

        for record in records {
          let savepoint = tx.savepoint()?;

          match persist_one(&savepoint, record) {
            Ok((created, group)) => {
              savepoint.commit()?;
              if created {
                debug!("created {} with remote_id {}", R::KIND, record.remote_id());
                report.created += 1;
              } else {
                report.existing += 1;
              }
              report.groups.extend(group);
            }
            Err(e) if e.is_record_level() => {
              // Default drop behavior of a savepoint is rollback
              savepoint.finish()?;
              error!(
                remote_id = record.remote_id(),
                error = %e,
                "There was a problem creating the {}", R::KIND
              );
              report.skipped.push(SkippedRecord {
                remote_id: record.remote_id().to_string(),
                reason: e.to_string(),
              });
            }
            Err(e) => return Err(e),
          }
        }

        Ok(report)
      })
      .map_err(|e| {
        error!(error = %e, "There was a problem creating {} records", R::KIND);
        e
      })?;

    info!(
      kind = R::KIND,
      created = report.created,
      existing = report.existing,
      skipped = report.skipped.len(),
      "batch committed"
    );

    self.listeners.notify(&report.groups);
    Ok(report)
  }
}

fn persist_one<R: Persist>(
  conn: &Connection,
  record: &R,
) -> Result<(bool, Option<GroupId>), StoreError> {
  let (id, created) = create_if_absent_by_remote_id(conn, record)?;
  let group = group_of::<R>(conn, id)?;
  Ok((created, group))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::remote::types::{Feature, FeatureProperty, Layer};
  use crate::sync::testing::{break_feature_insert, Flaky};
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;
  use tracing_test::traced_test;

  fn setup() -> (Arc<SqliteStore>, i64) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let layers = BatchPersister::<Layer>::new(store.clone());
    layers
      .persist(&[Layer {
        remote_id: "L1".to_string(),
        name: "Wells".to_string(),
        layer_type: "external".to_string(),
        url: None,
      }])
      .unwrap();
    let layer_id = store.read_by_remote_id::<Layer>("L1").unwrap().unwrap().id;
    (store, layer_id)
  }

  fn feature(remote_id: &str, layer_id: i64) -> Feature {
    Feature {
      remote_id: remote_id.to_string(),
      layer_id,
      geometry: json!({"type": "Point", "coordinates": [1.0, 2.0]}),
      properties: vec![FeatureProperty::new("name", json!(remote_id))],
    }
  }

  fn geometry_rows(store: &SqliteStore) -> i64 {
    store
      .run_in_transaction(|tx| {
        Ok(tx.query_row("SELECT COUNT(*) FROM staticfeature_geometries", [], |r| {
          r.get(0)
        })?)
      })
      .unwrap()
  }

  #[test]
  fn test_refetch_is_idempotent() {
    let (store, layer_id) = setup();
    let persister = BatchPersister::<Feature>::new(store.clone());
    let batch: Vec<Feature> = ["F1", "F2", "F3"]
      .iter()
      .map(|id| feature(id, layer_id))
      .collect();

    let first = persister.persist(&batch).unwrap();
    assert_eq!(first.created, 3);
    let after_first: Vec<String> = store
      .read_all::<Feature>()
      .unwrap()
      .into_iter()
      .map(|f| f.record.remote_id)
      .collect();

    let second = persister.persist(&batch).unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.existing, 3);
    assert_eq!(second.groups, BTreeSet::from([layer_id]));

    let after_second: Vec<String> = store
      .read_all::<Feature>()
      .unwrap()
      .into_iter()
      .map(|f| f.record.remote_id)
      .collect();
    assert_eq!(after_first, after_second);
    // Known features do not get a second geometry row
    assert_eq!(geometry_rows(&store), 3);
  }

  #[traced_test]
  #[test]
  fn test_malformed_record_is_skipped() {
    let (store, layer_id) = setup();
    let persister = BatchPersister::<Feature>::new(store.clone());

    let mut bad = feature("F2-bad", layer_id);
    bad.properties = vec![
      FeatureProperty::new("name", json!("a")),
      FeatureProperty::new("name", json!("b")),
    ];
    let batch = vec![feature("F1", layer_id), bad, feature("F3", layer_id)];

    let report = persister.persist(&batch).unwrap();

    assert_eq!(report.created, 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].remote_id, "F2-bad");
    assert_eq!(store.count::<Feature>().unwrap(), 2);
    assert!(store.read_by_remote_id::<Feature>("F2-bad").unwrap().is_none());
    // The skipped feature's geometry was rolled back with it
    assert_eq!(geometry_rows(&store), 2);
    assert!(logs_contain("F2-bad"));
    logs_assert(|lines: &[&str]| {
      match lines
        .iter()
        .filter(|line| line.contains("ERROR") && line.contains("F2-bad"))
        .count()
      {
        1 => Ok(()),
        n => Err(format!("expected one error for F2-bad, got {}", n)),
      }
    });
  }

  #[test]
  fn test_feature_without_geometry_is_skipped() {
    let (store, layer_id) = setup();
    let persister = BatchPersister::<Feature>::new(store.clone());

    let mut bad = feature("F1", layer_id);
    bad.geometry = serde_json::Value::Null;

    let report = persister.persist(&[bad]).unwrap();
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(store.count::<Feature>().unwrap(), 0);
  }

  #[test]
  fn test_listeners_notified_once_per_commit() {
    let (store, layer_id) = setup();
    let persister = BatchPersister::<Feature>::new(store);

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(BTreeSet::new()));
    let (calls_clone, seen_clone) = (calls.clone(), seen.clone());
    persister.add_listener(Arc::new(move |groups: &BTreeSet<GroupId>| {
      calls_clone.fetch_add(1, Ordering::SeqCst);
      *seen_clone.lock().unwrap() = groups.clone();
    }));

    persister
      .persist(&[feature("F1", layer_id), feature("F2", layer_id)])
      .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock().unwrap(), BTreeSet::from([layer_id]));

    // Empty batches still notify
    persister.persist(&[]).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(seen.lock().unwrap().is_empty());
  }

  #[test]
  fn test_transaction_failure_rolls_back_whole_batch() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let persister = BatchPersister::<Flaky>::new(store.clone());

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    persister.add_listener(Arc::new(move |_: &BTreeSet<GroupId>| {
      calls_clone.fetch_add(1, Ordering::SeqCst);
    }));

    let batch = vec![Flaky::ok("A"), Flaky::fatal("B"), Flaky::ok("C")];

    let err = persister.persist(&batch).unwrap_err();
    assert!(!err.is_record_level());
    assert_eq!(store.count::<Flaky>().unwrap(), 0);
    assert!(store.read_by_remote_id::<Flaky>("A").unwrap().is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn test_sqlite_failure_rolls_back_feature_batch() {
    let (store, layer_id) = setup();
    let persister = BatchPersister::<Feature>::new(store.clone());
    break_feature_insert(&store, "F2");

    let batch = vec![feature("F1", layer_id), feature("F2", layer_id)];
    let err = persister.persist(&batch).unwrap_err();

    assert!(matches!(err, StoreError::Sqlite(_)));
    assert_eq!(store.count::<Feature>().unwrap(), 0);
    assert_eq!(geometry_rows(&store), 0);
  }
}
