//! Observers notified after a batch commits.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

/// Local id of a grouping record (e.g. the layer owning persisted features).
pub type GroupId = i64;

/// Receives the groups touched by each committed batch.
pub trait BatchListener: Send + Sync {
  fn on_batch_persisted(&self, groups: &BTreeSet<GroupId>);
}

impl<F> BatchListener for F
where
  F: Fn(&BTreeSet<GroupId>) + Send + Sync,
{
  fn on_batch_persisted(&self, groups: &BTreeSet<GroupId>) {
    self(groups)
  }
}

type Snapshot = Arc<Vec<Arc<dyn BatchListener>>>;

/// Copy-on-write listener set.
///
/// Notification iterates a snapshot taken up front, so listeners added or
/// removed from inside a callback only see the next notification.
#[derive(Default)]
pub struct ListenerSet {
  listeners: RwLock<Snapshot>,
}

fn same(a: &Arc<dyn BatchListener>, b: &Arc<dyn BatchListener>) -> bool {
  // Compare data pointers only; vtable pointers may differ between codegen units
  Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl ListenerSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a listener. Returns `false` if it was already registered.
  pub fn add(&self, listener: Arc<dyn BatchListener>) -> bool {
    let mut guard = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
    if guard.iter().any(|l| same(l, &listener)) {
      return false;
    }
    let mut next: Vec<_> = (**guard).clone();
    next.push(listener);
    *guard = Arc::new(next);
    true
  }

  /// Unregister a listener. Returns `false` if it was not registered.
  pub fn remove(&self, listener: &Arc<dyn BatchListener>) -> bool {
    let mut guard = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
    if !guard.iter().any(|l| same(l, listener)) {
      return false;
    }
    let next: Vec<_> = guard.iter().filter(|l| !same(l, listener)).cloned().collect();
    *guard = Arc::new(next);
    true
  }

  pub fn len(&self) -> usize {
    self.snapshot().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn snapshot(&self) -> Snapshot {
    let guard = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(&*guard)
  }

  /// Call every listener registered at the time of the call.
  pub fn notify(&self, groups: &BTreeSet<GroupId>) {
    // The lock is released before any callback runs
    let snapshot = self.snapshot();
    for listener in snapshot.iter() {
      listener.on_batch_persisted(groups);
    }
  }
}

impl std::fmt::Debug for ListenerSet {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ListenerSet")
      .field("len", &self.len())
      .finish()
  }
}
