//! A single fetch-then-persist stage.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

use super::persister::{BatchPersister, BatchReport};
use crate::remote::RemoteError;
use crate::store::Persist;

/// Cooperative cancellation signal.
///
/// Only ever goes from "not canceled" to "canceled". Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::Release);
  }

  pub fn is_canceled(&self) -> bool {
    self.0.load(Ordering::Acquire)
  }
}

/// Lifecycle of a stage run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
  Pending,
  Running,
  Succeeded,
  Failed,
  Canceled,
}

/// Terminal result of a stage run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
  Succeeded,
  Failed,
  Canceled,
}

impl From<StageOutcome> for StageState {
  fn from(outcome: StageOutcome) -> Self {
    match outcome {
      StageOutcome::Succeeded => StageState::Succeeded,
      StageOutcome::Failed => StageState::Failed,
      StageOutcome::Canceled => StageState::Canceled,
    }
  }
}

/// A unit of work that a chain can run.
///
/// `run` never fails: every problem is reported through the outcome.
#[async_trait]
pub trait Stage: Send + Sync {
  fn name(&self) -> &str;

  async fn run(&self) -> StageOutcome;

  /// Request cancellation. Honored at the stage's next checkpoint.
  fn cancel(&self);
}

/// A boxed future that returns one fetched collection
type FetchFuture<R> = BoxFuture<'static, Result<Vec<R>, RemoteError>>;

/// A factory function that creates fetch futures
type FetcherFn<R> = Box<dyn Fn() -> FetchFuture<R> + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs one remote fetch and persists the result.
///
/// Does not loop: each `run` makes exactly one remote call. Retrying means
/// calling `run` again.
pub struct StageRunner<R> {
  name: String,
  fetcher: FetcherFn<R>,
  persister: Arc<BatchPersister<R>>,
  state: Mutex<StageState>,
  last_report: Mutex<Option<BatchReport>>,
  cancel: CancelFlag,
}

impl<R: Persist + 'static> StageRunner<R> {
  /// Create a stage from a fetcher closure and the persister for its records.
  ///
  /// The fetcher is called once per run.
  pub fn new<F, Fut>(name: impl Into<String>, persister: Arc<BatchPersister<R>>, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<R>, RemoteError>> + Send + 'static,
  {
    Self {
      name: name.into(),
      fetcher: Box::new(move || -> FetchFuture<R> { Box::pin(fetcher()) }),
      persister,
      state: Mutex::new(StageState::Pending),
      last_report: Mutex::new(None),
      cancel: CancelFlag::new(),
    }
  }

  pub fn state(&self) -> StageState {
    *lock(&self.state)
  }

  /// Report of the last successful persist.
  pub fn last_report(&self) -> Option<BatchReport> {
    lock(&self.last_report).clone()
  }

  pub fn is_canceled(&self) -> bool {
    self.cancel.is_canceled()
  }

  async fn execute(&self) -> StageOutcome {
    info!(stage = %self.name, "fetching");
    let fetched = (self.fetcher)().await;

    if self.cancel.is_canceled() {
      warn!(stage = %self.name, "canceled, discarding fetched data");
      return StageOutcome::Canceled;
    }

    let records = match fetched {
      Ok(records) => records,
      Err(e) => {
        error!(stage = %self.name, error = %e, "There was a failure when fetching {}", self.name);
        return StageOutcome::Failed;
      }
    };

    match self.persister.persist(&records) {
      Ok(report) => {
        *lock(&self.last_report) = Some(report);
      }
      Err(e) => {
        error!(stage = %self.name, error = %e, "There was a failure when saving {}", self.name);
        return StageOutcome::Failed;
      }
    }

    // Whatever was committed stays; the outcome only stops successors
    if self.cancel.is_canceled() {
      warn!(stage = %self.name, "canceled after persisting");
      return StageOutcome::Canceled;
    }
    StageOutcome::Succeeded
  }
}

#[async_trait]
impl<R: Persist + 'static> Stage for StageRunner<R> {
  fn name(&self) -> &str {
    &self.name
  }

  async fn run(&self) -> StageOutcome {
    {
      let mut state = lock(&self.state);
      if *state == StageState::Running {
        warn!(stage = %self.name, "already running");
        return StageOutcome::Failed;
      }
      if self.cancel.is_canceled() {
        info!(stage = %self.name, "canceled before start");
        *state = StageState::Canceled;
        return StageOutcome::Canceled;
      }
      *state = StageState::Running;
    }

    let outcome = self.execute().await;
    *lock(&self.state) = outcome.into();
    outcome
  }

  fn cancel(&self) {
    self.cancel.cancel();
  }
}
