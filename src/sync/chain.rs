//! Sequential chains of dependent stages.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use super::stage::{CancelFlag, Stage, StageOutcome};

/// One chain step and the step to run once it succeeds.
struct Link {
  stage: Arc<dyn Stage>,
  on_success: Option<Arc<Link>>,
}

impl Link {
  fn iter(self: &Arc<Self>) -> impl Iterator<Item = &Arc<dyn Stage>> {
    std::iter::successors(Some(self), |link| link.on_success.as_ref()).map(|link| &link.stage)
  }
}

/// Result of one pass through a chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainReport {
  /// Stages that succeeded, in order
  pub completed: Vec<String>,
  /// Stage the chain stopped at and why
  pub halted_at: Option<(String, StageOutcome)>,
}

impl ChainReport {
  pub fn outcome(&self) -> StageOutcome {
    match &self.halted_at {
      Some((_, outcome)) => *outcome,
      None => StageOutcome::Succeeded,
    }
  }
}

/// Runs stages one after another, each only after its predecessor succeeded.
///
/// A failed or canceled stage halts the chain. `cancel` is cooperative: the
/// running stage finishes its current fetch or transaction, and no successor
/// starts afterwards. A chain is itself a [`Stage`], so chains nest; canceling
/// the outer chain cancels the inner one.
pub struct ChainController {
  name: String,
  head: Mutex<Option<Arc<Link>>>,
  cancel: CancelFlag,
}

impl ChainController {
  /// Build a chain where each stage is the successor of the one before it.
  pub fn new(name: impl Into<String>, stages: Vec<Arc<dyn Stage>>) -> Self {
    let head = stages.into_iter().rev().fold(None, |next, stage| {
      Some(Arc::new(Link {
        stage,
        on_success: next,
      }))
    });

    Self {
      name: name.into(),
      head: Mutex::new(head),
      cancel: CancelFlag::new(),
    }
  }

  fn head(&self) -> MutexGuard<'_, Option<Arc<Link>>> {
    self.head.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Names of the stages still held by the chain, in order.
  pub fn stage_names(&self) -> Vec<String> {
    match self.head().as_ref() {
      Some(head) => head.iter().map(|s| s.name().to_string()).collect(),
      None => Vec::new(),
    }
  }

  pub fn is_canceled(&self) -> bool {
    self.cancel.is_canceled()
  }

  /// Run the chain from its first stage.
  pub async fn start(&self) -> ChainReport {
    let mut report = ChainReport::default();

    // A destroyed chain has no links left but must still report the cancel
    if self.cancel.is_canceled() {
      warn!(chain = %self.name, "chain canceled, not starting");
      report.halted_at = Some((self.name.clone(), StageOutcome::Canceled));
      return report;
    }

    let mut next = self.head().clone();

    while let Some(link) = next {
      let name = link.stage.name().to_string();

      if self.cancel.is_canceled() {
        warn!(chain = %self.name, stage = %name, "chain canceled, not starting stage");
        report.halted_at = Some((name, StageOutcome::Canceled));
        break;
      }

      info!(chain = %self.name, stage = %name, "starting stage");
      match link.stage.run().await {
        StageOutcome::Succeeded => {
          report.completed.push(name);
          next = link.on_success.clone();
        }
        outcome => {
          warn!(chain = %self.name, stage = %name, ?outcome, "chain halted");
          report.halted_at = Some((name, outcome));
          break;
        }
      }
    }

    report
  }

  /// Cancel the chain and every stage in it, running or queued.
  pub fn cancel(&self) {
    self.cancel.cancel();
    if let Some(head) = self.head().as_ref() {
      for stage in head.iter() {
        stage.cancel();
      }
    }
  }

  /// Cancel the chain and release every stage it holds.
  pub fn destroy(&self) {
    self.cancel();
    self.head().take();
  }
}

impl Drop for ChainController {
  fn drop(&mut self) {
    self.destroy();
  }
}

#[async_trait]
impl Stage for ChainController {
  fn name(&self) -> &str {
    &self.name
  }

  async fn run(&self) -> StageOutcome {
    self.start().await.outcome()
  }

  fn cancel(&self) {
    ChainController::cancel(self);
  }
}
