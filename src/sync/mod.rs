//! Fetch-then-persist pipeline: batch persister, stages, chains and the
//! feature orchestrator.

mod chain;
mod listeners;
mod orchestrator;
mod persister;
mod stage;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::{ChainController, ChainReport};
pub use listeners::{BatchListener, GroupId, ListenerSet};
pub use orchestrator::{FeatureFetch, FetchError, FetchReport};
pub use persister::{BatchPersister, BatchReport, SkippedRecord};
pub use stage::{CancelFlag, Stage, StageOutcome, StageRunner, StageState};
