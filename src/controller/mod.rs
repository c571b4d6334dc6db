pub mod clock;
pub mod deploymentconfig;
pub mod errors;
pub mod events;
pub mod refmanager;
pub mod requeue;
pub mod retry;
pub mod store;

#[cfg(test)]
pub mod testing;

pub use deploymentconfig::{error_policy, reconcile, Context, ReconcileError, ReconcileOutcome};
