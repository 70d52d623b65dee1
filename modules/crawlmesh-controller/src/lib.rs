pub mod hooks;
pub mod inflight;
pub mod reconcile;
pub mod scheduler;

pub use inflight::{InflightKey, InflightSet};
pub use reconcile::{ReconcileInput, Reconciler};
pub use scheduler::Scheduler;
