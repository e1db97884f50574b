// Group → room membership reconciliation
pub mod differ;
pub mod grace;
pub mod models;
pub mod reconciler;
pub mod scheduler;

pub use reconciler::{Reconciler, SyncSettings};
pub use scheduler::SyncScheduler;
