//! Controller runtime: informers, request queues and kube-scheduled workers

pub mod controller;
pub mod informer;
pub mod queue;
pub mod retry;

pub use controller::{Controller, Reconcile};
pub use informer::{Filter, Informer, ObjectKey};
pub use queue::WorkQueue;
pub use retry::{MAX_SYNC_ATTEMPTS, RetryTracker};
