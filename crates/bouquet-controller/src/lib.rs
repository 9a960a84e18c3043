//! Bouquet Controller - level-triggered reconciliation of addons
//!
//! Two controllers share one runtime:
//! - **Shoot**: turns the addon annotation of a shoot into AddonInstances
//! - **AddonInstance**: renders the selected manifest and applies or removes
//!   its objects on the target cluster, guarded by a finalizer
//!
//! The runtime schedules syncs on kube's controller machinery, retries failed
//! syncs with per-key exponential backoff and gives up on a key after
//! [`MAX_SYNC_ATTEMPTS`] consecutive failures until the next watch event
//! brings it back.

pub mod error;
pub mod instance;
pub mod runtime;
pub mod shoot;

pub use error::{ControllerError, Result};
pub use instance::InstanceReconciler;
pub use runtime::{
    Controller, Filter, Informer, MAX_SYNC_ATTEMPTS, ObjectKey, Reconcile, RetryTracker, WorkQueue,
};
pub use shoot::{ShootReconciler, wants_addons};
