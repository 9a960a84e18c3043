//! Reconcile requests for one controller
//!
//! Informers push object keys here; the controller feeds them to kube's
//! scheduler, which keeps one pending request per key, holds a key back while
//! a sync of it is running and applies requeue delays. Adding a key that is
//! already pending or in flight therefore results in a single follow-up sync.

use futures::channel::mpsc;
use kube::Resource;
use kube::runtime::reflector::ObjectRef;

use super::informer::ObjectKey;

pub(crate) type Requests<K> = mpsc::UnboundedReceiver<ObjectRef<K>>;

/// Sending half of a controller's request stream
pub struct WorkQueue<K: Resource> {
    tx: mpsc::UnboundedSender<ObjectRef<K>>,
}

impl<K: Resource> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Resource,
    K::DynamicType: Default,
{
    pub(crate) fn channel() -> (Self, Requests<K>) {
        let (tx, rx) = mpsc::unbounded();
        (Self { tx }, rx)
    }

    /// Request a sync of `key`; false once the controller has stopped
    pub fn add(&self, key: &ObjectKey) -> bool {
        self.tx.unbounded_send(key.to_ref()).is_ok()
    }

    /// The controller stopped taking requests
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
