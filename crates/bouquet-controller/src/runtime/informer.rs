//! Watch-fed caches that enqueue keys
//!
//! An [`Informer`] keeps a reflector store of one resource type up to date
//! and pushes the key of every touched object onto the queues subscribed to
//! it. Controllers look the object up in the store when its sync starts,
//! never trusting watch event payloads.

use std::fmt;
use std::hash::Hash;
use std::pin::pin;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use kube::api::Api;
use kube::Resource;
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Event;
use kube::runtime::{WatchStreamExt, reflector, watcher};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::queue::WorkQueue;

/// Namespace and name of a watched object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn of<K: Resource>(object: &K) -> Self {
        let meta = object.meta();
        Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }

    /// Reference for store lookups
    pub fn to_ref<K>(&self) -> ObjectRef<K>
    where
        K: Resource,
        K::DynamicType: Default,
    {
        let reference = ObjectRef::new(&self.name);
        match &self.namespace {
            Some(ns) => reference.within(ns),
            None => reference,
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Decides whether an object's key should be queued
pub type Filter<K> = Arc<dyn Fn(&K) -> bool + Send + Sync>;

struct Subscriber<K: Resource> {
    queue: WorkQueue<K>,
    filter: Option<Filter<K>>,
}

/// Turns watch events into sync requests
pub(crate) struct EventHandler<K: Resource> {
    subscribers: Vec<Subscriber<K>>,
}

impl<K> EventHandler<K>
where
    K: Resource,
    K::DynamicType: Default,
{
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    pub(crate) fn subscribe(&mut self, queue: WorkQueue<K>, filter: Option<Filter<K>>) {
        self.subscribers.push(Subscriber { queue, filter });
    }

    pub(crate) fn handle(&self, event: &Event<K>) {
        match event {
            Event::Apply(object) | Event::InitApply(object) | Event::Delete(object) => {
                self.enqueue(object)
            }
            Event::Init | Event::InitDone => {}
        }
    }

    fn enqueue(&self, object: &K) {
        let key = ObjectKey::of(object);
        for subscriber in &self.subscribers {
            if subscriber.filter.as_ref().is_none_or(|filter| filter(object)) {
                subscriber.queue.add(&key);
            }
        }
    }
}

/// Whether `store` has received its initial list
pub(crate) fn is_ready<K>(store: &Store<K>) -> bool
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    store
        .wait_until_ready()
        .now_or_never()
        .is_some_and(|ready| ready.is_ok())
}

/// Reflector store of `K` plus the controllers interested in its changes
pub struct Informer<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    api: Api<K>,
    config: watcher::Config,
    store: Store<K>,
    writer: Writer<K>,
    handler: EventHandler<K>,
}

impl<K> Informer<K>
where
    K: Resource + Clone + DeserializeOwned + fmt::Debug + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Default,
{
    pub fn new(api: Api<K>, config: watcher::Config) -> Self {
        let (store, writer) = reflector::store();
        Self {
            api,
            config,
            store,
            writer,
            handler: EventHandler::new(),
        }
    }

    /// Reader over the cached objects
    pub fn store(&self) -> Store<K> {
        self.store.clone()
    }

    /// The initial list has been stored
    pub fn has_synced(&self) -> bool {
        is_ready(&self.store)
    }

    /// Wait for the initial list; false if the informer stopped first
    pub async fn wait_synced(&self) -> bool {
        self.store.wait_until_ready().await.is_ok()
    }

    /// Request a sync of every touched object
    pub fn subscribe(mut self, queue: WorkQueue<K>) -> Self {
        self.handler.subscribe(queue, None);
        self
    }

    /// Request a sync of touched objects accepted by `filter`
    pub fn subscribe_filtered<F>(mut self, queue: WorkQueue<K>, filter: F) -> Self
    where
        F: Fn(&K) -> bool + Send + Sync + 'static,
    {
        self.handler.subscribe(queue, Some(Arc::new(filter)));
        self
    }

    /// Watch until `shutdown` fires; watch errors are retried with backoff
    pub async fn run(self, shutdown: CancellationToken) {
        let kind = K::kind(&K::DynamicType::default()).to_string();
        let Informer {
            api,
            config,
            writer,
            handler,
            ..
        } = self;

        let mut events = pin!(reflector(writer, watcher(api, config)).default_backoff());
        info!(kind = %kind, "informer started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.next() => match event {
                    Some(Ok(event)) => handler.handle(&event),
                    Some(Err(e)) => warn!(kind = %kind, error = %e, "watch failed"),
                    None => break,
                },
            }
        }
        debug!(kind = %kind, "informer stopped");
    }
}
