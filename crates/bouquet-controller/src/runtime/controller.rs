//! Runs a reconciler on kube's controller machinery
//!
//! [`Controller`] is fed by informer subscriptions instead of owning its own
//! watch, so several controllers can share one cache and a controller can
//! receive a filtered subset of events. Scheduling comes from
//! [`kube::runtime::controller::applier`]: pending requests are deduplicated
//! per key, a key is never synced by two workers at once, and at most
//! `workers` syncs run concurrently.

use std::any::Any;
use std::convert::Infallible;
use std::fmt;
use std::future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, join_all};
use futures::{FutureExt, StreamExt};
use kube::Resource;
use kube::runtime::controller::{self, Action, Config, applier};
use kube::runtime::reflector::{ObjectRef, Store};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::informer::ObjectKey;
use super::queue::{Requests, WorkQueue};
use super::retry::{RetryTracker, retry_delay};
use crate::error::{ControllerError, Result};

/// Level-triggered sync of one object
///
/// `sync` receives the cached object as it is when the sync starts and
/// drives the world towards it. It may be called again for the same object
/// at any time.
#[async_trait]
pub trait Reconcile: Send + Sync + 'static {
    type Object: Resource<DynamicType = ()> + Clone + fmt::Debug + Send + Sync + 'static;

    /// Name used in logs
    fn name(&self) -> &str;

    async fn sync(&self, object: &Self::Object) -> Result<()>;
}

struct Context<R> {
    reconciler: Arc<R>,
    retries: RetryTracker,
}

/// A reconciler, the cache of its objects and the other caches it reads
pub struct Controller<R: Reconcile> {
    reconciler: Arc<R>,
    store: Store<R::Object>,
    caches: Vec<BoxFuture<'static, bool>>,
    queue: WorkQueue<R::Object>,
    requests: Requests<R::Object>,
}

impl<R: Reconcile> Controller<R> {
    /// Sync objects of `store` whenever their key is added to [`queue`](Self::queue)
    pub fn new(reconciler: R, store: Store<R::Object>) -> Self {
        let (queue, requests) = WorkQueue::channel();
        Self {
            reconciler: Arc::new(reconciler),
            store,
            caches: Vec::new(),
            queue,
            requests,
        }
    }

    /// Do not start syncing before this cache has synced
    pub fn with_cache<K>(mut self, cache: Store<K>) -> Self
    where
        K: Resource + Clone + Send + Sync + 'static,
        K::DynamicType: Eq + std::hash::Hash + Clone + Send + Sync,
    {
        self.caches
            .push(async move { cache.wait_until_ready().await.is_ok() }.boxed());
        self
    }

    /// Where informers send the keys of changed objects
    pub fn queue(&self) -> WorkQueue<R::Object> {
        self.queue.clone()
    }

    /// Sync with up to `workers` concurrent workers until `shutdown` fires
    ///
    /// Fails with [`ControllerError::CacheSyncFailed`] when shut down (or an
    /// informer stops) before every cache has synced. On shutdown no new
    /// syncs start, pending retries are dropped, and this returns once the
    /// running syncs have finished.
    pub async fn run(self, workers: usize, shutdown: CancellationToken) -> Result<()> {
        let Controller {
            reconciler,
            store,
            mut caches,
            queue,
            requests,
        } = self;
        let name = reconciler.name().to_string();

        let own = store.clone();
        caches.push(async move { own.wait_until_ready().await.is_ok() }.boxed());

        info!(controller = %name, caches = caches.len(), "waiting for caches to sync");
        let synced = tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            synced = join_all(caches) => synced.into_iter().all(|ready| ready),
        };
        if !synced {
            drop(requests);
            return Err(ControllerError::CacheSyncFailed { controller: name });
        }
        drop(queue);

        let workers = workers.max(1);
        info!(controller = %name, workers, "starting workers");

        let config = Config::default().concurrency(u16::try_from(workers).unwrap_or(u16::MAX));
        let requests = requests
            .take_until(shutdown.cancelled_owned())
            .map(Ok::<_, Infallible>);
        let context = Arc::new(Context {
            reconciler,
            retries: RetryTracker::new(),
        });

        applier(
            reconcile::<R>,
            error_policy::<R>,
            Arc::clone(&context),
            store,
            requests,
            config,
        )
        .for_each(|result| {
            report(&name, &context.retries, result);
            future::ready(())
        })
        .await;

        info!(controller = %name, "stopped");
        Ok(())
    }
}

fn reconcile<R: Reconcile>(
    object: Arc<R::Object>,
    ctx: Arc<Context<R>>,
) -> BoxFuture<'static, Result<Action>> {
    async move {
        let key = ObjectKey::of(object.as_ref());
        AssertUnwindSafe(ctx.reconciler.sync(&object))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ControllerError::Panicked(panic_message(panic.as_ref()))))?;

        debug!(controller = ctx.reconciler.name(), key = %key, "synced");
        ctx.retries.reset(&key);
        Ok(Action::await_change())
    }
    .boxed()
}

/// Requeue with backoff until the ceiling, then wait for the next event
fn error_policy<R: Reconcile>(
    object: Arc<R::Object>,
    e: &ControllerError,
    ctx: Arc<Context<R>>,
) -> Action {
    let controller = ctx.reconciler.name();
    let key = ObjectKey::of(object.as_ref());
    let failures = ctx.retries.increment(&key);

    match retry_delay(failures) {
        Some(delay) => {
            warn!(
                controller,
                key = %key,
                failures,
                delay = ?delay,
                error = %e,
                "sync failed, requeuing"
            );
            Action::requeue(delay)
        }
        None => {
            error!(
                controller,
                key = %key,
                failures,
                error = %e,
                "dropping key after repeated sync failures"
            );
            ctx.retries.reset(&key);
            Action::await_change()
        }
    }
}

/// Failed syncs were logged by the error policy; a vanished object ends its retries
fn report<K: Resource>(
    controller: &str,
    retries: &RetryTracker,
    result: std::result::Result<
        (ObjectRef<K>, Action),
        controller::Error<ControllerError, Infallible>,
    >,
) {
    match result {
        Ok(_) | Err(controller::Error::ReconcilerFailed(..)) => {}
        Err(controller::Error::ObjectNotFound(object)) => {
            debug!(controller, object = %object, "object no longer cached, nothing to sync");
            retries.reset(&ObjectKey {
                namespace: object.namespace,
                name: object.name,
            });
        }
        Err(e) => warn!(controller, error = %e, "controller error"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bouquet_core::{Shoot, ShootSpec};
    use kube::runtime::reflector;
    use kube::runtime::reflector::store::Writer;
    use kube::runtime::watcher::Event;

    use crate::MAX_SYNC_ATTEMPTS;

    fn shoot(name: &str) -> Shoot {
        let mut shoot = Shoot::new(name, ShootSpec::default());
        shoot.metadata.namespace = Some("garden-dev".to_string());
        shoot
    }

    fn key(name: &str) -> ObjectKey {
        ObjectKey::namespaced("garden-dev", name)
    }

    /// Store that has seen its initial list
    fn listed(shoots: Vec<Shoot>) -> (Store<Shoot>, Writer<Shoot>) {
        let (store, mut writer) = reflector::store();
        writer.apply_watcher_event(&Event::Init);
        for shoot in shoots {
            writer.apply_watcher_event(&Event::InitApply(shoot));
        }
        writer.apply_watcher_event(&Event::InitDone);
        (store, writer)
    }

    /// Fails (or panics) for the first `failures` attempts, then succeeds
    struct Flaky {
        attempts: Arc<AtomicUsize>,
        failures: usize,
        panic: bool,
    }

    #[async_trait]
    impl Reconcile for Flaky {
        type Object = Shoot;

        fn name(&self) -> &str {
            "flaky"
        }

        async fn sync(&self, _shoot: &Shoot) -> Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                if self.panic {
                    panic!("attempt {attempt} exploded");
                }
                return Err(ControllerError::NoSource {
                    namespace: "garden".to_string(),
                    name: "nginx-1.0.0".to_string(),
                });
            }
            Ok(())
        }
    }

    fn flaky(failures: usize, panic: bool) -> (Flaky, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        let reconciler = Flaky {
            attempts: Arc::clone(&attempts),
            failures,
            panic,
        };
        (reconciler, attempts)
    }

    /// Records every sync as start and end events, taking a while per sync
    #[derive(Default)]
    struct Recording {
        events: Arc<Mutex<Vec<String>>>,
        running: AtomicUsize,
        max_running: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Reconcile for Recording {
        type Object = Shoot;

        fn name(&self) -> &str {
            "recording"
        }

        async fn sync(&self, shoot: &Shoot) -> Result<()> {
            let name = shoot.metadata.name.clone().unwrap_or_default();
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);
            self.events.lock().unwrap().push(format!("start {name}"));

            tokio::time::sleep(Duration::from_secs(1)).await;

            self.events.lock().unwrap().push(format!("end {name}"));
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_re_added_while_syncing_runs_once_more() {
        let reconciler = Recording::default();
        let events = Arc::clone(&reconciler.events);
        let max_running = Arc::clone(&reconciler.max_running);
        let (store, _writer) = listed(vec![shoot("web")]);
        let shutdown = CancellationToken::new();

        let controller = Controller::new(reconciler, store);
        let queue = controller.queue();
        let handle = tokio::spawn(controller.run(2, shutdown.clone()));

        queue.add(&key("web"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        // the first sync is still running; both adds collapse into one request
        queue.add(&key("web"));
        queue.add(&key("web"));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(
            *events.lock().unwrap(),
            vec!["start web", "end web", "start web", "end web"]
        );
        assert_eq!(max_running.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_keys_use_both_workers() {
        let reconciler = Recording::default();
        let max_running = Arc::clone(&reconciler.max_running);
        let (store, _writer) = listed(vec![shoot("a"), shoot("b"), shoot("c")]);
        let shutdown = CancellationToken::new();

        let controller = Controller::new(reconciler, store);
        let queue = controller.queue();
        let handle = tokio::spawn(controller.run(2, shutdown.clone()));

        for name in ["a", "b", "c"] {
            queue.add(&key(name));
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(max_running.load(Ordering::SeqCst), 2);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_dropped_after_max_attempts() {
        let (reconciler, attempts) = flaky(usize::MAX, false);
        let (store, _writer) = listed(vec![shoot("web")]);
        let shutdown = CancellationToken::new();

        let controller = Controller::new(reconciler, store);
        let queue = controller.queue();
        let handle = tokio::spawn(controller.run(2, shutdown.clone()));

        queue.add(&key("web"));
        // delays sum to 5ms * (2^14 - 1), about 82s
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_SYNC_ATTEMPTS as usize);

        // a new event brings it back, counting from zero again
        queue.add(&key("web"));
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_SYNC_ATTEMPTS as usize + 1);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_sync_is_retried() {
        let (reconciler, attempts) = flaky(1, true);
        let (store, _writer) = listed(vec![shoot("web"), shoot("db")]);
        let shutdown = CancellationToken::new();

        let controller = Controller::new(reconciler, store);
        let queue = controller.queue();
        let handle = tokio::spawn(controller.run(1, shutdown.clone()));

        queue.add(&key("web"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        // the panic counted as a failure, the retry succeeded
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        // the worker is still serving other keys
        queue.add(&key("db"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncached_object_is_skipped() {
        let (reconciler, attempts) = flaky(0, false);
        let (store, _writer) = listed(vec![shoot("web")]);
        let shutdown = CancellationToken::new();

        let controller = Controller::new(reconciler, store);
        let queue = controller.queue();
        let handle = tokio::spawn(controller.run(2, shutdown.clone()));

        queue.add(&key("gone"));
        queue.add(&key("web"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_object_stops_retrying() {
        let (reconciler, attempts) = flaky(usize::MAX, false);
        let (store, mut writer) = listed(vec![shoot("web")]);
        let shutdown = CancellationToken::new();

        let controller = Controller::new(reconciler, store);
        let queue = controller.queue();
        let handle = tokio::spawn(controller.run(1, shutdown.clone()));

        queue.add(&key("web"));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        // the retry 5ms later finds nothing to sync
        writer.apply_watcher_event(&Event::Delete(shoot("web")));
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_every_cache() {
        let (reconciler, attempts) = flaky(0, false);
        let (store, _writer) = listed(vec![shoot("web")]);
        let (manifests, mut manifest_writer) = reflector::store::<Shoot>();
        let shutdown = CancellationToken::new();

        let controller = Controller::new(reconciler, store).with_cache(manifests);
        let queue = controller.queue();
        let handle = tokio::spawn(controller.run(2, shutdown.clone()));

        queue.add(&key("web"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 0);

        manifest_writer.apply_watcher_event(&Event::Init);
        manifest_writer.apply_watcher_event(&Event::InitDone);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cache_sync_failed_on_shutdown() {
        let (reconciler, attempts) = flaky(0, false);
        let (never, _writer) = reflector::store::<Shoot>();
        let shutdown = CancellationToken::new();

        let controller = Controller::new(reconciler, never);
        let queue = controller.queue();
        queue.add(&key("web"));
        shutdown.cancel();

        let err = controller.run(2, shutdown).await.unwrap_err();
        assert!(matches!(err, ControllerError::CacheSyncFailed { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_stopped_informer_fails_sync() {
        let (reconciler, _) = flaky(0, false);
        let (store, writer) = reflector::store::<Shoot>();
        drop(writer);

        let err = Controller::new(reconciler, store)
            .run(1, CancellationToken::new())
            .await
            .unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"flaky: caches did not sync before shutdown");
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }
}
