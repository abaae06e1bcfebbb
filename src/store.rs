//! Informer-style ConfigMap cache
//!
//! A single loop drives a `kube` watcher into a reflector store and fans each
//! observed change out to the subscribed [`EventHandler`]s, in arrival order.
//! Workers only ever read the cache through [`ResourceStore`].
//!
//! Listings (the initial one and every re-list after a watch desync) are
//! buffered by the reflector and applied atomically. Notifications for a
//! listing are delivered after the swap, diffed against the previous
//! snapshot: new objects become adds, known ones become updates, and objects
//! that vanished become deletes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::reflector::{self, ObjectRef};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::resource::SourceResource;
use crate::Error;

/// Read access to the local cache of source resources
#[cfg_attr(test, automock)]
pub trait ResourceStore: Send + Sync {
    /// Look up a source resource; `Ok(None)` when it is not in the cache
    fn get(&self, namespace: &str, name: &str) -> Result<Option<SourceResource>, Error>;

    /// True once the initial full listing has been loaded
    fn has_synced(&self) -> bool;
}

/// Receives change notifications from the informer loop
///
/// Handlers run on the informer's loop and must not block it.
#[cfg_attr(test, automock)]
pub trait EventHandler: Send + Sync {
    /// A ConfigMap appeared
    fn on_add(&self, obj: &ConfigMap);

    /// A ConfigMap changed, or was re-delivered by a resync
    fn on_update(&self, old: &ConfigMap, new: &ConfigMap);

    /// A ConfigMap was removed
    fn on_delete(&self, obj: &ConfigMap);
}

/// Cheap, cloneable read handle onto the informer's cache
#[derive(Clone)]
pub struct ConfigMapStore {
    reader: reflector::Store<ConfigMap>,
    synced: Arc<AtomicBool>,
}

impl ResourceStore for ConfigMapStore {
    fn get(&self, namespace: &str, name: &str) -> Result<Option<SourceResource>, Error> {
        let mut obj_ref = ObjectRef::<ConfigMap>::new(name);
        if !namespace.is_empty() {
            obj_ref = obj_ref.within(namespace);
        }
        Ok(self
            .reader
            .get(&obj_ref)
            .map(|cm| SourceResource::from(cm.as_ref())))
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

/// Applies watcher events to the cache and notifies handlers
struct Dispatcher {
    writer: reflector::store::Writer<ConfigMap>,
    reader: reflector::Store<ConfigMap>,
    handlers: Vec<Arc<dyn EventHandler>>,
    /// Objects of the listing currently in progress
    listing: Option<Vec<ConfigMap>>,
    synced: Arc<AtomicBool>,
}

impl Dispatcher {
    fn new() -> (Self, ConfigMapStore) {
        let (reader, writer) = reflector::store();
        let synced = Arc::new(AtomicBool::new(false));
        let store = ConfigMapStore {
            reader: reader.clone(),
            synced: synced.clone(),
        };
        let dispatcher = Self {
            writer,
            reader,
            handlers: Vec::new(),
            listing: None,
            synced,
        };
        (dispatcher, store)
    }

    fn apply(&mut self, event: watcher::Event<ConfigMap>) {
        match &event {
            watcher::Event::Apply(obj) => {
                let old = self.reader.get(&ObjectRef::from_obj(obj));
                self.writer.apply_watcher_event(&event);
                match old {
                    Some(old) => self.notify_update(&old, obj),
                    None => self.notify_add(obj),
                }
            }
            watcher::Event::Delete(obj) => {
                self.writer.apply_watcher_event(&event);
                self.notify_delete(obj);
            }
            watcher::Event::Init => {
                debug!("ConfigMap listing started");
                self.writer.apply_watcher_event(&event);
                self.listing = Some(Vec::new());
            }
            watcher::Event::InitApply(obj) => {
                self.writer.apply_watcher_event(&event);
                self.listing
                    .get_or_insert_with(Vec::new)
                    .push(obj.clone());
            }
            watcher::Event::InitDone => {
                let previous: HashMap<ObjectRef<ConfigMap>, Arc<ConfigMap>> = self
                    .reader
                    .state()
                    .into_iter()
                    .map(|obj| (ObjectRef::from_obj(obj.as_ref()), obj))
                    .collect();
                self.writer.apply_watcher_event(&event);

                let listed = self.listing.take().unwrap_or_default();
                let mut seen = HashSet::with_capacity(listed.len());
                for obj in &listed {
                    let obj_ref = ObjectRef::from_obj(obj);
                    match previous.get(&obj_ref) {
                        Some(old) => self.notify_update(old, obj),
                        None => self.notify_add(obj),
                    }
                    seen.insert(obj_ref);
                }
                for (obj_ref, old) in &previous {
                    if !seen.contains(obj_ref) {
                        self.notify_delete(old);
                    }
                }

                if !self.synced.swap(true, Ordering::AcqRel) {
                    info!(count = listed.len(), "ConfigMap cache synced");
                }
            }
        }
    }

    /// Re-deliver every cached object as an update
    fn resync(&self) {
        if !self.synced.load(Ordering::Acquire) {
            return;
        }
        let objects = self.reader.state();
        debug!(count = objects.len(), "resyncing ConfigMaps");
        for obj in &objects {
            self.notify_update(obj, obj);
        }
    }

    fn notify_add(&self, obj: &ConfigMap) {
        for handler in &self.handlers {
            handler.on_add(obj);
        }
    }

    fn notify_update(&self, old: &ConfigMap, new: &ConfigMap) {
        for handler in &self.handlers {
            handler.on_update(old, new);
        }
    }

    fn notify_delete(&self, obj: &ConfigMap) {
        for handler in &self.handlers {
            handler.on_delete(obj);
        }
    }
}

/// Watches ConfigMaps and keeps a [`ConfigMapStore`] up to date
pub struct ConfigMapInformer {
    api: Api<ConfigMap>,
    resync_period: Duration,
    dispatcher: Dispatcher,
}

impl ConfigMapInformer {
    /// Create an informer for one namespace, or all namespaces when `None`
    ///
    /// Returns the informer together with a read handle onto its cache.
    pub fn new(
        client: Client,
        namespace: Option<&str>,
        resync_period: Duration,
    ) -> (Self, ConfigMapStore) {
        let api = match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };
        let (dispatcher, store) = Dispatcher::new();
        (
            Self {
                api,
                resync_period,
                dispatcher,
            },
            store,
        )
    }

    /// Register a handler for change notifications
    ///
    /// Handlers must be registered before [`ConfigMapInformer::run`].
    pub fn subscribe(&mut self, handler: Arc<dyn EventHandler>) {
        self.dispatcher.handlers.push(handler);
    }

    /// Run the watch loop until `shutdown` is cancelled
    ///
    /// Watch errors are logged and retried with backoff; they never end the loop.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let stream = watcher(self.api, watcher::Config::default()).default_backoff();
        tokio::pin!(stream);

        let mut resync = resync_interval(self.resync_period);

        info!(resync_period = ?self.resync_period, "starting ConfigMap informer");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("ConfigMap informer shutting down");
                    break;
                }
                event = stream.next() => match event {
                    Some(Ok(event)) => self.dispatcher.apply(event),
                    Some(Err(e)) => warn!(error = %e, "ConfigMap watch error, retrying"),
                    None => {
                        warn!("ConfigMap watch stream ended");
                        break;
                    }
                },
                _ = tick(&mut resync) => self.dispatcher.resync(),
            }
        }
    }
}

fn resync_interval(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    Some(interval)
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
