use crate::background_loader::BackgroundLoaderThread;
use crate::events::EventSink;
use crate::groups::ResourceGroups;
use crate::load_queue::{BackgroundLoadItem, LoadQueue, ParseJob, PendingFinalize, WaitStep};
use crate::source::{DirectorySource, ResourceSources, ResourceStream, PRIORITY_LAST};
use crate::{
    FinalizeContext, LoadContext, LoadState, Resource, ResourceCacheConfig, ResourceError,
    ResourceEvent, ResourceFactories, ResourceResult, ResourceSource, SerializedResource,
};
use clockwork_base::{sanitize_resource_name, ResourceKey, ResourceTypeId};
use crossbeam_channel::Sender;
use serde::de::DeserializeOwned;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use type_uuid::TypeUuid;

// The maps behind these locks are consistent between statements, so a panic on another thread
// doesn't invalidate them
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

fn sanitized_name(name: &str) -> ResourceResult<String> {
    let name = sanitize_resource_name(name);
    if name.is_empty() {
        Err(ResourceError::EmptyName)
    } else {
        Ok(name)
    }
}

fn downcast<T: Resource>(
    resource: Arc<dyn Resource>,
    name: &str,
) -> ResourceResult<Arc<T>> {
    resource
        .downcast_arc::<T>()
        .map_err(|_| ResourceError::TypeMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<T>(),
        })
}

pub(crate) enum WaitOutcome {
    NotQueued,
    Finished(ResourceResult<Arc<dyn Resource>>),
}

// State shared between the cache, the background loader thread, and the load/finalize contexts.
//
// Lock order is queue before groups. No lock is held while resource code (begin_load/end_load) runs.
pub(crate) struct CacheInner {
    factories: ResourceFactories,
    sources: RwLock<ResourceSources>,
    groups: Mutex<ResourceGroups>,
    queue: Mutex<LoadQueue>,
    // Signalled whenever an item in the queue changes state or is removed
    queue_changed: Condvar,
    wake_tx: Sender<()>,
    events: EventSink,
    config: ResourceCacheConfig,
}

impl CacheInner {
    /// Queue a background load. Succeeds if the resource is already loaded, already in flight, or
    /// newly queued. `caller` is linked as a dependent of the requested resource.
    pub(crate) fn queue_resource(
        &self,
        resource_type: ResourceTypeId,
        name: &str,
        send_event_on_failure: bool,
        caller: Option<ResourceKey>,
    ) -> bool {
        let Ok(name) = sanitized_name(name) else {
            log::warn!("Refusing to queue a resource with an empty name");
            return false;
        };
        let key = ResourceKey::new(resource_type, &name);

        let mut queue = lock(&self.queue);
        if queue.contains(&key) {
            if let Some(caller) = caller {
                queue.link_dependency(key, caller);
            }
            return true;
        }

        // Finalized items are published before they leave the queue, so this can't miss one
        if lock(&self.groups).contains(&key) {
            return true;
        }

        let Some(resource) = self.factories.create(resource_type) else {
            drop(queue);
            self.report_unknown_type(resource_type, &name);
            return false;
        };

        log::debug!("Queue background load of {}", name);
        queue.insert(
            key,
            BackgroundLoadItem::new(name, resource, send_event_on_failure, true),
        );
        if let Some(caller) = caller {
            queue.link_dependency(key, caller);
        }
        drop(queue);

        // A full channel means a wake is already pending
        let _ = self.wake_tx.try_send(());
        true
    }

    fn report_unknown_type(
        &self,
        resource_type: ResourceTypeId,
        name: &str,
    ) {
        log::error!(
            "Could not load unknown resource type {} for {}",
            resource_type,
            name
        );
        self.events.send(ResourceEvent::UnknownResourceType {
            resource_type,
            name: name.to_string(),
        });
    }

    // Called by the background loader thread. Returns false if nothing was queued.
    pub(crate) fn process_next_queued(&self) -> bool {
        let job = lock(&self.queue).take_next_queued();
        match job {
            Some(job) => {
                self.parse_job(job);
                true
            }
            None => false,
        }
    }

    fn parse_job(
        &self,
        job: ParseJob,
    ) {
        profiling::scope!("parse resource");
        let ParseJob {
            key,
            name,
            mut resource,
            background,
        } = job;

        log::trace!("Begin load {} (background: {})", name, background);
        let result = self.open_and_parse(key, &name, background, resource.as_mut());
        if let Err(error) = &result {
            log::trace!("Begin load {} failed: {}", name, error);
        }

        lock(&self.queue).finish_parse(&key, resource, result);
        self.queue_changed.notify_all();
    }

    fn open_and_parse(
        &self,
        key: ResourceKey,
        name: &str,
        background: bool,
        resource: &mut dyn Resource,
    ) -> ResourceResult<()> {
        let mut stream = read(&self.sources).open(name)?;
        let ctx = LoadContext {
            cache: self,
            key,
            name,
            background,
        };
        resource.begin_load(&mut *stream, &ctx)
    }

    // Runs end_load, publishes or reports the result, then removes the item from the queue
    fn finalize(
        &self,
        pending: PendingFinalize,
    ) -> ResourceResult<Arc<dyn Resource>> {
        profiling::scope!("finalize resource");
        let PendingFinalize {
            key,
            name,
            mut resource,
            parse_result,
            send_event_on_failure,
            background,
        } = pending;

        let result = parse_result.and_then(|()| {
            let ctx = FinalizeContext {
                cache: self,
                key,
                name: &name,
            };
            resource.end_load(&ctx)
        });

        let result = match result {
            Ok(()) => {
                let resource: Arc<dyn Resource> = Arc::from(resource);
                let released_count =
                    lock(&self.groups).insert(key, name.clone(), resource.clone());
                log::debug!("Loaded resource {}", name);
                if released_count > 0 {
                    log::debug!(
                        "Released {} resources of type {} to stay within the memory budget",
                        released_count,
                        key.resource_type
                    );
                }
                Ok(resource)
            }
            Err(error) => {
                log::error!("Failed to load resource {}: {}", name, error);
                if send_event_on_failure {
                    self.events.send(ResourceEvent::LoadFailed {
                        resource_type: key.resource_type,
                        name: name.clone(),
                        error: error.clone(),
                    });
                }
                Err(error)
            }
        };

        if background {
            self.events.send(ResourceEvent::BackgroundLoaded {
                resource_type: key.resource_type,
                name,
                success: result.is_ok(),
            });
        }

        lock(&self.queue).complete_finalize(&key, &result);
        self.queue_changed.notify_all();
        result
    }

    pub(crate) fn finish_resources(
        &self,
        budget: Duration,
    ) -> usize {
        profiling::scope!("finish_resources");
        let start = Instant::now();
        let mut finished_count = 0;
        loop {
            if start.elapsed() >= budget {
                break;
            }

            let pending = {
                let mut queue = lock(&self.queue);
                match queue.next_ready() {
                    Some(key) => queue.begin_finalize(&key),
                    None => {
                        // Nothing can finalize. Once everything left has parsed, that means a cycle.
                        if queue.has_unparsed() || queue.break_dependency_cycles() == 0 {
                            break;
                        }
                        continue;
                    }
                }
            };

            if let Some(pending) = pending {
                // Failures are reported through the log and events
                let _ = self.finalize(pending);
                finished_count += 1;
            }
        }

        finished_count
    }

    /// Block until `key` leaves the queue, parsing and finalizing it (and its dependencies) on
    /// this thread when possible. `waiting_on` holds the keys this thread is already blocked on
    /// further up the stack.
    pub(crate) fn wait_for_resource(
        &self,
        key: &ResourceKey,
        waiting_on: &mut Vec<ResourceKey>,
    ) -> WaitOutcome {
        if !lock(&self.queue).add_waiter(key) {
            return WaitOutcome::NotQueued;
        }

        WaitOutcome::Finished(self.wait_as_waiter(key, waiting_on))
    }

    // The calling thread must already be registered with `LoadQueue::add_waiter`
    fn wait_as_waiter(
        &self,
        key: &ResourceKey,
        waiting_on: &mut Vec<ResourceKey>,
    ) -> ResourceResult<Arc<dyn Resource>> {
        let mut queue = lock(&self.queue);
        waiting_on.push(*key);
        let result = loop {
            match queue.wait_step(key) {
                WaitStep::Gone => {
                    // Finalized on another thread, which left the result for us
                    break queue
                        .take_finished(key)
                        .unwrap_or_else(|| Err(ResourceError::LoadFailed(key.to_string())));
                }
                WaitStep::Parse => {
                    let job = queue.claim(key);
                    drop(queue);
                    if let Some(job) = job {
                        self.parse_job(job);
                    }
                    queue = lock(&self.queue);
                }
                WaitStep::Block => {
                    queue = self
                        .queue_changed
                        .wait(queue)
                        .unwrap_or_else(|e| e.into_inner());
                }
                WaitStep::Finalize => {
                    if let Some(pending) = queue.begin_finalize(key) {
                        queue.remove_waiter(key);
                        drop(queue);
                        break self.finalize(pending);
                    }
                }
                WaitStep::FinishDependencies(dependencies) => {
                    if dependencies.iter().any(|x| waiting_on.contains(x)) {
                        let name = queue
                            .get(key)
                            .map(|item| item.name.clone())
                            .unwrap_or_else(|| key.to_string());
                        log::warn!("Dependency cycle found while waiting for {}", name);
                        if queue.break_dependency_cycles() == 0 {
                            queue.fail(key, ResourceError::DependencyCycle(name));
                        }
                        continue;
                    }

                    drop(queue);
                    for dependency in &dependencies {
                        // Dependents only need the dependency to be out of the queue
                        let _ = self.wait_for_resource(dependency, waiting_on);
                    }
                    queue = lock(&self.queue);
                }
            }
        };
        waiting_on.pop();

        result
    }

    #[profiling::function]
    pub(crate) fn get_resource(
        &self,
        resource_type: ResourceTypeId,
        name: &str,
        send_event_on_failure: bool,
    ) -> ResourceResult<Arc<dyn Resource>> {
        let name = sanitized_name(name)?;
        let key = ResourceKey::new(resource_type, &name);

        loop {
            if let Some(resource) = lock(&self.groups).get(&key) {
                return Ok(resource);
            }

            // In flight, a failed background load is not retried here
            if let WaitOutcome::Finished(result) = self.wait_for_resource(&key, &mut Vec::default())
            {
                return result;
            }

            // Load immediately. The item is registered in the queue so concurrent requests for
            // the same key wait on this load instead of starting their own.
            let job = {
                let mut queue = lock(&self.queue);
                if queue.contains(&key) {
                    continue;
                }

                if let Some(resource) = lock(&self.groups).get(&key) {
                    return Ok(resource);
                }

                let Some(resource) = self.factories.create(resource_type) else {
                    drop(queue);
                    self.report_unknown_type(resource_type, &name);
                    return Err(ResourceError::UnknownType(resource_type));
                };

                log::debug!("Load {} immediately", name);
                let job = queue.insert_claimed(
                    key,
                    BackgroundLoadItem::new(name.clone(), resource, send_event_on_failure, false),
                );
                queue.add_waiter(&key);
                job
            };

            if let Some(job) = job {
                self.parse_job(job);
            }

            return self.wait_as_waiter(&key, &mut Vec::default());
        }
    }

    pub(crate) fn get_existing_resource(
        &self,
        resource_type: ResourceTypeId,
        name: &str,
    ) -> Option<Arc<dyn Resource>> {
        let name = sanitized_name(name).ok()?;
        lock(&self.groups).get(&ResourceKey::new(resource_type, &name))
    }
}

/// Loads resources on demand or in the background and keeps them loaded until released.
///
/// Dropping the cache stops the background loader thread (after the item it is currently parsing)
/// and joins it.
pub struct ResourceCache {
    inner: Arc<CacheInner>,
    background_loader: Option<BackgroundLoaderThread>,
}

impl Drop for ResourceCache {
    fn drop(&mut self) {
        if let Some(background_loader) = self.background_loader.take() {
            background_loader.finish();
        }
    }
}

impl ResourceCache {
    pub fn builder() -> ResourceCacheBuilder {
        ResourceCacheBuilder::default()
    }

    pub fn config(&self) -> &ResourceCacheConfig {
        &self.inner.config
    }

    pub fn is_registered(
        &self,
        resource_type: ResourceTypeId,
    ) -> bool {
        self.inner.factories.contains(resource_type)
    }

    //
    // Loading
    //

    /// Return a loaded resource, waiting on an in-flight load or loading it on this thread if
    /// needed
    pub fn get_resource(
        &self,
        resource_type: ResourceTypeId,
        name: &str,
        send_event_on_failure: bool,
    ) -> ResourceResult<Arc<dyn Resource>> {
        self.inner
            .get_resource(resource_type, name, send_event_on_failure)
    }

    pub fn get<T: Resource + TypeUuid>(
        &self,
        name: &str,
    ) -> ResourceResult<Arc<T>> {
        let resource = self.get_resource(ResourceTypeId::of::<T>(), name, true)?;
        downcast(resource, name)
    }

    pub fn get_serialized<T: TypeUuid + DeserializeOwned + Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> ResourceResult<Arc<SerializedResource<T>>> {
        let resource = self.get_resource(ResourceTypeId::of::<T>(), name, true)?;
        downcast(resource, name)
    }

    /// Queue a resource to be parsed on the background loader thread. Never blocks. Returns false
    /// if the name is empty or the type is not registered.
    pub fn background_load_resource(
        &self,
        resource_type: ResourceTypeId,
        name: &str,
        send_event_on_failure: bool,
    ) -> bool {
        self.inner
            .queue_resource(resource_type, name, send_event_on_failure, None)
    }

    pub fn background_load<T: TypeUuid>(
        &self,
        name: &str,
    ) -> bool {
        self.background_load_resource(ResourceTypeId::of::<T>(), name, true)
    }

    /// Block until the resource is no longer in flight. Returns None if it was not queued.
    pub fn wait_for_resource(
        &self,
        key: ResourceKey,
    ) -> Option<ResourceResult<Arc<dyn Resource>>> {
        match self.inner.wait_for_resource(&key, &mut Vec::default()) {
            WaitOutcome::NotQueued => None,
            WaitOutcome::Finished(result) => Some(result),
        }
    }

    /// Finalize background loads that are ready, stopping once `budget` has elapsed. Returns how
    /// many were finalized.
    pub fn finish_resources(
        &self,
        budget: Duration,
    ) -> usize {
        self.inner.finish_resources(budget)
    }

    // Call once per frame
    pub fn update(&self) -> usize {
        self.finish_resources(self.inner.config.finish_background_resources_budget())
    }

    pub fn num_background_load_resources(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    pub fn load_state(
        &self,
        resource_type: ResourceTypeId,
        name: &str,
    ) -> LoadState {
        let Ok(name) = sanitized_name(name) else {
            return LoadState::Unloaded;
        };
        let key = ResourceKey::new(resource_type, &name);

        let queue = lock(&self.inner.queue);
        if let Some(load_state) = queue.load_state(&key) {
            return load_state;
        }

        if lock(&self.inner.groups).contains(&key) {
            LoadState::Loaded
        } else {
            LoadState::Unloaded
        }
    }

    //
    // Loaded resources
    //

    /// Never starts a load
    pub fn get_existing_resource(
        &self,
        resource_type: ResourceTypeId,
        name: &str,
    ) -> Option<Arc<dyn Resource>> {
        self.inner.get_existing_resource(resource_type, name)
    }

    pub fn get_existing<T: Resource + TypeUuid>(
        &self,
        name: &str,
    ) -> Option<Arc<T>> {
        self.get_existing_resource(ResourceTypeId::of::<T>(), name)
            .and_then(|resource| resource.downcast_arc::<T>().ok())
    }

    pub fn get_resources(
        &self,
        resource_type: ResourceTypeId,
    ) -> Vec<Arc<dyn Resource>> {
        lock(&self.inner.groups).resources(resource_type)
    }

    /// Publish a resource that was created in code rather than loaded. Fails if the same key is
    /// still being loaded, since the load would replace it when it finalizes.
    pub fn add_manual_resource(
        &self,
        resource_type: ResourceTypeId,
        name: &str,
        resource: Arc<dyn Resource>,
    ) -> ResourceResult<()> {
        let name = sanitized_name(name)?;
        let key = ResourceKey::new(resource_type, &name);

        let queue = lock(&self.inner.queue);
        if queue.contains(&key) {
            log::warn!("Can't add manual resource {} while it is being loaded", name);
            return Err(ResourceError::InFlight(name));
        }

        log::debug!("Add manual resource {}", name);
        lock(&self.inner.groups).insert(key, name, resource);
        Ok(())
    }

    /// Remove a resource from the cache. Unless `force` is set, a resource still referenced
    /// elsewhere stays loaded.
    pub fn release_resource(
        &self,
        resource_type: ResourceTypeId,
        name: &str,
        force: bool,
    ) -> bool {
        let Ok(name) = sanitized_name(name) else {
            return false;
        };
        lock(&self.inner.groups).remove(&ResourceKey::new(resource_type, &name), force)
    }

    pub fn release_resources(
        &self,
        resource_type: ResourceTypeId,
        force: bool,
    ) -> usize {
        lock(&self.inner.groups).remove_group(resource_type, force)
    }

    pub fn release_all_resources(
        &self,
        force: bool,
    ) -> usize {
        lock(&self.inner.groups).remove_all(force)
    }

    /// Load the resource again and replace the cached instance. Existing holders keep the old one.
    pub fn reload_resource(
        &self,
        resource_type: ResourceTypeId,
        name: &str,
    ) -> ResourceResult<Arc<dyn Resource>> {
        let name = sanitized_name(name)?;
        let key = ResourceKey::new(resource_type, &name);
        log::debug!("Reload resource {}", name);

        // Let an in-flight load land first so it can't overwrite the reloaded instance
        let _ = self.inner.wait_for_resource(&key, &mut Vec::default());
        lock(&self.inner.groups).remove(&key, true);
        self.inner.get_resource(resource_type, &name, true)
    }

    //
    // Memory
    //

    pub fn memory_use(
        &self,
        resource_type: ResourceTypeId,
    ) -> usize {
        lock(&self.inner.groups).memory_use(resource_type)
    }

    pub fn total_memory_use(&self) -> usize {
        lock(&self.inner.groups).total_memory_use()
    }

    pub fn memory_budget(
        &self,
        resource_type: ResourceTypeId,
    ) -> usize {
        lock(&self.inner.groups).memory_budget(resource_type)
    }

    /// Zero means unlimited. Unused resources are released immediately if the group is over the
    /// new budget.
    pub fn set_memory_budget(
        &self,
        resource_type: ResourceTypeId,
        budget: usize,
    ) {
        let released_count = lock(&self.inner.groups).set_memory_budget(resource_type, budget);
        if released_count > 0 {
            log::debug!(
                "Released {} resources of type {} for the new memory budget",
                released_count,
                resource_type
            );
        }
    }

    //
    // Sources
    //

    pub fn add_source(
        &self,
        source: Arc<dyn ResourceSource>,
        priority: usize,
    ) {
        write(&self.inner.sources).add(source, priority);
    }

    pub fn remove_source(
        &self,
        name: &str,
    ) -> bool {
        write(&self.inner.sources).remove(name)
    }

    pub fn source_names(&self) -> Vec<String> {
        read(&self.inner.sources).names()
    }

    pub fn exists(
        &self,
        name: &str,
    ) -> bool {
        match sanitized_name(name) {
            Ok(name) => read(&self.inner.sources).exists(&name),
            Err(_) => false,
        }
    }

    /// Open a resource's bytes directly, without loading it
    pub fn open_stream(
        &self,
        name: &str,
    ) -> ResourceResult<ResourceStream> {
        let name = sanitized_name(name)?;
        read(&self.inner.sources).open(&name)
    }
}

pub struct ResourceCacheBuilder {
    config: ResourceCacheConfig,
    factories: ResourceFactories,
    sources: Vec<(Arc<dyn ResourceSource>, usize)>,
    event_tx: Option<Sender<ResourceEvent>>,
}

impl Default for ResourceCacheBuilder {
    fn default() -> Self {
        ResourceCacheBuilder::new(ResourceCacheConfig::default())
    }
}

impl ResourceCacheBuilder {
    pub fn new(config: ResourceCacheConfig) -> Self {
        ResourceCacheBuilder {
            config,
            factories: Default::default(),
            sources: Default::default(),
            event_tx: None,
        }
    }

    pub fn register<T: Resource + TypeUuid + Default>(mut self) -> Self {
        self.factories.register::<T>();
        self
    }

    pub fn register_with<T: Resource + TypeUuid, F: Fn() -> T + Send + Sync + 'static>(
        mut self,
        create_fn: F,
    ) -> Self {
        self.factories.register_with::<T, F>(create_fn);
        self
    }

    pub fn register_serialized<T: TypeUuid + DeserializeOwned + Send + Sync + 'static>(
        mut self
    ) -> Self {
        self.factories.register_serialized::<T>();
        self
    }

    pub fn add_source(
        mut self,
        source: Arc<dyn ResourceSource>,
        priority: usize,
    ) -> Self {
        self.sources.push((source, priority));
        self
    }

    /// Where `ResourceEvent`s are sent. Without one, events are dropped.
    pub fn event_sender(
        mut self,
        event_tx: Sender<ResourceEvent>,
    ) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn build(self) -> ResourceResult<ResourceCache> {
        let mut sources = ResourceSources::default();
        for resource_dir in &self.config.resource_dirs {
            sources.add(
                Arc::new(DirectorySource::new(resource_dir.clone())),
                PRIORITY_LAST,
            );
        }
        for (source, priority) in self.sources {
            sources.add(source, priority);
        }

        let mut groups = ResourceGroups::default();
        for (resource_type, budget) in &self.config.memory_budgets {
            groups.set_memory_budget(*resource_type, *budget);
        }

        log::debug!(
            "Create resource cache with {} registered types",
            self.factories.len()
        );

        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        let worker_thread_name = self.config.worker_thread_name.clone();
        let inner = Arc::new(CacheInner {
            factories: self.factories,
            sources: RwLock::new(sources),
            groups: Mutex::new(groups),
            queue: Mutex::new(LoadQueue::default()),
            queue_changed: Condvar::new(),
            wake_tx,
            events: EventSink::new(self.event_tx),
            config: self.config,
        });

        let background_loader =
            BackgroundLoaderThread::new(&worker_thread_name, inner.clone(), wake_rx)?;

        Ok(ResourceCache {
            inner,
            background_loader: Some(background_loader),
        })
    }
}
