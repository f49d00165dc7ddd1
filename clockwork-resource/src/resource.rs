use crate::cache::CacheInner;
use crate::ResourceResult;
use clockwork_base::{ResourceKey, ResourceTypeId};
use downcast_rs::{impl_downcast, DowncastSync};
use std::io::Read;
use std::sync::Arc;
use type_uuid::TypeUuid;

/// Where a resource is in its lifecycle, as seen by the cache
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadState {
    // Not queued and not in the loaded table
    Unloaded,
    // Waiting for the worker (or a blocked caller) to parse it
    Queued,
    // Parse in progress
    Loading,
    // Parsed (or failed), not yet finalized
    WaitingForFinalize,
    // Published in the loaded table
    Loaded,
}

/// A loadable unit of data. Implementations are created empty by a registered factory, then
/// filled in two steps:
///
/// * `begin_load` decodes the byte stream. It may run on the background loader thread, so it must
///   only touch the resource itself and the `LoadContext`.
/// * `end_load` runs on the thread that finalizes the resource (the thread draining the queue or
///   the thread blocked waiting on it), after every dependency requested during `begin_load` has
///   finalized or failed.
///
/// Once finalized the resource is published as an `Arc<dyn Resource>` and treated as read-only.
pub trait Resource: DowncastSync {
    fn begin_load(
        &mut self,
        stream: &mut dyn Read,
        ctx: &LoadContext,
    ) -> ResourceResult<()>;

    fn end_load(
        &mut self,
        _ctx: &FinalizeContext,
    ) -> ResourceResult<()> {
        Ok(())
    }

    /// Estimated bytes held by this resource, sampled when it is published
    fn memory_use(&self) -> usize {
        0
    }
}

impl_downcast!(sync Resource);

/// Handed to `Resource::begin_load`. Lets a resource find out what it is and queue the resources
/// it depends on.
pub struct LoadContext<'a> {
    pub(crate) cache: &'a CacheInner,
    pub(crate) key: ResourceKey,
    pub(crate) name: &'a str,
    pub(crate) background: bool,
}

impl<'a> LoadContext<'a> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn resource_type(&self) -> ResourceTypeId {
        self.key.resource_type
    }

    /// True when the parse runs on the background loader thread
    pub fn is_background(&self) -> bool {
        self.background
    }

    /// Queue a dependency. The resource being loaded will not finalize until the dependency has
    /// finalized or failed. Returns false if the dependency could not be queued (for example its
    /// type is not registered).
    pub fn request_dependency(
        &self,
        resource_type: ResourceTypeId,
        name: &str,
    ) -> bool {
        self.cache
            .queue_resource(resource_type, name, true, Some(self.key))
    }

    pub fn request<T: TypeUuid>(
        &self,
        name: &str,
    ) -> bool {
        self.request_dependency(ResourceTypeId::of::<T>(), name)
    }
}

/// Handed to `Resource::end_load`. Dependencies that loaded successfully can be looked up here,
/// failed dependencies are simply absent.
pub struct FinalizeContext<'a> {
    pub(crate) cache: &'a CacheInner,
    pub(crate) key: ResourceKey,
    pub(crate) name: &'a str,
}

impl<'a> FinalizeContext<'a> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn resource_type(&self) -> ResourceTypeId {
        self.key.resource_type
    }

    pub fn get_existing_resource(
        &self,
        resource_type: ResourceTypeId,
        name: &str,
    ) -> Option<Arc<dyn Resource>> {
        self.cache.get_existing_resource(resource_type, name)
    }

    pub fn get_existing<T: Resource + TypeUuid>(
        &self,
        name: &str,
    ) -> Option<Arc<T>> {
        self.get_existing_resource(ResourceTypeId::of::<T>(), name)
            .and_then(|resource| resource.downcast_arc::<T>().ok())
    }
}
