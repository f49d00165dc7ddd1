use crate::{Resource, SerializedResource};
use clockwork_base::hashing::HashMap;
use clockwork_base::ResourceTypeId;
use serde::de::DeserializeOwned;
use type_uuid::TypeUuid;

pub type ResourceFactoryFn = Box<dyn Fn() -> Box<dyn Resource> + Send + Sync>;

struct ResourceFactory {
    type_name: &'static str,
    create_fn: ResourceFactoryFn,
}

/// Maps a resource type to the function that creates an empty instance of it. A request for a
/// type with no factory is rejected before anything is queued.
#[derive(Default)]
pub struct ResourceFactories {
    factories: HashMap<ResourceTypeId, ResourceFactory>,
}

impl ResourceFactories {
    pub fn register<T: Resource + TypeUuid + Default>(&mut self) {
        self.register_with::<T, _>(T::default);
    }

    pub fn register_with<T: Resource + TypeUuid, F: Fn() -> T + Send + Sync + 'static>(
        &mut self,
        create_fn: F,
    ) {
        self.register_dyn(
            ResourceTypeId::of::<T>(),
            std::any::type_name::<T>(),
            Box::new(move || -> Box<dyn Resource> { Box::new(create_fn()) }),
        );
    }

    /// Register a bincode payload type, loaded as `SerializedResource<T>` under `T`'s UUID
    pub fn register_serialized<T: TypeUuid + DeserializeOwned + Send + Sync + 'static>(
        &mut self
    ) {
        self.register_dyn(
            ResourceTypeId::of::<T>(),
            std::any::type_name::<SerializedResource<T>>(),
            Box::new(|| -> Box<dyn Resource> { Box::new(SerializedResource::<T>::default()) }),
        );
    }

    pub fn register_dyn(
        &mut self,
        resource_type: ResourceTypeId,
        type_name: &'static str,
        create_fn: ResourceFactoryFn,
    ) {
        let old = self.factories.insert(
            resource_type,
            ResourceFactory {
                type_name,
                create_fn,
            },
        );

        if let Some(old) = old {
            log::warn!(
                "Factory for resource type {} ({}) replaced by {}",
                resource_type,
                old.type_name,
                type_name
            );
        }
    }

    pub fn contains(
        &self,
        resource_type: ResourceTypeId,
    ) -> bool {
        self.factories.contains_key(&resource_type)
    }

    pub fn create(
        &self,
        resource_type: ResourceTypeId,
    ) -> Option<Box<dyn Resource>> {
        self.factories
            .get(&resource_type)
            .map(|factory| (factory.create_fn)())
    }

    pub(crate) fn len(&self) -> usize {
        self.factories.len()
    }
}
