mod error;
pub use error::*;

mod resource;
pub use resource::FinalizeContext;
pub use resource::LoadContext;
pub use resource::LoadState;
pub use resource::Resource;

mod factory;
pub use factory::ResourceFactories;
pub use factory::ResourceFactoryFn;

mod serialized;
pub use serialized::SerializedResource;

mod source;
pub use source::DirectorySource;
pub use source::MemorySource;
pub use source::ResourceSource;
pub use source::ResourceStream;
pub use source::PRIORITY_LAST;

mod config;
pub use config::ResourceCacheConfig;
pub use config::ResourceCacheConfigJson;

mod events;
pub use events::ResourceEvent;

mod groups;
mod load_queue;
mod background_loader;

mod cache;
pub use cache::ResourceCache;
pub use cache::ResourceCacheBuilder;

pub use clockwork_base::{sanitize_resource_name, ResourceKey, ResourceTypeId};
