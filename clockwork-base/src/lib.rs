pub mod hashing;

mod string_hash;
pub use string_hash::hash_resource_name;

mod resource_type_id;
pub use resource_type_id::ResourceTypeId;

mod resource_key;
pub use resource_key::ResourceKey;

mod name;
pub use name::sanitize_resource_name;
