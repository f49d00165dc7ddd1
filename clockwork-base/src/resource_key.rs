use crate::{hash_resource_name, ResourceTypeId};
use std::fmt;

/// Addresses one resource: its type and the case-insensitive hash of its sanitized name. Both the
/// background load queue and the loaded resource groups are keyed by this.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct ResourceKey {
    pub resource_type: ResourceTypeId,
    pub name_hash: u128,
}

impl ResourceKey {
    pub fn new(
        resource_type: ResourceTypeId,
        name: &str,
    ) -> Self {
        ResourceKey {
            resource_type,
            name_hash: hash_resource_name(name),
        }
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ResourceKey")
            .field("resource_type", &self.resource_type)
            .field("name_hash", &format!("{:0>32x}", self.name_hash))
            .finish()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}:{:0>32x}", self.resource_type, self.name_hash)
    }
}
