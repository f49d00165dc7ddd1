use crate::Resource;
use clockwork_base::hashing::HashMap;
use clockwork_base::{ResourceKey, ResourceTypeId};
use std::sync::Arc;
use std::time::Instant;

pub(crate) struct LoadedResource {
    pub name: String,
    pub resource: Arc<dyn Resource>,
    // Sampled at publication
    pub memory_use: usize,
    pub last_used: Instant,
}

impl LoadedResource {
    // The cache's own reference is the only one
    fn is_unused(&self) -> bool {
        Arc::strong_count(&self.resource) == 1
    }
}

#[derive(Default)]
pub(crate) struct ResourceGroup {
    resources: HashMap<u128, LoadedResource>,
    // Zero means unlimited
    memory_budget: usize,
    memory_use: usize,
}

impl ResourceGroup {
    // Release unused resources, least recently used first, until the group fits its budget.
    // `keep` is never released.
    fn enforce_budget(
        &mut self,
        keep: Option<u128>,
    ) -> usize {
        let mut released_count = 0;
        while self.memory_budget > 0 && self.memory_use > self.memory_budget {
            let oldest = self
                .resources
                .iter()
                .filter(|(name_hash, loaded)| Some(**name_hash) != keep && loaded.is_unused())
                .min_by_key(|(_, loaded)| loaded.last_used)
                .map(|(name_hash, _)| *name_hash);

            let Some(name_hash) = oldest else {
                break;
            };

            if let Some(released) = self.resources.remove(&name_hash) {
                log::debug!(
                    "Release {} to stay within memory budget ({} > {})",
                    released.name,
                    self.memory_use,
                    self.memory_budget
                );
                self.memory_use -= released.memory_use;
                released_count += 1;
            }
        }

        released_count
    }
}

/// The loaded table, one group per resource type
#[derive(Default)]
pub(crate) struct ResourceGroups {
    groups: HashMap<ResourceTypeId, ResourceGroup>,
}

impl ResourceGroups {
    pub fn contains(
        &self,
        key: &ResourceKey,
    ) -> bool {
        self.groups
            .get(&key.resource_type)
            .map(|group| group.resources.contains_key(&key.name_hash))
            .unwrap_or(false)
    }

    pub fn get(
        &mut self,
        key: &ResourceKey,
    ) -> Option<Arc<dyn Resource>> {
        let loaded = self
            .groups
            .get_mut(&key.resource_type)?
            .resources
            .get_mut(&key.name_hash)?;
        loaded.last_used = Instant::now();
        Some(loaded.resource.clone())
    }

    /// Publish a resource, replacing any previous entry for the key. Returns how many other
    /// resources were released to stay within the group's memory budget.
    pub fn insert(
        &mut self,
        key: ResourceKey,
        name: String,
        resource: Arc<dyn Resource>,
    ) -> usize {
        let memory_use = resource.memory_use();
        let group = self.groups.entry(key.resource_type).or_default();
        let old = group.resources.insert(
            key.name_hash,
            LoadedResource {
                name,
                resource,
                memory_use,
                last_used: Instant::now(),
            },
        );

        if let Some(old) = old {
            group.memory_use -= old.memory_use;
        }
        group.memory_use += memory_use;

        group.enforce_budget(Some(key.name_hash))
    }

    /// Remove one resource. Unless `force` is set, a resource still referenced outside the cache
    /// is kept.
    pub fn remove(
        &mut self,
        key: &ResourceKey,
        force: bool,
    ) -> bool {
        let Some(group) = self.groups.get_mut(&key.resource_type) else {
            return false;
        };

        match group.resources.get(&key.name_hash) {
            Some(loaded) if force || loaded.is_unused() => {}
            _ => return false,
        }

        if let Some(removed) = group.resources.remove(&key.name_hash) {
            log::debug!("Release resource {}", removed.name);
            group.memory_use -= removed.memory_use;
            true
        } else {
            false
        }
    }

    pub fn remove_group(
        &mut self,
        resource_type: ResourceTypeId,
        force: bool,
    ) -> usize {
        let Some(group) = self.groups.get_mut(&resource_type) else {
            return 0;
        };

        let count_before = group.resources.len();
        let mut released_memory = 0;
        group.resources.retain(|_, loaded| {
            let release = force || loaded.is_unused();
            if release {
                released_memory += loaded.memory_use;
            }
            !release
        });
        group.memory_use -= released_memory;

        count_before - group.resources.len()
    }

    pub fn remove_all(
        &mut self,
        force: bool,
    ) -> usize {
        let resource_types: Vec<_> = self.groups.keys().copied().collect();
        resource_types
            .into_iter()
            .map(|resource_type| self.remove_group(resource_type, force))
            .sum()
    }

    pub fn resources(
        &self,
        resource_type: ResourceTypeId,
    ) -> Vec<Arc<dyn Resource>> {
        self.groups
            .get(&resource_type)
            .map(|group| {
                group
                    .resources
                    .values()
                    .map(|loaded| loaded.resource.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn memory_use(
        &self,
        resource_type: ResourceTypeId,
    ) -> usize {
        self.groups
            .get(&resource_type)
            .map(|group| group.memory_use)
            .unwrap_or(0)
    }

    pub fn total_memory_use(&self) -> usize {
        self.groups.values().map(|group| group.memory_use).sum()
    }

    pub fn memory_budget(
        &self,
        resource_type: ResourceTypeId,
    ) -> usize {
        self.groups
            .get(&resource_type)
            .map(|group| group.memory_budget)
            .unwrap_or(0)
    }

    pub fn set_memory_budget(
        &mut self,
        resource_type: ResourceTypeId,
        budget: usize,
    ) -> usize {
        let group = self.groups.entry(resource_type).or_default();
        group.memory_budget = budget;
        group.enforce_budget(None)
    }
}
