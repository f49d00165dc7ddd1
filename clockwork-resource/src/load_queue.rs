use crate::{LoadState, Resource, ResourceError, ResourceResult};
use clockwork_base::hashing::{HashMap, HashSet};
use clockwork_base::ResourceKey;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug)]
pub(crate) enum ItemState {
    // Waiting for a thread to pick it up and parse it
    Queued,
    // A thread is running begin_load
    Loading,
    // begin_load succeeded, waiting on dependencies and then finalize
    Parsed,
    // begin_load failed (or the item was on a dependency cycle). Ready to finalize immediately.
    Failed(ResourceError),
    // A thread is running end_load/publishing
    Finalizing,
}

pub(crate) struct BackgroundLoadItem {
    pub name: String,
    // Taken out while the item is being parsed or finalized so no lock is held across resource code
    pub resource: Option<Box<dyn Resource>>,
    pub state: ItemState,
    // Keys this item is waiting on
    pub dependencies: HashSet<ResourceKey>,
    // Keys waiting on this item
    pub dependents: HashSet<ResourceKey>,
    pub send_event_on_failure: bool,
    // False for loads that run immediately on the requesting thread
    pub background: bool,
    // Threads blocked on this item that will read its result once it is finalized
    pub waiters: usize,
    // Dependencies that were already published, held so memory budgets can't release them before
    // this item finalizes
    pub pinned: Vec<Arc<dyn Resource>>,
}

impl BackgroundLoadItem {
    pub fn new(
        name: String,
        resource: Box<dyn Resource>,
        send_event_on_failure: bool,
        background: bool,
    ) -> Self {
        BackgroundLoadItem {
            name,
            resource: Some(resource),
            state: ItemState::Queued,
            dependencies: Default::default(),
            dependents: Default::default(),
            send_event_on_failure,
            background,
            waiters: 0,
            pinned: Vec::default(),
        }
    }

    fn is_parsed(&self) -> bool {
        matches!(self.state, ItemState::Parsed | ItemState::Failed(_))
    }

    fn is_ready_to_finalize(&self) -> bool {
        match self.state {
            ItemState::Parsed => self.dependencies.is_empty(),
            ItemState::Failed(_) => true,
            _ => false,
        }
    }
}

pub(crate) enum WaitStep {
    // No longer in the queue, it was finalized (or never queued)
    Gone,
    // Still queued, the waiting thread can parse it itself
    Parse,
    // Another thread is parsing or finalizing it
    Block,
    Finalize,
    // Parsed, but these dependencies have to finalize first
    FinishDependencies(Vec<ResourceKey>),
}

/// An item claimed for parsing. The resource is owned by the parsing thread until handed back
/// with `LoadQueue::finish_parse`.
pub(crate) struct ParseJob {
    pub key: ResourceKey,
    pub name: String,
    pub resource: Box<dyn Resource>,
    pub background: bool,
}

/// An item claimed for finalizing. It stays in the queue (so other threads keep waiting on it)
/// until `LoadQueue::complete_finalize` is called.
pub(crate) struct PendingFinalize {
    pub key: ResourceKey,
    pub name: String,
    pub resource: Box<dyn Resource>,
    pub parse_result: ResourceResult<()>,
    pub send_event_on_failure: bool,
    pub background: bool,
}

// The result of a finalized item, kept until every waiter has read it
struct FinishedLoad {
    result: ResourceResult<Arc<dyn Resource>>,
    waiters: usize,
}

/// All in-flight loads, at most one per key. Not thread-safe on its own, the cache keeps it
/// behind a mutex paired with a condvar that is signalled whenever an item changes state.
#[derive(Default)]
pub(crate) struct LoadQueue {
    items: HashMap<ResourceKey, BackgroundLoadItem>,
    // Keys in the order they were queued for the worker. May contain keys that were since claimed
    // by a waiting thread.
    queued: VecDeque<ResourceKey>,
    finished: HashMap<ResourceKey, FinishedLoad>,
}

impl LoadQueue {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn contains(
        &self,
        key: &ResourceKey,
    ) -> bool {
        self.items.contains_key(key)
    }

    pub fn get(
        &self,
        key: &ResourceKey,
    ) -> Option<&BackgroundLoadItem> {
        self.items.get(key)
    }

    // Returns false if the key is already in flight
    pub fn insert(
        &mut self,
        key: ResourceKey,
        item: BackgroundLoadItem,
    ) -> bool {
        if self.items.contains_key(&key) {
            return false;
        }

        self.queued.push_back(key);
        self.items.insert(key, item);
        true
    }

    /// Insert an item and claim it for parsing on the calling thread in one step. It never enters
    /// the worker's queue.
    pub fn insert_claimed(
        &mut self,
        key: ResourceKey,
        item: BackgroundLoadItem,
    ) -> Option<ParseJob> {
        if self.items.contains_key(&key) {
            return None;
        }

        self.items.insert(key, item);
        self.claim(&key)
    }

    #[cfg(test)]
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Register a thread that will block until `key` is finalized. Returns false if it isn't in
    /// flight.
    pub fn add_waiter(
        &mut self,
        key: &ResourceKey,
    ) -> bool {
        match self.items.get_mut(key) {
            Some(item) => {
                item.waiters += 1;
                true
            }
            None => false,
        }
    }

    // For a waiter that finalizes the item itself and so already has the result
    pub fn remove_waiter(
        &mut self,
        key: &ResourceKey,
    ) {
        if let Some(item) = self.items.get_mut(key) {
            item.waiters = item.waiters.saturating_sub(1);
        }
    }

    /// The result handed to a registered waiter after another thread finalized the item
    pub fn take_finished(
        &mut self,
        key: &ResourceKey,
    ) -> Option<ResourceResult<Arc<dyn Resource>>> {
        let finished = self.finished.get_mut(key)?;
        finished.waiters -= 1;
        if finished.waiters == 0 {
            self.finished.remove(key).map(|finished| finished.result)
        } else {
            Some(finished.result.clone())
        }
    }

    /// Record that `dependent` must not finalize before `dependency`. Both must be in the queue.
    pub fn link_dependency(
        &mut self,
        dependency: ResourceKey,
        dependent: ResourceKey,
    ) -> bool {
        if dependency == dependent {
            log::warn!("Resource {} requested itself as a dependency", dependent);
            return false;
        }

        if !self.items.contains_key(&dependency) {
            return false;
        }

        match self.items.get_mut(&dependent) {
            Some(item) => {
                item.dependencies.insert(dependency);
            }
            None => return false,
        }

        if let Some(item) = self.items.get_mut(&dependency) {
            item.dependents.insert(dependent);
        }

        true
    }

    pub fn take_next_queued(&mut self) -> Option<ParseJob> {
        while let Some(key) = self.queued.pop_front() {
            if let Some(job) = self.claim(&key) {
                return Some(job);
            }
        }

        None
    }

    /// Claim a specific queued item for parsing on the calling thread
    pub fn claim(
        &mut self,
        key: &ResourceKey,
    ) -> Option<ParseJob> {
        let item = self.items.get_mut(key)?;
        if !matches!(item.state, ItemState::Queued) {
            return None;
        }

        let resource = item.resource.take()?;
        item.state = ItemState::Loading;
        Some(ParseJob {
            key: *key,
            name: item.name.clone(),
            resource,
            background: item.background,
        })
    }

    pub fn finish_parse(
        &mut self,
        key: &ResourceKey,
        resource: Box<dyn Resource>,
        result: ResourceResult<()>,
    ) {
        if let Some(item) = self.items.get_mut(key) {
            item.resource = Some(resource);
            item.state = match result {
                Ok(()) => ItemState::Parsed,
                Err(error) => ItemState::Failed(error),
            };
        }
    }

    /// True if some item is queued, parsing or finalizing. Cycles are only looked for once this is
    /// false, since those items may still add or remove edges.
    pub fn has_unparsed(&self) -> bool {
        self.items.values().any(|item| !item.is_parsed())
    }

    /// Any item that can be finalized right now
    pub fn next_ready(&self) -> Option<ResourceKey> {
        self.items
            .iter()
            .find(|(_, item)| item.is_ready_to_finalize())
            .map(|(key, _)| *key)
    }

    #[cfg(test)]
    pub fn is_ready_to_finalize(
        &self,
        key: &ResourceKey,
    ) -> bool {
        self.items
            .get(key)
            .map(|item| item.is_ready_to_finalize())
            .unwrap_or(false)
    }

    /// What a thread blocked on `key` should do next
    pub fn wait_step(
        &self,
        key: &ResourceKey,
    ) -> WaitStep {
        let Some(item) = self.items.get(key) else {
            return WaitStep::Gone;
        };

        match item.state {
            ItemState::Queued => WaitStep::Parse,
            ItemState::Loading | ItemState::Finalizing => WaitStep::Block,
            ItemState::Failed(_) => WaitStep::Finalize,
            ItemState::Parsed => {
                if item.dependencies.is_empty() {
                    WaitStep::Finalize
                } else {
                    WaitStep::FinishDependencies(item.dependencies.iter().copied().collect())
                }
            }
        }
    }

    pub fn begin_finalize(
        &mut self,
        key: &ResourceKey,
    ) -> Option<PendingFinalize> {
        let item = self.items.get_mut(key)?;
        if !item.is_ready_to_finalize() {
            return None;
        }

        let resource = item.resource.take()?;
        let parse_result = match std::mem::replace(&mut item.state, ItemState::Finalizing) {
            ItemState::Failed(error) => Err(error),
            _ => Ok(()),
        };

        Some(PendingFinalize {
            key: *key,
            name: item.name.clone(),
            resource,
            parse_result,
            send_event_on_failure: item.send_event_on_failure,
            background: item.background,
        })
    }

    /// Remove a finalized item and release everything that was waiting on it. A published
    /// resource is pinned on each dependent until that dependent finalizes, and the result is kept
    /// for any threads blocked on the item.
    pub fn complete_finalize(
        &mut self,
        key: &ResourceKey,
        result: &ResourceResult<Arc<dyn Resource>>,
    ) -> Option<BackgroundLoadItem> {
        let item = self.items.remove(key)?;
        for dependent in &item.dependents {
            if let Some(dependent_item) = self.items.get_mut(dependent) {
                dependent_item.dependencies.remove(key);
                if let Ok(resource) = result {
                    dependent_item.pinned.push(resource.clone());
                }
            }
        }

        // A failed item may finalize before its own dependencies
        for dependency in &item.dependencies {
            if let Some(dependency_item) = self.items.get_mut(dependency) {
                dependency_item.dependents.remove(key);
            }
        }

        if item.waiters > 0 {
            // A requeued key can finish again before every earlier waiter woke up
            let finished = self.finished.entry(*key).or_insert_with(|| FinishedLoad {
                result: result.clone(),
                waiters: 0,
            });
            finished.result = result.clone();
            finished.waiters += item.waiters;
        }

        Some(item)
    }

    pub fn fail(
        &mut self,
        key: &ResourceKey,
        error: ResourceError,
    ) -> bool {
        match self.items.get_mut(key) {
            Some(item) if matches!(item.state, ItemState::Parsed) => {
                item.state = ItemState::Failed(error);
                true
            }
            _ => false,
        }
    }

    /// Fail every item on a dependency cycle. Only cycles whose members have all been parsed are
    /// considered, members still loading could add more edges. Returns the number of items failed.
    pub fn break_dependency_cycles(&mut self) -> usize {
        let mut failed_count = 0;
        for cycle in self.dependency_cycles() {
            if !cycle
                .iter()
                .all(|key| self.items.get(key).map(|x| x.is_parsed()).unwrap_or(false))
            {
                continue;
            }

            let members: HashSet<ResourceKey> = cycle.iter().copied().collect();
            for key in &cycle {
                if let Some(item) = self.items.get_mut(key) {
                    item.dependencies.retain(|x| !members.contains(x));
                    item.dependents.retain(|x| !members.contains(x));
                    if matches!(item.state, ItemState::Parsed) {
                        log::warn!("Resource {} is part of a dependency cycle", item.name);
                        item.state =
                            ItemState::Failed(ResourceError::DependencyCycle(item.name.clone()));
                        failed_count += 1;
                    }
                }
            }
        }

        failed_count
    }

    // Strongly connected components of the dependency graph with more than one member (Tarjan's
    // algorithm, with an explicit stack)
    fn dependency_cycles(&self) -> Vec<Vec<ResourceKey>> {
        let successors = |key: &ResourceKey| -> Vec<ResourceKey> {
            self.items
                .get(key)
                .map(|item| {
                    item.dependencies
                        .iter()
                        .copied()
                        .filter(|x| self.items.contains_key(x))
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut indices: HashMap<ResourceKey, usize> = Default::default();
        let mut lowlinks: HashMap<ResourceKey, usize> = Default::default();
        let mut on_stack: HashSet<ResourceKey> = Default::default();
        let mut stack: Vec<ResourceKey> = Vec::default();
        let mut next_index = 0;
        let mut components = Vec::default();

        for root in self.items.keys() {
            if indices.contains_key(root) {
                continue;
            }

            indices.insert(*root, next_index);
            lowlinks.insert(*root, next_index);
            next_index += 1;
            stack.push(*root);
            on_stack.insert(*root);
            let mut call_stack = vec![(*root, successors(root), 0usize)];

            while let Some(frame) = call_stack.last_mut() {
                let node = frame.0;
                if frame.2 < frame.1.len() {
                    let next = frame.1[frame.2];
                    frame.2 += 1;

                    if !indices.contains_key(&next) {
                        indices.insert(next, next_index);
                        lowlinks.insert(next, next_index);
                        next_index += 1;
                        stack.push(next);
                        on_stack.insert(next);
                        call_stack.push((next, successors(&next), 0));
                    } else if on_stack.contains(&next) {
                        let lowlink = lowlinks[&node].min(indices[&next]);
                        lowlinks.insert(node, lowlink);
                    }
                } else {
                    call_stack.pop();
                    if let Some(parent) = call_stack.last() {
                        let lowlink = lowlinks[&parent.0].min(lowlinks[&node]);
                        lowlinks.insert(parent.0, lowlink);
                    }

                    if lowlinks[&node] == indices[&node] {
                        let mut component = Vec::default();
                        while let Some(member) = stack.pop() {
                            on_stack.remove(&member);
                            component.push(member);
                            if member == node {
                                break;
                            }
                        }

                        if component.len() > 1 {
                            components.push(component);
                        }
                    }
                }
            }
        }

        components
    }

    pub fn load_state(
        &self,
        key: &ResourceKey,
    ) -> Option<LoadState> {
        self.items.get(key).map(|item| match item.state {
            ItemState::Queued => LoadState::Queued,
            ItemState::Loading => LoadState::Loading,
            ItemState::Parsed | ItemState::Failed(_) | ItemState::Finalizing => {
                LoadState::WaitingForFinalize
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LoadContext;
    use clockwork_base::ResourceTypeId;
    use std::io::Read;

    struct Blob;

    impl Resource for Blob {
        fn begin_load(
            &mut self,
            _stream: &mut dyn Read,
            _ctx: &LoadContext,
        ) -> ResourceResult<()> {
            Ok(())
        }
    }

    fn key(name: &str) -> ResourceKey {
        ResourceKey::new(ResourceTypeId::from_u128(1), name)
    }

    fn queue_item(
        queue: &mut LoadQueue,
        name: &str,
    ) -> ResourceKey {
        let key = key(name);
        assert!(queue.insert(
            key,
            BackgroundLoadItem::new(name.to_string(), Box::new(Blob), true, true)
        ));
        key
    }

    fn parse(
        queue: &mut LoadQueue,
        key: &ResourceKey,
        result: ResourceResult<()>,
    ) {
        let job = queue.claim(key).unwrap();
        queue.finish_parse(key, job.resource, result);
    }

    // Finalize the way the cache does, publishing the resource if it parsed
    fn finalize_resource(
        queue: &mut LoadQueue,
        key: &ResourceKey,
    ) -> ResourceResult<Arc<dyn Resource>> {
        let pending = queue.begin_finalize(key).unwrap();
        let resource: Arc<dyn Resource> = Arc::from(pending.resource);
        let result = pending.parse_result.map(|()| resource);
        queue.complete_finalize(key, &result).unwrap();
        result
    }

    fn finalize(
        queue: &mut LoadQueue,
        key: &ResourceKey,
    ) -> ResourceResult<()> {
        finalize_resource(queue, key).map(|_| ())
    }

    #[test]
    fn one_item_per_key() {
        let mut queue = LoadQueue::default();
        let a = queue_item(&mut queue, "a");
        assert!(!queue.insert(
            a,
            BackgroundLoadItem::new("a".to_string(), Box::new(Blob), true, true)
        ));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.load_state(&a), Some(LoadState::Queued));
    }

    #[test]
    fn immediate_items_are_never_handed_to_the_worker() {
        let mut queue = LoadQueue::default();
        let a = key("a");
        let job = queue
            .insert_claimed(
                a,
                BackgroundLoadItem::new("a".to_string(), Box::new(Blob), true, false),
            )
            .unwrap();
        assert!(!job.background);
        assert_eq!(queue.load_state(&a), Some(LoadState::Loading));
        assert!(queue.take_next_queued().is_none());
        assert!(queue
            .insert_claimed(
                a,
                BackgroundLoadItem::new("a".to_string(), Box::new(Blob), true, false)
            )
            .is_none());
    }

    #[test]
    fn immediate_items_leave_nothing_for_the_worker() {
        let mut queue = LoadQueue::default();
        for i in 0..100 {
            let k = key(&format!("immediate {}", i));
            let job = queue
                .insert_claimed(
                    k,
                    BackgroundLoadItem::new(format!("immediate {}", i), Box::new(Blob), true, false),
                )
                .unwrap();
            queue.finish_parse(&k, job.resource, Ok(()));
            assert!(finalize(&mut queue, &k).is_ok());
        }

        assert_eq!(queue.len(), 0);
        assert_eq!(queue.queued_len(), 0);
    }

    #[test]
    fn queued_items_are_taken_in_order() {
        let mut queue = LoadQueue::default();
        let a = queue_item(&mut queue, "a");
        let b = queue_item(&mut queue, "b");
        let c = queue_item(&mut queue, "c");

        // Claimed by a waiting thread, so the worker skips it
        let claimed = queue.claim(&b).unwrap();
        assert_eq!(queue.load_state(&b), Some(LoadState::Loading));

        assert_eq!(queue.take_next_queued().unwrap().key, a);
        assert_eq!(queue.take_next_queued().unwrap().key, c);
        assert!(queue.take_next_queued().is_none());
        queue.finish_parse(&b, claimed.resource, Ok(()));
        assert_eq!(queue.load_state(&b), Some(LoadState::WaitingForFinalize));
    }

    #[test]
    fn links_require_both_items() {
        let mut queue = LoadQueue::default();
        let a = queue_item(&mut queue, "a");
        let b = queue_item(&mut queue, "b");

        assert!(!queue.link_dependency(a, a));
        assert!(!queue.link_dependency(key("missing"), a));
        assert!(!queue.link_dependency(a, key("missing")));
        assert!(queue.link_dependency(b, a));

        assert!(queue.get(&a).unwrap().dependencies.contains(&b));
        assert!(queue.get(&b).unwrap().dependents.contains(&a));
    }

    #[test]
    fn dependent_waits_for_dependency() {
        let mut queue = LoadQueue::default();
        let a = queue_item(&mut queue, "a");
        let b = queue_item(&mut queue, "b");
        queue.link_dependency(b, a);

        parse(&mut queue, &a, Ok(()));
        assert!(!queue.is_ready_to_finalize(&a));
        assert!(queue.next_ready().is_none());
        assert!(queue.begin_finalize(&a).is_none());

        parse(&mut queue, &b, Ok(()));
        assert_eq!(queue.next_ready(), Some(b));
        assert!(finalize(&mut queue, &b).is_ok());

        assert_eq!(queue.next_ready(), Some(a));
        assert!(finalize(&mut queue, &a).is_ok());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn published_dependencies_are_pinned_until_the_dependent_finalizes() {
        let mut queue = LoadQueue::default();
        let a = queue_item(&mut queue, "a");
        let b = queue_item(&mut queue, "b");
        queue.link_dependency(b, a);
        parse(&mut queue, &a, Ok(()));
        parse(&mut queue, &b, Ok(()));

        let b_resource = finalize_resource(&mut queue, &b).unwrap();
        assert_eq!(queue.get(&a).unwrap().pinned.len(), 1);
        assert_eq!(Arc::strong_count(&b_resource), 2);

        assert!(finalize(&mut queue, &a).is_ok());
        assert_eq!(Arc::strong_count(&b_resource), 1);
    }

    #[test]
    fn waiters_receive_the_finalized_result() {
        let mut queue = LoadQueue::default();
        let a = queue_item(&mut queue, "a");
        assert!(!queue.add_waiter(&key("missing")));
        assert!(queue.add_waiter(&a));
        assert!(queue.add_waiter(&a));
        parse(&mut queue, &a, Ok(()));

        let published = finalize_resource(&mut queue, &a).unwrap();
        let first = queue.take_finished(&a).unwrap().unwrap();
        let second = queue.take_finished(&a).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &published));
        assert!(Arc::ptr_eq(&second, &published));
        assert!(queue.take_finished(&a).is_none());

        // A waiter that finalizes the item itself doesn't leave a result behind
        let b = queue_item(&mut queue, "b");
        assert!(queue.add_waiter(&b));
        parse(&mut queue, &b, Err("bad data".into()));
        queue.remove_waiter(&b);
        assert!(finalize(&mut queue, &b).is_err());
        assert!(queue.take_finished(&b).is_none());
    }

    #[test]
    fn failed_dependency_still_releases_dependents() {
        let mut queue = LoadQueue::default();
        let a = queue_item(&mut queue, "a");
        let b = queue_item(&mut queue, "b");
        queue.link_dependency(b, a);

        parse(&mut queue, &a, Ok(()));
        parse(&mut queue, &b, Err("bad data".into()));

        assert!(finalize(&mut queue, &b).is_err());
        assert!(queue.get(&a).unwrap().dependencies.is_empty());
        assert!(finalize(&mut queue, &a).is_ok());
    }

    #[test]
    fn cycles_fail_every_parsed_member() {
        let mut queue = LoadQueue::default();
        let a = queue_item(&mut queue, "a");
        let b = queue_item(&mut queue, "b");
        let c = queue_item(&mut queue, "c");
        let outside = queue_item(&mut queue, "outside");
        queue.link_dependency(b, a);
        queue.link_dependency(c, b);
        queue.link_dependency(a, c);
        queue.link_dependency(a, outside);

        parse(&mut queue, &a, Ok(()));
        parse(&mut queue, &b, Ok(()));
        parse(&mut queue, &outside, Ok(()));

        // c is still queued, so the cycle is left alone for now
        assert!(queue.has_unparsed());
        assert_eq!(queue.break_dependency_cycles(), 0);
        assert!(queue.next_ready().is_none());

        parse(&mut queue, &c, Ok(()));
        assert!(!queue.has_unparsed());
        assert_eq!(queue.break_dependency_cycles(), 3);
        assert_eq!(queue.break_dependency_cycles(), 0);

        for key in [a, b, c] {
            assert!(matches!(
                finalize(&mut queue, &key),
                Err(ResourceError::DependencyCycle(_))
            ));
        }

        // Depended on a cycle member but was not part of the cycle
        assert!(queue.is_ready_to_finalize(&outside));
        assert!(finalize(&mut queue, &outside).is_ok());
    }

    #[test]
    fn explicit_failure_only_applies_to_parsed_items() {
        let mut queue = LoadQueue::default();
        let a = queue_item(&mut queue, "a");
        assert!(!queue.fail(&a, ResourceError::LoadFailed("a".to_string())));
        parse(&mut queue, &a, Ok(()));
        assert!(queue.fail(&a, ResourceError::LoadFailed("a".to_string())));
        assert!(finalize(&mut queue, &a).is_err());
    }
}
