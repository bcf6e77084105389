//! Priority-bucketed, insertion-ordered collection of resource items.

use super::item::ResourceItem;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared handle to any resource item.
pub type ItemHandle = Arc<dyn ResourceItem>;

/// Items grouped by spine priority.
///
/// Iteration visits priorities in ascending order and, within one priority, items in the order
/// they were appended. Filtering never touches the stored order.
#[derive(Debug, Default)]
pub struct ItemGroup {
    buckets: BTreeMap<u32, Vec<ItemHandle>>,
    len: usize,
}

impl ItemGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, item: ItemHandle) {
        self.buckets
            .entry(item.spine_priority())
            .or_default()
            .push(item);
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Every item, priority first, then push order.
    pub fn iter(&self) -> impl Iterator<Item = &ItemHandle> + '_ {
        self.buckets.values().flatten()
    }

    /// Items accepted by `predicate`, in the same order as [ItemGroup::iter].
    ///
    /// Each call owns its predicate, so independent iterations never share filter state.
    pub fn iter_filtered<'a, P>(&'a self, predicate: P) -> impl Iterator<Item = &'a ItemHandle> + 'a
    where
        P: Fn(&dyn ResourceItem) -> bool + 'a,
    {
        self.iter().filter(move |item| predicate(item.as_ref()))
    }
}

/// Predicate selecting items that belong to the reading order.
pub fn in_spine(item: &dyn ResourceItem) -> bool {
    item.spine_priority() > 0
}
