//! Bounded cache of live cell contents.

use super::contents::CellContents;
use crate::id::CellId;
use std::collections::HashMap;

#[derive(Debug)]
struct Entry {
    contents: CellContents,
    last_used: u64,
}

/// Holds the editable contents of recently used cells.
///
/// Only clean contents are evicted, least recently used first. Evicted
/// contents are rebuilt from the cell's revision on the next access.
#[derive(Debug)]
pub(crate) struct LiveCache {
    capacity: usize,
    tick: u64,
    entries: HashMap<CellId, Entry>,
}

impl LiveCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, cell: CellId) -> bool {
        self.entries.contains_key(&cell)
    }

    /// Looks at an entry without marking it used.
    pub fn peek(&self, cell: CellId) -> Option<&CellContents> {
        self.entries.get(&cell).map(|e| &e.contents)
    }

    pub fn get_mut(&mut self, cell: CellId) -> Option<&mut CellContents> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(&cell).map(|e| {
            e.last_used = tick;
            &mut e.contents
        })
    }

    /// Inserts contents, then evicts clean entries other than `cell` while
    /// over capacity.
    pub fn insert(&mut self, cell: CellId, contents: CellContents) {
        self.tick += 1;
        self.entries.insert(
            cell,
            Entry {
                contents,
                last_used: self.tick,
            },
        );
        self.evict(Some(cell));
    }

    pub fn remove(&mut self, cell: CellId) -> Option<CellContents> {
        self.entries.remove(&cell).map(|e| e.contents)
    }

    /// Marks every entry clean and trims the cache back to capacity.
    pub fn mark_all_clean(&mut self) {
        for entry in self.entries.values_mut() {
            entry.contents.mark_clean();
        }
        self.evict(None);
    }

    fn evict(&mut self, keep: Option<CellId>) {
        while self.entries.len() > self.capacity {
            let victim = self
                .entries
                .iter()
                .filter(|(id, e)| Some(**id) != keep && !e.contents.is_dirty())
                .min_by_key(|(_, e)| e.last_used)
                .map(|(id, _)| *id);
            let Some(victim) = victim else { break };
            self.entries.remove(&victim);
            tracing::trace!(cell = %victim, "evicted live contents");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::World;

    #[test]
    fn evicts_least_recently_used_clean_entry() {
        let w = World::new();
        let revs: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|n| w.revision(n, Vec::new(), Vec::new()))
            .collect();
        let mut cache = LiveCache::new(2);
        cache.insert(revs[0].cell_id(), CellContents::from_revision(&revs[0]));
        cache.insert(revs[1].cell_id(), CellContents::from_revision(&revs[1]));
        cache.get_mut(revs[0].cell_id());
        cache.insert(revs[2].cell_id(), CellContents::from_revision(&revs[2]));
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(revs[0].cell_id()));
        assert!(!cache.contains(revs[1].cell_id()));
        assert!(cache.contains(revs[2].cell_id()));
    }

    #[test]
    fn dirty_entries_stay() {
        let w = World::new();
        let a = w.revision("a", Vec::new(), Vec::new());
        let b = w.revision("b", Vec::new(), Vec::new());
        let mut cache = LiveCache::new(1);
        cache.insert(a.cell_id(), CellContents::from_revision(&a));
        cache
            .get_mut(a.cell_id())
            .unwrap()
            .add_node(w.pin(0, "pin@0", 0, 0))
            .unwrap();
        cache.insert(b.cell_id(), CellContents::from_revision(&b));
        assert_eq!(cache.len(), 2);

        cache.mark_all_clean();
        assert_eq!(cache.len(), 1);
        assert!(!cache.contains(a.cell_id()));
        assert!(cache.peek(b.cell_id()).is_some_and(|c| !c.is_dirty()));
    }

    #[test]
    fn removed_entry_hands_back_dirty_contents() {
        let w = World::new();
        let a = w.revision("a", Vec::new(), Vec::new());
        let mut cache = LiveCache::new(1);
        cache.insert(a.cell_id(), CellContents::from_revision(&a));
        cache
            .get_mut(a.cell_id())
            .unwrap()
            .add_node(w.pin(0, "pin@0", 0, 0))
            .unwrap();
        let removed = cache.remove(a.cell_id()).unwrap();
        assert!(removed.is_dirty());
        assert_eq!(cache.len(), 0);
        assert!(cache.remove(a.cell_id()).is_none());
    }
}
